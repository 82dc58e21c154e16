//! Worker-level configuration flags consumed by the tracer

/// Deployment-wide configuration supplied by the application.
///
/// The registry hands this to every tracer it builds; individual tasks carry
/// their own flags in [`TaskOptions`](crate::task::TaskOptions).
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    /// Skip re-execution of acknowledge-late tasks that already completed
    /// successfully in this process or in the result backend.
    pub deduplicate_successful_tasks: bool,
    /// Forward the delivery priority of a task to the callbacks and chain
    /// stages it spawns.
    pub inherit_parent_priority: bool,
}
