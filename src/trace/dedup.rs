//! Deduplication of redelivered acknowledge-late tasks

use crate::config::WorkerConfig;
use crate::error::BackendError;
use crate::task::descriptor::RegisteredTask;
use crate::task::request::Request;
use crate::trace::outcome::TaskState;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::debug;

/// Process-wide set of task ids that completed successfully under
/// acknowledge-late semantics.
///
/// Grows-only from the tracer's perspective: entries are added on success
/// and cleared externally when the broker acknowledgement lands. Adds and
/// membership checks are linearizable; a momentarily missing entry is fine
/// because the backend query is the authoritative fallback.
#[derive(Debug, Default)]
pub struct SuccessSet {
    ids: Mutex<HashSet<String>>,
}

impl SuccessSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed task id. Returns false if it was already present.
    pub fn insert(&self, task_id: &str) -> bool {
        self.ids.lock().insert(task_id.to_string())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.ids.lock().contains(task_id)
    }

    /// External acknowledgement-driven cleanup hook.
    pub fn clear(&self) {
        self.ids.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}

/// Decide whether a redelivered message must be skipped.
///
/// Applies only to acknowledge-late tasks in deployments with successful-task
/// deduplication enabled, and only to deliveries the broker flagged as
/// redelivered. The in-process set is the fast path; the result backend is
/// the authority after a process restart. A `NotFound` from the backend
/// means the task never completed and execution proceeds, as does any state
/// other than SUCCESS or any other backend error.
pub async fn should_skip(
    task_id: &str,
    task: &RegisteredTask,
    request: &Request,
    config: &WorkerConfig,
    successes: &SuccessSet,
) -> bool {
    if !(task.options.acks_late
        && config.deduplicate_successful_tasks
        && request.delivery_info.redelivered)
    {
        return false;
    }
    if successes.contains(task_id) {
        return true;
    }
    match task.backend().query_state(task_id).await {
        Ok(TaskState::Success) => true,
        Ok(state) => {
            debug!(task_id, state = state.as_label(), "redelivered task not yet successful");
            false
        }
        Err(BackendError::NotFound { .. }) => false,
        Err(e) => {
            debug!(task_id, error = %e, "result backend unavailable for dedup check");
            false
        }
    }
}
