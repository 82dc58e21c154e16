//! Failure logging policy
//!
//! Pure classification of a captured failure into a logging policy, and the
//! mapping from policy onto log verbosity. Internal and unexpected failures
//! get the full captured trace; everything else logs tersely.

use crate::error::TaskError;
use crate::task::descriptor::TaskOptions;
use crate::trace::outcome::CapturedFailure;
use tracing::{debug, error, info, warn, Level};

/// How a failure should be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPolicy {
    /// The body asked for rejection.
    Reject,
    /// The body asked to be ignored.
    Ignore,
    /// The fault is ours, not the user's.
    Internal,
    /// The failure kind is in the task's `throws` set.
    Expected,
    /// Anything else.
    Unexpected,
}

impl LogPolicy {
    /// Verbosity this policy logs at.
    pub fn level(&self) -> Level {
        match self {
            Self::Reject => Level::WARN,
            Self::Ignore => Level::DEBUG,
            Self::Internal => Level::ERROR,
            Self::Expected => Level::INFO,
            Self::Unexpected => Level::ERROR,
        }
    }

    /// Whether the captured trace belongs in the log line.
    pub fn include_trace(&self) -> bool {
        matches!(self, Self::Internal | Self::Unexpected)
    }
}

/// Classify a failure for logging.
///
/// Rule order: reject and ignore signals first, then the internal marker,
/// then membership of the failure kind in the task's `throws` set.
pub fn resolve(options: &TaskOptions, error: &TaskError, internal: bool) -> LogPolicy {
    match error {
        TaskError::Reject { .. } => LogPolicy::Reject,
        TaskError::Ignore => LogPolicy::Ignore,
        _ if internal => LogPolicy::Internal,
        _ if options.throws.contains(error.kind()) => LogPolicy::Expected,
        _ => LogPolicy::Unexpected,
    }
}

/// Emit a log line for a failure per its resolved policy.
pub fn log_failure(policy: LogPolicy, task: &str, task_id: &str, failure: &CapturedFailure) {
    match policy {
        LogPolicy::Internal => {
            error!(task, task_id, kind = %failure.kind, trace = %failure.trace, "internal error while handling task");
        }
        LogPolicy::Unexpected => {
            error!(task, task_id, kind = %failure.kind, trace = %failure.trace, "task raised unexpected error: {}", failure.message);
        }
        LogPolicy::Expected => {
            info!(task, task_id, kind = %failure.kind, "task raised expected error: {}", failure.message);
        }
        LogPolicy::Reject => {
            warn!(task, task_id, "task rejected its message: {}", failure.message);
        }
        LogPolicy::Ignore => {
            debug!(task, task_id, "task ignored: {}", failure.message);
        }
    }
}
