//! Outcome state for a single traced execution

use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error as StdError;
use std::time::Duration;

/// Upper bound on the formatted trace kept in a failure snapshot.
const MAX_TRACE_LEN: usize = 4096;

/// Terminal (and transitional) states of a task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Not yet executed.
    Pending,
    /// The body is running.
    Started,
    /// The body returned normally.
    Success,
    /// The body (or a side effect of success handling) failed.
    Failure,
    /// The body asked to be retried.
    Retry,
    /// The body asked for its message to be rejected.
    Rejected,
    /// The body asked to be dropped silently.
    Ignored,
}

impl TaskState {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Retry => "retry",
            Self::Rejected => "rejected",
            Self::Ignored => "ignored",
        }
    }
}

/// Bounded snapshot of an error captured during tracing.
///
/// Owns only strings: no live references to task arguments or execution
/// state survive classification. `internal` marks faults that originated in
/// the tracing machinery or the result backend rather than in user code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedFailure {
    /// Stable error-kind tag.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Formatted source chain, truncated to a fixed bound.
    pub trace: String,
    /// True when the fault is ours, not the user's.
    pub internal: bool,
}

impl CapturedFailure {
    /// Snapshot a task error. The caller drops the live error afterwards.
    pub fn from_error(err: &TaskError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            trace: format_chain(err),
            internal: false,
        }
    }

    /// Snapshot an infrastructure fault.
    pub fn internal(kind: impl Into<String>, err: &dyn StdError) -> Self {
        Self {
            kind: kind.into(),
            message: err.to_string(),
            trace: format_chain(err),
            internal: true,
        }
    }

    /// Drop the formatted trace, keeping only kind and message.
    ///
    /// Used for control-signal snapshots where the trace carries no
    /// information worth retaining.
    pub fn clear_trace(mut self) -> Self {
        self.trace.clear();
        self
    }
}

impl std::fmt::Display for CapturedFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Format an error and its source chain into a bounded string.
fn format_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\n  caused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    if out.len() > MAX_TRACE_LEN {
        let mut end = MAX_TRACE_LEN;
        while !out.is_char_boundary(end) {
            end -= 1;
        }
        out.truncate(end);
    }
    out
}

/// Single source of truth for what happened to one execution attempt.
///
/// Set exactly once by the tracer. A failure snapshot is attached iff the
/// state is FAILURE, RETRY, REJECTED or IGNORED.
#[derive(Debug, Clone)]
pub struct TraceInfo {
    /// Terminal state of the attempt.
    pub state: TaskState,
    /// Return value recorded with the state (the retry payload, for RETRY).
    pub retval: Option<Value>,
    /// Captured failure, when the state carries one.
    pub failure: Option<CapturedFailure>,
}

impl TraceInfo {
    /// Create an outcome holder in the given initial state.
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            retval: None,
            failure: None,
        }
    }

    pub(crate) fn failed(state: TaskState, retval: Option<Value>, failure: CapturedFailure) -> Self {
        Self {
            state,
            retval,
            failure: Some(failure),
        }
    }
}

impl Default for TraceInfo {
    fn default() -> Self {
        Self::new(TaskState::Pending)
    }
}

/// What a tracer call returns: the value, the outcome, and the elapsed
/// runtime. `info` is `None` on success and on a deduplication skip.
#[derive(Debug, Clone)]
pub struct Traced {
    /// Return value of the body on success.
    pub retval: Option<Value>,
    /// Outcome record for non-success states.
    pub info: Option<TraceInfo>,
    /// Wall-clock time spent in the body.
    pub runtime: Duration,
}

impl Traced {
    /// Successful execution.
    pub(crate) fn ok(retval: Value, runtime: Duration) -> Self {
        Self {
            retval: Some(retval),
            info: None,
            runtime,
        }
    }

    /// No-op result for a deduplicated redelivery.
    pub(crate) fn skipped() -> Self {
        Self {
            retval: None,
            info: None,
            runtime: Duration::ZERO,
        }
    }

    /// State of this attempt; `Success` when no outcome record was attached.
    pub fn state(&self) -> TaskState {
        self.info.as_ref().map_or(TaskState::Success, |i| i.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_serialize() {
        assert_eq!(
            serde_json::to_string(&TaskState::Success).unwrap(),
            "\"SUCCESS\""
        );
        assert_eq!(
            serde_json::to_string(&TaskState::Retry).unwrap(),
            "\"RETRY\""
        );
        assert_eq!(
            serde_json::to_string(&TaskState::Rejected).unwrap(),
            "\"REJECTED\""
        );
    }

    #[test]
    fn test_task_state_labels() {
        assert_eq!(TaskState::Failure.as_label(), "failure");
        assert_eq!(TaskState::Ignored.as_label(), "ignored");
    }

    #[test]
    fn test_captured_failure_from_error() {
        let err = TaskError::failure("KeyError", "missing key 'foo'");
        let failure = CapturedFailure::from_error(&err);
        assert_eq!(failure.kind, "KeyError");
        assert!(failure.message.contains("missing key"));
        assert!(!failure.internal);
        assert!(!failure.trace.is_empty());
    }

    #[test]
    fn test_captured_failure_internal_walks_sources() {
        let err = crate::error::TraceError::Cleanup(crate::error::BackendError::failed("boom"));
        let failure = CapturedFailure::internal("TraceError", &err);
        assert!(failure.internal);
        assert!(failure.trace.contains("caused by"));
    }

    #[test]
    fn test_captured_failure_clear_trace() {
        let err = TaskError::Ignore;
        let failure = CapturedFailure::from_error(&err).clear_trace();
        assert!(failure.trace.is_empty());
        assert_eq!(failure.kind, "Ignore");
    }

    #[test]
    fn test_trace_info_defaults_to_pending() {
        let info = TraceInfo::default();
        assert_eq!(info.state, TaskState::Pending);
        assert!(info.retval.is_none());
        assert!(info.failure.is_none());
    }

    #[test]
    fn test_traced_state() {
        let ok = Traced::ok(serde_json::json!(4), Duration::from_millis(1));
        assert_eq!(ok.state(), TaskState::Success);

        let err = TaskError::failure("KeyError", "nope");
        let failed = Traced {
            retval: None,
            info: Some(TraceInfo::failed(
                TaskState::Failure,
                None,
                CapturedFailure::from_error(&err),
            )),
            runtime: Duration::ZERO,
        };
        assert_eq!(failed.state(), TaskState::Failure);
    }

    #[test]
    fn test_skipped_is_empty() {
        let skipped = Traced::skipped();
        assert!(skipped.retval.is_none());
        assert!(skipped.info.is_none());
        assert_eq!(skipped.runtime, Duration::ZERO);
    }
}
