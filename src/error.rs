//! Error types for the Taskwire execution core

use thiserror::Error;

/// Errors raised by (or into) a task body.
///
/// The first three variants are control signals, not failures: they steer the
/// tracer into the RETRY / IGNORED / REJECTED terminal states. `Fatal` is a
/// process-control signal the tracer never handles. Everything else is an
/// ordinary user failure.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task asked to be retried later.
    #[error("retry requested: {message}")]
    Retry { message: String },

    /// The task asked to be dropped without recording a result.
    #[error("task ignored")]
    Ignore,

    /// The task asked for its message to be rejected (dead-lettered or requeued).
    #[error("task rejected (requeue={requeue})")]
    Reject { requeue: bool },

    /// Ordinary task failure with a stable kind tag.
    ///
    /// The tag is matched structurally against a task's configured `throws`
    /// set to decide whether the failure was expected.
    #[error("{kind}: {message}")]
    Failure { kind: String, message: String },

    /// Process-control signal (forced shutdown, out-of-memory). Propagated
    /// uncaught to terminate the calling execution unit.
    #[error("fatal signal: {message}")]
    Fatal { message: String },

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TaskError {
    /// Create an ordinary failure with a kind tag.
    pub fn failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create a retry signal.
    pub fn retry(message: impl Into<String>) -> Self {
        Self::Retry {
            message: message.into(),
        }
    }

    /// Stable kind tag used for `throws` matching and failure snapshots.
    pub fn kind(&self) -> &str {
        match self {
            Self::Retry { .. } => "Retry",
            Self::Ignore => "Ignore",
            Self::Reject { .. } => "Reject",
            Self::Failure { kind, .. } => kind,
            Self::Fatal { .. } => "Fatal",
            Self::Serialization(_) => "EncodeError",
        }
    }

    /// Whether this is a control signal rather than a failure.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Retry { .. } | Self::Ignore | Self::Reject { .. })
    }
}

/// Errors raised by the result backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No result metadata exists for the task id.
    #[error("no result metadata for task {task_id}")]
    NotFound { task_id: String },

    /// The operation failed but the backend may recover (connectivity,
    /// serialization of metadata, transient store errors).
    #[error("backend operation failed: {message}")]
    Failed { message: String },

    /// The backend ran out of resources. Never swallowed.
    #[error("backend resources exhausted: {message}")]
    ResourcesExhausted { message: String },
}

impl BackendError {
    /// Convenience constructor for the recoverable class.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Whether the tracer may log this error and keep going.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ResourcesExhausted { .. })
    }
}

/// Errors raised while resolving or submitting a callback signature.
#[derive(Debug, Error)]
pub enum CanvasError {
    /// The callback payload could not be encoded for transport.
    #[error("failed to encode callback payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The transport refused the submission.
    #[error("failed to submit signature '{signature}': {message}")]
    Submit { signature: String, message: String },
}

impl From<CanvasError> for TaskError {
    fn from(err: CanvasError) -> Self {
        match err {
            CanvasError::Encode(e) => TaskError::Serialization(e),
            CanvasError::Submit { signature, message } => TaskError::Failure {
                kind: "DispatchError".to_string(),
                message: format!("{signature}: {message}"),
            },
        }
    }
}

/// Faults surfacing from a tracer call itself, outside the per-outcome
/// handling of the task body.
#[derive(Debug, Error)]
pub enum TraceError {
    /// A fatal control signal passing through untouched.
    #[error("fatal signal from task body: {message}")]
    Fatal { message: String },

    /// The `before_start` hook failed; the task body never ran.
    #[error("before_start hook failed for task {task}: {message}")]
    Hook { task: String, message: String },

    /// A single backend operation failed on a path with no fallback.
    #[error("backend {op} failed: {source}")]
    Backend {
        op: &'static str,
        source: BackendError,
    },

    /// Both `mark_done` and its `mark_failed` fallback failed; the result
    /// store is unavailable and the caller must not acknowledge the message.
    #[error("result backend unavailable: mark_done failed ({mark_done}); mark_failed failed ({mark_failed})")]
    BackendEscalation {
        mark_done: BackendError,
        mark_failed: BackendError,
    },

    /// Backend cleanup failed with a non-recoverable error.
    #[error("backend cleanup failed: {0}")]
    Cleanup(#[source] BackendError),

    /// A user failure re-raised because the tracer was built in propagate
    /// mode.
    #[error("task failed: {0}")]
    Propagated(#[source] TaskError),
}

/// Result alias for task bodies.
pub type TaskResult = std::result::Result<serde_json::Value, TaskError>;
