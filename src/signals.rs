//! Lifecycle signals emitted by the tracer
//!
//! Observers register explicitly on a [`SignalHub`] injected into the tracer
//! at construction time; fan-out is a synchronous loop over the registered
//! observers. Observer faults are the host's concern, not ours.

use crate::trace::outcome::CapturedFailure;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// A task lifecycle event.
#[derive(Debug, Clone)]
pub enum TaskSignal {
    /// The body is about to run.
    Started {
        task: String,
        task_id: String,
        at: DateTime<Utc>,
    },
    /// The body returned normally.
    Succeeded {
        task: String,
        task_id: String,
        runtime: Duration,
        at: DateTime<Utc>,
    },
    /// The body failed with an ordinary error.
    Failed {
        task: String,
        task_id: String,
        failure: CapturedFailure,
        at: DateTime<Utc>,
    },
    /// The tracing machinery itself faulted.
    InternalError {
        task: String,
        task_id: String,
        failure: CapturedFailure,
        at: DateTime<Utc>,
    },
}

impl TaskSignal {
    pub fn started(task: &str, task_id: &str) -> Self {
        Self::Started {
            task: task.to_string(),
            task_id: task_id.to_string(),
            at: Utc::now(),
        }
    }

    pub fn succeeded(task: &str, task_id: &str, runtime: Duration) -> Self {
        Self::Succeeded {
            task: task.to_string(),
            task_id: task_id.to_string(),
            runtime,
            at: Utc::now(),
        }
    }

    pub fn failed(task: &str, task_id: &str, failure: CapturedFailure) -> Self {
        Self::Failed {
            task: task.to_string(),
            task_id: task_id.to_string(),
            failure,
            at: Utc::now(),
        }
    }

    pub fn internal_error(task: &str, task_id: &str, failure: CapturedFailure) -> Self {
        Self::InternalError {
            task: task.to_string(),
            task_id: task_id.to_string(),
            failure,
            at: Utc::now(),
        }
    }

    /// Id of the attempt this signal belongs to.
    pub fn task_id(&self) -> &str {
        match self {
            Self::Started { task_id, .. }
            | Self::Succeeded { task_id, .. }
            | Self::Failed { task_id, .. }
            | Self::InternalError { task_id, .. } => task_id,
        }
    }

    /// Short stable label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Started { .. } => "task_started",
            Self::Succeeded { .. } => "task_succeeded",
            Self::Failed { .. } => "task_failed",
            Self::InternalError { .. } => "task_internal_error",
        }
    }
}

/// Observer of task lifecycle signals.
pub trait Observe: Send + Sync {
    fn on_signal(&self, signal: &TaskSignal);
}

/// Registration point and synchronous fan-out for signal observers.
#[derive(Default)]
pub struct SignalHub {
    observers: RwLock<Vec<Arc<dyn Observe>>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Registration order is fan-out order.
    pub fn register(&self, observer: Arc<dyn Observe>) {
        self.observers.write().push(observer);
    }

    /// Deliver a signal to every registered observer, in order.
    pub fn emit(&self, signal: TaskSignal) {
        for observer in self.observers.read().iter() {
            observer.on_signal(&signal);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }
}

impl std::fmt::Debug for SignalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHub")
            .field("observers", &self.len())
            .finish()
    }
}
