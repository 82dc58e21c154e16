//! Result backend capability contract
//!
//! Only the capabilities the tracer consumes are specified here; the
//! concrete storage engine lives behind [`ResultBackend`]. The in-memory
//! implementation backs tests and eager execution.

use crate::canvas::SubmitOptions;
use crate::error::BackendError;
use crate::task::request::Request;
use crate::trace::outcome::{CapturedFailure, TaskState};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Capability contract of the result store.
#[async_trait]
pub trait ResultBackend: Send + Sync {
    /// Record a successful outcome. `store_result` false means the value is
    /// not persisted, but completion is still observed for chord accounting.
    async fn mark_done(
        &self,
        task_id: &str,
        result: &Value,
        request: &Request,
        store_result: bool,
    ) -> Result<(), BackendError>;

    /// Record a failed outcome, optionally persisting it and fanning out the
    /// request's errbacks.
    async fn mark_failed(
        &self,
        task_id: &str,
        failure: &CapturedFailure,
        request: &Request,
        store_result: bool,
        call_errbacks: bool,
    ) -> Result<(), BackendError>;

    /// Persist a result in an explicit state.
    async fn store_result(
        &self,
        task_id: &str,
        result: &Value,
        state: TaskState,
        request: &Request,
    ) -> Result<(), BackendError>;

    /// Stored state of a task, or `NotFound` when no metadata exists.
    async fn query_state(&self, task_id: &str) -> Result<TaskState, BackendError>;

    /// Periodic housekeeping after a non-eager execution.
    async fn cleanup(&self) -> Result<(), BackendError>;
}

/// A stored outcome entry.
#[derive(Debug, Clone)]
pub struct StoredResult {
    pub state: TaskState,
    pub result: Option<Value>,
    pub failure: Option<CapturedFailure>,
}

/// In-memory result backend.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, StoredResult>>,
    chord_parts: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored entry for a task id, if any.
    pub fn stored(&self, task_id: &str) -> Option<StoredResult> {
        self.entries.read().get(task_id).cloned()
    }

    /// Task ids recorded as parts of a chord.
    pub fn chord_parts(&self, chord: &str) -> Vec<String> {
        self.chord_parts
            .read()
            .get(chord)
            .cloned()
            .unwrap_or_default()
    }

    fn observe_chord(&self, task_id: &str, request: &Request) {
        if let Some(chord) = &request.chord {
            self.chord_parts
                .write()
                .entry(chord.clone())
                .or_default()
                .push(task_id.to_string());
        }
    }
}

#[async_trait]
impl ResultBackend for MemoryBackend {
    async fn mark_done(
        &self,
        task_id: &str,
        result: &Value,
        request: &Request,
        store_result: bool,
    ) -> Result<(), BackendError> {
        if store_result {
            self.store_result(task_id, result, TaskState::Success, request)
                .await?;
        }
        self.observe_chord(task_id, request);
        Ok(())
    }

    async fn mark_failed(
        &self,
        task_id: &str,
        failure: &CapturedFailure,
        request: &Request,
        store_result: bool,
        call_errbacks: bool,
    ) -> Result<(), BackendError> {
        if store_result {
            self.entries.write().insert(
                task_id.to_string(),
                StoredResult {
                    state: TaskState::Failure,
                    result: None,
                    failure: Some(failure.clone()),
                },
            );
        }
        if call_errbacks {
            let payload = serde_json::to_value(failure)
                .map_err(|e| BackendError::failed(format!("failure not encodable: {e}")))?;
            for errback in &request.errbacks {
                let options = SubmitOptions {
                    parent_id: Some(task_id.to_string()),
                    root_id: request.root_id.clone(),
                    ..Default::default()
                };
                if let Err(e) = errback
                    .submit(vec![Value::String(task_id.to_string()), payload.clone()], options)
                    .await
                {
                    warn!(task_id, errback = errback.name(), error = %e, "errback submission failed");
                }
            }
        }
        Ok(())
    }

    async fn store_result(
        &self,
        task_id: &str,
        result: &Value,
        state: TaskState,
        _request: &Request,
    ) -> Result<(), BackendError> {
        self.entries.write().insert(
            task_id.to_string(),
            StoredResult {
                state,
                result: Some(result.clone()),
                failure: None,
            },
        );
        Ok(())
    }

    async fn query_state(&self, task_id: &str) -> Result<TaskState, BackendError> {
        self.entries
            .read()
            .get(task_id)
            .map(|entry| entry.state)
            .ok_or_else(|| BackendError::NotFound {
                task_id: task_id.to_string(),
            })
    }

    async fn cleanup(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Signature;
    use crate::error::CanvasError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    struct RecordingSignature {
        name: String,
        calls: Mutex<Vec<(Vec<Value>, Option<String>)>>,
    }

    impl RecordingSignature {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Signature for RecordingSignature {
        fn name(&self) -> &str {
            &self.name
        }

        async fn submit(
            &self,
            args: Vec<Value>,
            options: SubmitOptions,
        ) -> Result<(), CanvasError> {
            self.calls.lock().push((args, options.parent_id));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_mark_done_stores_when_requested() {
        let backend = MemoryBackend::new();
        let request = Request::new("id-1");
        backend
            .mark_done("id-1", &json!(4), &request, true)
            .await
            .unwrap();
        let stored = backend.stored("id-1").unwrap();
        assert_eq!(stored.state, TaskState::Success);
        assert_eq!(stored.result, Some(json!(4)));
    }

    #[tokio::test]
    async fn test_mark_done_without_store_skips_persistence() {
        let backend = MemoryBackend::new();
        let request = Request::new("id-1");
        backend
            .mark_done("id-1", &json!(4), &request, false)
            .await
            .unwrap();
        assert!(backend.stored("id-1").is_none());
    }

    #[tokio::test]
    async fn test_mark_done_observes_chord_even_without_store() {
        let backend = MemoryBackend::new();
        let request = Request::new("id-1").with_chord("chord-9");
        backend
            .mark_done("id-1", &json!(4), &request, false)
            .await
            .unwrap();
        assert_eq!(backend.chord_parts("chord-9"), vec!["id-1".to_string()]);
    }

    #[tokio::test]
    async fn test_query_state_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.query_state("missing").await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_mark_failed_calls_errbacks() {
        let backend = MemoryBackend::new();
        let errback = RecordingSignature::new("on-error");
        let request = Request::new("id-1")
            .with_root_id("root")
            .with_errbacks(vec![errback.clone()]);
        let failure = CapturedFailure {
            kind: "KeyError".into(),
            message: "missing".into(),
            trace: String::new(),
            internal: false,
        };

        backend
            .mark_failed("id-1", &failure, &request, true, true)
            .await
            .unwrap();

        let calls = errback.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0[0], json!("id-1"));
        assert_eq!(calls[0].1.as_deref(), Some("id-1"));
        let stored = backend.stored("id-1").unwrap();
        assert_eq!(stored.state, TaskState::Failure);
    }

    #[tokio::test]
    async fn test_mark_failed_without_errbacks_flag() {
        let backend = MemoryBackend::new();
        let errback = RecordingSignature::new("on-error");
        let request = Request::new("id-1").with_errbacks(vec![errback.clone()]);
        let failure = CapturedFailure {
            kind: "KeyError".into(),
            message: "missing".into(),
            trace: String::new(),
            internal: false,
        };

        backend
            .mark_failed("id-1", &failure, &request, false, false)
            .await
            .unwrap();

        assert!(errback.calls.lock().is_empty());
        assert!(backend.stored("id-1").is_none());
    }
}
