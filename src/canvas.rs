//! Signature resolution and submission boundary
//!
//! Callbacks, errbacks and chain stages are carried as signatures: opaque
//! handles the transport layer knows how to submit. The tracer only needs
//! [`Signature::submit`]; group signatures implement the same trait so a
//! group callback entry goes out as one batched dispatch instead of being
//! expanded here.

use crate::error::CanvasError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Shared handle to a submittable signature.
pub type SignatureRef = Arc<dyn Signature>;

/// Delivery metadata forwarded with a signature submission.
#[derive(Clone, Default)]
pub struct SubmitOptions {
    /// Id of the task whose outcome spawned this submission.
    pub parent_id: Option<String>,
    /// Root id of the originating workflow, inherited unchanged.
    pub root_id: Option<String>,
    /// Delivery priority, only set when parent-priority inheritance is on.
    pub priority: Option<i32>,
    /// Remaining chain stages for the remote executor to keep unwinding.
    pub chain: Option<Vec<SignatureRef>>,
}

impl std::fmt::Debug for SubmitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitOptions")
            .field("parent_id", &self.parent_id)
            .field("root_id", &self.root_id)
            .field("priority", &self.priority)
            .field(
                "chain",
                &self.chain.as_ref().map(|c| {
                    c.iter().map(|sig| sig.name().to_string()).collect::<Vec<_>>()
                }),
            )
            .finish()
    }
}

/// A submittable unit of downstream work.
///
/// Implementations live on the transport side. A group is a signature whose
/// `submit` dispatches all of its members as one batch.
#[async_trait]
pub trait Signature: Send + Sync {
    /// Task name (or group label) this signature resolves to.
    fn name(&self) -> &str;

    /// Submit for asynchronous execution with the given arguments.
    async fn submit(&self, args: Vec<Value>, options: SubmitOptions) -> Result<(), CanvasError>;
}

/// A signature resolver that refuses every submission.
///
/// Stands in when no transport is wired up, e.g. in eager-only deployments.
pub struct NoOpSignature {
    name: String,
}

impl NoOpSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Signature for NoOpSignature {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, _args: Vec<Value>, _options: SubmitOptions) -> Result<(), CanvasError> {
        Err(CanvasError::Submit {
            signature: self.name.clone(),
            message: "no transport configured for signature submission".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_options_default() {
        let options = SubmitOptions::default();
        assert!(options.parent_id.is_none());
        assert!(options.root_id.is_none());
        assert!(options.priority.is_none());
        assert!(options.chain.is_none());
    }

    #[tokio::test]
    async fn test_noop_signature_refuses() {
        let sig = NoOpSignature::new("downstream");
        let err = sig
            .submit(vec![serde_json::json!(4)], SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CanvasError::Submit { .. }));
    }

    #[test]
    fn test_submit_options_debug_lists_chain_names() {
        let options = SubmitOptions {
            chain: Some(vec![Arc::new(NoOpSignature::new("stage-2")) as SignatureRef]),
            ..Default::default()
        };
        let debug = format!("{options:?}");
        assert!(debug.contains("stage-2"));
    }
}
