//! Taskwire worker execution core
//!
//! This crate is the execution tracer of a Taskwire worker: it takes a
//! registered task plus a per-delivery invocation context, runs the body
//! exactly once (subject to deduplication of redelivered acknowledge-late
//! messages), classifies the outcome into a small state machine, and drives
//! the side effects that follow — result persistence, lifecycle signals,
//! callback and chain dispatch, and failure logging.
//!
//! The transport, the worker pool and the concrete result store live
//! elsewhere; they meet this crate at the [`ResultBackend`],
//! [`Signature`] and [`Observe`] boundaries.
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use taskwire::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let backend: Arc<dyn ResultBackend> = Arc::new(MemoryBackend::new());
//! let registry = TaskRegistry::new();
//! let tracer = registry.register(
//!     RegisteredTask::from_fn("add", TaskOptions::default(), backend, |_req, args, _kw| async move {
//!         Ok(json!(args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0)))
//!     }),
//!     TraceOptions::default(),
//! )?;
//!
//! let reply = trace_task(
//!     &tracer,
//!     "id-1",
//!     vec![json!(2), json!(2)],
//!     Kwargs::new(),
//!     Request::new("id-1"),
//! )
//! .await?;
//! assert_eq!(reply.retval, Some(json!(4)));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod canvas;
pub mod config;
pub mod error;
pub mod signals;
pub mod task;
pub mod trace;

// Re-export commonly used types
pub use backend::{MemoryBackend, ResultBackend, StoredResult};
pub use canvas::{NoOpSignature, Signature, SignatureRef, SubmitOptions};
pub use config::WorkerConfig;
pub use error::{BackendError, CanvasError, TaskError, TaskResult, TraceError};
pub use signals::{Observe, SignalHub, TaskSignal};
pub use task::{
    CallOverrides, DeliveryInfo, Kwargs, RegisteredTask, RegistryError, Request, TaskHooks,
    TaskOptions, TaskRegistry,
};
pub use trace::{
    build_tracer, trace_task, CapturedFailure, ExecStack, LogPolicy, Optimizations, SuccessSet,
    TaskState, TraceInfo, TraceOptions, TraceReply, Traced, Tracer,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::{MemoryBackend, ResultBackend, StoredResult};
    pub use crate::canvas::{NoOpSignature, Signature, SignatureRef, SubmitOptions};
    pub use crate::config::WorkerConfig;
    pub use crate::error::{BackendError, CanvasError, TaskError, TaskResult, TraceError};
    pub use crate::signals::{Observe, SignalHub, TaskSignal};
    pub use crate::task::{
        CallOverrides, DeliveryInfo, Kwargs, RegisteredTask, RegistryError, Request, TaskHooks,
        TaskOptions, TaskRegistry,
    };
    pub use crate::trace::{
        build_tracer, trace_task, CapturedFailure, ExecStack, LogPolicy, Optimizations,
        SuccessSet, TaskState, TraceInfo, TraceOptions, TraceReply, Traced, Tracer,
    };
    pub use async_trait::async_trait;
    pub use serde_json::{json, Value};
}
