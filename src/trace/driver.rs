//! Outer driver: the boundary between a tracer and the worker loop
//!
//! A fault inside the tracer (as opposed to inside the task body) must not
//! take the caller's message loop down. The driver contains everything but
//! fatal control signals, reports it, and hands back a reply the loop can
//! act on.

use crate::error::TraceError;
use crate::signals::TaskSignal;
use crate::task::request::{Kwargs, Request};
use crate::trace::outcome::{CapturedFailure, TaskState, TraceInfo};
use crate::trace::tracer::Tracer;
use serde_json::Value;
use std::time::Duration;
use tracing::error;

/// Result of a driven trace. `internal` is populated when the tracer itself
/// faulted; the caller must then decide whether to acknowledge the message.
#[derive(Debug, Clone)]
pub struct TraceReply {
    /// Return value of the body on success.
    pub retval: Option<Value>,
    /// Outcome record for non-success states.
    pub info: Option<TraceInfo>,
    /// Wall-clock time spent in the body.
    pub runtime: Duration,
    /// Infrastructure fault captured at this boundary.
    pub internal: Option<CapturedFailure>,
}

/// Drive one trace, containing tracer-level faults.
///
/// Fatal control signals still propagate: they are meant to terminate the
/// calling execution unit.
pub async fn trace_task(
    tracer: &Tracer,
    task_id: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
    request: Request,
) -> Result<TraceReply, TraceError> {
    match tracer.trace(task_id, args, kwargs, request).await {
        Ok(traced) => Ok(TraceReply {
            retval: traced.retval,
            info: traced.info,
            runtime: traced.runtime,
            internal: None,
        }),
        Err(err @ TraceError::Fatal { .. }) => Err(err),
        Err(err) => Ok(report_internal_error(tracer, task_id, err)),
    }
}

/// Capture a tracer fault, emit the internal-error signal, and build a reply
/// whose failure slot carries the snapshot.
fn report_internal_error(tracer: &Tracer, task_id: &str, err: TraceError) -> TraceReply {
    let failure = CapturedFailure::internal("TraceError", &err);
    error!(
        task = %tracer.name(),
        task_id,
        error = %err,
        "task trace failed outside of the task body"
    );
    tracer
        .options()
        .hub
        .emit(TaskSignal::internal_error(tracer.name(), task_id, failure.clone()));

    TraceReply {
        retval: None,
        info: Some(TraceInfo::failed(TaskState::Failure, None, failure.clone())),
        runtime: Duration::ZERO,
        internal: Some(failure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::TaskError;
    use crate::task::descriptor::{RegisteredTask, TaskHooks, TaskOptions};
    use crate::trace::tracer::{build_tracer, TraceOptions};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_driver_passes_through_success() {
        let backend = Arc::new(MemoryBackend::new());
        let task = Arc::new(RegisteredTask::from_fn(
            "add",
            TaskOptions::default(),
            backend,
            |_request, args, _kwargs| async move {
                Ok(json!(args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0)))
            },
        ));
        let tracer = build_tracer(
            "add",
            task,
            TraceOptions {
                eager: true,
                ..Default::default()
            },
        );

        let reply = trace_task(
            &tracer,
            "id-1",
            vec![json!(2), json!(2)],
            Kwargs::new(),
            Request::new("id-1"),
        )
        .await
        .unwrap();
        assert_eq!(reply.retval, Some(json!(4)));
        assert!(reply.internal.is_none());
    }

    #[tokio::test]
    async fn test_driver_contains_broken_before_start() {
        let backend = Arc::new(MemoryBackend::new());
        let hooks = TaskHooks {
            before_start: Some(Box::new(|_task_id, _args, _kwargs| {
                Err(TaskError::failure("SetupError", "misconfigured"))
            })),
            ..Default::default()
        };
        let task = Arc::new(
            RegisteredTask::from_fn(
                "broken",
                TaskOptions::default(),
                backend,
                |_request, _args, _kwargs| async { Ok(json!(null)) },
            )
            .with_hooks(hooks),
        );
        let tracer = build_tracer(
            "broken",
            task,
            TraceOptions {
                eager: true,
                ..Default::default()
            },
        );

        let reply = trace_task(&tracer, "id-1", vec![], Kwargs::new(), Request::new("id-1"))
            .await
            .unwrap();
        let internal = reply.internal.unwrap();
        assert!(internal.internal);
        assert!(internal.message.contains("before_start"));
        assert_eq!(reply.info.unwrap().state, TaskState::Failure);
    }

    #[tokio::test]
    async fn test_driver_propagates_fatal() {
        let backend = Arc::new(MemoryBackend::new());
        let task = Arc::new(RegisteredTask::from_fn(
            "doomed",
            TaskOptions::default(),
            backend,
            |_request, _args, _kwargs| async {
                Err(TaskError::Fatal {
                    message: "forced shutdown".into(),
                })
            },
        ));
        let tracer = build_tracer(
            "doomed",
            task,
            TraceOptions {
                eager: true,
                ..Default::default()
            },
        );

        let err = trace_task(&tracer, "id-1", vec![], Kwargs::new(), Request::new("id-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, TraceError::Fatal { .. }));
    }
}
