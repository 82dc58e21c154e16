//! The execution tracer
//!
//! A [`Tracer`] is built once per registered task and reused for every
//! invocation. It runs the body on the caller's execution unit, classifies
//! the outcome, and drives the side effects that follow: result
//! persistence, lifecycle signals, callback and chain dispatch, and failure
//! logging. It spawns nothing and suspends only inside the body or a
//! backend call.

use crate::canvas::SubmitOptions;
use crate::config::WorkerConfig;
use crate::error::{BackendError, CanvasError, TaskError, TraceError};
use crate::signals::{SignalHub, TaskSignal};
use crate::task::descriptor::RegisteredTask;
use crate::task::request::{CallOverrides, Kwargs, Request};
use crate::trace::dedup::{should_skip, SuccessSet};
use crate::trace::outcome::{CapturedFailure, TaskState, TraceInfo, Traced};
use crate::trace::policy::{log_failure, resolve, LogPolicy};
use crate::trace::stack::{ExecStack, Optimizations};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Construction-time options for a tracer.
///
/// The stack encodes call depth for one logical thread of control, so each
/// worker execution unit builds its tracers with its own [`ExecStack`]; the
/// hub, success set and optimizations switch are shared process-wide.
#[derive(Debug, Clone)]
pub struct TraceOptions {
    /// The invocation is synchronous and in-process, bypassing the
    /// transport.
    pub eager: bool,
    /// Re-raise user failures to the caller instead of recording a FAILURE
    /// outcome.
    pub propagate: bool,
    /// Deployment-wide flags.
    pub config: WorkerConfig,
    /// Signal fan-out target.
    pub hub: Arc<SignalHub>,
    /// Deduplication set for acknowledge-late tasks.
    pub successes: Arc<SuccessSet>,
    /// Execution stack of the unit this tracer runs on.
    pub stack: Arc<ExecStack>,
    /// Opt-in worker optimizations.
    pub optimizations: Arc<Optimizations>,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            eager: false,
            propagate: false,
            config: WorkerConfig::default(),
            hub: Arc::new(SignalHub::new()),
            successes: Arc::new(SuccessSet::new()),
            stack: Arc::new(ExecStack::new()),
            optimizations: Arc::new(Optimizations::new()),
        }
    }
}

/// Build the tracer for a registered task.
pub fn build_tracer(
    name: impl Into<String>,
    task: Arc<RegisteredTask>,
    options: TraceOptions,
) -> Tracer {
    Tracer {
        name: name.into(),
        task,
        options,
    }
}

/// Per-task execution state machine. Cheap to clone; built once per task
/// descriptor and rebuilt only on explicit reconfiguration.
#[derive(Clone)]
pub struct Tracer {
    name: String,
    task: Arc<RegisteredTask>,
    options: TraceOptions,
}

impl Tracer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task(&self) -> &Arc<RegisteredTask> {
        &self.task
    }

    pub fn options(&self) -> &TraceOptions {
        &self.options
    }

    /// Execute one invocation and classify its outcome.
    ///
    /// Returns `Err` only for faults that must surface past the per-outcome
    /// handling: fatal signals, a broken `before_start` hook, backend
    /// escalation, non-recoverable cleanup faults, and user failures in
    /// propagate mode.
    pub async fn trace(
        &self,
        task_id: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        request: Request,
    ) -> Result<Traced, TraceError> {
        if should_skip(
            task_id,
            &self.task,
            &request,
            &self.options.config,
            &self.options.successes,
        )
        .await
        {
            debug!(task = %self.name, task_id, "skipping duplicate redelivery of a successful task");
            return Ok(Traced::skipped());
        }

        let mut request = request;
        request.task = self.name.clone();
        request.args = args.clone();
        request.kwargs = kwargs.clone();
        let request = Arc::new(request);
        let _frame = self.options.stack.push(Arc::clone(&request));

        if let Some(before_start) = &self.task.hooks.before_start {
            before_start(task_id, &args, &kwargs).map_err(|e| TraceError::Hook {
                task: self.name.clone(),
                message: e.to_string(),
            })?;
        }

        self.options.hub.emit(TaskSignal::started(&self.name, task_id));

        let started = Instant::now();
        let result = self
            .task
            .run(Arc::clone(&request), args.clone(), kwargs.clone())
            .await;
        let runtime = started.elapsed();

        let traced = match result {
            Ok(retval) => {
                self.handle_success(task_id, retval, &request, &args, &kwargs, runtime)
                    .await
            }
            Err(TaskError::Fatal { message }) => {
                self.run_after_return(TaskState::Pending, None, task_id, &args, &kwargs, None);
                return Err(TraceError::Fatal { message });
            }
            Err(TaskError::Retry { message }) => {
                Ok(self.handle_retry(task_id, message, runtime))
            }
            Err(TaskError::Ignore) => Ok(self.handle_ignore(task_id, runtime)),
            Err(err @ TaskError::Reject { .. }) => Ok(self.handle_reject(task_id, err, runtime)),
            Err(err) => {
                if self.options.propagate {
                    let failure = CapturedFailure::from_error(&err);
                    self.run_after_return(
                        TaskState::Failure,
                        None,
                        task_id,
                        &args,
                        &kwargs,
                        Some(&failure),
                    );
                    return Err(TraceError::Propagated(err));
                }
                let policy = resolve(&self.task.options, &err, false);
                let failure = CapturedFailure::from_error(&err);
                self.handle_failure(
                    task_id, failure, policy, &request, &args, &kwargs, runtime, None,
                )
                .await
            }
        }?;

        let (state, failure) = match &traced.info {
            Some(info) => (info.state, info.failure.as_ref()),
            None => (TaskState::Success, None),
        };
        self.run_after_return(state, traced.retval.as_ref(), task_id, &args, &kwargs, failure);

        if !self.options.eager {
            if let Err(e) = self.task.backend().cleanup().await {
                if e.is_recoverable() {
                    warn!(task = %self.name, error = %e, "backend cleanup failed");
                } else {
                    return Err(TraceError::Cleanup(e));
                }
            }
        }

        Ok(traced)
    }

    /// Eager invocation with a fresh request built from the call site's
    /// overrides.
    pub async fn apply(
        &self,
        args: Vec<Value>,
        kwargs: Kwargs,
        overrides: CallOverrides,
    ) -> Result<Traced, TraceError> {
        let task_id = Uuid::new_v4().to_string();
        let mut request = Request::new(&task_id);
        if let Some(headers) = overrides.headers {
            request = request.with_headers(headers);
        }
        if let Some(loglevel) = overrides.loglevel {
            request = request.with_loglevel(loglevel);
        }
        self.trace(&task_id, args, kwargs, request).await
    }

    /// A plain call of the task body, bypassing the transport.
    ///
    /// When stack protection is enabled and this execution unit is already
    /// inside an unprotected, transport-delivered invocation of the same
    /// task at depth one, the call runs the body inline under the existing
    /// context. Otherwise the body runs under a child context that inherits
    /// headers and log level from the parent unless the overrides replace
    /// them.
    pub async fn call_direct(
        &self,
        args: Vec<Value>,
        kwargs: Kwargs,
        overrides: CallOverrides,
    ) -> Result<Value, TaskError> {
        if self.options.optimizations.stack_protection() {
            if let Some(top) = self.options.stack.top() {
                if top.task == self.name
                    && self.options.stack.depth() == 1
                    && !top.called_directly
                    && top.protect()
                {
                    return self.task.run(top, args, kwargs).await;
                }
            }
        }

        let id = Uuid::new_v4().to_string();
        let request = match self.options.stack.top() {
            Some(parent) => {
                Request::inherit(&parent, &id, args.clone(), kwargs.clone(), overrides)
            }
            None => {
                let mut request = Request::new(&id)
                    .with_args(args.clone())
                    .with_kwargs(kwargs.clone())
                    .with_called_directly(true);
                if let Some(headers) = overrides.headers {
                    request = request.with_headers(headers);
                }
                if let Some(loglevel) = overrides.loglevel {
                    request = request.with_loglevel(loglevel);
                }
                request.task = self.name.clone();
                request
            }
        };
        let request = Arc::new(request);
        let _frame = self.options.stack.push(Arc::clone(&request));
        self.task.run(request, args, kwargs).await
    }

    async fn handle_success(
        &self,
        task_id: &str,
        retval: Value,
        request: &Arc<Request>,
        args: &[Value],
        kwargs: &Kwargs,
        runtime: Duration,
    ) -> Result<Traced, TraceError> {
        let task = &self.task;

        if let Some(on_success) = &task.hooks.on_success {
            on_success(&retval, task_id, args, kwargs);
        }
        self.options
            .hub
            .emit(TaskSignal::succeeded(&self.name, task_id, runtime));

        let store =
            (!self.options.eager || task.options.store_eager_result) && !task.options.ignore_result;
        if let Err(done_err) = task.backend().mark_done(task_id, &retval, request, store).await {
            let failure = CapturedFailure::internal("BackendError", &done_err);
            return self
                .handle_failure(
                    task_id,
                    failure,
                    LogPolicy::Internal,
                    request,
                    args,
                    kwargs,
                    runtime,
                    Some(done_err),
                )
                .await;
        }

        if task.options.acks_late
            && self.options.config.deduplicate_successful_tasks
            && !self.options.eager
        {
            self.options.successes.insert(task_id);
        }

        if let Err(canvas_err) = self.dispatch_callbacks(task_id, &retval, request).await {
            warn!(task = %self.name, task_id, error = %canvas_err, "callback dispatch failed");
            let err = TaskError::from(canvas_err);
            let policy = resolve(&task.options, &err, false);
            let failure = CapturedFailure::from_error(&err);
            return self
                .handle_failure(task_id, failure, policy, request, args, kwargs, runtime, None)
                .await;
        }

        debug!(
            task = %self.name,
            task_id,
            runtime_ms = runtime.as_millis() as u64,
            "task succeeded"
        );
        Ok(Traced::ok(retval, runtime))
    }

    /// Fan out callbacks and the next chain stage. Already-submitted
    /// callbacks are not retracted when a later one fails.
    async fn dispatch_callbacks(
        &self,
        task_id: &str,
        retval: &Value,
        request: &Request,
    ) -> Result<(), CanvasError> {
        let priority = if self.options.config.inherit_parent_priority {
            request.delivery_info.priority
        } else {
            None
        };

        for callback in &request.callbacks {
            let options = SubmitOptions {
                parent_id: Some(task_id.to_string()),
                root_id: request.root_id.clone(),
                priority,
                chain: None,
            };
            callback.submit(vec![retval.clone()], options).await?;
        }

        if let Some((next, remainder)) = request.chain.split_last() {
            let options = SubmitOptions {
                parent_id: Some(task_id.to_string()),
                root_id: request.root_id.clone(),
                priority,
                chain: Some(remainder.to_vec()),
            };
            next.submit(vec![retval.clone()], options).await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_failure(
        &self,
        task_id: &str,
        failure: CapturedFailure,
        policy: LogPolicy,
        request: &Request,
        args: &[Value],
        kwargs: &Kwargs,
        runtime: Duration,
        escalated_from: Option<BackendError>,
    ) -> Result<Traced, TraceError> {
        let task = &self.task;
        let store_errors = if task.options.ignore_result {
            task.options.store_errors_even_if_ignored
        } else {
            !self.options.eager || task.options.store_eager_result
        };

        if let Err(failed_err) = task
            .backend()
            .mark_failed(task_id, &failure, request, store_errors, true)
            .await
        {
            return Err(match escalated_from {
                Some(done_err) => TraceError::BackendEscalation {
                    mark_done: done_err,
                    mark_failed: failed_err,
                },
                None => TraceError::Backend {
                    op: "mark_failed",
                    source: failed_err,
                },
            });
        }

        if let Some(on_failure) = &task.hooks.on_failure {
            on_failure(&failure, task_id, args, kwargs);
        }
        self.options
            .hub
            .emit(TaskSignal::failed(&self.name, task_id, failure.clone()));
        log_failure(policy, &self.name, task_id, &failure);

        Ok(Traced {
            retval: None,
            info: Some(TraceInfo::failed(TaskState::Failure, None, failure)),
            runtime,
        })
    }

    fn handle_retry(&self, task_id: &str, message: String, runtime: Duration) -> Traced {
        info!(task = %self.name, task_id, "task requested retry: {message}");
        let err = TaskError::Retry {
            message: message.clone(),
        };
        let failure = CapturedFailure::from_error(&err).clear_trace();
        Traced {
            retval: None,
            info: Some(TraceInfo::failed(
                TaskState::Retry,
                Some(Value::String(message)),
                failure,
            )),
            runtime,
        }
    }

    fn handle_ignore(&self, task_id: &str, runtime: Duration) -> Traced {
        let failure = CapturedFailure::from_error(&TaskError::Ignore).clear_trace();
        log_failure(LogPolicy::Ignore, &self.name, task_id, &failure);
        Traced {
            retval: None,
            info: Some(TraceInfo::failed(TaskState::Ignored, None, failure)),
            runtime,
        }
    }

    fn handle_reject(&self, task_id: &str, err: TaskError, runtime: Duration) -> Traced {
        let failure = CapturedFailure::from_error(&err).clear_trace();
        log_failure(LogPolicy::Reject, &self.name, task_id, &failure);
        Traced {
            retval: None,
            info: Some(TraceInfo::failed(TaskState::Rejected, None, failure)),
            runtime,
        }
    }

    fn run_after_return(
        &self,
        state: TaskState,
        retval: Option<&Value>,
        task_id: &str,
        args: &[Value],
        kwargs: &Kwargs,
        failure: Option<&CapturedFailure>,
    ) {
        if let Some(after_return) = &self.task.hooks.after_return {
            after_return(state, retval, task_id, args, kwargs, failure);
        }
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("name", &self.name)
            .field("eager", &self.options.eager)
            .field("propagate", &self.options.propagate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::task::descriptor::{TaskOptions, RegisteredTask};
    use serde_json::json;

    fn add_tracer(options: TraceOptions) -> (Tracer, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let task = Arc::new(RegisteredTask::from_fn(
            "add",
            TaskOptions::default(),
            backend.clone(),
            |_request, args, _kwargs| async move {
                let x = args[0].as_i64().unwrap_or(0);
                let y = args[1].as_i64().unwrap_or(0);
                Ok(json!(x + y))
            },
        ));
        (build_tracer("add", task, options), backend)
    }

    #[tokio::test]
    async fn test_trace_success_returns_value_and_no_info() {
        let (tracer, _backend) = add_tracer(TraceOptions {
            eager: true,
            ..Default::default()
        });
        let traced = tracer
            .trace("id-1", vec![json!(2), json!(2)], Kwargs::new(), Request::new("id-1"))
            .await
            .unwrap();
        assert_eq!(traced.retval, Some(json!(4)));
        assert!(traced.info.is_none());
        assert_eq!(traced.state(), TaskState::Success);
    }

    #[tokio::test]
    async fn test_eager_trace_does_not_store() {
        let (tracer, backend) = add_tracer(TraceOptions {
            eager: true,
            ..Default::default()
        });
        tracer
            .trace("id-1", vec![json!(2), json!(2)], Kwargs::new(), Request::new("id-1"))
            .await
            .unwrap();
        assert!(backend.stored("id-1").is_none());
    }

    #[tokio::test]
    async fn test_non_eager_trace_stores() {
        let (tracer, backend) = add_tracer(TraceOptions::default());
        tracer
            .trace("id-1", vec![json!(2), json!(2)], Kwargs::new(), Request::new("id-1"))
            .await
            .unwrap();
        let stored = backend.stored("id-1").unwrap();
        assert_eq!(stored.state, TaskState::Success);
        assert_eq!(stored.result, Some(json!(4)));
    }

    #[tokio::test]
    async fn test_retry_signal_keeps_payload() {
        let backend = Arc::new(MemoryBackend::new());
        let task = Arc::new(RegisteredTask::from_fn(
            "retrying",
            TaskOptions::default(),
            backend,
            |_request, _args, _kwargs| async { Err(TaskError::retry("connection refused")) },
        ));
        let tracer = build_tracer(
            "retrying",
            task,
            TraceOptions {
                eager: true,
                ..Default::default()
            },
        );

        let traced = tracer
            .trace("id-1", vec![], Kwargs::new(), Request::new("id-1"))
            .await
            .unwrap();
        let info = traced.info.unwrap();
        assert_eq!(info.state, TaskState::Retry);
        assert_eq!(info.retval, Some(json!("connection refused")));
        let failure = info.failure.unwrap();
        assert_eq!(failure.kind, "Retry");
        assert!(failure.trace.is_empty());
    }

    #[tokio::test]
    async fn test_propagate_reraises_user_failure() {
        let backend = Arc::new(MemoryBackend::new());
        let task = Arc::new(RegisteredTask::from_fn(
            "raises",
            TaskOptions::default(),
            backend.clone(),
            |_request, _args, _kwargs| async {
                Err(TaskError::failure("KeyError", "missing 'foo'"))
            },
        ));
        let tracer = build_tracer(
            "raises",
            task,
            TraceOptions {
                eager: true,
                propagate: true,
                ..Default::default()
            },
        );

        let err = tracer
            .trace("id-1", vec![], Kwargs::new(), Request::new("id-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, TraceError::Propagated(_)));
        // propagate mode bypasses failure handling entirely
        assert!(backend.stored("id-1").is_none());
    }

    #[tokio::test]
    async fn test_stack_popped_after_trace() {
        let options = TraceOptions {
            eager: true,
            ..Default::default()
        };
        let stack = options.stack.clone();
        let (tracer, _backend) = add_tracer(options);
        tracer
            .trace("id-1", vec![json!(1), json!(1)], Kwargs::new(), Request::new("id-1"))
            .await
            .unwrap();
        assert!(stack.is_empty());
    }
}
