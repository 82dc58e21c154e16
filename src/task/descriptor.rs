//! Task descriptors: the registered unit of work plus its flags and hooks

use crate::backend::ResultBackend;
use crate::error::TaskError;
use crate::task::request::{Kwargs, Request};
use crate::trace::outcome::{CapturedFailure, TaskState};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed task body: the unit of work a descriptor wraps.
pub type BoxedTaskFn = Box<
    dyn Fn(
            Arc<Request>,
            Vec<Value>,
            Kwargs,
        ) -> Pin<Box<dyn Future<Output = Result<Value, TaskError>> + Send>>
        + Send
        + Sync,
>;

/// Hook run before the body starts. A failure here is fatal to the trace.
pub type BeforeStartHook = Box<dyn Fn(&str, &[Value], &Kwargs) -> Result<(), TaskError> + Send + Sync>;
/// Hook run after the body returned normally.
pub type SuccessHook = Box<dyn Fn(&Value, &str, &[Value], &Kwargs) + Send + Sync>;
/// Hook run on the failure path, after the result backend saw the failure.
pub type FailureHook = Box<dyn Fn(&CapturedFailure, &str, &[Value], &Kwargs) + Send + Sync>;
/// Hook run on every exit path with the recorded state.
pub type AfterReturnHook = Box<
    dyn Fn(TaskState, Option<&Value>, &str, &[Value], &Kwargs, Option<&CapturedFailure>)
        + Send
        + Sync,
>;

/// Optional lifecycle hooks. All run synchronously on the execution unit
/// that runs the body, in the order the tracer defines; a hook fault is
/// never retried.
#[derive(Default)]
pub struct TaskHooks {
    pub before_start: Option<BeforeStartHook>,
    pub on_success: Option<SuccessHook>,
    pub on_failure: Option<FailureHook>,
    pub after_return: Option<AfterReturnHook>,
}

impl std::fmt::Debug for TaskHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHooks")
            .field("before_start", &self.before_start.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("after_return", &self.after_return.is_some())
            .finish()
    }
}

/// Per-task configuration flags.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Do not store the return value.
    pub ignore_result: bool,
    /// Store results (and errors) even for eager, in-process runs.
    pub store_eager_result: bool,
    /// Store errors even when `ignore_result` is set.
    pub store_errors_even_if_ignored: bool,
    /// Acknowledge the message only after successful execution.
    pub acks_late: bool,
    /// Error-kind tags this task is documented to raise. Matching failures
    /// are logged tersely as expected.
    pub throws: HashSet<String>,
}

impl TaskOptions {
    /// Set the expected error kinds from a list of tags.
    pub fn with_throws<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.throws = kinds.into_iter().map(Into::into).collect();
        self
    }
}

/// A registered task: name, body, flags, hooks and the result backend it is
/// bound to. Immutable after registration; the tracer only reads it.
pub struct RegisteredTask {
    /// Unique task name.
    pub name: String,
    /// Per-task flags.
    pub options: TaskOptions,
    /// Lifecycle hooks.
    pub hooks: TaskHooks,
    body: BoxedTaskFn,
    backend: Arc<dyn ResultBackend>,
}

impl RegisteredTask {
    /// Create a task from a boxed body.
    pub fn new(
        name: impl Into<String>,
        options: TaskOptions,
        body: BoxedTaskFn,
        backend: Arc<dyn ResultBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            options,
            hooks: TaskHooks::default(),
            body,
            backend,
        }
    }

    /// Create a task from a plain async closure.
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        options: TaskOptions,
        backend: Arc<dyn ResultBackend>,
        body: F,
    ) -> Self
    where
        F: Fn(Arc<Request>, Vec<Value>, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        let boxed: BoxedTaskFn = Box::new(move |request, args, kwargs| {
            Box::pin(body(request, args, kwargs))
        });
        Self::new(name, options, boxed, backend)
    }

    /// Attach lifecycle hooks.
    pub fn with_hooks(mut self, hooks: TaskHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Run the body.
    pub async fn run(
        &self,
        request: Arc<Request>,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value, TaskError> {
        (self.body)(request, args, kwargs).await
    }

    /// The result backend this task is bound to.
    pub fn backend(&self) -> &Arc<dyn ResultBackend> {
        &self.backend
    }
}

impl std::fmt::Debug for RegisteredTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTask")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("hooks", &self.hooks)
            .field("body", &"<function>")
            .finish()
    }
}
