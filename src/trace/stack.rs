//! Execution stack and recursion guard
//!
//! Each worker execution unit owns one [`ExecStack`]; it is handed to the
//! tracers that run on that unit and never shared across units. The stack
//! encodes call depth for exactly one logical thread of control, so a task
//! body invoking its own task as a plain call can be rerouted in-process
//! instead of deadlocking on a transport round-trip.

use crate::task::request::Request;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ordered stack of the invocation contexts active on one execution unit.
#[derive(Default)]
pub struct ExecStack {
    frames: Mutex<Vec<Arc<Request>>>,
}

impl ExecStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a context. The returned guard pops it on drop, on every exit
    /// path.
    pub fn push(self: &Arc<Self>, request: Arc<Request>) -> StackGuard {
        self.frames.lock().push(request);
        StackGuard {
            stack: Arc::clone(self),
        }
    }

    /// The innermost active context.
    pub fn top(&self) -> Option<Arc<Request>> {
        self.frames.lock().last().cloned()
    }

    pub fn depth(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl std::fmt::Debug for ExecStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecStack")
            .field("depth", &self.depth())
            .finish()
    }
}

/// Scoped handle to a pushed frame.
#[must_use = "dropping the guard pops the frame"]
pub struct StackGuard {
    stack: Arc<ExecStack>,
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        self.stack.frames.lock().pop();
    }
}

/// Opt-in worker optimizations.
///
/// Stack protection is off by default; enabling it reroutes recursive plain
/// calls in-process. Disabling restores the default behavior with no
/// residual state.
#[derive(Debug, Default)]
pub struct Optimizations {
    stack_protection: AtomicBool,
}

impl Optimizations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn stack protection on.
    pub fn setup(&self) {
        self.stack_protection.store(true, Ordering::SeqCst);
    }

    /// Turn stack protection back off.
    pub fn reset(&self) {
        self.stack_protection.store(false, Ordering::SeqCst);
    }

    pub fn stack_protection(&self) -> bool {
        self.stack_protection.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: &str) -> Arc<Request> {
        Arc::new(Request::new(id))
    }

    #[test]
    fn test_push_and_top() {
        let stack = Arc::new(ExecStack::new());
        assert!(stack.is_empty());

        let _outer = stack.push(frame("outer"));
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.top().unwrap().id, "outer");

        {
            let _inner = stack.push(frame("inner"));
            assert_eq!(stack.depth(), 2);
            assert_eq!(stack.top().unwrap().id, "inner");
        }

        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.top().unwrap().id, "outer");
    }

    #[test]
    fn test_guard_pops_on_panic() {
        let stack = Arc::new(ExecStack::new());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = stack.push(frame("doomed"));
            panic!("body blew up");
        }));
        assert!(result.is_err());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_optimizations_reversible() {
        let optimizations = Optimizations::new();
        assert!(!optimizations.stack_protection());
        optimizations.setup();
        assert!(optimizations.stack_protection());
        optimizations.reset();
        assert!(!optimizations.stack_protection());
    }
}
