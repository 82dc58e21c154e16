//! Task registry with tracers bound at registration time

use crate::task::descriptor::RegisteredTask;
use crate::trace::tracer::{build_tracer, TraceOptions, Tracer};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Registration errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Each task name must be unique within a worker.
    #[error("task '{0}' is already registered")]
    Duplicate(String),
    /// Lookup of an unregistered task.
    #[error("task '{0}' is not registered")]
    Unknown(String),
}

struct Entry {
    task: Arc<RegisteredTask>,
    tracer: Tracer,
}

/// Registry of tasks a worker can execute.
///
/// Each entry carries the tracer built for it at registration time; the
/// tracer is replaced only through [`rebind_tracer`](Self::rebind_tracer),
/// never mutated in place.
#[derive(Default)]
pub struct TaskRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and bind a tracer built with the given options.
    pub fn register(
        &self,
        task: RegisteredTask,
        options: TraceOptions,
    ) -> Result<Tracer, RegistryError> {
        let name = task.name.clone();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        let task = Arc::new(task);
        let tracer = build_tracer(&name, Arc::clone(&task), options);
        entries.insert(name, Entry {
            task,
            tracer: tracer.clone(),
        });
        Ok(tracer)
    }

    /// Rebuild the tracer for a task after reconfiguration.
    pub fn rebind_tracer(
        &self,
        name: &str,
        options: TraceOptions,
    ) -> Result<Tracer, RegistryError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))?;
        let tracer = build_tracer(name, Arc::clone(&entry.task), options);
        entry.tracer = tracer.clone();
        Ok(tracer)
    }

    /// The tracer bound to a task.
    pub fn tracer(&self, name: &str) -> Option<Tracer> {
        self.entries.read().get(name).map(|e| e.tracer.clone())
    }

    /// The registered task itself.
    pub fn task(&self, name: &str) -> Option<Arc<RegisteredTask>> {
        self.entries.read().get(name).map(|e| Arc::clone(&e.task))
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::task::descriptor::TaskOptions;
    use serde_json::json;

    fn echo_task(name: &str) -> RegisteredTask {
        RegisteredTask::from_fn(
            name,
            TaskOptions::default(),
            Arc::new(MemoryBackend::new()),
            |_request, args, _kwargs| async move { Ok(json!({ "echo": args })) },
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = TaskRegistry::new();
        assert!(registry.is_empty());

        registry
            .register(echo_task("echo"), TraceOptions::default())
            .unwrap();
        assert!(registry.has("echo"));
        assert_eq!(registry.len(), 1);
        assert!(registry.tracer("echo").is_some());
        assert!(registry.task("echo").is_some());
        assert!(registry.tracer("missing").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = TaskRegistry::new();
        registry
            .register(echo_task("echo"), TraceOptions::default())
            .unwrap();
        let err = registry
            .register(echo_task("echo"), TraceOptions::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
    }

    #[test]
    fn test_rebind_tracer_swaps_options() {
        let registry = TaskRegistry::new();
        registry
            .register(echo_task("echo"), TraceOptions::default())
            .unwrap();
        assert!(!registry.tracer("echo").unwrap().options().eager);

        registry
            .rebind_tracer(
                "echo",
                TraceOptions {
                    eager: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(registry.tracer("echo").unwrap().options().eager);
    }

    #[test]
    fn test_rebind_unknown_task() {
        let registry = TaskRegistry::new();
        let err = registry
            .rebind_tracer("missing", TraceOptions::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unknown(_)));
    }
}
