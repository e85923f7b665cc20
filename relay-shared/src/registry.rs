//! Task registry — an immutable, explicitly-built map from task kind to its queue and
//! parameter descriptor.
//!
//! Task kinds are registered once, explicitly, by whoever bootstraps the process, and
//! handed around as an `Arc<TaskRegistry>` — there is no global mutable state to race
//! against in tests or to silently diverge between binaries that import a subset of
//! handlers.

use std::collections::HashMap;

use crate::domain::task_kind::TaskKind;
use crate::error::{RelayError, RelayResult};

/// Describes a single named parameter a task kind accepts.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub required: bool,
    pub default: Option<serde_json::Value>,
}

impl ParamSpec {
    pub fn required(name: &'static str) -> Self {
        Self {
            name,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &'static str, default: serde_json::Value) -> Self {
        Self {
            name,
            required: false,
            default: Some(default),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRegistration {
    pub kind: TaskKind,
    pub queue: String,
    pub params: Vec<ParamSpec>,
}

/// Builder for a [`TaskRegistry`]. Collects registrations, then [`Self::build`] freezes
/// them into a read-only map.
#[derive(Debug, Default)]
pub struct TaskRegistryBuilder {
    entries: HashMap<TaskKind, TaskRegistration>,
}

impl TaskRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        kind: TaskKind,
        queue: impl Into<String>,
        params: Vec<ParamSpec>,
    ) -> RelayResult<Self> {
        let queue = queue.into();
        if self.entries.contains_key(&kind) {
            return Err(RelayError::Registry(format!(
                "duplicate task kind registration: {kind}"
            )));
        }
        self.entries.insert(
            kind,
            TaskRegistration {
                kind,
                queue,
                params,
            },
        );
        Ok(self)
    }

    pub fn build(self) -> TaskRegistry {
        TaskRegistry {
            entries: self.entries,
        }
    }
}

/// Read-only view handed to the scheduler, worker pool, and any admin surface.
#[derive(Debug)]
pub struct TaskRegistry {
    entries: HashMap<TaskKind, TaskRegistration>,
}

impl TaskRegistry {
    pub fn queue_for(&self, kind: TaskKind) -> RelayResult<&str> {
        self.entries
            .get(&kind)
            .map(|e| e.queue.as_str())
            .ok_or_else(|| RelayError::Registry(format!("task kind not registered: {kind}")))
    }

    pub fn all_queues(&self) -> Vec<&str> {
        let mut queues: Vec<&str> = self.entries.values().map(|e| e.queue.as_str()).collect();
        queues.sort_unstable();
        queues.dedup();
        queues
    }

    pub fn descriptor(&self, kind: TaskKind) -> Option<&TaskRegistration> {
        self.entries.get(&kind)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &TaskRegistration> {
        self.entries.values()
    }

    pub fn is_registered(&self, kind: TaskKind) -> bool {
        self.entries.contains_key(&kind)
    }
}
