//! Queue name resolution and validation, split between a `MessageRouter` trait and
//! its `DefaultMessageRouter` implementation.

use relay_shared::domain::task_kind::TaskKind;
use relay_shared::error::{RelayError, RelayResult};
use relay_shared::registry::TaskRegistry;

pub trait MessageRouter: Send + Sync {
    fn route(&self, kind: TaskKind) -> RelayResult<String>;
}

pub struct DefaultMessageRouter<'a> {
    registry: &'a TaskRegistry,
    prefix: String,
}

impl<'a> DefaultMessageRouter<'a> {
    pub fn new(registry: &'a TaskRegistry, prefix: impl Into<String>) -> Self {
        Self {
            registry,
            prefix: prefix.into(),
        }
    }
}

impl MessageRouter for DefaultMessageRouter<'_> {
    fn route(&self, kind: TaskKind) -> RelayResult<String> {
        let queue = self.registry.queue_for(kind)?;
        validate_queue_name(queue)?;
        if self.prefix.is_empty() {
            Ok(queue.to_string())
        } else {
            Ok(format!("{}_{}", self.prefix, queue))
        }
    }
}

/// Boundary validation: queue names flow into SQL identifiers and Redis channel
/// names, so this rejects anything that isn't a plain lower-snake-case token before
/// it gets anywhere near a query.
pub fn validate_queue_name(name: &str) -> RelayResult<()> {
    if name.is_empty() {
        return Err(RelayError::validation("queue name must not be empty"));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid || name.starts_with('_') || name.ends_with('_') {
        return Err(RelayError::validation(format!(
            "queue name '{name}' must be lower-snake-case"
        )));
    }
    Ok(())
}
