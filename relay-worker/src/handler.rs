//! The contract a task kind's business logic implements to run inside the pool.

use async_trait::async_trait;
use relay_shared::domain::task_kind::TaskKind;
use relay_shared::error::RelayResult;

/// One unit of work pulled off a queue, already deserialized from the envelope
/// [`crate::pool::WorkerPool`] reads off the broker.
#[derive(Debug, Clone)]
pub struct TaskMessage {
    pub invocation_id: uuid::Uuid,
    pub config_id: Option<uuid::Uuid>,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
}

/// Implemented once per [`TaskKind`] and registered with a [`crate::pool::WorkerPool`].
///
/// `run` must be cancellation-safe: the pool races it against a deadline future and
/// drops it without polling to completion on timeout. Handlers that need cleanup on
/// timeout should do so via `Drop` on state held in a local, not via cleanup code after
/// `await` points in `run` itself.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> TaskKind;

    async fn run(&self, message: TaskMessage) -> RelayResult<serde_json::Value>;
}
