//! Broker providers: the transport a [`crate::broker::Broker`] wraps.
//!
//! `MessagingProvider` is an enum over concrete provider types rather than
//! `Arc<dyn Trait>`, so the hot consume/ack path dispatches statically. A new
//! provider means a new variant here, not a new trait object impl scattered across
//! call sites.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use relay_shared::error::{RelayError, RelayResult};

/// A message pulled off the broker, still holding whatever the provider needs to
/// ack/nack it later.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub payload: serde_json::Value,
    pub receipt: ReceiptHandle,
    pub receive_count: u32,
}

/// Opaque per-provider ack token. Postgres/pgmq uses the numeric message id; the
/// in-memory test provider uses a UUID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReceiptHandle {
    Pgmq { msg_id: i64 },
    InMemory { id: Uuid },
}

#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn ensure_queue(&self, queue: &str) -> RelayResult<()>;
    async fn enqueue(&self, queue: &str, payload: serde_json::Value) -> RelayResult<()>;
    async fn consume(
        &self,
        queue: &str,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> RelayResult<Vec<QueuedMessage>>;
    async fn ack(&self, queue: &str, receipt: &ReceiptHandle) -> RelayResult<()>;
    async fn nack(&self, queue: &str, receipt: &ReceiptHandle, requeue: bool) -> RelayResult<()>;
    async fn extend_visibility(
        &self,
        queue: &str,
        receipt: &ReceiptHandle,
        extension: Duration,
    ) -> RelayResult<()>;
}

/// Enum-dispatch wrapper over the concrete providers this crate ships.
pub enum MessagingProvider {
    Postgres(PgmqProvider),
    InMemory(InMemoryProvider),
}

#[async_trait::async_trait]
impl Provider for MessagingProvider {
    async fn ensure_queue(&self, queue: &str) -> RelayResult<()> {
        match self {
            Self::Postgres(p) => p.ensure_queue(queue).await,
            Self::InMemory(p) => p.ensure_queue(queue).await,
        }
    }

    async fn enqueue(&self, queue: &str, payload: serde_json::Value) -> RelayResult<()> {
        match self {
            Self::Postgres(p) => p.enqueue(queue, payload).await,
            Self::InMemory(p) => p.enqueue(queue, payload).await,
        }
    }

    async fn consume(
        &self,
        queue: &str,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> RelayResult<Vec<QueuedMessage>> {
        match self {
            Self::Postgres(p) => p.consume(queue, max_messages, visibility_timeout).await,
            Self::InMemory(p) => p.consume(queue, max_messages, visibility_timeout).await,
        }
    }

    async fn ack(&self, queue: &str, receipt: &ReceiptHandle) -> RelayResult<()> {
        match self {
            Self::Postgres(p) => p.ack(queue, receipt).await,
            Self::InMemory(p) => p.ack(queue, receipt).await,
        }
    }

    async fn nack(&self, queue: &str, receipt: &ReceiptHandle, requeue: bool) -> RelayResult<()> {
        match self {
            Self::Postgres(p) => p.nack(queue, receipt, requeue).await,
            Self::InMemory(p) => p.nack(queue, receipt, requeue).await,
        }
    }

    async fn extend_visibility(
        &self,
        queue: &str,
        receipt: &ReceiptHandle,
        extension: Duration,
    ) -> RelayResult<()> {
        match self {
            Self::Postgres(p) => p.extend_visibility(queue, receipt, extension).await,
            Self::InMemory(p) => p.extend_visibility(queue, receipt, extension).await,
        }
    }
}

/// Production provider: PostgreSQL-backed durable queue via the `pgmq` crate.
pub struct PgmqProvider {
    pool: sqlx::PgPool,
}

impl PgmqProvider {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Provider for PgmqProvider {
    async fn ensure_queue(&self, queue: &str) -> RelayResult<()> {
        pgmq::PGMQueueExt::new_with_pool(self.pool.clone())
            .await
            .create(queue)
            .await
            .map_err(|e| RelayError::transient(format!("pgmq create_queue({queue}): {e}")))
    }

    async fn enqueue(&self, queue: &str, payload: serde_json::Value) -> RelayResult<()> {
        let client = pgmq::PGMQueueExt::new_with_pool(self.pool.clone()).await;
        client
            .send(queue, &payload)
            .await
            .map_err(|e| RelayError::transient(format!("pgmq send({queue}): {e}")))?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> RelayResult<Vec<QueuedMessage>> {
        let client = pgmq::PGMQueueExt::new_with_pool(self.pool.clone()).await;
        let vt = visibility_timeout.as_secs() as i32;

        let mut out = Vec::new();
        for _ in 0..max_messages {
            let msg: Option<pgmq::Message<serde_json::Value>> = client
                .read(queue, Some(vt))
                .await
                .map_err(|e| RelayError::transient(format!("pgmq read({queue}): {e}")))?;
            match msg {
                Some(m) => out.push(QueuedMessage {
                    payload: m.message,
                    receipt: ReceiptHandle::Pgmq { msg_id: m.msg_id },
                    receive_count: m.read_ct.max(0) as u32,
                }),
                None => break,
            }
        }
        Ok(out)
    }

    async fn ack(&self, queue: &str, receipt: &ReceiptHandle) -> RelayResult<()> {
        let msg_id = pgmq_msg_id(receipt)?;
        let client = pgmq::PGMQueueExt::new_with_pool(self.pool.clone()).await;
        client
            .archive(queue, msg_id)
            .await
            .map_err(|e| RelayError::transient(format!("pgmq archive({queue}, {msg_id}): {e}")))?;
        Ok(())
    }

    async fn nack(&self, queue: &str, receipt: &ReceiptHandle, requeue: bool) -> RelayResult<()> {
        let msg_id = pgmq_msg_id(receipt)?;
        let client = pgmq::PGMQueueExt::new_with_pool(self.pool.clone()).await;
        if requeue {
            client
                .set_vt(queue, msg_id, 0)
                .await
                .map_err(|e| RelayError::transient(format!("pgmq set_vt({queue}, {msg_id}): {e}")))?;
        } else {
            client
                .delete(queue, msg_id)
                .await
                .map_err(|e| RelayError::transient(format!("pgmq delete({queue}, {msg_id}): {e}")))?;
        }
        Ok(())
    }

    async fn extend_visibility(
        &self,
        queue: &str,
        receipt: &ReceiptHandle,
        extension: Duration,
    ) -> RelayResult<()> {
        let msg_id = pgmq_msg_id(receipt)?;
        let client = pgmq::PGMQueueExt::new_with_pool(self.pool.clone()).await;
        client
            .set_vt(queue, msg_id, extension.as_secs() as i32)
            .await
            .map_err(|e| RelayError::transient(format!("pgmq set_vt({queue}, {msg_id}): {e}")))?;
        Ok(())
    }
}

fn pgmq_msg_id(receipt: &ReceiptHandle) -> RelayResult<i64> {
    match receipt {
        ReceiptHandle::Pgmq { msg_id } => Ok(*msg_id),
        ReceiptHandle::InMemory { .. } => Err(RelayError::validation(
            "in-memory receipt handle used against the pgmq provider",
        )),
    }
}

/// Test/dev provider: an in-process FIFO queue per name. Visibility timeout is
/// honored on a best-effort basis via a simple "hidden until" timestamp, good enough
/// for unit tests that don't exercise concurrent redelivery races.
#[derive(Default)]
pub struct InMemoryProvider {
    queues: DashMap<String, Mutex<VecDeque<InFlight>>>,
}

struct InFlight {
    id: Uuid,
    payload: serde_json::Value,
    receive_count: u32,
    hidden_until: Option<std::time::Instant>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Provider for InMemoryProvider {
    async fn ensure_queue(&self, queue: &str) -> RelayResult<()> {
        self.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn enqueue(&self, queue: &str, payload: serde_json::Value) -> RelayResult<()> {
        let entry = self.queues.entry(queue.to_string()).or_default();
        let mut q = entry.lock().unwrap_or_else(|p| p.into_inner());
        q.push_back(InFlight {
            id: Uuid::new_v4(),
            payload,
            receive_count: 0,
            hidden_until: None,
        });
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> RelayResult<Vec<QueuedMessage>> {
        let entry = self.queues.entry(queue.to_string()).or_default();
        let mut q = entry.lock().unwrap_or_else(|p| p.into_inner());
        let now = std::time::Instant::now();

        let mut out = Vec::new();
        for item in q.iter_mut() {
            if out.len() as u32 >= max_messages {
                break;
            }
            let visible = item.hidden_until.is_none_or(|t| now >= t);
            if visible {
                item.receive_count += 1;
                item.hidden_until = Some(now + visibility_timeout);
                out.push(QueuedMessage {
                    payload: item.payload.clone(),
                    receipt: ReceiptHandle::InMemory { id: item.id },
                    receive_count: item.receive_count,
                });
            }
        }
        Ok(out)
    }

    async fn ack(&self, queue: &str, receipt: &ReceiptHandle) -> RelayResult<()> {
        let id = in_memory_id(receipt)?;
        if let Some(entry) = self.queues.get(queue) {
            let mut q = entry.lock().unwrap_or_else(|p| p.into_inner());
            let before = q.len();
            q.retain(|m| m.id != id);
            if q.len() == before {
                debug!(queue, %id, "ack of already-removed message, ignoring");
            }
        }
        Ok(())
    }

    async fn nack(&self, queue: &str, receipt: &ReceiptHandle, requeue: bool) -> RelayResult<()> {
        let id = in_memory_id(receipt)?;
        if let Some(entry) = self.queues.get(queue) {
            let mut q = entry.lock().unwrap_or_else(|p| p.into_inner());
            if requeue {
                if let Some(m) = q.iter_mut().find(|m| m.id == id) {
                    m.hidden_until = None;
                }
            } else {
                q.retain(|m| m.id != id);
            }
        } else {
            warn!(queue, "nack against unknown queue");
        }
        Ok(())
    }

    async fn extend_visibility(
        &self,
        queue: &str,
        receipt: &ReceiptHandle,
        extension: Duration,
    ) -> RelayResult<()> {
        let id = in_memory_id(receipt)?;
        if let Some(entry) = self.queues.get(queue) {
            let mut q = entry.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(m) = q.iter_mut().find(|m| m.id == id) {
                m.hidden_until = Some(std::time::Instant::now() + extension);
            }
        }
        Ok(())
    }
}

fn in_memory_id(receipt: &ReceiptHandle) -> RelayResult<Uuid> {
    match receipt {
        ReceiptHandle::InMemory { id } => Ok(*id),
        ReceiptHandle::Pgmq { .. } => Err(RelayError::validation(
            "pgmq receipt handle used against the in-memory provider",
        )),
    }
}
