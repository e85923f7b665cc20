//! Generic consume/dispatch/deadline loop shared by every task kind.
//!
//! One [`WorkerPool`] owns a single queue. A process that serves several queues runs
//! one pool per queue, each in its own `tokio::spawn` — no event-driven listener
//! machinery, polling only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use relay_execution::ExecutionService;
use relay_messaging::{Broker, QueuedMessage};
use relay_shared::domain::invocation::InvocationStatus;
use relay_shared::domain::task_kind::TaskKind;
use relay_shared::error::{RelayError, RelayResult};

use crate::handler::{TaskHandler, TaskMessage};

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub batch_size: u32,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
    pub max_concurrent: usize,
    pub default_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            visibility_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            max_concurrent: 10,
            default_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    invocation_id: Uuid,
    config_id: Option<Uuid>,
    kind: TaskKind,
    #[serde(flatten)]
    payload: serde_json::Value,
}

pub struct WorkerPool {
    queue: String,
    broker: Arc<Broker>,
    execution: Arc<ExecutionService>,
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(queue: impl Into<String>, broker: Arc<Broker>, execution: Arc<ExecutionService>, config: WorkerPoolConfig) -> Self {
        Self {
            queue: queue.into(),
            broker,
            execution,
            handlers: HashMap::new(),
            config,
        }
    }

    pub fn register(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    /// Runs until cancelled. Intended to be driven from a `tokio::select!` against a
    /// shutdown signal at the call site, not to return on its own.
    #[instrument(skip(self), fields(queue = %self.queue))]
    pub async fn run(self: Arc<Self>) {
        self.broker
            .ensure_queue(&self.queue)
            .await
            .unwrap_or_else(|e| warn!(queue = %self.queue, error = %e, "ensure_queue failed, continuing anyway"));

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.max_concurrent));

        loop {
            let messages = match self
                .broker
                .consume(&self.queue, self.config.batch_size, self.config.visibility_timeout)
                .await
            {
                Ok(msgs) => msgs,
                Err(e) => {
                    warn!(queue = %self.queue, error = %e, "consume failed, backing off");
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
            };

            if messages.is_empty() {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            for message in messages {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                let pool = self.clone();
                tokio::spawn(async move {
                    pool.process_one(message).await;
                    drop(permit);
                });
            }
        }
    }

    async fn process_one(&self, message: QueuedMessage) {
        let envelope: Envelope = match serde_json::from_value(message.payload.clone()) {
            Ok(e) => e,
            Err(e) => {
                error!(queue = %self.queue, error = %e, "malformed task envelope, dropping");
                let _ = self.broker.ack(&self.queue, &message.receipt).await;
                return;
            }
        };

        let Some(handler) = self.handlers.get(&envelope.kind).cloned() else {
            error!(queue = %self.queue, kind = %envelope.kind, "no handler registered for this task kind, dropping");
            let _ = self.broker.ack(&self.queue, &message.receipt).await;
            return;
        };

        if let Err(e) = self.execution.mark_running(envelope.invocation_id, envelope.kind.as_str()).await {
            warn!(invocation_id = %envelope.invocation_id, error = %e, "failed to record running state, continuing anyway");
        }

        let task_message = TaskMessage {
            invocation_id: envelope.invocation_id,
            config_id: envelope.config_id,
            kind: envelope.kind,
            payload: envelope.payload,
        };

        let outcome = tokio::time::timeout(self.config.default_timeout, handler.run(task_message)).await;

        match outcome {
            Ok(Ok(result)) => {
                self.finish(envelope.invocation_id, InvocationStatus::Success, Some(result), None)
                    .await;
                let _ = self.broker.ack(&self.queue, &message.receipt).await;
            }
            Ok(Err(e)) if e.is_retryable() => {
                debug!(invocation_id = %envelope.invocation_id, error = %e, "transient handler error, requeueing");
                let _ = self.broker.nack(&self.queue, &message.receipt, true).await;
            }
            Ok(Err(e)) => {
                self.finish(envelope.invocation_id, InvocationStatus::Failed, None, Some(e.to_string()))
                    .await;
                let _ = self.broker.ack(&self.queue, &message.receipt).await;
            }
            Err(_elapsed) => {
                warn!(invocation_id = %envelope.invocation_id, "handler exceeded its deadline");
                self.finish(
                    envelope.invocation_id,
                    InvocationStatus::Timeout,
                    None,
                    Some(RelayError::DeadlineExceeded.to_string()),
                )
                .await;
                let _ = self.broker.ack(&self.queue, &message.receipt).await;
            }
        }
    }

    async fn finish(
        &self,
        invocation_id: Uuid,
        status: InvocationStatus,
        result: Option<serde_json::Value>,
        error_message: Option<String>,
    ) {
        if let Err(e) = self.execution.mark_finished(invocation_id, status, result, error_message).await {
            error!(%invocation_id, error = %e, "failed to record final invocation state");
        } else {
            info!(%invocation_id, ?status, "invocation finished");
        }
    }
}
