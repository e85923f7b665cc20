//! Domain-facing facade over a [`MessagingProvider`]: a thin wrapper that adds
//! circuit-breaker protection and structured logging around every provider call,
//! without the caller needing to know which concrete provider is in play.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{instrument, warn};

use relay_shared::error::RelayResult;
use relay_shared::resilience::{CircuitBreaker, CircuitBreakerBehavior};

use crate::provider::{MessagingProvider, Provider, QueuedMessage, ReceiptHandle};

pub struct Broker {
    provider: Arc<MessagingProvider>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl Broker {
    pub fn new(provider: Arc<MessagingProvider>) -> Self {
        Self {
            provider,
            circuit_breaker: None,
        }
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    async fn with_breaker<F, T, Fut>(&self, op: F) -> RelayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RelayResult<T>>,
    {
        let Some(cb) = &self.circuit_breaker else {
            return op().await;
        };

        if !cb.should_allow() {
            return Err(relay_shared::error::RelayError::transient(
                "broker circuit breaker open",
            ));
        }

        let start = Instant::now();
        let result = op().await;
        match &result {
            Ok(_) => cb.record_success_manual(start.elapsed()),
            Err(e) if e.is_retryable() => cb.record_failure_manual(start.elapsed()),
            Err(_) => {}
        }
        result
    }

    #[instrument(skip(self, payload), fields(queue))]
    pub async fn enqueue(&self, queue: &str, payload: serde_json::Value) -> RelayResult<()> {
        self.with_breaker(|| self.provider.enqueue(queue, payload))
            .await
    }

    #[instrument(skip(self))]
    pub async fn consume(
        &self,
        queue: &str,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> RelayResult<Vec<QueuedMessage>> {
        self.with_breaker(|| self.provider.consume(queue, max_messages, visibility_timeout))
            .await
    }

    pub async fn ack(&self, queue: &str, receipt: &ReceiptHandle) -> RelayResult<()> {
        self.with_breaker(|| self.provider.ack(queue, receipt)).await
    }

    pub async fn nack(&self, queue: &str, receipt: &ReceiptHandle, requeue: bool) -> RelayResult<()> {
        if !requeue {
            warn!(queue, "nack without requeue: message dropped");
        }
        self.with_breaker(|| self.provider.nack(queue, receipt, requeue))
            .await
    }

    pub async fn extend_visibility(
        &self,
        queue: &str,
        receipt: &ReceiptHandle,
        extension: Duration,
    ) -> RelayResult<()> {
        self.with_breaker(|| self.provider.extend_visibility(queue, receipt, extension))
            .await
    }

    pub async fn ensure_queue(&self, queue: &str) -> RelayResult<()> {
        self.provider.ensure_queue(queue).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::InMemoryProvider;
    use relay_shared::resilience::CircuitBreakerConfig;

    fn in_memory_broker() -> Broker {
        Broker::new(Arc::new(MessagingProvider::InMemory(InMemoryProvider::new())))
    }

    #[tokio::test]
    async fn enqueue_and_consume_round_trip_without_a_breaker() {
        let broker = in_memory_broker();
        broker.ensure_queue("q").await.unwrap();
        broker.enqueue("q", serde_json::json!({"x": 1})).await.unwrap();

        let msgs = broker.consume("q", 10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(msgs.len(), 1);
        broker.ack("q", &msgs[0].receipt).await.unwrap();
    }

    #[tokio::test]
    async fn open_circuit_breaker_short_circuits_enqueue() {
        let breaker = Arc::new(CircuitBreaker::new(
            "broker-test",
            CircuitBreakerConfig {
                failure_threshold: 1,
                success_threshold: 1,
                open_timeout: Duration::from_secs(60),
            },
        ));
        breaker.force_open();

        let broker = in_memory_broker().with_circuit_breaker(breaker);
        let result = broker.enqueue("q", serde_json::json!(1)).await;
        assert!(result.is_err());
    }
}
