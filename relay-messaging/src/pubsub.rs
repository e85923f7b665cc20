//! Pub/sub bus used to fan chat pipeline events out to SSE subscribers.
//!
//! One channel per conversation (`chat:{conversation_id}`). Redis-backed in
//! production; an in-memory broadcast-based bus for tests, so `relay-sse`'s fan-out
//! logic can be exercised without a live Redis instance.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::warn;

use relay_shared::error::{RelayError, RelayResult};

#[async_trait::async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> RelayResult<()>;

    /// Subscribe to `channel`. Returns a stream of raw payloads; the caller decodes.
    async fn subscribe(
        &self,
        channel: &str,
    ) -> RelayResult<std::pin::Pin<Box<dyn Stream<Item = String> + Send>>>;
}

pub struct RedisBus {
    client: redis::Client,
}

impl RedisBus {
    pub fn new(redis_url: &str) -> RelayResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RelayError::fatal(format!("invalid redis url: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Bus for RedisBus {
    async fn publish(&self, channel: &str, payload: String) -> RelayResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RelayError::transient(format!("redis connect: {e}")))?;
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| RelayError::transient(format!("redis publish: {e}")))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> RelayResult<std::pin::Pin<Box<dyn Stream<Item = String> + Send>>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| RelayError::transient(format!("redis pubsub connect: {e}")))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| RelayError::transient(format!("redis subscribe({channel}): {e}")))?;

        let stream = pubsub.into_on_message().filter_map(|msg| msg.get_payload::<String>().ok());
        Ok(Box::pin(stream))
    }
}

/// In-process fan-out bus: each channel gets its own `tokio::sync::broadcast` sender,
/// created lazily on first publish or subscribe.
#[derive(Default)]
pub struct InMemoryBus {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

#[async_trait::async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: String) -> RelayResult<()> {
        let sender = self.sender_for(channel);
        if sender.send(payload).is_err() {
            warn!(channel, "publish with no active subscribers");
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> RelayResult<std::pin::Pin<Box<dyn Stream<Item = String> + Send>>> {
        let receiver = self.sender_for(channel).subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|item| item.ok());
        Ok(Box::pin(stream))
    }
}
