//! Relays a conversation's chat pipeline events to a long-lived client: subscribe to
//! `chat:{conversation_id}`, decode each payload, and interleave heartbeats so
//! intermediaries don't time the connection out during a quiet generation.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tracing::{debug, warn};

use relay_messaging::Bus;
use relay_shared::domain::sse_event::SseEnvelope;

/// How long [`FanOut::stream`] waits on the bus before emitting a heartbeat frame.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum gap between two heartbeat frames, regardless of how many poll timeouts
/// elapse in between.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub enum SseFrame {
    Event(SseEnvelope),
    Heartbeat,
}

pub struct FanOut;

impl FanOut {
    /// Subscribes to `chat:{conversation_id}` and returns a stream of decoded frames.
    /// Malformed payloads are logged and skipped rather than terminating the stream —
    /// one bad frame shouldn't drop a client mid-generation. The subscription is
    /// released as soon as the returned stream is dropped, cancelled, or exhausted.
    pub fn stream(
        conversation_id: uuid::Uuid,
        bus: Arc<dyn Bus>,
    ) -> Pin<Box<dyn Stream<Item = SseFrame> + Send>> {
        let channel = format!("chat:{conversation_id}");
        Box::pin(async_stream::stream! {
            let mut raw = match bus.subscribe(&channel).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(%conversation_id, error = %e, "failed to subscribe to chat channel");
                    return;
                }
            };

            let _guard = UnsubscribeGuard { channel: channel.clone() };
            let mut last_heartbeat = tokio::time::Instant::now();

            loop {
                use futures::StreamExt;
                match tokio::time::timeout(POLL_TIMEOUT, raw.next()).await {
                    Ok(Some(payload)) => {
                        match serde_json::from_str::<SseEnvelope>(&payload) {
                            Ok(envelope) => yield SseFrame::Event(envelope),
                            Err(e) => warn!(%conversation_id, error = %e, "dropping malformed SSE payload"),
                        }
                        if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                            yield SseFrame::Heartbeat;
                            last_heartbeat = tokio::time::Instant::now();
                        }
                    }
                    Ok(None) => {
                        debug!(%conversation_id, "chat channel closed");
                        break;
                    }
                    Err(_) => {
                        yield SseFrame::Heartbeat;
                        last_heartbeat = tokio::time::Instant::now();
                    }
                }
            }
        })
    }
}

/// Best-effort unsubscribe on every exit path (normal completion, early drop from
/// client disconnect, or cancellation). `Bus` has no explicit unsubscribe call since
/// `tokio::sync::broadcast`/Redis pub/sub receivers release their slot on drop; this
/// guard only exists to log that release for observability.
struct UnsubscribeGuard {
    channel: String,
}

impl Drop for UnsubscribeGuard {
    fn drop(&mut self) {
        debug!(channel = %self.channel, "releasing chat channel subscription");
    }
}
