//! Converts a [`FanOut`] stream into `axum`'s SSE response type. This is the only
//! place `axum` is used outside `relay-server` — it exists to show the HTTP
//! integration point, not to implement routing or auth.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};

use crate::fanout::SseFrame;

/// Wraps a `FanOut` stream as an `axum` SSE response, translating [`SseFrame::Event`]
/// into a named `axum` event (`event.event`, serialized JSON body) and
/// [`SseFrame::Heartbeat`] into a bare comment frame, which axum's own `KeepAlive`
/// would otherwise also produce — this adapter emits its own so heartbeat cadence
/// stays governed by `fanout::HEARTBEAT_INTERVAL`, not a second independent timer.
pub fn into_sse_response<S>(frames: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = SseFrame> + Send + 'static,
{
    let events = frames.map(|frame| {
        let event = match frame {
            SseFrame::Event(envelope) => {
                let event_type = event_type_name(&envelope.event);
                let body = serde_json::to_string(&envelope).unwrap_or_default();
                Event::default().event(event_type).data(body)
            }
            SseFrame::Heartbeat => Event::default().comment("heartbeat"),
        };
        Ok(event)
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)))
}

fn event_type_name(event: &relay_shared::domain::sse_event::SseEvent) -> &'static str {
    use relay_shared::domain::sse_event::SseEvent;
    match event {
        SseEvent::Progress { .. } => "progress",
        SseEvent::Citations { .. } => "citations",
        SseEvent::Delta { .. } => "delta",
        SseEvent::Done { .. } => "done",
        SseEvent::Error { .. } => "error",
    }
}
