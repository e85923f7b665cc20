pub mod axum_adapter;
pub mod fanout;

pub use fanout::{FanOut, SseFrame, HEARTBEAT_INTERVAL, POLL_TIMEOUT};
