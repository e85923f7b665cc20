//! Chat pipeline tuning knobs.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_history_window")]
    pub history_window: u32,
    #[serde(default = "default_classifier_timeout_ms")]
    pub classifier_timeout_ms: u64,
    #[serde(default = "default_sse_poll_timeout_seconds")]
    pub sse_poll_timeout_seconds: u64,
    #[serde(default = "default_sse_heartbeat_seconds")]
    pub sse_heartbeat_seconds: u64,
    #[serde(default = "default_rag_top_k")]
    pub default_rag_top_k: u32,
    #[serde(default = "default_generation_temperature")]
    pub default_generation_temperature: f64,
}

fn default_history_window() -> u32 {
    30
}

fn default_classifier_timeout_ms() -> u64 {
    300
}

fn default_sse_poll_timeout_seconds() -> u64 {
    5
}

fn default_sse_heartbeat_seconds() -> u64 {
    15
}

fn default_rag_top_k() -> u32 {
    8
}

fn default_generation_temperature() -> f64 {
    0.7
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            classifier_timeout_ms: default_classifier_timeout_ms(),
            sse_poll_timeout_seconds: default_sse_poll_timeout_seconds(),
            sse_heartbeat_seconds: default_sse_heartbeat_seconds(),
            default_rag_top_k: default_rag_top_k(),
            default_generation_temperature: default_generation_temperature(),
        }
    }
}
