//! Broker and result-store tuning knobs.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    pub redis_url: String,
    #[serde(default = "default_visibility_timeout_seconds")]
    pub visibility_timeout_seconds: u32,
    #[serde(default = "default_result_ttl_seconds")]
    pub result_ttl_seconds: u64,
    #[serde(default = "default_poll_batch_size")]
    pub poll_batch_size: u32,
    #[serde(default)]
    pub queue_prefix: String,
}

fn default_visibility_timeout_seconds() -> u32 {
    30
}

fn default_result_ttl_seconds() -> u64 {
    3600
}

fn default_poll_batch_size() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg: MessagingConfig =
            serde_json::from_value(serde_json::json!({"redis_url": "redis://localhost"}))
                .unwrap();
        assert_eq!(cfg.visibility_timeout_seconds, 30);
        assert_eq!(cfg.result_ttl_seconds, 3600);
        assert_eq!(cfg.poll_batch_size, 10);
    }
}
