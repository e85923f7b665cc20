//! Scheduler tuning knobs.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_missed_fire_grace_seconds")]
    pub missed_fire_grace_seconds: i64,
    #[serde(default = "default_enqueue_retry_backoff_ms")]
    pub enqueue_retry_backoff_ms: u64,
}

fn default_missed_fire_grace_seconds() -> i64 {
    30
}

fn default_enqueue_retry_backoff_ms() -> u64 {
    200
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            missed_fire_grace_seconds: default_missed_fire_grace_seconds(),
            enqueue_retry_backoff_ms: default_enqueue_retry_backoff_ms(),
        }
    }
}
