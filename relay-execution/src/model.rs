//! Row types for the `task_executions` table, plus the small stats aggregates the
//! service computes over it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub use relay_shared::domain::invocation::InvocationStatus;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ExecutionRecord {
    pub invocation_id: Uuid,
    pub config_id: Option<Uuid>,
    pub kind: String,
    pub status: String,
    pub enqueue_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct KindStats {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub timeout: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionStats {
    pub total: i64,
    pub queued: i64,
    pub running: i64,
    pub success: i64,
    pub failed: i64,
    pub timeout: i64,
    pub avg_duration_ms: Option<f64>,
    /// `success / (success + failed + timeout)`; `0.0` when nothing has finished yet.
    pub success_rate: f64,
    pub by_kind: HashMap<String, KindStats>,
}
