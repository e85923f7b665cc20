//! A single fire of a task — either scheduler-triggered or submitted directly through
//! the enqueue surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task_kind::TaskKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Queued,
    Running,
    Success,
    Failed,
    Timeout,
}

impl InvocationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInvocation {
    pub invocation_id: Uuid,
    pub config_id: Option<Uuid>,
    pub kind: TaskKind,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub labels: serde_json::Value,
    pub status: InvocationStatus,
    pub enqueue_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
}

impl TaskInvocation {
    pub fn new(kind: TaskKind, args: serde_json::Value) -> Self {
        Self {
            invocation_id: Uuid::now_v7(),
            config_id: None,
            kind,
            args,
            kwargs: serde_json::json!({}),
            labels: serde_json::json!({}),
            status: InvocationStatus::Queued,
            enqueue_time: Utc::now(),
            start_time: None,
            completion_time: None,
            duration_ms: None,
            result: None,
            error_message: None,
            error_traceback: None,
        }
    }
}
