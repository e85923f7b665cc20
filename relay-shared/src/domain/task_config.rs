//! Persisted task configuration: the thing an operator creates to say "run this kind
//! of work, on this schedule, with these parameters".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task_kind::TaskKind;
use crate::error::{RelayError, RelayResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    Manual,
    Cron(String),
    OneShotAt(DateTime<Utc>),
}

impl Schedule {
    pub fn is_manual(&self) -> bool {
        matches!(self, Schedule::Manual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Active,
    Inactive,
    Paused,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    pub max_retries: u32,
    pub timeout_seconds: u32,
    /// Clamped to `[1, 10]` at construction time; see [`ExecutionPolicy::new`].
    pub priority: u8,
}

impl ExecutionPolicy {
    pub fn new(max_retries: u32, timeout_seconds: u32, priority: u8) -> Self {
        Self {
            max_retries,
            timeout_seconds,
            priority: priority.clamp(1, 10),
        }
    }
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::new(0, 30, 5)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfiguration {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub kind: TaskKind,
    pub schedule: Schedule,
    pub parameters: serde_json::Value,
    pub policy: ExecutionPolicy,
    pub status: LifecycleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskConfiguration {
    /// Validate invariants that span more than one field. Field-level clamps (e.g.
    /// priority) are applied eagerly in their own constructors instead.
    pub fn validate(&self) -> RelayResult<()> {
        if self.name.trim().is_empty() {
            return Err(RelayError::validation("task configuration name must not be empty"));
        }

        match &self.schedule {
            Schedule::Cron(expr) => {
                normalize_cron_expr(expr)?;
            }
            Schedule::OneShotAt(_) | Schedule::Manual => {}
        }

        Ok(())
    }
}

/// Accepts a standard 5-field cron expression (`min hour day month dow`) as well as
/// the 6/7-field form the `cron` crate itself parses (`sec min hour day month dow
/// [year]`), normalizing the 5-field case by prepending a `"0"` seconds field. Shared
/// by this module's validation and `relay-scheduler`'s trigger evaluation so both
/// agree on what a valid wire-format cron string looks like.
pub fn normalize_cron_expr(expr: &str) -> RelayResult<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {expr}")),
        6 | 7 => Ok(expr.to_string()),
        n => Err(RelayError::validation(format!(
            "expected a 5-field cron expression (or 6/7 fields including seconds), got {n}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(schedule: Schedule, status: LifecycleStatus) -> TaskConfiguration {
        let now = Utc::now();
        TaskConfiguration {
            id: Uuid::new_v4(),
            name: "nightly-cleanup".into(),
            description: None,
            kind: TaskKind::CleanupTokens,
            schedule,
            parameters: serde_json::json!({}),
            policy: ExecutionPolicy::default(),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn priority_is_clamped_into_range() {
        assert_eq!(ExecutionPolicy::new(0, 10, 0).priority, 1);
        assert_eq!(ExecutionPolicy::new(0, 10, 99).priority, 10);
        assert_eq!(ExecutionPolicy::new(0, 10, 5).priority, 5);
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut cfg = sample(Schedule::Manual, LifecycleStatus::Active);
        cfg.name = "   ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_cron_expression_is_rejected() {
        let cfg = sample(Schedule::Cron("not a cron".into()), LifecycleStatus::Active);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn valid_cron_expression_is_accepted() {
        let cfg = sample(Schedule::Cron("0 0 */5 * * *".into()), LifecycleStatus::Active);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn standard_five_field_cron_expression_is_accepted() {
        let cfg = sample(Schedule::Cron("*/5 * * * *".into()), LifecycleStatus::Active);
        assert!(cfg.validate().is_ok());
        assert_eq!(normalize_cron_expr("*/5 * * * *").unwrap(), "0 */5 * * * *");
    }

    #[test]
    fn manual_schedule_is_always_valid_regardless_of_status() {
        let cfg = sample(Schedule::Manual, LifecycleStatus::Active);
        assert!(cfg.validate().is_ok());
    }
}
