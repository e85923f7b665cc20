//! Trigger model and the persisted/armed schedule instance it drives.

use chrono::{DateTime, Utc};
use std::str::FromStr;
use uuid::Uuid;

use relay_shared::domain::task_kind::TaskKind;
use relay_shared::domain::normalize_cron_expr;
use relay_shared::error::{RelayError, RelayResult};

#[derive(Debug, Clone)]
pub enum Trigger {
    Cron(String),
    OneShot(DateTime<Utc>),
}

impl Trigger {
    /// Next fire strictly after `after`. `None` for a one-shot trigger whose time has
    /// already passed.
    pub fn next_after(&self, after: DateTime<Utc>) -> RelayResult<Option<DateTime<Utc>>> {
        match self {
            Trigger::Cron(expr) => {
                let normalized = normalize_cron_expr(expr)?;
                let schedule = cron::Schedule::from_str(&normalized)
                    .map_err(|e| RelayError::validation(format!("invalid cron expression '{expr}': {e}")))?;
                Ok(schedule.after(&after).next())
            }
            Trigger::OneShot(at) => Ok((*at > after).then_some(*at)),
        }
    }
}

/// `schedule_id` format is `scheduled_task:{config_id}:{uuid}` — fixed, not
/// reconstructible from its parts alone (the trailing uuid disambiguates multiple
/// live instances for the same config, e.g. during a schedule-payload edit).
pub fn new_schedule_id(config_id: Uuid) -> String {
    format!("scheduled_task:{config_id}:{}", Uuid::new_v4())
}

pub fn config_id_from_schedule_id(schedule_id: &str) -> Option<Uuid> {
    let mut parts = schedule_id.split(':');
    match (parts.next(), parts.next()) {
        (Some("scheduled_task"), Some(config_id)) => Uuid::parse_str(config_id).ok(),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleInstance {
    pub schedule_id: String,
    pub config_id: Uuid,
    pub kind: TaskKind,
    pub trigger: Trigger,
    pub next_fire: Option<DateTime<Utc>>,
    pub paused: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn schedule_id_round_trips_config_id() {
        let config_id = Uuid::new_v4();
        let schedule_id = new_schedule_id(config_id);
        assert!(schedule_id.starts_with("scheduled_task:"));
        assert_eq!(config_id_from_schedule_id(&schedule_id), Some(config_id));
    }

    #[test]
    fn malformed_schedule_id_yields_none() {
        assert_eq!(config_id_from_schedule_id("garbage"), None);
        assert_eq!(config_id_from_schedule_id("scheduled_task:not-a-uuid:x"), None);
    }

    #[test]
    fn cron_trigger_computes_next_fire_after_a_given_time() {
        let trigger = Trigger::Cron("0 */5 * * * *".into());
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = trigger.next_after(base).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 0, 5, 0).unwrap());
    }

    #[test]
    fn standard_five_field_cron_expression_is_accepted() {
        let trigger = Trigger::Cron("*/5 * * * *".into());
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = trigger.next_after(base).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 0, 5, 0).unwrap());
    }

    #[test]
    fn one_shot_trigger_fires_exactly_once_in_the_future() {
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let trigger = Trigger::OneShot(at);
        let before = at - chrono::Duration::seconds(1);
        assert_eq!(trigger.next_after(before).unwrap(), Some(at));
        assert_eq!(trigger.next_after(at).unwrap(), None);
    }

    #[test]
    fn malformed_cron_expression_is_rejected() {
        let trigger = Trigger::Cron("not a cron".into());
        assert!(trigger.next_after(Utc::now()).is_err());
    }
}
