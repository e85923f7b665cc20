//! Durable persistence for schedule instances — the source of truth `recover()`
//! rebuilds the in-memory armed-timer set from after a restart.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use relay_shared::domain::task_kind::TaskKind;
use relay_shared::error::{RelayError, RelayResult};

use crate::schedule::{ScheduleInstance, Trigger};

pub struct ScheduleRepository {
    pool: PgPool,
}

impl ScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, instance: &ScheduleInstance) -> RelayResult<()> {
        let (trigger_kind, trigger_payload) = encode_trigger(&instance.trigger);
        sqlx::query(
            r#"
            INSERT INTO schedule_instances (schedule_id, config_id, kind, trigger_kind, trigger_payload, next_fire, paused)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&instance.schedule_id)
        .bind(instance.config_id)
        .bind(instance.kind.as_str())
        .bind(trigger_kind)
        .bind(trigger_payload)
        .bind(instance.next_fire)
        .bind(instance.paused)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, schedule_id: &str) -> RelayResult<()> {
        sqlx::query("DELETE FROM schedule_instances WHERE schedule_id = $1")
            .bind(schedule_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_paused(&self, schedule_id: &str, paused: bool) -> RelayResult<()> {
        sqlx::query("UPDATE schedule_instances SET paused = $2 WHERE schedule_id = $1")
            .bind(schedule_id)
            .bind(paused)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_next_fire(&self, schedule_id: &str, next_fire: Option<DateTime<Utc>>) -> RelayResult<()> {
        sqlx::query("UPDATE schedule_instances SET next_fire = $2 WHERE schedule_id = $1")
            .bind(schedule_id)
            .bind(next_fire)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_all(&self) -> RelayResult<Vec<ScheduleInstance>> {
        let rows: Vec<Row> = sqlx::query_as(
            "SELECT schedule_id, config_id, kind, trigger_kind, trigger_payload, next_fire, paused FROM schedule_instances",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Row::try_into_instance).collect()
    }

    pub async fn list_by_config(&self, config_id: Uuid) -> RelayResult<Vec<ScheduleInstance>> {
        let rows: Vec<Row> = sqlx::query_as(
            "SELECT schedule_id, config_id, kind, trigger_kind, trigger_payload, next_fire, paused FROM schedule_instances WHERE config_id = $1",
        )
        .bind(config_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Row::try_into_instance).collect()
    }
}

#[derive(sqlx::FromRow)]
struct Row {
    schedule_id: String,
    config_id: Uuid,
    kind: String,
    trigger_kind: String,
    trigger_payload: String,
    next_fire: Option<DateTime<Utc>>,
    paused: bool,
}

impl Row {
    fn try_into_instance(self) -> RelayResult<ScheduleInstance> {
        let kind: TaskKind = self
            .kind
            .parse()
            .map_err(|e: String| RelayError::Fatal(format!("corrupt schedule row: {e}")))?;
        let trigger = decode_trigger(&self.trigger_kind, &self.trigger_payload)?;
        Ok(ScheduleInstance {
            schedule_id: self.schedule_id,
            config_id: self.config_id,
            kind,
            trigger,
            next_fire: self.next_fire,
            paused: self.paused,
        })
    }
}

fn encode_trigger(trigger: &Trigger) -> (&'static str, String) {
    match trigger {
        Trigger::Cron(expr) => ("cron", expr.clone()),
        Trigger::OneShot(at) => ("one_shot", at.to_rfc3339()),
    }
}

fn decode_trigger(kind: &str, payload: &str) -> RelayResult<Trigger> {
    match kind {
        "cron" => Ok(Trigger::Cron(payload.to_string())),
        "one_shot" => {
            let at = DateTime::parse_from_rfc3339(payload)
                .map_err(|e| RelayError::Fatal(format!("corrupt one-shot trigger payload: {e}")))?
                .with_timezone(&Utc);
            Ok(Trigger::OneShot(at))
        }
        other => Err(RelayError::Fatal(format!("unknown trigger kind in storage: {other}"))),
    }
}
