//! Task execution lifecycle bookkeeping.
//!
//! Two rules make this more than a dumb audit log:
//!
//! 1. `mark_running` on an invocation id the service has never seen inserts a new
//!    `Running` row rather than erroring — a worker can observe and report progress on
//!    work this process didn't enqueue itself (e.g. after a restart).
//! 2. `mark_finished` never overwrites a row that's already in a terminal status
//!    (`Success`/`Failed`/`Timeout`). A duplicate delivery finishing twice — or a
//!    stale timeout firing after the handler actually completed — must not clobber
//!    the first terminal write.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{instrument, warn};
use uuid::Uuid;

use relay_shared::domain::invocation::InvocationStatus;
use relay_shared::error::RelayResult;

use crate::model::{ExecutionRecord, ExecutionStats, KindStats};

fn status_str(status: InvocationStatus) -> &'static str {
    match status {
        InvocationStatus::Queued => "queued",
        InvocationStatus::Running => "running",
        InvocationStatus::Success => "success",
        InvocationStatus::Failed => "failed",
        InvocationStatus::Timeout => "timeout",
    }
}

pub struct ExecutionService {
    pool: PgPool,
}

impl ExecutionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, args))]
    pub async fn record_enqueued(
        &self,
        invocation_id: Uuid,
        config_id: Option<Uuid>,
        kind: &str,
        args: &serde_json::Value,
    ) -> RelayResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_executions (invocation_id, config_id, kind, status, args, enqueue_time)
            VALUES ($1, $2, $3, 'queued', $4, now())
            "#,
        )
        .bind(invocation_id)
        .bind(config_id)
        .bind(kind)
        .bind(args)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn mark_running(&self, invocation_id: Uuid, kind: &str) -> RelayResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE task_executions
            SET status = 'running', start_time = now()
            WHERE invocation_id = $1 AND status NOT IN ('success', 'failed', 'timeout')
            "#,
        )
        .bind(invocation_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            // Unknown invocation (or already terminal, in which case this is a no-op
            // insert that will be rejected by the primary key) — insert a running
            // record so workers processing fires this service never enqueued can
            // still be observed.
            let result = sqlx::query(
                r#"
                INSERT INTO task_executions (invocation_id, kind, status, args, enqueue_time, start_time)
                VALUES ($1, $2, 'running', '{}'::jsonb, now(), now())
                ON CONFLICT (invocation_id) DO NOTHING
                "#,
            )
            .bind(invocation_id)
            .bind(kind)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                warn!(%invocation_id, "mark_running raced a terminal write, ignoring");
            }
        }
        Ok(())
    }

    #[instrument(skip(self, result, error_message))]
    pub async fn mark_finished(
        &self,
        invocation_id: Uuid,
        status: InvocationStatus,
        result: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> RelayResult<()> {
        debug_assert!(status.is_terminal(), "mark_finished requires a terminal status");

        let updated = sqlx::query(
            r#"
            UPDATE task_executions
            SET status = $2,
                completion_time = now(),
                duration_ms = EXTRACT(EPOCH FROM (now() - COALESCE(start_time, enqueue_time))) * 1000,
                result = $3,
                error_message = $4
            WHERE invocation_id = $1 AND status NOT IN ('success', 'failed', 'timeout')
            "#,
        )
        .bind(invocation_id)
        .bind(status_str(status))
        .bind(result)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            warn!(%invocation_id, ?status, "mark_finished found no non-terminal row; ignoring (already terminal or unknown)");
        }
        Ok(())
    }

    pub async fn get_by_invocation_id(&self, invocation_id: Uuid) -> RelayResult<Option<ExecutionRecord>> {
        let record = sqlx::query_as::<_, ExecutionRecord>(
            "SELECT invocation_id, config_id, kind, status, enqueue_time, start_time, completion_time, duration_ms, result, error_message FROM task_executions WHERE invocation_id = $1",
        )
        .bind(invocation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list_by_config(&self, config_id: Uuid, limit: i64) -> RelayResult<Vec<ExecutionRecord>> {
        let records = sqlx::query_as::<_, ExecutionRecord>(
            "SELECT invocation_id, config_id, kind, status, enqueue_time, start_time, completion_time, duration_ms, result, error_message
             FROM task_executions WHERE config_id = $1 ORDER BY enqueue_time DESC LIMIT $2",
        )
        .bind(config_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn list_recent(&self, limit: i64) -> RelayResult<Vec<ExecutionRecord>> {
        let records = sqlx::query_as::<_, ExecutionRecord>(
            "SELECT invocation_id, config_id, kind, status, enqueue_time, start_time, completion_time, duration_ms, result, error_message
             FROM task_executions ORDER BY enqueue_time DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn list_running(&self) -> RelayResult<Vec<ExecutionRecord>> {
        let records = sqlx::query_as::<_, ExecutionRecord>(
            "SELECT invocation_id, config_id, kind, status, enqueue_time, start_time, completion_time, duration_ms, result, error_message
             FROM task_executions WHERE status = 'running' ORDER BY start_time ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn list_failed(&self, limit: i64) -> RelayResult<Vec<ExecutionRecord>> {
        let records = sqlx::query_as::<_, ExecutionRecord>(
            "SELECT invocation_id, config_id, kind, status, enqueue_time, start_time, completion_time, duration_ms, result, error_message
             FROM task_executions WHERE status = 'failed' ORDER BY completion_time DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn stats_global(&self, since: DateTime<Utc>) -> RelayResult<ExecutionStats> {
        self.stats_for(None, since).await
    }

    pub async fn stats_by_config(&self, config_id: Uuid, since: DateTime<Utc>) -> RelayResult<ExecutionStats> {
        self.stats_for(Some(config_id), since).await
    }

    async fn stats_for(&self, config_id: Option<Uuid>, since: DateTime<Utc>) -> RelayResult<ExecutionStats> {
        let row: (i64, i64, i64, i64, i64, i64, Option<f64>) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE status = 'queued'),
                COUNT(*) FILTER (WHERE status = 'running'),
                COUNT(*) FILTER (WHERE status = 'success'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                COUNT(*) FILTER (WHERE status = 'timeout'),
                AVG(duration_ms)
            FROM task_executions
            WHERE enqueue_time >= $1 AND ($2::uuid IS NULL OR config_id = $2)
            "#,
        )
        .bind(since)
        .bind(config_id)
        .fetch_one(&self.pool)
        .await?;

        let (total, success, failed, timeout) = (row.0, row.3, row.4, row.5);
        let finished = success + failed + timeout;
        let success_rate = if finished == 0 { 0.0 } else { success as f64 / finished as f64 };

        let by_kind = self.stats_by_kind(config_id, since).await?;

        Ok(ExecutionStats {
            total,
            queued: row.1,
            running: row.2,
            success,
            failed,
            timeout,
            avg_duration_ms: row.6,
            success_rate,
            by_kind,
        })
    }

    async fn stats_by_kind(
        &self,
        config_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> RelayResult<HashMap<String, KindStats>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            kind: String,
            total: i64,
            success: i64,
            failed: i64,
            timeout: i64,
        }

        let rows: Vec<Row> = sqlx::query_as(
            r#"
            SELECT
                kind,
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'success') AS success,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'timeout') AS timeout
            FROM task_executions
            WHERE enqueue_time >= $1 AND ($2::uuid IS NULL OR config_id = $2)
            GROUP BY kind
            "#,
        )
        .bind(since)
        .bind(config_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.kind, KindStats { total: r.total, success: r.success, failed: r.failed, timeout: r.timeout }))
            .collect())
    }

    pub async fn cleanup_older_than(&self, before: DateTime<Utc>) -> RelayResult<u64> {
        let result = sqlx::query(
            "DELETE FROM task_executions WHERE completion_time IS NOT NULL AND completion_time < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_str_matches_expected_db_tokens() {
        assert_eq!(status_str(InvocationStatus::Queued), "queued");
        assert_eq!(status_str(InvocationStatus::Running), "running");
        assert_eq!(status_str(InvocationStatus::Success), "success");
        assert_eq!(status_str(InvocationStatus::Failed), "failed");
        assert_eq!(status_str(InvocationStatus::Timeout), "timeout");
    }
}
