use chrono::Utc;
use relay_execution::ExecutionService;
use relay_shared::domain::invocation::InvocationStatus;
use uuid::Uuid;

#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn mark_finished_is_sticky_against_a_later_non_terminal_write(pool: sqlx::PgPool) {
    let service = ExecutionService::new(pool);
    let invocation_id = Uuid::new_v4();

    service
        .record_enqueued(invocation_id, None, "chat_message", &serde_json::json!({}))
        .await
        .unwrap();
    service.mark_running(invocation_id, "chat_message").await.unwrap();
    service
        .mark_finished(invocation_id, InvocationStatus::Success, Some(serde_json::json!({"ok": true})), None)
        .await
        .unwrap();

    // A stale timeout firing after success already landed must not clobber it.
    service
        .mark_finished(invocation_id, InvocationStatus::Timeout, None, Some("late timeout".into()))
        .await
        .unwrap();

    let record = service.get_by_invocation_id(invocation_id).await.unwrap().unwrap();
    assert_eq!(record.status, "success");
    assert_eq!(record.result, Some(serde_json::json!({"ok": true})));
}

#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn mark_running_on_unknown_invocation_inserts_a_running_record(pool: sqlx::PgPool) {
    let service = ExecutionService::new(pool);
    let invocation_id = Uuid::new_v4();

    service.mark_running(invocation_id, "health_check").await.unwrap();

    let record = service.get_by_invocation_id(invocation_id).await.unwrap().unwrap();
    assert_eq!(record.status, "running");
    assert!(record.start_time.is_some());
}

#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn stats_global_aggregates_over_the_window(pool: sqlx::PgPool) {
    let service = ExecutionService::new(pool);

    for _ in 0..3 {
        let id = Uuid::new_v4();
        service
            .record_enqueued(id, None, "chat_message", &serde_json::json!({}))
            .await
            .unwrap();
        service.mark_running(id, "chat_message").await.unwrap();
        service
            .mark_finished(id, InvocationStatus::Success, None, None)
            .await
            .unwrap();
    }

    let failed_id = Uuid::new_v4();
    service
        .record_enqueued(failed_id, None, "chat_message", &serde_json::json!({}))
        .await
        .unwrap();
    service
        .mark_finished(failed_id, InvocationStatus::Failed, None, Some("boom".into()))
        .await
        .unwrap();

    let cleanup_id = Uuid::new_v4();
    service
        .record_enqueued(cleanup_id, None, "cleanup_tokens", &serde_json::json!({}))
        .await
        .unwrap();
    service
        .mark_finished(cleanup_id, InvocationStatus::Success, None, None)
        .await
        .unwrap();

    let stats = service.stats_global(Utc::now() - chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.success, 4);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.success_rate, 0.8);

    let chat_stats = stats.by_kind.get("chat_message").unwrap();
    assert_eq!(chat_stats.total, 4);
    assert_eq!(chat_stats.success, 3);
    assert_eq!(chat_stats.failed, 1);

    let cleanup_stats = stats.by_kind.get("cleanup_tokens").unwrap();
    assert_eq!(cleanup_stats.total, 1);
    assert_eq!(cleanup_stats.success, 1);
}

#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn cleanup_older_than_removes_only_completed_rows_before_the_cutoff(pool: sqlx::PgPool) {
    let service = ExecutionService::new(pool);
    let old_id = Uuid::new_v4();
    service
        .record_enqueued(old_id, None, "cleanup_tokens", &serde_json::json!({}))
        .await
        .unwrap();
    service
        .mark_finished(old_id, InvocationStatus::Success, None, None)
        .await
        .unwrap();

    let still_running_id = Uuid::new_v4();
    service
        .record_enqueued(still_running_id, None, "cleanup_tokens", &serde_json::json!({}))
        .await
        .unwrap();
    service.mark_running(still_running_id, "cleanup_tokens").await.unwrap();

    let removed = service.cleanup_older_than(Utc::now() + chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(removed, 1);

    assert!(service.get_by_invocation_id(old_id).await.unwrap().is_none());
    assert!(service.get_by_invocation_id(still_running_id).await.unwrap().is_some());
}
