use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;

use relay_messaging::{Broker, InMemoryProvider, MessagingProvider};
use relay_scheduler::{Scheduler, SchedulerConfig, ScheduleInstance, ScheduleRepository, Trigger};
use relay_shared::domain::task_kind::TaskKind;
use relay_shared::registry::TaskRegistryBuilder;

fn test_registry() -> Arc<relay_shared::registry::TaskRegistry> {
    Arc::new(
        TaskRegistryBuilder::new()
            .register(TaskKind::CleanupTokens, "cleanup_queue", vec![])
            .unwrap()
            .build(),
    )
}

fn in_memory_broker() -> Arc<Broker> {
    Arc::new(Broker::new(Arc::new(MessagingProvider::InMemory(
        InMemoryProvider::new(),
    ))))
}

#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn register_persists_and_arms_a_cron_instance(pool: PgPool) {
    let repo = ScheduleRepository::new(pool);
    let broker = in_memory_broker();
    broker.ensure_queue("cleanup_queue").await.unwrap();
    let registry = test_registry();

    let scheduler = Scheduler::new(repo, broker.clone(), registry, SchedulerConfig::default());
    let schedule_id = scheduler
        .register(
            uuid::Uuid::new_v4(),
            TaskKind::CleanupTokens,
            Trigger::Cron("0 * * * * *".into()),
        )
        .await
        .unwrap();

    assert!(schedule_id.starts_with("scheduled_task:"));
    let all = scheduler.list_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].schedule_id, schedule_id);

    scheduler.shutdown().await;
}

#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn resume_registers_a_fresh_schedule_id_and_leaves_the_old_instance_paused(pool: PgPool) {
    let repo = ScheduleRepository::new(pool);
    let broker = in_memory_broker();
    broker.ensure_queue("cleanup_queue").await.unwrap();
    let registry = test_registry();
    let scheduler = Scheduler::new(repo, broker, registry, SchedulerConfig::default());

    let trigger = Trigger::Cron("0 * * * * *".into());
    let schedule_id = scheduler
        .register(uuid::Uuid::new_v4(), TaskKind::CleanupTokens, trigger.clone())
        .await
        .unwrap();

    scheduler.pause(&schedule_id).await.unwrap();
    let all = scheduler.list_all().await.unwrap();
    assert!(all.iter().find(|i| i.schedule_id == schedule_id).unwrap().paused);

    let resumed_id = scheduler
        .resume(&schedule_id, TaskKind::CleanupTokens, trigger)
        .await
        .unwrap();

    assert_ne!(resumed_id, schedule_id);
    let all = scheduler.list_all().await.unwrap();
    assert_eq!(all.len(), 2, "the old instance stays around as paused history");
    let old = all.iter().find(|i| i.schedule_id == schedule_id).unwrap();
    assert!(old.paused);
    let resumed = all.iter().find(|i| i.schedule_id == resumed_id).unwrap();
    assert!(!resumed.paused);

    scheduler.shutdown().await;
}

#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn unregister_removes_the_persisted_instance(pool: PgPool) {
    let repo = ScheduleRepository::new(pool);
    let broker = in_memory_broker();
    broker.ensure_queue("cleanup_queue").await.unwrap();
    let registry = test_registry();
    let scheduler = Scheduler::new(repo, broker, registry, SchedulerConfig::default());

    let schedule_id = scheduler
        .register(uuid::Uuid::new_v4(), TaskKind::CleanupTokens, Trigger::OneShot(Utc::now() + chrono::Duration::hours(1)))
        .await
        .unwrap();

    scheduler.unregister(&schedule_id).await.unwrap();
    let all = scheduler.list_all().await.unwrap();
    assert!(all.is_empty());
}

/// A fire overdue by more than the 30s grace window is coalesced to the next
/// occurrence instead of firing immediately on recovery.
#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn recover_coalesces_fires_past_the_grace_window(pool: PgPool) {
    let repo = ScheduleRepository::new(pool);
    let config_id = uuid::Uuid::new_v4();
    let overdue_instance = ScheduleInstance {
        schedule_id: relay_scheduler::new_schedule_id(config_id),
        config_id,
        kind: TaskKind::CleanupTokens,
        trigger: Trigger::Cron("0 * * * * *".into()),
        next_fire: Some(Utc::now() - chrono::Duration::minutes(10)),
        paused: false,
    };
    repo.insert(&overdue_instance).await.unwrap();

    let broker = in_memory_broker();
    broker.ensure_queue("cleanup_queue").await.unwrap();
    let registry = test_registry();
    let scheduler = Scheduler::new(repo, broker, registry, SchedulerConfig::default());

    scheduler.recover().await.unwrap();

    let all = scheduler.list_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].next_fire.unwrap() > Utc::now() - chrono::Duration::seconds(5));

    scheduler.shutdown().await;
}

/// A fire overdue by less than the grace window gets exactly one catch-up run: the
/// persisted `next_fire` is left as-is by `recover()` (the armed timer fires it
/// immediately since it is already in the past).
#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn recover_allows_a_single_catch_up_fire_within_the_grace_window(pool: PgPool) {
    let repo = ScheduleRepository::new(pool);
    let config_id = uuid::Uuid::new_v4();
    let barely_overdue_at = Utc::now() - chrono::Duration::seconds(5);
    let instance = ScheduleInstance {
        schedule_id: relay_scheduler::new_schedule_id(config_id),
        config_id,
        kind: TaskKind::CleanupTokens,
        trigger: Trigger::Cron("0 * * * * *".into()),
        next_fire: Some(barely_overdue_at),
        paused: false,
    };
    repo.insert(&instance).await.unwrap();

    let broker = in_memory_broker();
    broker.ensure_queue("cleanup_queue").await.unwrap();
    let registry = test_registry();
    let scheduler = Scheduler::new(repo, broker.clone(), registry, SchedulerConfig::default());

    scheduler.recover().await.unwrap();

    let all = scheduler.list_all().await.unwrap();
    assert_eq!(all[0].next_fire.unwrap(), barely_overdue_at);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let msgs = broker.consume("cleanup_queue", 10, Duration::from_secs(30)).await.unwrap();
    assert_eq!(msgs.len(), 1);

    scheduler.shutdown().await;
}
