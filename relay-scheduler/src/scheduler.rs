//! The scheduler proper: owns the live set of armed timers and fires task
//! invocations onto the broker.
//!
//! Restructured away from the original's module-level singleton — a `Scheduler` is
//! constructed once by whoever bootstraps the process and handed around as a shared
//! dependency, not reached for through a global.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use relay_messaging::Broker;
use relay_shared::domain::task_kind::TaskKind;
use relay_shared::error::{RelayError, RelayResult};
use relay_shared::registry::TaskRegistry;

use crate::schedule::{config_id_from_schedule_id, new_schedule_id, ScheduleInstance, Trigger};
use crate::store::ScheduleRepository;

pub struct SchedulerConfig {
    pub missed_fire_grace: chrono::Duration,
    pub enqueue_retry_backoff: StdDuration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            missed_fire_grace: chrono::Duration::seconds(30),
            enqueue_retry_backoff: StdDuration::from_millis(200),
        }
    }
}

pub struct Scheduler {
    repository: ScheduleRepository,
    broker: Arc<Broker>,
    registry: Arc<TaskRegistry>,
    config: SchedulerConfig,
    live: DashMap<String, JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        repository: ScheduleRepository,
        broker: Arc<Broker>,
        registry: Arc<TaskRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repository,
            broker,
            registry,
            config,
            live: DashMap::new(),
        }
    }

    #[instrument(skip(self, trigger))]
    pub async fn register(&self, config_id: Uuid, kind: TaskKind, trigger: Trigger) -> RelayResult<String> {
        let schedule_id = new_schedule_id(config_id);
        let next_fire = trigger.next_after(Utc::now())?;

        let instance = ScheduleInstance {
            schedule_id: schedule_id.clone(),
            config_id,
            kind,
            trigger,
            next_fire,
            paused: false,
        };
        self.repository.insert(&instance).await?;
        self.arm(instance);
        Ok(schedule_id)
    }

    pub async fn unregister(&self, schedule_id: &str) -> RelayResult<()> {
        if let Some((_, handle)) = self.live.remove(schedule_id) {
            handle.abort();
        }
        self.repository.delete(schedule_id).await
    }

    pub async fn pause(&self, schedule_id: &str) -> RelayResult<()> {
        if let Some((_, handle)) = self.live.remove(schedule_id) {
            handle.abort();
        }
        self.repository.set_paused(schedule_id, true).await
    }

    /// Re-registers a paused instance under a fresh schedule-id rather than flipping
    /// its `paused` flag in place, so the old instance stays retired and a config can
    /// accumulate several historical instances across pause/resume cycles.
    #[instrument(skip(self, trigger))]
    pub async fn resume(&self, schedule_id: &str, kind: TaskKind, trigger: Trigger) -> RelayResult<String> {
        let config_id = config_id_from_schedule_id(schedule_id)
            .ok_or_else(|| RelayError::validation(format!("malformed schedule_id '{schedule_id}'")))?;
        if let Some((_, handle)) = self.live.remove(schedule_id) {
            handle.abort();
        }
        self.register(config_id, kind, trigger).await
    }

    pub async fn list_all(&self) -> RelayResult<Vec<ScheduleInstance>> {
        self.repository.list_all().await
    }

    pub async fn list_by_config(&self, config_id: Uuid) -> RelayResult<Vec<ScheduleInstance>> {
        self.repository.list_by_config(config_id).await
    }

    /// Load every persisted instance and arm those that aren't paused, coalescing any
    /// fire that's overdue by more than the grace window instead of firing a storm of
    /// backlog invocations after downtime.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> RelayResult<()> {
        let instances = self.repository.list_all().await?;
        let now = Utc::now();
        let mut armed = 0usize;
        let mut coalesced = 0usize;

        for mut instance in instances {
            if instance.paused {
                continue;
            }

            if let Some(next_fire) = instance.next_fire {
                let overdue_by = now - next_fire;
                if overdue_by > self.config.missed_fire_grace {
                    coalesced += 1;
                    let recomputed = instance.trigger.next_after(now)?;
                    self.repository
                        .update_next_fire(&instance.schedule_id, recomputed)
                        .await?;
                    instance.next_fire = recomputed;
                    warn!(
                        schedule_id = %instance.schedule_id,
                        overdue_seconds = overdue_by.num_seconds(),
                        "coalescing missed schedule fire past the grace window"
                    );
                }
            }

            armed += 1;
            self.arm(instance);
        }

        info!(armed, coalesced, "scheduler recovery complete");
        Ok(())
    }

    pub async fn shutdown(&self) {
        for entry in self.live.iter() {
            entry.value().abort();
        }
        self.live.clear();
    }

    fn arm(&self, instance: ScheduleInstance) {
        let Some(next_fire) = instance.next_fire else {
            return;
        };

        let schedule_id = instance.schedule_id.clone();
        let repository_pool_handle = self.clone_handles();
        let handle = tokio::spawn(run_instance(instance, next_fire, repository_pool_handle));
        self.live.insert(schedule_id, handle);
    }

    fn clone_handles(&self) -> FireContext {
        FireContext {
            broker: self.broker.clone(),
            registry: self.registry.clone(),
            enqueue_retry_backoff: self.config.enqueue_retry_backoff,
        }
    }
}

#[derive(Clone)]
struct FireContext {
    broker: Arc<Broker>,
    registry: Arc<TaskRegistry>,
    enqueue_retry_backoff: StdDuration,
}

/// Background timer for a single armed instance. Sleeps until `next_fire`, enqueues a
/// fresh invocation, then (for cron triggers) computes the next occurrence and loops;
/// one-shot triggers fire once and exit.
async fn run_instance(mut instance: ScheduleInstance, mut next_fire: DateTime<Utc>, ctx: FireContext) {
    loop {
        let now = Utc::now();
        if next_fire > now {
            let delay = (next_fire - now)
                .to_std()
                .unwrap_or(StdDuration::from_secs(0));
            tokio::time::sleep(delay).await;
        }

        fire_once(&instance, &ctx).await;

        match instance.trigger.next_after(Utc::now()) {
            Ok(Some(fire)) => next_fire = fire,
            Ok(None) => break,
            Err(e) => {
                error!(schedule_id = %instance.schedule_id, error = %e, "failed to compute next fire, stopping instance");
                break;
            }
        }
        instance.next_fire = Some(next_fire);
    }
}

async fn fire_once(instance: &ScheduleInstance, ctx: &FireContext) {
    let invocation_id = Uuid::now_v7();
    let payload = serde_json::json!({
        "invocation_id": invocation_id,
        "config_id": instance.config_id,
        "kind": instance.kind,
        "schedule_id": instance.schedule_id,
    });

    let queue = match ctx.registry.queue_for(instance.kind) {
        Ok(q) => q.to_string(),
        Err(e) => {
            error!(schedule_id = %instance.schedule_id, error = %e, "cannot fire: task kind not registered");
            return;
        }
    };

    for attempt in 0..2 {
        match ctx.broker.enqueue(&queue, payload.clone()).await {
            Ok(()) => return,
            Err(e) if attempt == 0 => {
                warn!(schedule_id = %instance.schedule_id, error = %e, "fire-time enqueue failed, retrying once");
                tokio::time::sleep(ctx.enqueue_retry_backoff).await;
            }
            Err(e) => {
                error!(schedule_id = %instance.schedule_id, error = %e, "fire-time enqueue failed twice, recording failure");
            }
        }
    }
}

/// Guards against two instances for the same config racing each other's timers when
/// both exist briefly during a schedule-payload edit (old instance torn down, new one
/// armed) — callers should prefer [`Scheduler::unregister`] before [`Scheduler::register`]
/// rather than running both concurrently.
#[allow(dead_code)]
fn _assert_no_duplicate_config_ids(instances: &[ScheduleInstance]) -> bool {
    let mut seen = HashMap::new();
    for instance in instances {
        *seen.entry(instance.config_id).or_insert(0) += 1;
    }
    seen.values().all(|count| *count <= 1)
}
