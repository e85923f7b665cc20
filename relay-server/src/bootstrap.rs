//! Explicit init-time wiring: load configuration, connect to Postgres/Redis, build the
//! messaging/result-store/registry/scheduler/worker-pool stack, and hand back a
//! [`Bootstrap`] the binary drives through start-up and shutdown — one struct owning
//! every long-lived handle, built once, with no global statics anywhere in the chain.

use std::sync::{Arc, Mutex};

use tracing::info;

use relay_chat::{ChatMessageHandler, ConversationMetadataRefreshHandler, ConversationRepository};
use relay_execution::ExecutionService;
use relay_messaging::{
    Broker, Bus, InMemoryBus, MessagingProvider, PgmqProvider, RedisBus, RedisResultStore, ResultStore,
};
use relay_scheduler::{Scheduler, SchedulerConfig as RuntimeSchedulerConfig, ScheduleRepository};
use relay_shared::config::RelayConfig;
use relay_shared::dynamic_config::{DynamicConfig, PostgresSettingsSource};
use relay_shared::error::{RelayError, RelayResult};
use relay_shared::registry::{ParamSpec, TaskRegistry, TaskRegistryBuilder};
use relay_shared::resilience::{CircuitBreaker, CircuitBreakerConfig};
use relay_shared::{database, domain::task_kind::TaskKind};
use relay_worker::{WorkerPool, WorkerPoolConfig};

use crate::collaborators::{EchoGenerator, HeuristicClassifier, NullRetriever};

/// Every long-lived handle the HTTP routes and the background worker/scheduler tasks
/// need, built once at start-up.
pub struct Bootstrap {
    pub config: RelayConfig,
    pub pool: sqlx::PgPool,
    pub bus: Arc<dyn Bus>,
    pub broker: Arc<Broker>,
    pub result_store: Arc<dyn ResultStore>,
    pub registry: Arc<TaskRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub repository: Arc<ConversationRepository>,
    worker_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

fn build_registry() -> RelayResult<TaskRegistry> {
    TaskRegistryBuilder::new()
        .register(TaskKind::ChatMessage, "chat_queue", vec![ParamSpec::required("content")])?
        .register(
            TaskKind::ConversationMetadataRefresh,
            "conversation_metadata_queue",
            vec![ParamSpec::required("conversation_id")],
        )?
        .register(TaskKind::CleanupTokens, "maintenance_queue", vec![])?
        .register(TaskKind::SendEmail, "notification_queue", vec![ParamSpec::required("to")])?
        .register(TaskKind::DataExport, "maintenance_queue", vec![ParamSpec::required("user_id")])?
        .register(TaskKind::HealthCheck, "maintenance_queue", vec![])
        .map(TaskRegistryBuilder::build)
}

impl Bootstrap {
    pub async fn bootstrap() -> RelayResult<Self> {
        dotenvy::dotenv().ok();
        let config = RelayConfig::load()?;

        let pool = database::connect(&config.database).await?;
        relay_shared::database::migrator::MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| RelayError::fatal(format!("migration failed: {e}")))?;

        let provider = MessagingProvider::Postgres(PgmqProvider::new(pool.clone()));

        let breaker = Arc::new(CircuitBreaker::new(
            "broker",
            CircuitBreakerConfig::default(),
        ));
        let broker = Arc::new(Broker::new(Arc::new(provider)).with_circuit_breaker(breaker));

        let bus: Arc<dyn Bus> = match RedisBus::new(&config.messaging.redis_url) {
            Ok(redis_bus) => Arc::new(redis_bus),
            Err(e) => {
                tracing::warn!(error = %e, "falling back to in-memory bus, redis url did not parse");
                Arc::new(InMemoryBus::new())
            }
        };

        let result_store: Arc<dyn ResultStore> = match RedisResultStore::new(&config.messaging.redis_url) {
            Ok(store) => Arc::new(store),
            Err(e) => return Err(e),
        };

        let registry = Arc::new(build_registry()?);

        let settings_source = Arc::new(PostgresSettingsSource::new(pool.clone()));
        let dynamic_config = Arc::new(DynamicConfig::new(settings_source));

        let schedule_repository = ScheduleRepository::new(pool.clone());
        let scheduler_config = RuntimeSchedulerConfig {
            missed_fire_grace: chrono::Duration::seconds(config.scheduler.missed_fire_grace_seconds),
            enqueue_retry_backoff: std::time::Duration::from_millis(config.scheduler.enqueue_retry_backoff_ms),
        };
        let scheduler = Arc::new(Scheduler::new(schedule_repository, broker.clone(), registry.clone(), scheduler_config));
        scheduler.recover().await?;

        let repository = Arc::new(ConversationRepository::new(pool.clone()));
        let execution = Arc::new(ExecutionService::new(pool.clone()));

        let chat_handler: Arc<dyn relay_worker::TaskHandler> = Arc::new(ChatMessageHandler::new(
            repository.clone(),
            bus.clone(),
            Arc::new(HeuristicClassifier),
            Arc::new(NullRetriever),
            Arc::new(EchoGenerator),
            dynamic_config.clone(),
            broker.clone(),
            registry.clone(),
        ));
        let metadata_handler: Arc<dyn relay_worker::TaskHandler> =
            Arc::new(ConversationMetadataRefreshHandler::new(repository.clone()));

        let worker_pool_config = WorkerPoolConfig {
            batch_size: config.messaging.poll_batch_size,
            visibility_timeout: std::time::Duration::from_secs(config.messaging.visibility_timeout_seconds as u64),
            ..Default::default()
        };

        let chat_pool = Arc::new(
            WorkerPool::new("chat_queue", broker.clone(), execution.clone(), worker_pool_config.clone())
                .register(chat_handler),
        );
        let metadata_pool = Arc::new(
            WorkerPool::new(
                "conversation_metadata_queue",
                broker.clone(),
                execution.clone(),
                worker_pool_config,
            )
            .register(metadata_handler),
        );

        let worker_handles = Mutex::new(vec![tokio::spawn(chat_pool.run()), tokio::spawn(metadata_pool.run())]);

        info!(queues = ?registry.all_queues(), "worker pools started");

        Ok(Self {
            config,
            pool,
            bus,
            broker,
            result_store,
            registry,
            scheduler,
            repository,
            worker_handles,
        })
    }

    /// Aborts every background worker pool task and tears down the scheduler's armed
    /// timers. Bounded by the caller via `tokio::time::timeout` around this call.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        let handles = std::mem::take(&mut *self.worker_handles.lock().unwrap_or_else(|p| p.into_inner()));
        for handle in handles {
            handle.abort();
        }
    }
}
