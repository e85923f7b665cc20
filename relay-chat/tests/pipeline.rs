use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use relay_chat::generator::test_double::{FailingGenerator, ScriptedGenerator};
use relay_chat::{ChatMessageHandler, ConversationRepository, IntentClassifier, RouterDecision};
use relay_messaging::{Broker, Bus, InMemoryBus, InMemoryProvider, MessagingProvider};
use relay_shared::domain::evidence::{EvidenceSource, RetrievedEvidence};
use relay_shared::domain::sse_event::SseEnvelope;
use relay_shared::domain::task_kind::TaskKind;
use relay_shared::dynamic_config::{DynamicConfig, SettingsSource};
use relay_shared::error::{RelayError, RelayResult};
use relay_shared::registry::TaskRegistryBuilder;
use relay_worker::{TaskHandler, TaskMessage};

struct AlwaysChat;
#[async_trait]
impl IntentClassifier for AlwaysChat {
    async fn classify(&self, _query: &str) -> RelayResult<RouterDecision> {
        Ok(RouterDecision::Chat { reply: "Hi! How can I help?".into() })
    }
}

struct AlwaysSearch;
#[async_trait]
impl IntentClassifier for AlwaysSearch {
    async fn classify(&self, query: &str) -> RelayResult<RouterDecision> {
        Ok(RouterDecision::Search { query: query.to_string() })
    }
}

struct CountingRetriever {
    calls: Arc<AtomicUsize>,
    evidence: Vec<RetrievedEvidence>,
}
#[async_trait]
impl relay_chat::retrieval::Retriever for CountingRetriever {
    async fn retrieve(&self, _query: &str, _top_k: usize) -> RelayResult<Vec<RetrievedEvidence>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.evidence.clone())
    }
}

struct NoSettings;
#[async_trait]
impl SettingsSource for NoSettings {
    async fn load(&self, _key: &str) -> RelayResult<Option<serde_json::Value>> {
        Ok(None)
    }
}

fn one_piece_of_evidence() -> RetrievedEvidence {
    RetrievedEvidence {
        chunk_id: Uuid::new_v4(),
        document_id: Uuid::new_v4(),
        chunk_index: 0,
        content_preview: "refunds are processed within 5 business days".into(),
        similarity: 0.9,
        fused_score: 0.9,
        source: EvidenceSource::Vector,
    }
}

async fn seed_conversation(pool: &PgPool) -> Uuid {
    let conversation_id = Uuid::now_v7();
    sqlx::query("INSERT INTO conversations (id, user_id) VALUES ($1, $2)")
        .bind(conversation_id)
        .bind(Uuid::new_v4())
        .execute(pool)
        .await
        .unwrap();
    conversation_id
}

#[allow(clippy::too_many_arguments)]
fn build_handler(
    pool: PgPool,
    bus: Arc<dyn Bus>,
    classifier: Arc<dyn IntentClassifier>,
    retriever: Arc<dyn relay_chat::retrieval::Retriever>,
    generator: Arc<dyn relay_chat::Generator>,
) -> ChatMessageHandler {
    let repository = Arc::new(ConversationRepository::new(pool));
    let dynamic_config = Arc::new(DynamicConfig::new(Arc::new(NoSettings)));
    let broker = Arc::new(Broker::new(Arc::new(MessagingProvider::InMemory(InMemoryProvider::new()))));
    let registry = Arc::new(
        TaskRegistryBuilder::new()
            .register(TaskKind::ConversationMetadataRefresh, "metadata_queue", vec![])
            .unwrap()
            .build(),
    );
    ChatMessageHandler::new(repository, bus, classifier, retriever, generator, dynamic_config, broker, registry)
}

async fn drain_events(bus: &InMemoryBus, channel: &str, expected: usize) -> Vec<SseEnvelope> {
    use tokio_stream::StreamExt;
    let mut stream = bus.subscribe(channel).await.unwrap();
    let mut events = Vec::new();
    while events.len() < expected {
        let Ok(Some(raw)) = tokio::time::timeout(std::time::Duration::from_secs(2), stream.next()).await else {
            break;
        };
        events.push(serde_json::from_str(&raw).unwrap());
    }
    events
}

#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn a_fresh_search_turn_is_generated_and_persisted(pool: PgPool) {
    let conversation_id = seed_conversation(&pool).await;
    let bus = Arc::new(InMemoryBus::new());
    let channel = format!("chat:{conversation_id}");

    let handler = build_handler(
        pool.clone(),
        bus.clone(),
        Arc::new(AlwaysSearch),
        Arc::new(CountingRetriever { calls: Arc::new(AtomicUsize::new(0)), evidence: vec![] }),
        Arc::new(ScriptedGenerator { tokens: vec!["Hel", "lo", "!"], usage: None }),
    );

    let reader = tokio::spawn({
        let bus = bus.clone();
        async move { drain_events(&bus, &channel, 8).await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let request_id = Uuid::now_v7();
    let message = TaskMessage {
        invocation_id: Uuid::now_v7(),
        config_id: None,
        kind: TaskKind::ChatMessage,
        payload: serde_json::json!({"conversation_id": conversation_id, "content": "hi there", "request_id": request_id}),
    };
    let outcome = handler.run(message).await.unwrap();
    assert_eq!(outcome["status"], "completed");

    let events = reader.await.unwrap();
    assert!(events.iter().any(|e| matches!(&e.event, relay_shared::domain::sse_event::SseEvent::Done { .. })));

    let repository = ConversationRepository::new(pool);
    let recent = repository.recent_messages(conversation_id, 10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[1].content, "Hello!");
}

/// The `chat` decision is a fast path: no retrieval, no generator call, no per-token
/// publication. It publishes `router`, empty `citations`, one `delta` carrying the
/// classifier's reply verbatim, then `done`.
#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn a_chat_decision_skips_retrieval_and_generation_entirely(pool: PgPool) {
    let conversation_id = seed_conversation(&pool).await;
    let bus = Arc::new(InMemoryBus::new());
    let channel = format!("chat:{conversation_id}");
    let retriever_calls = Arc::new(AtomicUsize::new(0));
    let generator_calls = Arc::new(AtomicUsize::new(0));

    struct CountingGenerator {
        calls: Arc<AtomicUsize>,
    }
    #[async_trait]
    impl relay_chat::Generator for CountingGenerator {
        async fn generate(
            &self,
            _messages: &[relay_chat::PromptMessage],
            _temperature: f64,
        ) -> RelayResult<relay_chat::TokenStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::handler_runtime("should never be called for a chat decision"))
        }
    }

    let handler = build_handler(
        pool.clone(),
        bus.clone(),
        Arc::new(AlwaysChat),
        Arc::new(CountingRetriever { calls: retriever_calls.clone(), evidence: vec![one_piece_of_evidence()] }),
        Arc::new(CountingGenerator { calls: generator_calls.clone() }),
    );

    let reader = tokio::spawn({
        let bus = bus.clone();
        async move { drain_events(&bus, &channel, 4).await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let message = TaskMessage {
        invocation_id: Uuid::now_v7(),
        config_id: None,
        kind: TaskKind::ChatMessage,
        payload: serde_json::json!({"conversation_id": conversation_id, "content": "hi"}),
    };
    let outcome = handler.run(message).await.unwrap();
    assert_eq!(outcome["status"], "completed");

    assert_eq!(retriever_calls.load(Ordering::SeqCst), 0, "chat decision must never call the retriever");
    assert_eq!(generator_calls.load(Ordering::SeqCst), 0, "chat decision must never call the generator");

    let events = reader.await.unwrap();
    let stages: Vec<&str> = events
        .iter()
        .filter_map(|e| match &e.event {
            relay_shared::domain::sse_event::SseEvent::Progress { stage } => Some(stage.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(stages, vec!["router"]);

    let citations = events.iter().find_map(|e| match &e.event {
        relay_shared::domain::sse_event::SseEvent::Citations { citations } => Some(citations),
        _ => None,
    });
    assert_eq!(citations.map(|c| c.len()), Some(0));

    let delta = events.iter().find_map(|e| match &e.event {
        relay_shared::domain::sse_event::SseEvent::Delta { content } => Some(content.clone()),
        _ => None,
    });
    assert_eq!(delta, Some("Hi! How can I help?".to_string()));

    let repository = ConversationRepository::new(pool);
    let recent = repository.recent_messages(conversation_id, 10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[1].content, "Hi! How can I help?");
}

#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn a_missing_conversation_short_circuits_without_persisting(pool: PgPool) {
    let conversation_id = Uuid::now_v7();
    let bus = Arc::new(InMemoryBus::new());

    let handler = build_handler(
        pool.clone(),
        bus,
        Arc::new(AlwaysChat),
        Arc::new(CountingRetriever { calls: Arc::new(AtomicUsize::new(0)), evidence: vec![] }),
        Arc::new(ScriptedGenerator { tokens: vec!["hi"], usage: None }),
    );

    let message = TaskMessage {
        invocation_id: Uuid::now_v7(),
        config_id: None,
        kind: TaskKind::ChatMessage,
        payload: serde_json::json!({"conversation_id": conversation_id, "content": "hi"}),
    };
    let outcome = handler.run(message).await.unwrap();
    assert_eq!(outcome["status"], "conversation_not_found");

    let repository = ConversationRepository::new(pool);
    assert!(repository.get(conversation_id).await.unwrap().is_none());
}

#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn a_replayed_request_id_skips_generation_and_replays_the_stored_reply(pool: PgPool) {
    let conversation_id = seed_conversation(&pool).await;
    let bus = Arc::new(InMemoryBus::new());
    let request_id = Uuid::now_v7();

    let repository = ConversationRepository::new(pool.clone());
    repository.append_turn(conversation_id, request_id, "hi", "hello from a prior attempt").await.unwrap();

    let generator_calls = Arc::new(AtomicUsize::new(0));
    struct CountingGenerator {
        calls: Arc<AtomicUsize>,
    }
    #[async_trait]
    impl relay_chat::Generator for CountingGenerator {
        async fn generate(
            &self,
            _messages: &[relay_chat::PromptMessage],
            _temperature: f64,
        ) -> RelayResult<relay_chat::TokenStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::handler_runtime("should never be called on replay"))
        }
    }

    let handler = build_handler(
        pool,
        bus,
        Arc::new(AlwaysChat),
        Arc::new(CountingRetriever { calls: Arc::new(AtomicUsize::new(0)), evidence: vec![] }),
        Arc::new(CountingGenerator { calls: generator_calls.clone() }),
    );

    let message = TaskMessage {
        invocation_id: Uuid::now_v7(),
        config_id: None,
        kind: TaskKind::ChatMessage,
        payload: serde_json::json!({"conversation_id": conversation_id, "content": "hi", "request_id": request_id}),
    };
    let outcome = handler.run(message).await.unwrap();
    assert_eq!(outcome["status"], "replayed");
    assert_eq!(generator_calls.load(Ordering::SeqCst), 0);
}

#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn a_search_decision_retrieves_evidence_and_publishes_citations(pool: PgPool) {
    let conversation_id = seed_conversation(&pool).await;
    let bus = Arc::new(InMemoryBus::new());
    let channel = format!("chat:{conversation_id}");
    let retriever_calls = Arc::new(AtomicUsize::new(0));

    let handler = build_handler(
        pool,
        bus.clone(),
        Arc::new(AlwaysSearch),
        Arc::new(CountingRetriever { calls: retriever_calls.clone(), evidence: vec![one_piece_of_evidence()] }),
        Arc::new(ScriptedGenerator { tokens: vec!["the refund takes 5 days"], usage: None }),
    );

    let reader = tokio::spawn({
        let bus = bus.clone();
        async move { drain_events(&bus, &channel, 6).await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let message = TaskMessage {
        invocation_id: Uuid::now_v7(),
        config_id: None,
        kind: TaskKind::ChatMessage,
        payload: serde_json::json!({"conversation_id": conversation_id, "content": "what's your refund policy?"}),
    };
    handler.run(message).await.unwrap();

    assert_eq!(retriever_calls.load(Ordering::SeqCst), 1);
    let events = reader.await.unwrap();
    let citations = events.iter().find_map(|e| match &e.event {
        relay_shared::domain::sse_event::SseEvent::Citations { citations } => Some(citations),
        _ => None,
    });
    assert_eq!(citations.map(|c| c.len()), Some(1));
}

#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn a_generator_stream_failure_is_surfaced_and_nothing_is_persisted(pool: PgPool) {
    let conversation_id = seed_conversation(&pool).await;
    let bus = Arc::new(InMemoryBus::new());
    let channel = format!("chat:{conversation_id}");

    let handler = build_handler(
        pool.clone(),
        bus.clone(),
        Arc::new(AlwaysSearch),
        Arc::new(CountingRetriever { calls: Arc::new(AtomicUsize::new(0)), evidence: vec![] }),
        Arc::new(FailingGenerator),
    );

    let reader = tokio::spawn({
        let bus = bus.clone();
        async move { drain_events(&bus, &channel, 5).await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let message = TaskMessage {
        invocation_id: Uuid::now_v7(),
        config_id: None,
        kind: TaskKind::ChatMessage,
        payload: serde_json::json!({"conversation_id": conversation_id, "content": "hi"}),
    };
    let result = handler.run(message).await;
    assert!(result.is_err());
    assert!(!result.unwrap_err().is_retryable());

    let events = reader.await.unwrap();
    assert!(events.iter().any(|e| matches!(&e.event, relay_shared::domain::sse_event::SseEvent::Error { .. })));

    let repository = ConversationRepository::new(pool);
    assert!(repository.recent_messages(conversation_id, 10).await.unwrap().is_empty());
}

#[sqlx::test(migrator = "relay_shared::database::migrator::MIGRATOR")]
async fn an_empty_generated_reply_falls_back_to_a_stock_message(pool: PgPool) {
    let conversation_id = seed_conversation(&pool).await;
    let bus = Arc::new(InMemoryBus::new());

    let handler = build_handler(
        pool.clone(),
        bus,
        Arc::new(AlwaysSearch),
        Arc::new(CountingRetriever { calls: Arc::new(AtomicUsize::new(0)), evidence: vec![] }),
        Arc::new(ScriptedGenerator { tokens: vec!["   "], usage: None }),
    );

    let message = TaskMessage {
        invocation_id: Uuid::now_v7(),
        config_id: None,
        kind: TaskKind::ChatMessage,
        payload: serde_json::json!({"conversation_id": conversation_id, "content": "hi"}),
    };
    handler.run(message).await.unwrap();

    let repository = ConversationRepository::new(pool);
    let recent = repository.recent_messages(conversation_id, 10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert!(!recent[1].content.trim().is_empty());
    assert_ne!(recent[1].content, "   ");
}
