//! The chat pipeline, end to end: replay check, routing, retrieval, generation,
//! per-token publication, transactional persistence, and a fire-and-forget metadata
//! refresh follow-up.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_stream::StreamExt;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use relay_messaging::{Broker, Bus};
use relay_shared::domain::conversation::Role;
use relay_shared::domain::sse_event::{SseEnvelope, SseEvent, TokenUsage};
use relay_shared::domain::task_kind::TaskKind;
use relay_shared::dynamic_config::DynamicConfig;
use relay_shared::error::{RelayError, RelayResult};
use relay_shared::registry::TaskRegistry;
use relay_worker::{TaskHandler, TaskMessage};

use crate::generator::Generator;
use crate::prompt::{self, clamp_temperature};
use crate::repository::ConversationRepository;
use crate::retrieval::{RetrievalParams, Retriever};
use crate::router::{classify_with_retry, IntentClassifier, RouterDecision};

const ASSISTANT_FALLBACK_MESSAGE: &str = "Sorry, I wasn't able to generate a reply just now. Please try again shortly.";

#[derive(Debug, Deserialize)]
struct ChatPayload {
    conversation_id: Uuid,
    content: String,
    #[serde(default)]
    request_id: Option<Uuid>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    system_prompt_override: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

pub struct ChatMessageHandler {
    repository: Arc<ConversationRepository>,
    bus: Arc<dyn Bus>,
    classifier: Arc<dyn IntentClassifier>,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    dynamic_config: Arc<DynamicConfig>,
    broker: Arc<Broker>,
    registry: Arc<TaskRegistry>,
}

impl ChatMessageHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<ConversationRepository>,
        bus: Arc<dyn Bus>,
        classifier: Arc<dyn IntentClassifier>,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        dynamic_config: Arc<DynamicConfig>,
        broker: Arc<Broker>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            repository,
            bus,
            classifier,
            retriever,
            generator,
            dynamic_config,
            broker,
            registry,
        }
    }

    async fn publish(&self, conversation_id: Uuid, request_id: Uuid, event: SseEvent) {
        let envelope = SseEnvelope::new(conversation_id, request_id, event);
        let channel = format!("chat:{conversation_id}");
        let payload = match serde_json::to_string(&envelope) {
            Ok(p) => p,
            Err(e) => {
                error!(%conversation_id, error = %e, "failed to serialize SSE event, dropping");
                return;
            }
        };
        if let Err(e) = self.bus.publish(&channel, payload).await {
            error!(%conversation_id, error = %e, "failed to publish SSE event");
        }
    }

    async fn enqueue_metadata_refresh(&self, conversation_id: Uuid) {
        let Ok(queue) = self.registry.queue_for(TaskKind::ConversationMetadataRefresh) else {
            warn!(%conversation_id, "conversation_metadata_refresh is not registered, skipping follow-up");
            return;
        };
        let payload = serde_json::json!({
            "invocation_id": Uuid::now_v7(),
            "config_id": null,
            "kind": TaskKind::ConversationMetadataRefresh,
            "conversation_id": conversation_id,
        });
        if let Err(e) = self.broker.enqueue(queue, payload).await {
            warn!(%conversation_id, error = %e, "failed to enqueue metadata refresh follow-up");
        }
    }
}

#[async_trait]
impl TaskHandler for ChatMessageHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::ChatMessage
    }

    #[instrument(skip(self, message), fields(invocation_id = %message.invocation_id))]
    async fn run(&self, message: TaskMessage) -> RelayResult<serde_json::Value> {
        let payload: ChatPayload = serde_json::from_value(message.payload)
            .map_err(|e| RelayError::validation(format!("malformed chat payload: {e}")))?;
        let request_id = payload.request_id.unwrap_or(message.invocation_id);
        let conversation_id = payload.conversation_id;

        let Some(_conversation) = self.repository.get(conversation_id).await? else {
            self.publish(
                conversation_id,
                request_id,
                SseEvent::Error { message: "conversation_not_found".into(), detail: None },
            )
            .await;
            return Ok(serde_json::json!({"status": "conversation_not_found"}));
        };

        if let Some(existing) = self
            .repository
            .message_by_request_id(conversation_id, request_id, Role::Assistant)
            .await?
        {
            self.publish(conversation_id, request_id, SseEvent::Progress { stage: "recovered".into() })
                .await;
            self.publish(conversation_id, request_id, SseEvent::Delta { content: existing.content })
                .await;
            self.publish(conversation_id, request_id, SseEvent::Done { token_usage: None }).await;
            return Ok(serde_json::json!({"status": "replayed"}));
        }

        self.publish(conversation_id, request_id, SseEvent::Progress { stage: "router".into() }).await;
        let decision = classify_with_retry(self.classifier.as_ref(), &payload.content).await;

        let (reply, token_usage) = match decision {
            RouterDecision::Chat { reply } => {
                self.publish(
                    conversation_id,
                    request_id,
                    SseEvent::Citations { citations: Vec::new() },
                )
                .await;
                self.publish(conversation_id, request_id, SseEvent::Delta { content: reply.clone() }).await;
                (reply, None)
            }
            RouterDecision::Search { query } => {
                self.run_search(conversation_id, request_id, &payload, &query).await?
            }
        };

        let (_, assistant) = self
            .repository
            .append_turn(conversation_id, request_id, &payload.content, &reply)
            .await?;

        self.publish(conversation_id, request_id, SseEvent::Done { token_usage }).await;
        self.enqueue_metadata_refresh(conversation_id).await;

        Ok(serde_json::json!({"status": "completed", "assistant_message_id": assistant.id}))
    }
}

impl ChatMessageHandler {
    /// The retrieve-then-generate branch: citations published up front, then the full
    /// prompt/generation pipeline, returning the assembled assistant reply text and
    /// any trailing token usage. The direct-reply `Chat` branch in
    /// [`TaskHandler::run`] never calls this — no retrieval, no generator invocation,
    /// no per-token publication for it.
    async fn run_search(
        &self,
        conversation_id: Uuid,
        request_id: Uuid,
        payload: &ChatPayload,
        query: &str,
    ) -> RelayResult<(String, Option<TokenUsage>)> {
        self.publish(conversation_id, request_id, SseEvent::Progress { stage: "retrieval".into() }).await;

        let params = RetrievalParams::resolve(payload.top_k, &self.dynamic_config).await?;
        let evidence = match self.retriever.retrieve(query, params.top_k).await {
            Ok(results) => results,
            Err(e) => {
                warn!(%conversation_id, error = %e, "retrieval failed, continuing without evidence");
                Vec::new()
            }
        };
        self.publish(
            conversation_id,
            request_id,
            SseEvent::Citations { citations: evidence.clone() },
        )
        .await;

        let history = self.repository.recent_messages(conversation_id, prompt::HISTORY_WINDOW as i64).await?;

        let grounding_prompt = (!evidence.is_empty())
            .then_some("Answer using the provided context when it is relevant. Cite sources as [1], [2], matching their order in the context block.");
        let system_prompt = prompt::merge_system_prompts(&[payload.system_prompt_override.as_deref(), grounding_prompt]);
        let wrapped_user = prompt::wrap_user_message(&payload.content, &evidence);
        let messages = prompt::assemble(system_prompt.as_deref(), &history, &wrapped_user);
        let temperature = clamp_temperature(payload.temperature, None);

        self.publish(conversation_id, request_id, SseEvent::Progress { stage: "generating".into() }).await;

        let mut stream = match self.generator.generate(&messages, temperature).await {
            Ok(s) => s,
            Err(e) => {
                self.publish(
                    conversation_id,
                    request_id,
                    SseEvent::Error { message: "llm_stream_failed".into(), detail: Some(e.to_string()) },
                )
                .await;
                return Err(RelayError::handler_runtime(format!("generator.generate failed: {e}")));
            }
        };

        let mut assistant_tokens = String::new();
        let mut final_usage = None;

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    if let Some(token) = chunk.content {
                        assistant_tokens.push_str(&token);
                        self.publish(conversation_id, request_id, SseEvent::Delta { content: token }).await;
                    }
                    if chunk.usage.is_some() {
                        final_usage = chunk.usage;
                    }
                }
                Err(e) => {
                    self.publish(
                        conversation_id,
                        request_id,
                        SseEvent::Error { message: "llm_stream_failed".into(), detail: Some(e.to_string()) },
                    )
                    .await;
                    return Err(RelayError::handler_runtime(format!("token stream failed: {e}")));
                }
            }
        }

        let assistant_message = if assistant_tokens.trim().is_empty() {
            ASSISTANT_FALLBACK_MESSAGE.to_string()
        } else {
            assistant_tokens
        };

        Ok((assistant_message, final_usage))
    }
}
