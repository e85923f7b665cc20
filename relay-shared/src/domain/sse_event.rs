//! SSE wire types. Tagged sum types rather than a free-form JSON map, so a malformed
//! frame fails to deserialize at the boundary instead of producing a silently-wrong
//! client render.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::evidence::RetrievedEvidence;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseEvent {
    Progress { stage: String },
    Citations { citations: Vec<RetrievedEvidence> },
    Delta { content: String },
    Done { token_usage: Option<TokenUsage> },
    Error { message: String, detail: Option<String> },
}

/// The envelope every event is wrapped in before being published to the bus and
/// relayed to clients. `conversation_id`/`request_id` let a client reconcile
/// out-of-order delivery across reconnects; `timestamp` is informational only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseEnvelope {
    pub conversation_id: Uuid,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SseEvent,
}

impl SseEnvelope {
    pub fn new(conversation_id: Uuid, request_id: Uuid, event: SseEvent) -> Self {
        Self {
            conversation_id,
            request_id,
            timestamp: Utc::now(),
            event,
        }
    }
}
