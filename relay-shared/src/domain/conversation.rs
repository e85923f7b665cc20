//! Conversation/message transcript types persisted by the chat pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An append-only transcript entry. `message_index` is assigned under a row lock on
/// the parent conversation at insert time (see `relay_chat::repository`) and is the
/// ordering key for prompt assembly and history pagination — never the timestamp,
/// which can collide or skew under clock adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub message_index: i32,
    pub role: Role,
    pub content: String,
    pub request_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
