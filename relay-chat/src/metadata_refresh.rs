//! Follow-up task that derives a conversation's title/summary after a turn completes.
//! Best-effort only: a failure here never affects the chat invocation that triggered it,
//! since the handler that enqueues this follow-up only logs enqueue failures and never
//! waits on or retries this task's outcome.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use relay_shared::domain::task_kind::TaskKind;
use relay_shared::error::{RelayError, RelayResult};
use relay_worker::{TaskHandler, TaskMessage};

use crate::repository::ConversationRepository;

const TITLE_MAX_CHARS: usize = 60;
const SUMMARY_MAX_MESSAGES: i64 = 6;

#[derive(Debug, Deserialize)]
struct MetadataRefreshPayload {
    conversation_id: Uuid,
}

pub struct ConversationMetadataRefreshHandler {
    repository: Arc<ConversationRepository>,
}

impl ConversationMetadataRefreshHandler {
    pub fn new(repository: Arc<ConversationRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl TaskHandler for ConversationMetadataRefreshHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::ConversationMetadataRefresh
    }

    async fn run(&self, message: TaskMessage) -> RelayResult<serde_json::Value> {
        let payload: MetadataRefreshPayload = serde_json::from_value(message.payload)
            .map_err(|e| RelayError::validation(format!("malformed metadata refresh payload: {e}")))?;

        let Some(conversation) = self.repository.get(payload.conversation_id).await? else {
            return Ok(serde_json::json!({"status": "conversation_not_found"}));
        };

        let history = self
            .repository
            .recent_messages(payload.conversation_id, SUMMARY_MAX_MESSAGES)
            .await?;

        if history.is_empty() {
            return Ok(serde_json::json!({"status": "no_messages"}));
        }

        let title = conversation.title.or_else(|| derive_title(&history));
        let summary = derive_summary(&history);

        self.repository
            .update_metadata(payload.conversation_id, title.as_deref(), Some(&summary))
            .await?;

        Ok(serde_json::json!({"status": "updated"}))
    }
}

/// A title heuristic: the first user turn, truncated to a readable length. A real
/// deployment would call back into the generator for a proper one-line title; this
/// scope keeps the follow-up dependency-free so its failure mode stays purely local.
fn derive_title(history: &[relay_shared::domain::conversation::Message]) -> Option<String> {
    use relay_shared::domain::conversation::Role;

    let first_user_turn = history.iter().find(|m| m.role == Role::User)?;
    let trimmed = first_user_turn.content.trim();
    if trimmed.is_empty() {
        return None;
    }
    let char_count = trimmed.chars().count();
    if char_count <= TITLE_MAX_CHARS {
        Some(trimmed.to_string())
    } else {
        let truncated: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        Some(format!("{truncated}\u{2026}"))
    }
}

fn derive_summary(history: &[relay_shared::domain::conversation::Message]) -> String {
    use relay_shared::domain::conversation::Role;

    history
        .iter()
        .map(|m| {
            let speaker = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            format!("{speaker}: {}", m.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_shared::domain::conversation::Role;

    fn msg(role: Role, content: &str) -> relay_shared::domain::conversation::Message {
        relay_shared::domain::conversation::Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            message_index: 0,
            role,
            content: content.to_string(),
            request_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn title_is_derived_from_the_first_user_turn() {
        let history = vec![msg(Role::User, "What's the refund policy?"), msg(Role::Assistant, "...")];
        assert_eq!(derive_title(&history).as_deref(), Some("What's the refund policy?"));
    }

    #[test]
    fn long_titles_are_truncated_with_an_ellipsis() {
        let long = "x".repeat(100);
        let history = vec![msg(Role::User, &long)];
        let title = derive_title(&history).unwrap();
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('\u{2026}'));
    }

    #[test]
    fn a_conversation_with_no_user_turns_has_no_derived_title() {
        let history = vec![msg(Role::Assistant, "hello")];
        assert_eq!(derive_title(&history), None);
    }

    #[test]
    fn summary_lists_each_turn_with_its_speaker() {
        let history = vec![msg(Role::User, "hi"), msg(Role::Assistant, "hello there")];
        let summary = derive_summary(&history);
        assert_eq!(summary, "user: hi\nassistant: hello there");
    }
}
