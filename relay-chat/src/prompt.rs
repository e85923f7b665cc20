//! Assembling the message list sent to the generator: merged system prompt, bounded
//! history window, and a user turn wrapped with retrieved evidence.

use relay_shared::domain::conversation::{Message, Role};
use relay_shared::domain::evidence::RetrievedEvidence;

use crate::generator::PromptMessage;

/// How many prior messages (across both roles) feed the prompt, oldest first.
pub const HISTORY_WINDOW: usize = 30;

/// Clamp a requested generation temperature into `[0.0, 2.0]`, falling back to `0.7`
/// (or a caller-supplied fallback, e.g. the conversation's own default) when absent.
pub fn clamp_temperature(requested: Option<f64>, fallback: Option<f64>) -> f64 {
    let candidate = requested.or(fallback).unwrap_or(0.7);
    candidate.clamp(0.0, 2.0)
}

/// First non-empty prompt wins precedence order: a per-request override, then the
/// conversation's own system prompt, then a base prompt derived from retrieved
/// evidence — joined, not just the first, so operator guidance and retrieval grounding
/// both reach the model.
pub fn merge_system_prompts(candidates: &[Option<&str>]) -> Option<String> {
    let parts: Vec<&str> = candidates
        .iter()
        .filter_map(|c| *c)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Wraps the raw user message with a compact evidence block the model can cite from,
/// or passes it through untouched when retrieval produced nothing.
pub fn wrap_user_message(content: &str, evidence: &[RetrievedEvidence]) -> String {
    if evidence.is_empty() {
        return content.to_string();
    }

    let mut wrapped = String::from("Relevant context:\n");
    for (idx, item) in evidence.iter().enumerate() {
        wrapped.push_str(&format!("[{}] {}\n", idx + 1, item.content_preview));
    }
    wrapped.push_str("\nQuestion: ");
    wrapped.push_str(content);
    wrapped
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Builds the full message list: system prompt, the last [`HISTORY_WINDOW`] history
/// messages in chronological order, then the evidence-wrapped current turn.
pub fn assemble(
    system_prompt: Option<&str>,
    history: &[Message],
    wrapped_user_content: &str,
) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);

    if let Some(prompt) = system_prompt {
        messages.push(PromptMessage { role: "system", content: prompt.to_string() });
    }

    let window_start = history.len().saturating_sub(HISTORY_WINDOW);
    for msg in &history[window_start..] {
        messages.push(PromptMessage { role: role_str(msg.role), content: msg.content.clone() });
    }

    messages.push(PromptMessage { role: "user", content: wrapped_user_content.to_string() });
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn msg(role: Role, content: &str) -> Message {
        Message {
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
    fn temperature_outside_range_is_clamped() {
        assert_eq!(clamp_temperature(Some(5.0), None), 2.0);
        assert_eq!(clamp_temperature(Some(-1.0), None), 0.0);
        assert_eq!(clamp_temperature(None, None), 0.7);
        assert_eq!(clamp_temperature(None, Some(0.3)), 0.3);
    }

    #[test]
    fn empty_and_blank_system_prompts_are_dropped() {
        assert_eq!(merge_system_prompts(&[None, Some("  "), None]), None);
    }

    #[test]
    fn non_empty_system_prompts_are_joined_in_order() {
        let merged = merge_system_prompts(&[Some("be concise"), None, Some("cite sources")]).unwrap();
        assert_eq!(merged, "be concise\n\ncite sources");
    }

    #[test]
    fn evidence_free_content_is_passed_through_unwrapped() {
        assert_eq!(wrap_user_message("hello", &[]), "hello");
    }

    #[test]
    fn history_longer_than_the_window_is_truncated_to_the_most_recent_entries() {
        let history: Vec<Message> = (0..40).map(|i| msg(Role::User, &i.to_string())).collect();
        let assembled = assemble(None, &history, "current turn");
        // 30 history + 1 current turn, oldest kept message is index 10.
        assert_eq!(assembled.len(), HISTORY_WINDOW + 1);
        assert_eq!(assembled[0].content, "10");
        assert_eq!(assembled.last().unwrap().content, "current turn");
    }

    #[test]
    fn system_prompt_is_prepended_when_present() {
        let assembled = assemble(Some("system rules"), &[], "hi");
        assert_eq!(assembled[0].role, "system");
        assert_eq!(assembled[0].content, "system rules");
    }
}
