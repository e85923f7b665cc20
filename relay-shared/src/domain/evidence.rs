//! Retrieval output consumed by the chat pipeline. Transient — never persisted beyond
//! the `citations` SSE event it produces.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Vector,
    Keyword,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedEvidence {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub content_preview: String,
    pub similarity: f64,
    pub fused_score: f64,
    pub source: EvidenceSource,
}

/// Maximum length of a citation preview before truncation; matches the original
/// retrieval service's snippet compression.
pub const CONTENT_PREVIEW_MAX_CHARS: usize = 500;

impl RetrievedEvidence {
    /// Truncate `content` to [`CONTENT_PREVIEW_MAX_CHARS`] characters, appending an
    /// ellipsis when truncation happened. Operates on `char` boundaries so multi-byte
    /// UTF-8 content is never split mid-codepoint.
    pub fn compress_snippet(content: &str) -> String {
        let char_count = content.chars().count();
        if char_count <= CONTENT_PREVIEW_MAX_CHARS {
            return content.to_string();
        }
        let truncated: String = content.chars().take(CONTENT_PREVIEW_MAX_CHARS).collect();
        format!("{truncated}\u{2026}")
    }
}
