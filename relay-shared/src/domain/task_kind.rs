//! The closed set of task kinds the platform knows how to run.
//!
//! Unlike the configuration and schedule tables, this set is fixed at compile time —
//! adding a new kind of work means adding a variant and a matching [`crate::registry`]
//! entry, not a database row.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ChatMessage,
    ConversationMetadataRefresh,
    CleanupTokens,
    SendEmail,
    DataExport,
    HealthCheck,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatMessage => "chat_message",
            Self::ConversationMetadataRefresh => "conversation_metadata_refresh",
            Self::CleanupTokens => "cleanup_tokens",
            Self::SendEmail => "send_email",
            Self::DataExport => "data_export",
            Self::HealthCheck => "health_check",
        }
    }

    pub fn all() -> &'static [TaskKind] {
        &[
            Self::ChatMessage,
            Self::ConversationMetadataRefresh,
            Self::CleanupTokens,
            Self::SendEmail,
            Self::DataExport,
            Self::HealthCheck,
        ]
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown task kind: {s}"))
    }
}
