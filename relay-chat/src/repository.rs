//! Conversation/message persistence, including the row-locked append that assigns
//! `message_index`.

use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use relay_shared::domain::conversation::{Conversation, Message, Role};
use relay_shared::error::RelayResult;

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn parse_role(s: &str) -> Role {
    match s {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        _ => Role::User,
    }
}

pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, conversation_id: Uuid) -> RelayResult<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, user_id, title, summary, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Conversation {
            id: r.get("id"),
            user_id: r.get("user_id"),
            title: r.get("title"),
            summary: r.get("summary"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    /// Idempotency check: an assistant message already recorded for this `request_id`
    /// means a prior attempt at this invocation got far enough to persist, and the
    /// handler should replay rather than regenerate.
    pub async fn message_by_request_id(
        &self,
        conversation_id: Uuid,
        request_id: Uuid,
        role: Role,
    ) -> RelayResult<Option<Message>> {
        let row = sqlx::query(
            r#"
            SELECT id, conversation_id, message_index, role, content, request_id, created_at
            FROM messages
            WHERE conversation_id = $1 AND request_id = $2 AND role = $3
            "#,
        )
        .bind(conversation_id)
        .bind(request_id)
        .bind(role_str(role))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_message))
    }

    /// Most recent `limit` messages, returned oldest-first for direct use as a prompt
    /// history window.
    pub async fn recent_messages(&self, conversation_id: Uuid, limit: i64) -> RelayResult<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, message_index, role, content, request_id, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY message_index DESC
            LIMIT $2
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<Message> = rows.into_iter().map(row_to_message).collect();
        messages.reverse();
        Ok(messages)
    }

    /// Appends a user/assistant turn inside one transaction, row-locking the parent
    /// conversation so concurrent appends to the same conversation serialize their
    /// `message_index` assignment instead of racing.
    #[instrument(skip(self, user_content, assistant_content))]
    pub async fn append_turn(
        &self,
        conversation_id: Uuid,
        request_id: Uuid,
        user_content: &str,
        assistant_content: &str,
    ) -> RelayResult<(Message, Message)> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
            .bind(conversation_id)
            .fetch_one(&mut *tx)
            .await?;

        let next_index: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(message_index), -1) + 1 FROM messages WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_one(&mut *tx)
        .await?;

        let now = Utc::now();
        let user_message = Message {
            id: Uuid::now_v7(),
            conversation_id,
            message_index: next_index,
            role: Role::User,
            content: user_content.to_string(),
            request_id: Some(request_id),
            created_at: now,
        };
        let assistant_message = Message {
            id: Uuid::now_v7(),
            conversation_id,
            message_index: next_index + 1,
            role: Role::Assistant,
            content: assistant_content.to_string(),
            request_id: Some(request_id),
            created_at: now,
        };

        for m in [&user_message, &assistant_message] {
            sqlx::query(
                r#"
                INSERT INTO messages (id, conversation_id, message_index, role, content, request_id, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(m.id)
            .bind(m.conversation_id)
            .bind(m.message_index)
            .bind(role_str(m.role))
            .bind(&m.content)
            .bind(m.request_id)
            .bind(m.created_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE conversations SET updated_at = now() WHERE id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((user_message, assistant_message))
    }

    pub async fn update_metadata(&self, conversation_id: Uuid, title: Option<&str>, summary: Option<&str>) -> RelayResult<()> {
        sqlx::query("UPDATE conversations SET title = COALESCE($2, title), summary = COALESCE($3, summary), updated_at = now() WHERE id = $1")
            .bind(conversation_id)
            .bind(title)
            .bind(summary)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_message(row: sqlx::postgres::PgRow) -> Message {
    Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        message_index: row.get("message_index"),
        role: parse_role(row.get("role")),
        content: row.get("content"),
        request_id: row.get("request_id"),
        created_at: row.get("created_at"),
    }
}
