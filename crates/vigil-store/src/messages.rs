use serde::{Deserialize, Serialize};
use tracing::instrument;

use vigil_core::ids::{ConversationId, MessageId};
use vigil_core::steps::ReasoningStep;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: String,
    pub reasoning_steps: Option<Vec<ReasoningStep>>,
    pub created_at: String,
}

#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message and bump the owning conversation's counters in one
    /// transaction. A failed insert leaves `total_messages` untouched.
    #[instrument(
        skip(self, content, reasoning_steps),
        fields(conversation_id = %conversation_id, role = %role)
    )]
    pub fn append(
        &self,
        conversation_id: ConversationId,
        role: MessageRole,
        content: &str,
        reasoning_steps: Option<&[ReasoningStep]>,
    ) -> Result<MessageRow, StoreError> {
        if reasoning_steps.is_some() && role != MessageRole::Agent {
            return Err(StoreError::Conflict(format!(
                "reasoning steps are only stored on agent messages, got {role}"
            )));
        }
        let steps_json = reasoning_steps.map(serde_json::to_string).transpose()?;
        let now = row_helpers::timestamp_now();

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let changed = tx.execute(
                "UPDATE conversations
                 SET total_messages = total_messages + 1, updated_at = ?1
                 WHERE id = ?2",
                rusqlite::params![now, conversation_id.get()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {conversation_id}")));
            }

            tx.execute(
                "INSERT INTO messages (conversation_id, role, content, reasoning_steps, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    conversation_id.get(),
                    role.to_string(),
                    content,
                    steps_json,
                    now
                ],
            )?;
            let id = MessageId::new(tx.last_insert_rowid());
            tx.commit()?;

            Ok(MessageRow {
                id,
                conversation_id,
                role,
                content: content.to_string(),
                reasoning_steps: reasoning_steps.map(<[ReasoningStep]>::to_vec),
                created_at: now,
            })
        })
    }

    /// Transcript in canonical order.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn list(&self, conversation_id: ConversationId) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, role, content, reasoning_steps, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;
            let mut rows = stmt.query([conversation_id.get()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    /// Remove every message of a conversation. Returns the number removed.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn delete_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                [conversation_id.get()],
            )?;
            Ok(removed)
        })
    }

    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn count(&self, conversation_id: ConversationId) -> Result<u32, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id.get()],
                |row| row.get(0),
            )?)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, StoreError> {
    let role_str: String = row_helpers::get(row, 2, "messages", "role")?;
    let steps_raw: Option<String> = row_helpers::get_opt(row, 4, "messages", "reasoning_steps")?;

    Ok(MessageRow {
        id: MessageId::new(row_helpers::get(row, 0, "messages", "id")?),
        conversation_id: ConversationId::new(row_helpers::get(
            row,
            1,
            "messages",
            "conversation_id",
        )?),
        role: row_helpers::parse_enum(&role_str, "messages", "role")?,
        content: row_helpers::get(row, 3, "messages", "content")?,
        reasoning_steps: steps_raw
            .map(|raw| row_helpers::parse_json(&raw, "messages", "reasoning_steps"))
            .transpose()?,
        created_at: row_helpers::get(row, 5, "messages", "created_at")?,
    })
}
