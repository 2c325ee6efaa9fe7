use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use vigil_core::ids::{ConversationId, ThreadId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: ConversationId,
    pub user_id: UserId,
    pub thread_id: ThreadId,
    pub title: Option<String>,
    pub is_active: bool,
    pub total_messages: u32,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

const SELECT_COLUMNS: &str = "SELECT id, user_id, thread_id, title, is_active, total_messages,
        metadata, created_at, updated_at
 FROM conversations";

#[derive(Clone)]
pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a conversation bound to `thread_id`. A thread already owned by
    /// another conversation is a `Conflict`.
    #[instrument(skip(self), fields(user_id = %user_id, thread_id = %thread_id))]
    pub fn create(
        &self,
        user_id: UserId,
        thread_id: &ThreadId,
        title: Option<&str>,
    ) -> Result<ConversationRow, StoreError> {
        let now = row_helpers::timestamp_now();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (user_id, thread_id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![user_id.get(), thread_id.as_str(), title, now, now],
            )?;

            Ok(ConversationRow {
                id: ConversationId::new(conn.last_insert_rowid()),
                user_id,
                thread_id: thread_id.clone(),
                title: title.map(str::to_owned),
                is_active: true,
                total_messages: 0,
                metadata: serde_json::json!({}),
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn get(&self, id: ConversationId) -> Result<ConversationRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.get()])?;
            match rows.next()? {
                Some(row) => row_to_conversation(row),
                None => Err(StoreError::NotFound(format!("conversation {id}"))),
            }
        })
    }

    /// Conversation owning `thread_id`, if any.
    #[instrument(skip(self), fields(thread_id = %thread_id))]
    pub fn find_by_thread(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Option<ConversationRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE thread_id = ?1"))?;
            let mut rows = stmt.query([thread_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_conversation(row).map(Some),
                None => Ok(None),
            }
        })
    }

    /// A user's conversations, most recently active first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list_for_user(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ConversationRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE user_id = ?1
                 ORDER BY updated_at DESC, id DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let mut rows = stmt.query(rusqlite::params![user_id.get(), limit, offset])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_conversation(row)?);
            }
            Ok(results)
        })
    }

    /// Bump `updated_at` to now.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn touch(&self, id: ConversationId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = row_helpers::timestamp_now();
            let changed = conn.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, id.get()],
            )?;
            require_changed(changed, id)
        })
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn update_title(&self, id: ConversationId, title: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = row_helpers::timestamp_now();
            let changed = conn.execute(
                "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![title, now, id.get()],
            )?;
            require_changed(changed, id)
        })
    }

    /// Delete the conversation row together with any messages still attached
    /// to it, in one transaction. Returns the number of those messages, or
    /// `None` when no row existed.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn delete(&self, id: ConversationId) -> Result<Option<usize>, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let stragglers =
                tx.execute("DELETE FROM messages WHERE conversation_id = ?1", [id.get()])?;
            let changed = tx.execute("DELETE FROM conversations WHERE id = ?1", [id.get()])?;
            tx.commit()?;
            Ok((changed > 0).then_some(stragglers))
        })
    }

    /// Every thread key currently owned by a conversation.
    #[instrument(skip(self))]
    pub fn thread_ids(&self) -> Result<HashSet<ThreadId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT thread_id FROM conversations")?;
            let mut rows = stmt.query([])?;
            let mut ids = HashSet::new();
            while let Some(row) = rows.next()? {
                let raw: String = row_helpers::get(row, 0, "conversations", "thread_id")?;
                ids.insert(ThreadId::from_raw(raw));
            }
            Ok(ids)
        })
    }
}

fn require_changed(changed: usize, id: ConversationId) -> Result<(), StoreError> {
    if changed == 0 {
        Err(StoreError::NotFound(format!("conversation {id}")))
    } else {
        Ok(())
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<ConversationRow, StoreError> {
    let metadata_raw: String = row_helpers::get(row, 6, "conversations", "metadata")?;

    Ok(ConversationRow {
        id: ConversationId::new(row_helpers::get(row, 0, "conversations", "id")?),
        user_id: UserId::new(row_helpers::get(row, 1, "conversations", "user_id")?),
        thread_id: ThreadId::from_raw(row_helpers::get::<String>(
            row,
            2,
            "conversations",
            "thread_id",
        )?),
        title: row_helpers::get_opt(row, 3, "conversations", "title")?,
        is_active: row_helpers::get(row, 4, "conversations", "is_active")?,
        total_messages: row_helpers::get(row, 5, "conversations", "total_messages")?,
        metadata: row_helpers::parse_json(&metadata_raw, "conversations", "metadata")?,
        created_at: row_helpers::get(row, 7, "conversations", "created_at")?,
        updated_at: row_helpers::get(row, 8, "conversations", "updated_at")?,
    })
}
