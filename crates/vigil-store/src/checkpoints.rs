//! The agent service's checkpoint store, seen from the gateway.
//!
//! Checkpoint rows belong to the agent service. The gateway only knows the
//! `thread_id` key: it deletes by key and enumerates keys for the orphan
//! sweep, and never reads checkpoint contents. It also never creates or
//! alters the agent's tables; a table that does not exist holds no threads.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::Connection;
use tracing::instrument;

use vigil_core::ids::ThreadId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Checkpoint tables keyed by `thread_id`, children first.
const TABLES: [&str; 3] = ["checkpoint_writes", "checkpoint_blobs", "checkpoints"];

/// The agent service's layout, reproduced for seeding test databases.
#[cfg(any(test, feature = "test-util"))]
const TABLES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id TEXT NOT NULL,
    checkpoint_ns TEXT NOT NULL DEFAULT '',
    checkpoint_id TEXT NOT NULL,
    checkpoint TEXT
);

CREATE TABLE IF NOT EXISTS checkpoint_writes (
    thread_id TEXT NOT NULL,
    checkpoint_ns TEXT NOT NULL DEFAULT '',
    checkpoint_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    idx INTEGER NOT NULL,
    blob TEXT
);

CREATE TABLE IF NOT EXISTS checkpoint_blobs (
    thread_id TEXT NOT NULL,
    checkpoint_ns TEXT NOT NULL DEFAULT '',
    channel TEXT NOT NULL,
    version TEXT NOT NULL,
    blob TEXT
);
"#;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Remove every checkpoint row for `thread_id`. Idempotent; returns the
    /// number of rows removed.
    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<usize, StoreError>;

    /// Distinct thread keys with at least one checkpoint row.
    async fn thread_ids(&self) -> Result<Vec<ThreadId>, StoreError>;
}

/// Checkpoint tables in a SQLite file shared with the agent service.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    db: Database,
}

impl SqliteCheckpointStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::attach(path)?,
        })
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            db: Database::attach_in_memory()?,
        };
        store.create_tables()?;
        Ok(store)
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn create_tables(&self) -> Result<(), StoreError> {
        self.db.with_conn(|conn| Ok(conn.execute_batch(TABLES_DDL)?))
    }

    /// Seed one row per checkpoint table for `thread_id`.
    #[cfg(any(test, feature = "test-util"))]
    pub fn insert_checkpoint(
        &self,
        thread_id: &ThreadId,
        checkpoint_id: &str,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO checkpoints (thread_id, checkpoint_id, checkpoint)
                 VALUES (?1, ?2, '{}')",
                rusqlite::params![thread_id.as_str(), checkpoint_id],
            )?;
            tx.execute(
                "INSERT INTO checkpoint_writes (thread_id, checkpoint_id, task_id, idx)
                 VALUES (?1, ?2, 'task', 0)",
                rusqlite::params![thread_id.as_str(), checkpoint_id],
            )?;
            tx.execute(
                "INSERT INTO checkpoint_blobs (thread_id, channel, version)
                 VALUES (?1, 'messages', ?2)",
                rusqlite::params![thread_id.as_str(), checkpoint_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }
}

/// The checkpoint tables the agent service has created so far.
fn present_tables(conn: &Connection) -> Result<Vec<&'static str>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
    )?;
    let mut present = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        if stmt.query_row([table], |row| row.get::<_, bool>(0))? {
            present.push(table);
        }
    }
    Ok(present)
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    #[instrument(skip(self), fields(thread_id = %thread_id))]
    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let tables = present_tables(conn)?;
            let tx = conn.unchecked_transaction()?;
            let mut removed = 0;
            for table in tables {
                removed += tx.execute(
                    &format!("DELETE FROM {table} WHERE thread_id = ?1"),
                    [thread_id.as_str()],
                )?;
            }
            tx.commit()?;
            Ok(removed)
        })
    }

    #[instrument(skip(self))]
    async fn thread_ids(&self) -> Result<Vec<ThreadId>, StoreError> {
        self.db.with_conn(|conn| {
            let tables = present_tables(conn)?;
            if tables.is_empty() {
                return Ok(Vec::new());
            }
            let union = tables
                .iter()
                .map(|table| format!("SELECT thread_id FROM {table}"))
                .collect::<Vec<_>>()
                .join(" UNION ");
            let mut stmt = conn.prepare(&format!("{union} ORDER BY thread_id"))?;
            let mut rows = stmt.query([])?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next()? {
                let raw: String = row_helpers::get(row, 0, "checkpoints", "thread_id")?;
                ids.push(ThreadId::from_raw(raw));
            }
            Ok(ids)
        })
    }
}
