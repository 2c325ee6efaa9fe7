use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use vigil_core::ids::{ConversationId, ThreadId, UserId};
use vigil_store::{CheckpointStore, ConversationStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    #[error("conversation {0} not found")]
    NotFound(ConversationId),

    #[error("conversation {conversation_id} belongs to another user")]
    Forbidden {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CascadeReport {
    pub conversation_id: ConversationId,
    pub thread_id: ThreadId,
    pub messages_deleted: usize,
    /// `None` when the checkpoint store could not be cleaned. The reconcile
    /// sweep picks those rows up later.
    pub checkpoints_deleted: Option<usize>,
}

/// Deletes a conversation together with its messages and the agent
/// service's checkpoints for its thread.
///
/// The two databases share no transaction. Steps run in a fixed order: check
/// ownership, capture the thread key, drop messages, drop checkpoints
/// (best-effort), drop the conversation row.
pub struct CascadeDeleter {
    store: ConversationStore,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl CascadeDeleter {
    pub fn new(store: ConversationStore, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self { store, checkpoints }
    }

    #[instrument(skip(self), fields(conversation_id = %conversation_id, user_id = %user_id))]
    pub async fn delete(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<CascadeReport, CascadeError> {
        let conversation = match self.store.conversations().get(conversation_id) {
            Ok(row) => row,
            Err(StoreError::NotFound(_)) => return Err(CascadeError::NotFound(conversation_id)),
            Err(e) => return Err(e.into()),
        };
        if conversation.user_id != user_id {
            return Err(CascadeError::Forbidden { conversation_id, user_id });
        }

        let thread_id = conversation.thread_id;
        let messages_deleted = self.store.messages().delete_for_conversation(conversation_id)?;

        let checkpoints_deleted = match self.checkpoints.delete_thread(&thread_id).await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::error!(
                    thread_id = %thread_id,
                    error = %e,
                    "checkpoint cleanup failed, leaving rows for the reconcile sweep"
                );
                None
            }
        };

        // A live session may have appended since the messages step.
        let late = self.store.conversations().delete(conversation_id)?.unwrap_or(0);
        if late > 0 {
            tracing::debug!(late, "removed messages appended during the cascade");
        }
        let messages_deleted = messages_deleted + late;
        tracing::info!(
            thread_id = %thread_id,
            messages_deleted,
            checkpoints_deleted = ?checkpoints_deleted,
            "conversation deleted"
        );

        Ok(CascadeReport {
            conversation_id,
            thread_id,
            messages_deleted,
            checkpoints_deleted,
        })
    }

    /// Remove checkpoint threads minted by this gateway that no conversation
    /// owns any more. Threads of any other shape belong to other clients of
    /// the agent service and are left alone. Returns the number of threads
    /// cleaned. Safe to run at any time.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<usize, StoreError> {
        // Checkpoint keys first: a thread is minted into `conversations` before
        // the agent ever checkpoints it, so the owned set read second covers it.
        let candidates = self.checkpoints.thread_ids().await?;
        let owned = self.store.conversations().thread_ids()?;

        let mut cleaned = 0;
        let orphans = candidates
            .iter()
            .filter(|t| t.is_minted() && !owned.contains(*t));
        for thread_id in orphans {
            match self.checkpoints.delete_thread(thread_id).await {
                Ok(rows) => {
                    tracing::debug!(thread_id = %thread_id, rows, "orphaned checkpoints removed");
                    cleaned += 1;
                }
                Err(e) => {
                    tracing::warn!(thread_id = %thread_id, error = %e, "orphan cleanup failed");
                }
            }
        }
        Ok(cleaned)
    }
}

/// Run `reconcile` every `interval` until `cancel` fires.
pub fn start_reconcile_task(
    deleter: Arc<CascadeDeleter>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match deleter.reconcile().await {
                        Ok(0) => {}
                        Ok(cleaned) => tracing::info!(cleaned, "checkpoint reconcile sweep"),
                        Err(e) => tracing::warn!(error = %e, "checkpoint reconcile sweep failed"),
                    }
                }
            }
        }
    })
}
