use tracing::instrument;

use vigil_core::ids::{ConversationId, ThreadId, UserId};
use vigil_store::{ConversationRow, ConversationStore, StoreError};

/// Title stored on a conversation until one is generated from its first turn.
pub const PLACEHOLDER_TITLE: &str = "New Conversation";

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),

    #[error("thread {0} not found")]
    ThreadNotFound(ThreadId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoordinatorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ConversationNotFound(_) | Self::ThreadNotFound(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub conversation_id: ConversationId,
    pub thread_id: ThreadId,
    pub is_new: bool,
}

impl Resolved {
    fn existing(row: ConversationRow) -> Self {
        Self {
            conversation_id: row.id,
            thread_id: row.thread_id,
            is_new: false,
        }
    }
}

/// Maps client-facing conversation ids onto upstream thread ids.
///
/// A thread id is minted exactly once, when its conversation is created, and
/// every later lookup returns it verbatim.
#[derive(Clone)]
pub struct ConversationCoordinator {
    store: ConversationStore,
}

impl ConversationCoordinator {
    pub fn new(store: ConversationStore) -> Self {
        Self { store }
    }

    #[instrument(skip(self, seed_title), fields(user_id = %user_id))]
    pub fn resolve(
        &self,
        user_id: UserId,
        conversation_id: Option<ConversationId>,
        seed_title: Option<&str>,
    ) -> Result<Resolved, CoordinatorError> {
        match conversation_id {
            Some(id) => self.load_owned(user_id, id),
            None => self.create(user_id, seed_title),
        }
    }

    /// Resolve by the upstream key. Only threads owned by `user_id` resolve.
    #[instrument(skip(self), fields(user_id = %user_id, thread_id = %thread_id))]
    pub fn resolve_thread(
        &self,
        user_id: UserId,
        thread_id: &ThreadId,
    ) -> Result<Resolved, CoordinatorError> {
        match self.store.conversations().find_by_thread(thread_id)? {
            Some(row) if row.user_id == user_id => Ok(Resolved::existing(row)),
            _ => Err(CoordinatorError::ThreadNotFound(thread_id.clone())),
        }
    }

    fn load_owned(
        &self,
        user_id: UserId,
        id: ConversationId,
    ) -> Result<Resolved, CoordinatorError> {
        match self.store.conversations().get(id) {
            Ok(row) if row.user_id == user_id => Ok(Resolved::existing(row)),
            // Someone else's conversation looks exactly like a missing one.
            Ok(_) | Err(StoreError::NotFound(_)) => Err(CoordinatorError::ConversationNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    fn create(
        &self,
        user_id: UserId,
        seed_title: Option<&str>,
    ) -> Result<Resolved, CoordinatorError> {
        let thread_id = ThreadId::mint(user_id);
        let title = seed_title.unwrap_or(PLACEHOLDER_TITLE);
        let row = self.store.conversations().create(user_id, &thread_id, Some(title))?;
        tracing::info!(
            conversation_id = %row.id,
            thread_id = %row.thread_id,
            "conversation created"
        );
        Ok(Resolved {
            conversation_id: row.id,
            thread_id: row.thread_id,
            is_new: true,
        })
    }
}
