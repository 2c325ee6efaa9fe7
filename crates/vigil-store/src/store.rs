use crate::conversations::ConversationRepo;
use crate::database::Database;
use crate::messages::MessageRepo;

/// Owns every Conversation and Message row. Cheap to clone.
#[derive(Clone)]
pub struct ConversationStore {
    conversations: ConversationRepo,
    messages: MessageRepo,
}

impl ConversationStore {
    pub fn new(db: Database) -> Self {
        Self {
            conversations: ConversationRepo::new(db.clone()),
            messages: MessageRepo::new(db),
        }
    }

    pub fn conversations(&self) -> &ConversationRepo {
        &self.conversations
    }

    pub fn messages(&self) -> &MessageRepo {
        &self.messages
    }
}
