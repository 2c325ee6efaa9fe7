pub mod checkpoints;
pub mod conversations;
pub mod database;
pub mod error;
pub mod messages;
pub mod row_helpers;
pub mod schema;
pub mod store;

pub use checkpoints::{CheckpointStore, SqliteCheckpointStore};
pub use conversations::{ConversationRepo, ConversationRow};
pub use database::Database;
pub use error::StoreError;
pub use messages::{MessageRepo, MessageRole, MessageRow};
pub use store::ConversationStore;
