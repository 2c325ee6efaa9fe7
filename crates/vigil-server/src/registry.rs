use chrono::{DateTime, Utc};
use dashmap::DashMap;

use vigil_core::ids::{ConnectionId, ConversationId, UserId};

#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    pub user_id: UserId,
    pub conversation_id: Option<ConversationId>,
    pub connected_at: DateTime<Utc>,
}

/// Live WebSocket sessions, for operational visibility only.
///
/// Constructed explicitly and shared through `Arc`; nothing routes through it.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionInfo>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new session. The returned handle stays valid until `unregister`.
    pub fn register(&self, user_id: UserId) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.insert(
            id.clone(),
            ConnectionInfo {
                user_id,
                conversation_id: None,
                connected_at: Utc::now(),
            },
        );
        id
    }

    pub fn bind_conversation(&self, id: &ConnectionId, conversation_id: ConversationId) {
        if let Some(mut info) = self.connections.get_mut(id) {
            info.conversation_id = Some(conversation_id);
        }
    }

    /// Drop a session, handing back what was recorded for it.
    pub fn unregister(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.connections.remove(id).map(|(_, info)| info)
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }
}
