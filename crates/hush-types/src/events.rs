use serde::{Deserialize, Serialize};

use crate::models::{ConversationId, Message};

/// Row-level change notifications pushed by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChangeEvent {
    /// A message row was inserted
    MessageInsert { message: Message },

    /// A conversation was renamed by its creator
    ConversationRename {
        conversation_id: ConversationId,
        name: String,
    },
}

impl ChangeEvent {
    /// Every event is scoped to a single conversation; subscriptions filter on it.
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            Self::MessageInsert { message } => message.conversation_id,
            Self::ConversationRename { conversation_id, .. } => *conversation_id,
        }
    }
}
