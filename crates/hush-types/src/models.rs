use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

pub type UserId = Uuid;
pub type ConversationId = Uuid;

/// Label shown for a conversation without a stored name, and the name given
/// to a freshly created self-conversation.
pub const SELF_CONVERSATION_LABEL: &str = "Notes personnelles";

/// Store-assigned message identifier. Strictly increasing in insert order,
/// which makes it usable both as an ordering tie-break and as a read cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

impl User {
    pub fn new(id: UserId, username: impl Into<String>) -> Result<Self, ValidationError> {
        let username = username.into();
        if username.trim().is_empty() {
            return Err(ValidationError::BlankUsername);
        }
        Ok(Self { id, username })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub is_group: bool,
    pub name: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Display label: the stored name, or the self-conversation label.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(SELF_CONVERSATION_LABEL)
    }
}

/// One row of the conversation/participant join table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantLink {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(ValidationError::BlankContent);
        }
        Ok(Self {
            id,
            conversation_id,
            sender_id,
            content,
            timestamp,
        })
    }

    /// Timeline ordering key: timestamp first, id breaks ties.
    pub fn order_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.timestamp, self.id)
    }
}

/// A conversation as returned by a bulk read: the record itself, its
/// participants and every message it holds (ordered by timestamp ascending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub conversation: Conversation,
    pub participants: Vec<UserId>,
    pub messages: Vec<Message>,
}

impl ConversationSnapshot {
    pub fn id(&self) -> ConversationId {
        self.conversation.id
    }

    pub fn participant_set(&self) -> BTreeSet<UserId> {
        self.participants.iter().copied().collect()
    }
}
