use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::models::{ConversationId, UserId};

// -- Conversations --

/// Insert payload for a conversation row. Participants are inserted
/// separately, as one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConversation {
    pub is_group: bool,
    pub name: Option<String>,
    pub created_by: UserId,
    /// Digest of the sorted participant set. Stores reject a second
    /// conversation carrying the same key; `None` opts out of the check.
    pub participant_key: Option<String>,
}

impl NewConversation {
    pub fn direct(name: impl Into<String>, created_by: UserId) -> Self {
        Self {
            is_group: false,
            name: Some(name.into()),
            created_by,
            participant_key: None,
        }
    }

    pub fn with_participant_key(mut self, key: impl Into<String>) -> Self {
        self.participant_key = Some(key.into());
        self
    }
}

// -- Messages --

/// Insert payload for a message. Content is trimmed on construction and must
/// not be empty afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    /// Client-assigned creation instant. The store assigns one when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewMessage {
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Self, ValidationError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationError::BlankContent);
        }
        Ok(Self {
            conversation_id,
            sender_id,
            content: content.to_string(),
            timestamp: None,
        })
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn content_is_trimmed() {
        let msg = NewMessage::new(Uuid::new_v4(), Uuid::new_v4(), "  hello there \n").unwrap();
        assert_eq!(msg.content, "hello there");
        assert!(msg.timestamp.is_none());
    }

    #[test]
    fn whitespace_only_content_is_rejected() {
        let err = NewMessage::new(Uuid::new_v4(), Uuid::new_v4(), " \t\n ").unwrap_err();
        assert_eq!(err, ValidationError::BlankContent);
    }
}
