use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use hush_types::{ConversationId, MessageId, UserId};

use crate::store::LocalKv;

fn read_cursor_key(user_id: UserId, conversation_id: ConversationId) -> String {
    format!("last_read:{}:{}", conversation_id, user_id)
}

fn last_connection_key(user_id: UserId) -> String {
    format!("last_connection:{}", user_id)
}

/// Read cursors and last-connection marks, kept in client-local storage.
///
/// Cursors only move forward: a `set` with an id lower than the stored one is
/// ignored. Nothing here is ever deleted.
#[derive(Clone)]
pub struct ReadCursorStore {
    kv: Arc<dyn LocalKv>,
}

impl ReadCursorStore {
    pub fn new(kv: Arc<dyn LocalKv>) -> Self {
        Self { kv }
    }

    pub fn get(&self, user_id: UserId, conversation_id: ConversationId) -> Option<MessageId> {
        let key = read_cursor_key(user_id, conversation_id);
        let raw = self.kv.get(&key)?;
        match raw.parse::<i64>() {
            Ok(id) => Some(MessageId(id)),
            Err(e) => {
                warn!("Ignoring corrupt read cursor '{}' at {}: {}", raw, key, e);
                None
            }
        }
    }

    /// Advance the cursor. Returns whether the stored value changed.
    pub fn set(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> bool {
        if let Some(current) = self.get(user_id, conversation_id) {
            if message_id <= current {
                return false;
            }
        }
        self.kv
            .set(&read_cursor_key(user_id, conversation_id), &message_id.to_string());
        debug!(
            "Read cursor for {} in {} moved to {}",
            user_id, conversation_id, message_id
        );
        true
    }

    pub fn last_connection(&self, user_id: UserId) -> Option<DateTime<Utc>> {
        let key = last_connection_key(user_id);
        let raw = self.kv.get(&key)?;
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!("Ignoring corrupt connection mark '{}' at {}: {}", raw, key, e);
                None
            }
        }
    }

    pub fn set_last_connection(&self, user_id: UserId, at: DateTime<Utc>) {
        self.kv.set(&last_connection_key(user_id), &at.to_rfc3339());
    }
}
