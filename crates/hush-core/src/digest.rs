use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use hush_types::{ConversationId, ConversationSnapshot, Message, UserId};

#[derive(Debug, Clone, Serialize)]
pub struct DigestEntry {
    pub message: Message,
    pub conversation_id: ConversationId,
    pub label: String,
}

/// Foreign messages received since `last_connection`, across every
/// conversation, newest first.
///
/// The lower bound is inclusive: a message stamped exactly at the mark is
/// kept. Together with the slack applied to the mark this absorbs messages
/// that land in the same instant as the logout write.
pub fn digest(
    viewer: UserId,
    conversations: &[ConversationSnapshot],
    last_connection: DateTime<Utc>,
    labels: &HashMap<ConversationId, String>,
) -> Vec<DigestEntry> {
    let mut entries: Vec<DigestEntry> = conversations
        .iter()
        .flat_map(|snapshot| {
            let label = labels
                .get(&snapshot.id())
                .cloned()
                .unwrap_or_else(|| snapshot.conversation.label().to_string());
            snapshot
                .messages
                .iter()
                .filter(|m| m.timestamp >= last_connection && m.sender_id != viewer)
                .map(move |m| DigestEntry {
                    message: m.clone(),
                    conversation_id: snapshot.id(),
                    label: label.clone(),
                })
        })
        .collect();

    entries.sort_by_key(|e| Reverse(e.message.order_key()));
    entries
}
