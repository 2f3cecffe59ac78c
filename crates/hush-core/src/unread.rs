use std::collections::HashMap;

use serde::Serialize;

use hush_types::{ConversationId, ConversationSnapshot, Message, MessageId, UserId};

use crate::cursor::ReadCursorStore;

/// Whether `message` is unread for `viewer` given their cursor.
///
/// Without a cursor every foreign message counts as new; with one, only
/// foreign messages past it do. The viewer's own messages are never unread.
pub fn message_is_unread(viewer: UserId, cursor: Option<MessageId>, message: &Message) -> bool {
    if message.sender_id == viewer {
        return false;
    }
    match cursor {
        Some(cursor) => message.id > cursor,
        None => true,
    }
}

pub fn count_unread(viewer: UserId, cursor: Option<MessageId>, messages: &[Message]) -> usize {
    messages
        .iter()
        .filter(|m| message_is_unread(viewer, cursor, m))
        .count()
}

/// One row of the conversation list.
#[derive(Debug, Clone, Serialize)]
pub struct InboxEntry {
    pub conversation_id: ConversationId,
    pub label: String,
    pub unread: usize,
    pub last_message: Option<Message>,
}

/// Derives unread state from the viewer's read cursors.
pub struct UnreadAggregator<'a> {
    cursors: &'a ReadCursorStore,
}

impl<'a> UnreadAggregator<'a> {
    pub fn new(cursors: &'a ReadCursorStore) -> Self {
        Self { cursors }
    }

    /// Unread count over an explicit message set, e.g. an open timeline.
    pub fn unread_in(
        &self,
        viewer: UserId,
        conversation_id: ConversationId,
        messages: &[Message],
    ) -> usize {
        count_unread(viewer, self.cursors.get(viewer, conversation_id), messages)
    }

    pub fn unread_count(&self, viewer: UserId, conversation: &ConversationSnapshot) -> usize {
        self.unread_in(viewer, conversation.id(), &conversation.messages)
    }

    pub fn is_unread(&self, viewer: UserId, conversation: &ConversationSnapshot) -> bool {
        self.unread_count(viewer, conversation) > 0
    }

    /// Every conversation with its unread count, most recent activity first.
    /// `labels` overrides stored names (e.g. after a rename in this session).
    pub fn overview(
        &self,
        viewer: UserId,
        conversations: &[ConversationSnapshot],
        labels: &HashMap<ConversationId, String>,
    ) -> Vec<InboxEntry> {
        let mut entries: Vec<InboxEntry> = conversations
            .iter()
            .map(|snapshot| InboxEntry {
                conversation_id: snapshot.id(),
                label: labels
                    .get(&snapshot.id())
                    .cloned()
                    .unwrap_or_else(|| snapshot.conversation.label().to_string()),
                unread: self.unread_count(viewer, snapshot),
                last_message: snapshot.messages.iter().max_by_key(|m| m.order_key()).cloned(),
            })
            .collect();

        entries.sort_by(|a, b| {
            let a_key = a.last_message.as_ref().map(|m| m.order_key());
            let b_key = b.last_message.as_ref().map(|m| m.order_key());
            b_key.cmp(&a_key)
        });
        entries
    }

    /// Only the conversations holding unread messages.
    pub fn inbox(
        &self,
        viewer: UserId,
        conversations: &[ConversationSnapshot],
        labels: &HashMap<ConversationId, String>,
    ) -> Vec<InboxEntry> {
        self.overview(viewer, conversations, labels)
            .into_iter()
            .filter(|entry| entry.unread > 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use hush_types::Conversation;
    use uuid::Uuid;

    use crate::memory::MemoryKv;

    fn message(id: i64, conversation_id: ConversationId, sender_id: UserId) -> Message {
        Message {
            id: MessageId(id),
            conversation_id,
            sender_id,
            content: format!("message {}", id),
            timestamp: Utc::now() + Duration::seconds(id),
        }
    }

    fn snapshot(id: ConversationId, name: Option<&str>, messages: Vec<Message>) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation: Conversation {
                id,
                is_group: false,
                name: name.map(str::to_string),
                created_by: Uuid::new_v4(),
                created_at: Utc::now(),
            },
            participants: vec![],
            messages,
        }
    }

    fn cursors() -> ReadCursorStore {
        ReadCursorStore::new(Arc::new(MemoryKv::new()))
    }

    #[test]
    fn without_cursor_every_foreign_message_is_unread() {
        let (viewer, other, conversation) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let cursors = cursors();
        let aggregator = UnreadAggregator::new(&cursors);

        let snap = snapshot(
            conversation,
            None,
            vec![
                message(1, conversation, other),
                message(2, conversation, viewer),
                message(3, conversation, other),
            ],
        );

        assert_eq!(aggregator.unread_count(viewer, &snap), 2);
        assert!(aggregator.is_unread(viewer, &snap));
    }

    #[test]
    fn with_cursor_only_later_foreign_messages_are_unread() {
        let (viewer, other, conversation) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let cursors = cursors();
        cursors.set(viewer, conversation, MessageId(5));
        let aggregator = UnreadAggregator::new(&cursors);

        let snap = snapshot(
            conversation,
            None,
            vec![
                message(4, conversation, other),
                message(5, conversation, other),
                message(6, conversation, viewer),
                message(7, conversation, other),
            ],
        );

        assert_eq!(aggregator.unread_count(viewer, &snap), 1);
    }

    #[test]
    fn own_messages_never_count() {
        let (viewer, conversation) = (Uuid::new_v4(), Uuid::new_v4());
        let cursors = cursors();
        let aggregator = UnreadAggregator::new(&cursors);

        let snap = snapshot(
            conversation,
            None,
            (1..=5).map(|id| message(id, conversation, viewer)).collect(),
        );
        assert_eq!(aggregator.unread_count(viewer, &snap), 0);
        assert!(!aggregator.is_unread(viewer, &snap));

        cursors.set(viewer, conversation, MessageId(2));
        assert_eq!(aggregator.unread_count(viewer, &snap), 0);
    }

    #[test]
    fn empty_conversation_has_nothing_unread() {
        let cursors = cursors();
        let aggregator = UnreadAggregator::new(&cursors);
        let snap = snapshot(Uuid::new_v4(), None, vec![]);
        assert!(!aggregator.is_unread(Uuid::new_v4(), &snap));
    }

    #[test]
    fn inbox_keeps_unread_conversations_newest_first() {
        let (viewer, other) = (Uuid::new_v4(), Uuid::new_v4());
        let (quiet, older, newer) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let cursors = cursors();
        let aggregator = UnreadAggregator::new(&cursors);

        let conversations = vec![
            snapshot(quiet, Some("quiet"), vec![message(1, quiet, viewer)]),
            snapshot(older, Some("older"), vec![message(2, older, other)]),
            snapshot(newer, None, vec![message(3, newer, other), message(4, newer, other)]),
        ];

        let mut labels = HashMap::new();
        labels.insert(older, "renamed".to_string());

        let inbox = aggregator.inbox(viewer, &conversations, &labels);
        let rows: Vec<(&str, usize)> = inbox.iter().map(|e| (e.label.as_str(), e.unread)).collect();
        assert_eq!(rows, [("Notes personnelles", 2), ("renamed", 1)]);

        let overview = aggregator.overview(viewer, &conversations, &labels);
        assert_eq!(overview.len(), 3);
        assert_eq!(overview[2].conversation_id, quiet);
    }
}
