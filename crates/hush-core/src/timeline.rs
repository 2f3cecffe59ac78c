use std::collections::HashSet;

use tracing::{debug, info};

use hush_types::{
    ChangeEvent, Conversation, ConversationId, Message, MessageId, NewMessage, UserId,
    ValidationError,
};

use crate::error::Result;
use crate::feed::{Delivery, Subscription};
use crate::store::Store;

/// Ordered, duplicate-free message sequence of one conversation.
///
/// Everything enters through [`Timeline::merge`], snapshots included, so any
/// interleaving of bulk reads and live inserts ends up sorted by
/// (timestamp, id) with each id present once.
#[derive(Debug, Default, Clone)]
pub struct Timeline {
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort-insert one message. Returns false for an id already present.
    pub fn merge(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        let key = message.order_key();
        let at = self.messages.partition_point(|m| m.order_key() <= key);
        self.messages.insert(at, message);
        true
    }

    /// Merge a batch, returning how many were new.
    pub fn merge_all(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        messages
            .into_iter()
            .map(|m| self.merge(m))
            .filter(|added| *added)
            .count()
    }

    /// Merge a batch, returning the messages that were new, in timeline order.
    pub fn merge_new(&mut self, messages: impl IntoIterator<Item = Message>) -> Vec<Message> {
        let mut added: Vec<Message> = messages
            .into_iter()
            .filter(|m| self.merge(m.clone()))
            .collect();
        added.sort_by_key(|m| m.order_key());
        added
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Snapshot read of a conversation's messages, timestamp ascending.
pub async fn load(store: &dyn Store, conversation_id: ConversationId) -> Result<Vec<Message>> {
    let messages = store.messages(conversation_id).await?;
    debug!("Loaded {} messages for {}", messages.len(), conversation_id);
    Ok(messages)
}

/// Insert a message. Whitespace-only content is a no-op and returns `None`
/// without touching the store.
pub async fn append(
    store: &dyn Store,
    conversation_id: ConversationId,
    sender_id: UserId,
    content: &str,
) -> Result<Option<Message>> {
    let new = match NewMessage::new(conversation_id, sender_id, content) {
        Ok(new) => new,
        Err(ValidationError::BlankContent) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let message = store.insert_message(new).await?;
    info!("Sent message {} to {}", message.id, conversation_id);
    Ok(Some(message))
}

/// Identifies the view a snapshot read was started for. A snapshot is only
/// applied if that view is still the open one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotTicket {
    pub conversation_id: ConversationId,
    pub epoch: u64,
}

/// What the live channel of a view produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Live {
    Message(Message),
    /// Events were lost to lag. The timeline stays incomplete until the next
    /// snapshot is merged.
    Gap,
}

/// An open conversation: its record, its timeline and the one live channel
/// feeding it.
pub struct ConversationView {
    conversation: Conversation,
    timeline: Timeline,
    subscription: Option<Subscription>,
    epoch: u64,
    lagged: bool,
}

impl ConversationView {
    /// Subscribe to live inserts. The timeline starts empty; feed it with
    /// [`ConversationView::apply_snapshot`]. Subscribing before the first read
    /// means nothing inserted in between is missed.
    pub fn open(store: &dyn Store, conversation: Conversation, epoch: u64) -> Self {
        let subscription = store.subscribe(conversation.id);
        Self {
            conversation,
            timeline: Timeline::new(),
            subscription: Some(subscription),
            epoch,
            lagged: false,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn id(&self) -> ConversationId {
        self.conversation.id
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn messages(&self) -> &[Message] {
        self.timeline.messages()
    }

    pub fn last_message_id(&self) -> Option<MessageId> {
        self.timeline.last().map(|m| m.id)
    }

    pub fn is_live(&self) -> bool {
        self.subscription.is_some()
    }

    /// True after the live channel lagged and before a snapshot repaired it.
    pub fn has_gap(&self) -> bool {
        self.lagged
    }

    pub fn ticket(&self) -> SnapshotTicket {
        SnapshotTicket {
            conversation_id: self.conversation.id,
            epoch: self.epoch,
        }
    }

    /// Merge a snapshot read. Ignored (returns false) when the ticket belongs
    /// to another view or this view was closed.
    pub fn apply_snapshot(&mut self, ticket: SnapshotTicket, messages: Vec<Message>) -> bool {
        self.merge_snapshot(ticket, messages).is_some()
    }

    /// Like [`ConversationView::apply_snapshot`], returning the messages the
    /// snapshot added. A merged snapshot closes any gap left by lag.
    pub fn merge_snapshot(
        &mut self,
        ticket: SnapshotTicket,
        messages: Vec<Message>,
    ) -> Option<Vec<Message>> {
        if ticket != self.ticket() || !self.is_live() {
            debug!(
                "Discarding stale snapshot for {} (epoch {})",
                ticket.conversation_id, ticket.epoch
            );
            return None;
        }
        self.lagged = false;
        Some(self.timeline.merge_new(messages))
    }

    /// Give up on the current gap. The next merged snapshot fills it.
    pub fn clear_gap(&mut self) {
        self.lagged = false;
    }

    /// Apply one change event. Returns the message if it was new.
    pub fn apply_event(&mut self, event: ChangeEvent) -> Option<Message> {
        if !self.is_live() || event.conversation_id() != self.conversation.id {
            return None;
        }
        match event {
            ChangeEvent::MessageInsert { message } => {
                if self.timeline.merge(message.clone()) {
                    Some(message)
                } else {
                    debug!("Dropping duplicate delivery of message {}", message.id);
                    None
                }
            }
            ChangeEvent::ConversationRename { name, .. } => {
                self.conversation.name = Some(name);
                None
            }
        }
    }

    /// Wait for the next live message not seen before, or for news that the
    /// channel lagged. Returns `None` when the channel is closed.
    pub async fn next_live(&mut self) -> Option<Live> {
        loop {
            let delivery = self.subscription.as_mut()?.recv().await?;
            match delivery {
                Delivery::Event(event) => {
                    if let Some(message) = self.apply_event(event) {
                        return Some(Live::Message(message));
                    }
                }
                Delivery::Lagged(_) => {
                    self.lagged = true;
                    return Some(Live::Gap);
                }
            }
        }
    }

    /// Merge every event already delivered, without waiting. Lag only marks
    /// the gap; see [`ConversationView::has_gap`].
    pub fn drain_live(&mut self) -> usize {
        let mut merged = 0;
        while let Some(delivery) = self.subscription.as_mut().and_then(|s| s.try_recv()) {
            match delivery {
                Delivery::Event(event) => {
                    if self.apply_event(event).is_some() {
                        merged += 1;
                    }
                }
                Delivery::Lagged(_) => self.lagged = true,
            }
        }
        merged
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.conversation.name = Some(name.to_string());
    }

    /// Tear down the live channel. Returns the id of the last loaded message
    /// so the caller can commit the read cursor.
    pub fn close(&mut self) -> Option<MessageId> {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            debug!("Closed view of {}", self.conversation.id);
        }
        self.last_message_id()
    }
}
