use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info};

use hush_types::{
    ChangeEvent, ConversationId, ConversationSnapshot, Message, MessageId, User, ValidationError,
};

use crate::accounts;
use crate::cursor::ReadCursorStore;
use crate::digest::{self, DigestEntry};
use crate::error::{CoreError, Result};
use crate::resolver::{Resolved, Resolver};
use crate::store::{LocalKv, Store};
use crate::timeline::{self, ConversationView, Live, SnapshotTicket};
use crate::unread::{self, InboxEntry, UnreadAggregator};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Subtracted from the connection mark on logout, and again on login.
    pub connection_slack: Duration,
    /// Attach participant keys when creating conversations.
    pub unique_direct: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connection_slack: Duration::seconds(1),
            unique_direct: false,
        }
    }
}

/// One logged-in viewer: at most one open conversation, its live channel,
/// and the viewer's local cursors.
pub struct Session {
    store: Arc<dyn Store>,
    cursors: ReadCursorStore,
    options: SessionOptions,
    viewer: User,
    last_connection: DateTime<Utc>,
    view: Option<ConversationView>,
    /// Names set by renames during this session, ahead of list reloads.
    labels: HashMap<ConversationId, String>,
    /// Messages recovered by a resync, not yet handed out by `next_live`.
    pending: VecDeque<Message>,
    next_epoch: u64,
}

impl Session {
    pub async fn login(
        store: Arc<dyn Store>,
        kv: Arc<dyn LocalKv>,
        username: &str,
        options: SessionOptions,
    ) -> Result<Self> {
        let viewer = accounts::find_user(store.as_ref(), username).await?;
        let cursors = ReadCursorStore::new(kv);

        let now = Utc::now();
        let last_connection = match cursors.last_connection(viewer.id) {
            Some(mark) => mark - options.connection_slack,
            None => now - options.connection_slack,
        };
        info!(
            "{} logged in, last connection {}",
            viewer.username,
            last_connection.to_rfc3339()
        );

        Ok(Self {
            store,
            cursors,
            options,
            viewer,
            last_connection,
            view: None,
            labels: HashMap::new(),
            pending: VecDeque::new(),
            next_epoch: 1,
        })
    }

    /// Close the open conversation and record the connection mark.
    pub fn logout(mut self) -> DateTime<Utc> {
        self.close();
        let mark = Utc::now() - self.options.connection_slack;
        self.cursors.set_last_connection(self.viewer.id, mark);
        info!("{} logged out", self.viewer.username);
        mark
    }

    pub fn viewer(&self) -> &User {
        &self.viewer
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn cursors(&self) -> &ReadCursorStore {
        &self.cursors
    }

    pub fn last_connection(&self) -> DateTime<Utc> {
        self.last_connection
    }

    pub fn view(&self) -> Option<&ConversationView> {
        self.view.as_ref()
    }

    // -- Conversations --

    /// Resolve the conversation with `target_username` (the viewer's own name
    /// opens notes) and open it.
    pub async fn open_with(&mut self, target_username: &str) -> Result<Resolved> {
        let target = accounts::find_user(self.store.as_ref(), target_username).await?;
        let resolved = Resolver::new(self.store.as_ref())
            .with_participant_keys(self.options.unique_direct)
            .resolve(&self.viewer, &target)
            .await?;
        self.open(resolved.id()).await?;
        Ok(resolved)
    }

    /// Open a conversation by id, replacing any open one.
    pub async fn open(&mut self, conversation_id: ConversationId) -> Result<()> {
        self.close();

        let conversation = self
            .store
            .conversation(conversation_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("conversation {}", conversation_id)))?;

        let epoch = self.next_epoch;
        self.next_epoch += 1;
        let mut view = ConversationView::open(self.store.as_ref(), conversation, epoch);
        if let Some(name) = self.labels.get(&conversation_id) {
            view.set_name(name);
        }
        self.view = Some(view);
        debug!("Opened {} (epoch {})", conversation_id, epoch);

        self.reload().await
    }

    /// Commit the read cursor and tear down the live channel. No-op when
    /// nothing is open.
    pub fn close(&mut self) {
        self.pending.clear();
        if let Some(mut view) = self.view.take() {
            if let Some(last) = view.close() {
                self.cursors.set(self.viewer.id, view.id(), last);
            }
        }
    }

    /// The viewer reached the end of the open timeline.
    pub fn scrolled_to_bottom(&mut self) -> Option<MessageId> {
        let view = self.view.as_ref()?;
        let last = view.last_message_id()?;
        self.cursors.set(self.viewer.id, view.id(), last);
        Some(last)
    }

    pub fn ticket(&self) -> Option<SnapshotTicket> {
        self.view.as_ref().map(|v| v.ticket())
    }

    /// Apply a snapshot read started for `ticket`; stale tickets are ignored.
    pub fn apply_snapshot(&mut self, ticket: SnapshotTicket, messages: Vec<Message>) -> bool {
        match self.view.as_mut() {
            Some(view) => view.apply_snapshot(ticket, messages),
            None => {
                debug!("Discarding snapshot for closed {}", ticket.conversation_id);
                false
            }
        }
    }

    /// Re-read the open conversation and merge the result. If the live
    /// channel had lagged, the messages it missed are queued for `next_live`.
    pub async fn reload(&mut self) -> Result<()> {
        let ticket = self.ticket().ok_or(CoreError::NoOpenConversation)?;
        let messages = timeline::load(self.store.as_ref(), ticket.conversation_id).await?;
        let Some(view) = self.view.as_mut() else {
            debug!("Discarding snapshot for closed {}", ticket.conversation_id);
            return Ok(());
        };
        let had_gap = view.has_gap();
        if let Some(added) = view.merge_snapshot(ticket, messages) {
            if had_gap {
                info!(
                    "Recovered {} messages missed by the live channel of {}",
                    added.len(),
                    ticket.conversation_id
                );
                self.pending.extend(added);
            }
        }
        Ok(())
    }

    async fn resync(&mut self) {
        if let Err(e) = self.reload().await {
            error!("Resync after lag failed: {}", e);
            if let Some(view) = self.view.as_mut() {
                view.clear_gap();
            }
        }
    }

    /// Send to the open conversation. Blank content returns `Ok(None)` and
    /// leaves everything untouched. A successful send reloads the timeline
    /// instead of waiting for the live channel to echo it back. Once the
    /// insert succeeded the send is reported as done even if that reload
    /// fails; the message is then merged directly.
    pub async fn send(&mut self, content: &str) -> Result<Option<Message>> {
        let conversation_id = self
            .view
            .as_ref()
            .map(|v| v.id())
            .ok_or(CoreError::NoOpenConversation)?;

        let sent = timeline::append(self.store.as_ref(), conversation_id, self.viewer.id, content)
            .await?;
        let Some(message) = sent else {
            return Ok(None);
        };
        if let Err(e) = self.reload().await {
            error!(
                "Message {} was stored but reloading {} failed: {}",
                message.id, conversation_id, e
            );
            if let Some(view) = self.view.as_mut() {
                view.apply_event(ChangeEvent::MessageInsert {
                    message: message.clone(),
                });
            }
        }
        Ok(Some(message))
    }

    /// Next live message of the open conversation. Pending forever while
    /// nothing is open; `None` once the channel closes. When the channel
    /// lags, the conversation is re-read and the missed messages come out
    /// here in order. Cancel-safe.
    pub async fn next_live(&mut self) -> Option<Message> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Some(message);
            }
            let Some(view) = self.view.as_mut() else {
                return std::future::pending().await;
            };
            if view.has_gap() {
                self.resync().await;
                continue;
            }
            let live = view.next_live().await?;
            match live {
                Live::Message(message) => return Some(message),
                Live::Gap => self.resync().await,
            }
        }
    }

    /// Whether a message of the open conversation should be flagged as new.
    pub fn is_unread(&self, message: &Message) -> bool {
        let cursor = self.cursors.get(self.viewer.id, message.conversation_id);
        unread::message_is_unread(self.viewer.id, cursor, message)
    }

    pub async fn rename(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::BlankName.into());
        }
        let view = self.view.as_ref().ok_or(CoreError::NoOpenConversation)?;
        if view.conversation().created_by != self.viewer.id {
            return Err(CoreError::NotCreator);
        }
        let conversation_id = view.id();

        self.store.rename_conversation(conversation_id, name).await?;
        self.labels.insert(conversation_id, name.to_string());
        if let Some(view) = self.view.as_mut().filter(|v| v.id() == conversation_id) {
            view.set_name(name);
        }
        info!("Renamed {} to '{}'", conversation_id, name);
        Ok(())
    }

    // -- List views: failures are logged and degrade to empty --

    async fn snapshots(&self) -> Vec<ConversationSnapshot> {
        match self.store.direct_conversations(self.viewer.id).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                error!("Failed to load conversations for {}: {}", self.viewer.username, e);
                vec![]
            }
        }
    }

    /// Every conversation with its unread count.
    pub async fn overview(&self) -> Vec<InboxEntry> {
        let snapshots = self.snapshots().await;
        UnreadAggregator::new(&self.cursors).overview(self.viewer.id, &snapshots, &self.labels)
    }

    /// Conversations holding unread messages.
    pub async fn inbox(&self) -> Vec<InboxEntry> {
        let snapshots = self.snapshots().await;
        UnreadAggregator::new(&self.cursors).inbox(self.viewer.id, &snapshots, &self.labels)
    }

    /// Foreign messages received since the previous session.
    pub async fn recent_activity(&self) -> Vec<DigestEntry> {
        let snapshots = self.snapshots().await;
        digest::digest(self.viewer.id, &snapshots, self.last_connection, &self.labels)
    }

    /// Conversations shared with `target_username`, or the viewer's notes
    /// when it names the viewer.
    pub async fn conversations_with(&self, target_username: &str) -> Vec<ConversationSnapshot> {
        let target = match accounts::find_user(self.store.as_ref(), target_username).await {
            Ok(target) => target,
            Err(e) => {
                error!("Cannot list conversations with '{}': {}", target_username, e);
                return vec![];
            }
        };
        self.snapshots()
            .await
            .into_iter()
            .filter(|s| {
                let participants = s.participant_set();
                if target.id == self.viewer.id {
                    participants.len() == 1 && participants.contains(&self.viewer.id)
                } else {
                    participants.contains(&self.viewer.id) && participants.contains(&target.id)
                }
            })
            .collect()
    }

    pub async fn search(&self, query: &str) -> Vec<User> {
        match accounts::search_users(self.store.as_ref(), &self.viewer, query).await {
            Ok(users) => users,
            Err(e) => {
                error!("User search for '{}' failed: {}", query, e);
                vec![]
            }
        }
    }
}
