use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use hush_types::{ChangeEvent, ConversationId};

const FEED_CAPACITY: usize = 1024;

/// Fans store change events out to live subscriptions.
///
/// Delivery is at-least-once from the consumer's point of view: a store may
/// publish the same row more than once (e.g. local insert plus a poller
/// catching it again), so subscribers must dedupe by message id.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    /// Every subscription receives every event and filters by conversation
    broadcast_tx: broadcast::Sender<ChangeEvent>,

    /// Open subscriptions: subscription id -> conversation it listens to
    subscriptions: Mutex<HashMap<u64, ConversationId>>,

    next_id: AtomicU64,
}

impl FeedInner {
    fn release(&self, id: u64) {
        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(conversation_id) = subs.remove(&id) {
            debug!("Unsubscribed {} from conversation {}", id, conversation_id);
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(FeedInner {
                broadcast_tx,
                subscriptions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Push an event to every open subscription. Events published while no
    /// one listens are dropped.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Open a live channel scoped to one conversation.
    pub fn subscribe(&self, conversation_id: ConversationId) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.inner.broadcast_tx.subscribe();
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, conversation_id);

        debug!("Subscription {} opened for conversation {}", id, conversation_id);

        Subscription {
            id,
            conversation_id,
            rx,
            feed: Some(self.inner.clone()),
        }
    }

    /// Number of open subscriptions listening to `conversation_id`.
    pub fn active_subscriptions(&self, conversation_id: ConversationId) -> usize {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|c| **c == conversation_id)
            .count()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// What a subscription yields.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(ChangeEvent),
    /// The receiver fell behind and this many events were dropped, some of
    /// which may have belonged to this conversation. Consumers must resync
    /// from the store.
    Lagged(u64),
}

/// A live channel for one conversation.
///
/// Unsubscribing happens exactly once: either through [`Subscription::unsubscribe`],
/// which consumes the handle, or when an open handle is dropped.
pub struct Subscription {
    id: u64,
    conversation_id: ConversationId,
    rx: broadcast::Receiver<ChangeEvent>,
    feed: Option<Arc<FeedInner>>,
}

impl Subscription {
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Wait for the next event of this conversation. Returns `None` once the
    /// feed is gone. Cancel-safe.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.conversation_id() == self.conversation_id => {
                    return Some(Delivery::Event(event));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    warn!("Subscription {} lagged by {} events", self.id, n);
                    return Some(Delivery::Lagged(n));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-delivered event of this conversation, without waiting.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.conversation_id() == self.conversation_id => {
                    return Some(Delivery::Event(event));
                }
                Ok(_) => continue,
                Err(TryRecvError::Lagged(n)) => {
                    warn!("Subscription {} lagged by {} events", self.id, n);
                    return Some(Delivery::Lagged(n));
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.release(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
