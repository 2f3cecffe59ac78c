//! In-process implementations of [`Store`] and [`LocalKv`].
//!
//! Every store call yields to the scheduler once before touching the tables,
//! so concurrent callers interleave at round-trip boundaries the way they
//! would against a networked store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use hush_types::{
    ChangeEvent, Conversation, ConversationId, ConversationSnapshot, Message, MessageId,
    NewConversation, NewMessage, ParticipantLink, StoreError, User, UserId,
};

use crate::feed::{ChangeFeed, Subscription};
use crate::store::{LocalKv, Store};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    conversations: Vec<(Conversation, Option<String>)>,
    participants: Vec<ParticipantLink>,
    messages: Vec<Message>,
    last_message_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    feed: ChangeFeed,
    /// When set, every call fails with this error.
    outage: Mutex<Option<StoreError>>,
    /// One-shot failures keyed by store method name.
    faults: Mutex<HashMap<&'static str, StoreError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Make every subsequent call fail with `error` until [`MemoryStore::recover`].
    pub fn fail_with(&self, error: StoreError) {
        *self.outage.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
    }

    pub fn recover(&self) {
        *self.outage.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Fail the next call to the store method named `method` with `error`.
    pub fn fail_once(&self, method: &'static str, error: StoreError) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(method, error);
    }

    pub fn conversation_count(&self) -> usize {
        self.tables().conversations.len()
    }

    pub fn message_count(&self) -> usize {
        self.tables().messages.len()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn round_trip(&self, method: &'static str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if let Some(err) = self
            .faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(method)
        {
            debug!("Injected failure for {}", method);
            return Err(err);
        }
        match self.outage.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn sorted(mut messages: Vec<Message>) -> Vec<Message> {
    messages.sort_by_key(|m| m.order_key());
    messages
}

#[async_trait]
impl Store for MemoryStore {
    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.round_trip("user_by_username").await?;
        Ok(self.tables().users.iter().find(|u| u.username == username).cloned())
    }

    async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        self.round_trip("users_by_ids").await?;
        Ok(self
            .tables()
            .users
            .iter()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn insert_user(&self, username: &str) -> Result<User, StoreError> {
        self.round_trip("insert_user").await?;
        let mut tables = self.tables();
        if tables.users.iter().any(|u| u.username == username) {
            return Err(StoreError::unique_violation(format!("username {}", username)));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn search_users(
        &self,
        needle: &str,
        exclude: UserId,
        limit: usize,
    ) -> Result<Vec<User>, StoreError> {
        self.round_trip("search_users").await?;
        let needle = needle.to_lowercase();
        let mut found: Vec<User> = self
            .tables()
            .users
            .iter()
            .filter(|u| u.id != exclude && u.username.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.username.cmp(&b.username));
        found.truncate(limit);
        Ok(found)
    }

    async fn direct_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationSnapshot>, StoreError> {
        self.round_trip("direct_conversations").await?;
        let tables = self.tables();

        let snapshots = tables
            .conversations
            .iter()
            .map(|(c, _)| c)
            .filter(|c| !c.is_group)
            .filter(|c| {
                tables
                    .participants
                    .iter()
                    .any(|p| p.conversation_id == c.id && p.user_id == user_id)
            })
            .map(|c| ConversationSnapshot {
                conversation: c.clone(),
                participants: tables
                    .participants
                    .iter()
                    .filter(|p| p.conversation_id == c.id)
                    .map(|p| p.user_id)
                    .collect(),
                messages: sorted(
                    tables
                        .messages
                        .iter()
                        .filter(|m| m.conversation_id == c.id)
                        .cloned()
                        .collect(),
                ),
            })
            .collect();

        Ok(snapshots)
    }

    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError> {
        self.round_trip("conversation").await?;
        Ok(self
            .tables()
            .conversations
            .iter()
            .find(|(c, _)| c.id == id)
            .map(|(c, _)| c.clone()))
    }

    async fn conversation_by_participant_key(
        &self,
        key: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        self.round_trip("conversation_by_participant_key").await?;
        Ok(self
            .tables()
            .conversations
            .iter()
            .find(|(_, k)| k.as_deref() == Some(key))
            .map(|(c, _)| c.clone()))
    }

    async fn insert_conversation(&self, new: NewConversation) -> Result<Conversation, StoreError> {
        self.round_trip("insert_conversation").await?;
        let mut tables = self.tables();

        if let Some(key) = &new.participant_key {
            if tables.conversations.iter().any(|(_, k)| k.as_ref() == Some(key)) {
                return Err(StoreError::unique_violation(format!("participant_key {}", key)));
            }
        }

        let conversation = Conversation {
            id: Uuid::new_v4(),
            is_group: new.is_group,
            name: new.name,
            created_by: new.created_by,
            created_at: Utc::now(),
        };
        tables
            .conversations
            .push((conversation.clone(), new.participant_key));
        debug!("Created conversation {}", conversation.id);
        Ok(conversation)
    }

    async fn insert_participants(
        &self,
        conversation_id: ConversationId,
        user_ids: &[UserId],
    ) -> Result<(), StoreError> {
        self.round_trip("insert_participants").await?;
        let mut tables = self.tables();
        if !tables.conversations.iter().any(|(c, _)| c.id == conversation_id) {
            return Err(StoreError::new(
                "foreign_key",
                format!("conversation {} does not exist", conversation_id),
            ));
        }
        for &user_id in user_ids {
            let link = ParticipantLink {
                conversation_id,
                user_id,
            };
            if !tables.participants.contains(&link) {
                tables.participants.push(link);
            }
        }
        Ok(())
    }

    async fn rename_conversation(&self, id: ConversationId, name: &str) -> Result<(), StoreError> {
        self.round_trip("rename_conversation").await?;
        {
            let mut tables = self.tables();
            let (conversation, _) = tables
                .conversations
                .iter_mut()
                .find(|(c, _)| c.id == id)
                .ok_or_else(|| StoreError::no_rows(format!("conversation {}", id)))?;
            conversation.name = Some(name.to_string());
        }
        self.feed.publish(ChangeEvent::ConversationRename {
            conversation_id: id,
            name: name.to_string(),
        });
        Ok(())
    }

    async fn messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, StoreError> {
        self.round_trip("messages").await?;
        Ok(sorted(
            self.tables()
                .messages
                .iter()
                .filter(|m| m.conversation_id == conversation_id)
                .cloned()
                .collect(),
        ))
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message, StoreError> {
        self.round_trip("insert_message").await?;
        let message = {
            let mut tables = self.tables();
            tables.last_message_id += 1;
            let message = Message {
                id: MessageId(tables.last_message_id),
                conversation_id: new.conversation_id,
                sender_id: new.sender_id,
                content: new.content,
                timestamp: new.timestamp.unwrap_or_else(Utc::now),
            };
            tables.messages.push(message.clone());
            message
        };
        self.feed.publish(ChangeEvent::MessageInsert {
            message: message.clone(),
        });
        Ok(message)
    }

    fn subscribe(&self, conversation_id: ConversationId) -> Subscription {
        self.feed.subscribe(conversation_id)
    }
}

/// Process-lifetime key-value map.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalKv for MemoryKv {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn messages_come_back_in_timestamp_order() {
        let store = MemoryStore::new();
        let conversation = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let now = Utc::now();

        for (offset, text) in [(30, "late"), (10, "early"), (20, "middle")] {
            let new = NewMessage::new(conversation, sender, text)
                .unwrap()
                .at(now + Duration::seconds(offset));
            store.insert_message(new).await.unwrap();
        }

        let contents: Vec<String> = store
            .messages(conversation)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, ["early", "middle", "late"]);
    }

    #[tokio::test]
    async fn duplicate_participant_key_is_a_unique_violation() {
        let store = MemoryStore::new();
        let creator = Uuid::new_v4();

        store
            .insert_conversation(NewConversation::direct("a - b", creator).with_participant_key("k"))
            .await
            .unwrap();
        let err = store
            .insert_conversation(NewConversation::direct("a - b", creator).with_participant_key("k"))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());

        // Conversations without a key are never checked.
        store.insert_conversation(NewConversation::direct("a - b", creator)).await.unwrap();
        store.insert_conversation(NewConversation::direct("a - b", creator)).await.unwrap();
        assert_eq!(store.conversation_count(), 3);
    }

    #[tokio::test]
    async fn outage_fails_calls_until_recovered() {
        let store = MemoryStore::new();
        store.fail_with(StoreError::new("timeout", "network unreachable"));
        assert_eq!(
            store.user_by_username("alice").await.unwrap_err().code,
            "timeout"
        );

        store.recover();
        assert!(store.user_by_username("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn one_shot_failure_hits_only_the_named_call() {
        let store = MemoryStore::new();
        store.fail_once("insert_user", StoreError::new("timeout", "slow"));

        assert!(store.user_by_username("alice").await.unwrap().is_none());
        assert_eq!(store.insert_user("alice").await.unwrap_err().code, "timeout");
        assert!(store.insert_user("alice").await.is_ok());
    }

    #[tokio::test]
    async fn participant_links_are_not_duplicated() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let conversation = store
            .insert_conversation(NewConversation::direct("a - b", alice))
            .await
            .unwrap();

        store.insert_participants(conversation.id, &[alice, bob]).await.unwrap();
        store.insert_participants(conversation.id, &[alice, bob]).await.unwrap();

        let snapshots = store.direct_conversations(alice).await.unwrap();
        assert_eq!(snapshots[0].participants, [alice, bob]);
    }

    #[test]
    fn kv_overwrites_values() {
        let kv = MemoryKv::new();
        assert!(kv.get("k").is_none());
        kv.set("k", "1");
        kv.set("k", "2");
        assert_eq!(kv.get("k").as_deref(), Some("2"));
    }
}
