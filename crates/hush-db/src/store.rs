use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::ErrorCode;
use tracing::error;
use uuid::Uuid;

use hush_core::{ChangeFeed, Store, Subscription};
use hush_types::{
    ChangeEvent, Conversation, ConversationId, ConversationSnapshot, Message, NewConversation,
    NewMessage, StoreError, User, UserId,
};

use crate::Database;
use crate::queries::format_timestamp;

/// [`Store`] over a local SQLite file. Every call runs on the blocking pool.
///
/// Inserts made through this handle are published to the feed right away;
/// rows written by other processes arrive through the watcher.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
    feed: ChangeFeed,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            feed: ChangeFeed::new(),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StoreError::new("join", e.to_string())
            })?
            .map_err(store_error)
    }
}

/// Map a backend failure onto the codes callers branch on.
pub fn store_error(e: anyhow::Error) -> StoreError {
    match e.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::QueryReturnedNoRows) => StoreError::no_rows(e.to_string()),
        Some(rusqlite::Error::SqliteFailure(failure, _))
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            match failure.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    StoreError::unique_violation(e.to_string())
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    StoreError::new("foreign_key", e.to_string())
                }
                _ => StoreError::new("constraint", e.to_string()),
            }
        }
        _ => StoreError::new("sqlite", format!("{:#}", e)),
    }
}

fn ids_to_strings<T: ToString>(ids: &[T]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

#[async_trait]
impl Store for SqliteStore {
    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let username = username.to_string();
        self.blocking(move |db| {
            db.get_user_by_username(&username)?
                .map(User::try_from)
                .transpose()
        })
        .await
    }

    async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        let ids = ids_to_strings(ids);
        self.blocking(move |db| {
            db.get_users_by_ids(&ids)?
                .into_iter()
                .map(User::try_from)
                .collect()
        })
        .await
    }

    async fn insert_user(&self, username: &str) -> Result<User, StoreError> {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
        };
        let row = user.clone();
        self.blocking(move |db| db.create_user(&row.id.to_string(), &row.username))
            .await?;
        Ok(user)
    }

    async fn search_users(
        &self,
        needle: &str,
        exclude: UserId,
        limit: usize,
    ) -> Result<Vec<User>, StoreError> {
        let needle = needle.to_string();
        self.blocking(move |db| {
            db.search_users(&needle, &exclude.to_string(), limit)?
                .into_iter()
                .map(User::try_from)
                .collect()
        })
        .await
    }

    async fn direct_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationSnapshot>, StoreError> {
        self.blocking(move |db| {
            let rows = db.get_direct_conversations(&user_id.to_string())?;
            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

            let mut participants: HashMap<ConversationId, Vec<UserId>> = HashMap::new();
            for (conversation_id, participant) in db.get_participants(&ids)? {
                participants
                    .entry(conversation_id.parse()?)
                    .or_default()
                    .push(participant.parse()?);
            }

            let mut messages: HashMap<ConversationId, Vec<Message>> = HashMap::new();
            for row in db.get_messages(&ids)? {
                let message = Message::try_from(row)?;
                messages.entry(message.conversation_id).or_default().push(message);
            }

            rows.into_iter()
                .map(|row| -> anyhow::Result<ConversationSnapshot> {
                    let conversation = Conversation::try_from(row)?;
                    Ok(ConversationSnapshot {
                        participants: participants.remove(&conversation.id).unwrap_or_default(),
                        messages: messages.remove(&conversation.id).unwrap_or_default(),
                        conversation,
                    })
                })
                .collect()
        })
        .await
    }

    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError> {
        self.blocking(move |db| {
            db.get_conversation(&id.to_string())?
                .map(Conversation::try_from)
                .transpose()
        })
        .await
    }

    async fn conversation_by_participant_key(
        &self,
        key: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let key = key.to_string();
        self.blocking(move |db| {
            db.get_conversation_by_participant_key(&key)?
                .map(Conversation::try_from)
                .transpose()
        })
        .await
    }

    async fn insert_conversation(&self, new: NewConversation) -> Result<Conversation, StoreError> {
        let row = Conversation {
            id: Uuid::new_v4(),
            is_group: new.is_group,
            name: new.name,
            created_by: new.created_by,
            created_at: Utc::now(),
        };
        let created_at = format_timestamp(row.created_at);
        let key = new.participant_key;
        self.blocking(move |db| {
            db.insert_conversation(
                &row.id.to_string(),
                row.is_group,
                row.name.as_deref(),
                &row.created_by.to_string(),
                key.as_deref(),
                &created_at,
            )?;
            Conversation::try_from(db.get_conversation(&row.id.to_string())?.ok_or(
                rusqlite::Error::QueryReturnedNoRows,
            )?)
        })
        .await
    }

    async fn insert_participants(
        &self,
        conversation_id: ConversationId,
        user_ids: &[UserId],
    ) -> Result<(), StoreError> {
        let user_ids = ids_to_strings(user_ids);
        self.blocking(move |db| db.insert_participants(&conversation_id.to_string(), &user_ids))
            .await
    }

    async fn rename_conversation(&self, id: ConversationId, name: &str) -> Result<(), StoreError> {
        let owned = name.to_string();
        self.blocking(move |db| db.rename_conversation(&id.to_string(), &owned))
            .await?;
        self.feed.publish(ChangeEvent::ConversationRename {
            conversation_id: id,
            name: name.to_string(),
        });
        Ok(())
    }

    async fn messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, StoreError> {
        self.blocking(move |db| {
            db.get_messages(&[conversation_id.to_string()])?
                .into_iter()
                .map(Message::try_from)
                .collect()
        })
        .await
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message, StoreError> {
        let timestamp = format_timestamp(new.timestamp.unwrap_or_else(Utc::now));
        let message = self
            .blocking(move |db| {
                let row = db.insert_message(
                    &new.conversation_id.to_string(),
                    &new.sender_id.to_string(),
                    &new.content,
                    &timestamp,
                )?;
                Message::try_from(row)
            })
            .await?;
        self.feed.publish(ChangeEvent::MessageInsert {
            message: message.clone(),
        });
        Ok(message)
    }

    fn subscribe(&self, conversation_id: ConversationId) -> Subscription {
        self.feed.subscribe(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use hush_core::{Delivery, Resolver, accounts};

    fn store() -> SqliteStore {
        SqliteStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn missing_rows_are_none() {
        let store = store();
        assert!(store.user_by_username("ghost").await.unwrap().is_none());
        assert!(store.conversation(Uuid::new_v4()).await.unwrap().is_none());

        let err = store.rename_conversation(Uuid::new_v4(), "x").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn duplicate_username_maps_to_unique_violation() {
        let store = store();
        store.insert_user("alice").await.unwrap();
        let err = store.insert_user("alice").await.unwrap_err();
        assert!(err.is_unique_violation());

        let core = accounts::sign_up(&store, "alice").await.unwrap_err();
        assert!(matches!(core, hush_core::CoreError::UsernameTaken(_)));
    }

    #[tokio::test]
    async fn participant_key_is_unique() {
        let store = store();
        let alice = store.insert_user("alice").await.unwrap();
        let new = NewConversation::direct("alice - bob", alice.id).with_participant_key("k");

        let first = store.insert_conversation(new.clone()).await.unwrap();
        let err = store.insert_conversation(new).await.unwrap_err();
        assert!(err.is_unique_violation());

        let found = store.conversation_by_participant_key("k").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn snapshots_carry_participants_and_ordered_messages() {
        let store = store();
        let alice = store.insert_user("alice").await.unwrap();
        let bob = store.insert_user("bob").await.unwrap();

        let resolved = Resolver::new(&store).resolve(&alice, &bob).await.unwrap();
        let notes = Resolver::new(&store).resolve(&alice, &alice).await.unwrap();

        let t0 = Utc::now();
        for (offset, content) in [(3, "third"), (1, "first"), (2, "second")] {
            store
                .insert_message(
                    NewMessage::new(resolved.id(), bob.id, content)
                        .unwrap()
                        .at(t0 + chrono::Duration::seconds(offset)),
                )
                .await
                .unwrap();
        }

        let snapshots = store.direct_conversations(alice.id).await.unwrap();
        assert_eq!(snapshots.len(), 2);

        let direct = snapshots.iter().find(|s| s.id() == resolved.id()).unwrap();
        assert_eq!(direct.participant_set(), BTreeSet::from([alice.id, bob.id]));
        let contents: Vec<&str> = direct.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second", "third"]);

        let mine = snapshots.iter().find(|s| s.id() == notes.id()).unwrap();
        assert_eq!(mine.participants, [alice.id]);
        assert!(mine.messages.is_empty());

        assert_eq!(store.direct_conversations(bob.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn local_inserts_are_published() {
        let store = store();
        let alice = store.insert_user("alice").await.unwrap();
        let notes = Resolver::new(&store).resolve(&alice, &alice).await.unwrap();
        let mut sub = store.subscribe(notes.id());

        let sent = store
            .insert_message(NewMessage::new(notes.id(), alice.id, "memo").unwrap())
            .await
            .unwrap();

        match sub.recv().await {
            Some(Delivery::Event(ChangeEvent::MessageInsert { message })) => assert_eq!(message, sent),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(store.messages(notes.id()).await.unwrap(), [sent]);
    }
}
