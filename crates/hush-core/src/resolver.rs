use std::collections::BTreeSet;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use hush_types::{
    Conversation, ConversationId, ConversationSnapshot, NewConversation, SELF_CONVERSATION_LABEL,
    User, UserId,
};

use crate::error::Result;
use crate::store::Store;

/// Outcome of [`Resolver::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    pub conversation: Conversation,
    pub created: bool,
}

impl Resolved {
    pub fn id(&self) -> ConversationId {
        self.conversation.id
    }
}

/// Stable digest of a participant set, independent of order.
pub fn participant_key(participants: &BTreeSet<UserId>) -> String {
    let mut hasher = Sha256::new();
    for id in participants {
        hasher.update(id.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Finds, or lazily creates, the direct conversation between a viewer and a
/// target (the viewer itself for notes).
///
/// Lookup is a client-side filter over the viewer's conversations. Nothing
/// makes create-if-absent atomic: two callers resolving the same pair at the
/// same time can both create a conversation. With participant keys enabled
/// the store rejects the second insert and the loser adopts the winner's
/// conversation.
pub struct Resolver<'a> {
    store: &'a dyn Store,
    participant_keys: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            participant_keys: false,
        }
    }

    pub fn with_participant_keys(mut self, enabled: bool) -> Self {
        self.participant_keys = enabled;
        self
    }

    /// The existing canonical conversation for `viewer` and `target`, if any.
    /// When a race left several, the oldest one wins.
    pub async fn find(&self, viewer: &User, target: &User) -> Result<Option<Conversation>> {
        let wanted = participants(viewer, target);
        let conversations = self.store.direct_conversations(viewer.id).await?;
        Ok(canonical(conversations, &wanted))
    }

    pub async fn resolve(&self, viewer: &User, target: &User) -> Result<Resolved> {
        if let Some(conversation) = self.find(viewer, target).await? {
            return Ok(Resolved {
                conversation,
                created: false,
            });
        }

        let wanted = participants(viewer, target);
        let name = if viewer.id == target.id {
            SELF_CONVERSATION_LABEL.to_string()
        } else {
            format!("{} - {}", viewer.username, target.username)
        };
        let key = participant_key(&wanted);
        let mut new = NewConversation::direct(name, viewer.id);
        if self.participant_keys {
            new = new.with_participant_key(key.clone());
        }

        let (conversation, created) = match self.store.insert_conversation(new).await {
            Ok(conversation) => (conversation, true),
            Err(e) if e.is_unique_violation() && self.participant_keys => {
                info!(
                    "Conversation between {} and {} already exists under its key, adopting it",
                    viewer.username, target.username
                );
                match self.store.conversation_by_participant_key(&key).await? {
                    Some(conversation) => (conversation, false),
                    None => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        // An adopted conversation may be missing its links if its creator
        // failed halfway, so links are written on both paths.
        let user_ids: Vec<UserId> = wanted.into_iter().collect();
        if let Err(e) = self.store.insert_participants(conversation.id, &user_ids).await {
            warn!(
                "Conversation {} is left without participants: {}",
                conversation.id, e
            );
            return Err(e.into());
        }

        if created {
            info!(
                "Created conversation {} for {} and {}",
                conversation.id, viewer.username, target.username
            );
        }
        Ok(Resolved {
            conversation,
            created,
        })
    }
}

fn participants(viewer: &User, target: &User) -> BTreeSet<UserId> {
    [viewer.id, target.id].into_iter().collect()
}

fn canonical(
    conversations: Vec<ConversationSnapshot>,
    wanted: &BTreeSet<UserId>,
) -> Option<Conversation> {
    conversations
        .into_iter()
        .filter(|snapshot| !snapshot.conversation.is_group)
        .filter(|snapshot| snapshot.participant_set() == *wanted)
        .map(|snapshot| snapshot.conversation)
        .min_by_key(|c| (c.created_at, c.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use hush_types::StoreError;

    async fn user(store: &MemoryStore, name: &str) -> User {
        store.insert_user(name).await.unwrap()
    }

    #[tokio::test]
    async fn self_conversation_is_created_once() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        let resolver = Resolver::new(&store);

        let first = resolver.resolve(&alice, &alice).await.unwrap();
        assert!(first.created);
        assert_eq!(first.conversation.name.as_deref(), Some(SELF_CONVERSATION_LABEL));
        assert_eq!(first.conversation.created_by, alice.id);

        let second = resolver.resolve(&alice, &alice).await.unwrap();
        assert!(!second.created);
        assert_eq!(first.id(), second.id());
        assert_eq!(store.conversation_count(), 1);
    }

    #[tokio::test]
    async fn resolution_is_symmetric() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        let resolver = Resolver::new(&store);

        let from_alice = resolver.resolve(&alice, &bob).await.unwrap();
        assert_eq!(from_alice.conversation.name.as_deref(), Some("alice - bob"));

        let from_bob = resolver.resolve(&bob, &alice).await.unwrap();
        assert!(!from_bob.created);
        assert_eq!(from_alice.id(), from_bob.id());
    }

    #[tokio::test]
    async fn notes_and_direct_conversations_stay_apart() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        let resolver = Resolver::new(&store);

        let direct = resolver.resolve(&alice, &bob).await.unwrap();
        let notes = resolver.resolve(&alice, &alice).await.unwrap();
        let bob_notes = resolver.resolve(&bob, &bob).await.unwrap();

        assert_ne!(direct.id(), notes.id());
        assert_ne!(notes.id(), bob_notes.id());
        assert!(notes.created && bob_notes.created);
    }

    #[tokio::test]
    async fn concurrent_resolution_can_create_duplicates() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        let resolver = Resolver::new(&store);

        let (a, b) = tokio::join!(resolver.resolve(&alice, &bob), resolver.resolve(&bob, &alice));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.created && b.created);
        assert_ne!(a.id(), b.id());
        assert_eq!(store.conversation_count(), 2);

        // Later lookups settle on the same one.
        let again_a = resolver.resolve(&alice, &bob).await.unwrap();
        let again_b = resolver.resolve(&bob, &alice).await.unwrap();
        assert_eq!(again_a.id(), again_b.id());
        assert_eq!(store.conversation_count(), 2);
    }

    #[tokio::test]
    async fn participant_keys_close_the_race() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        let resolver = Resolver::new(&store).with_participant_keys(true);

        let (a, b) = tokio::join!(resolver.resolve(&alice, &bob), resolver.resolve(&bob, &alice));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.id(), b.id());
        assert_eq!(store.conversation_count(), 1);
    }

    #[tokio::test]
    async fn insert_failure_propagates() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        store.fail_with(StoreError::new("timeout", "network unreachable"));

        let err = Resolver::new(&store).resolve(&alice, &alice).await.unwrap_err();
        assert!(err.to_string().contains("network unreachable"));
        assert_eq!(store.conversation_count(), 0);
    }

    #[tokio::test]
    async fn keyed_conversation_without_links_is_repaired() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        let resolver = Resolver::new(&store).with_participant_keys(true);

        store.fail_once("insert_participants", StoreError::new("timeout", "link write lost"));
        assert!(resolver.resolve(&alice, &bob).await.is_err());
        assert_eq!(store.conversation_count(), 1);
        assert!(resolver.find(&alice, &bob).await.unwrap().is_none());

        let retry = resolver.resolve(&alice, &bob).await.unwrap();
        assert!(!retry.created);
        assert_eq!(store.conversation_count(), 1);

        let listed = store.direct_conversations(alice.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].participant_set(), BTreeSet::from([alice.id, bob.id]));
        let from_bob = resolver.find(&bob, &alice).await.unwrap().unwrap();
        assert_eq!(from_bob.id, retry.id());
    }

    #[test]
    fn participant_key_ignores_order() {
        let (a, b) = (uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
        let forward: BTreeSet<UserId> = [a, b].into_iter().collect();
        let backward: BTreeSet<UserId> = [b, a].into_iter().collect();
        assert_eq!(participant_key(&forward), participant_key(&backward));
        assert_eq!(participant_key(&forward).len(), 64);
    }
}
