//! Seams to the outside world: the persistent store and the client-local
//! key-value surface.

use async_trait::async_trait;

use hush_types::{
    Conversation, ConversationId, ConversationSnapshot, Message, NewConversation, NewMessage,
    StoreError, User, UserId,
};

use crate::feed::Subscription;

/// Durable, ordered storage for users, conversations and messages, plus a
/// push channel for inserted rows.
///
/// Lookups that match nothing return `Ok(None)`; implementations map their
/// provider's "no rows" code to that instead of an error.
#[async_trait]
pub trait Store: Send + Sync {
    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError>;

    async fn insert_user(&self, username: &str) -> Result<User, StoreError>;

    /// Case-insensitive substring match on username, excluding `exclude`.
    async fn search_users(
        &self,
        needle: &str,
        exclude: UserId,
        limit: usize,
    ) -> Result<Vec<User>, StoreError>;

    /// Every non-group conversation `user_id` participates in, with its
    /// participants and messages (timestamp ascending).
    async fn direct_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationSnapshot>, StoreError>;

    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError>;

    /// The conversation inserted with this participant key, if any.
    async fn conversation_by_participant_key(
        &self,
        key: &str,
    ) -> Result<Option<Conversation>, StoreError>;

    async fn insert_conversation(&self, new: NewConversation) -> Result<Conversation, StoreError>;

    /// Inserts all participant rows as a unit. Links that already exist are
    /// left as they are.
    async fn insert_participants(
        &self,
        conversation_id: ConversationId,
        user_ids: &[UserId],
    ) -> Result<(), StoreError>;

    async fn rename_conversation(&self, id: ConversationId, name: &str) -> Result<(), StoreError>;

    /// All messages of a conversation ordered by timestamp ascending, id as tie-break.
    async fn messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, StoreError>;

    async fn insert_message(&self, new: NewMessage) -> Result<Message, StoreError>;

    /// Opens a live channel for rows inserted into one conversation.
    fn subscribe(&self, conversation_id: ConversationId) -> Subscription;
}

/// Client-local persistent strings. Synchronous and always available;
/// implementations log their own I/O failures instead of returning them.
pub trait LocalKv: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}
