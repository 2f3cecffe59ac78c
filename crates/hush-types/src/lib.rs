pub mod api;
pub mod error;
pub mod events;
pub mod models;

pub use api::{NewConversation, NewMessage};
pub use error::{StoreError, ValidationError};
pub use events::ChangeEvent;
pub use models::{
    Conversation, ConversationId, ConversationSnapshot, Message, MessageId, ParticipantLink,
    SELF_CONVERSATION_LABEL, User, UserId,
};
