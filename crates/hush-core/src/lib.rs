pub mod accounts;
pub mod cursor;
pub mod digest;
pub mod error;
pub mod feed;
pub mod memory;
pub mod resolver;
pub mod session;
pub mod store;
pub mod timeline;
pub mod unread;

pub use cursor::ReadCursorStore;
pub use digest::DigestEntry;
pub use error::{CoreError, Result};
pub use feed::{ChangeFeed, Delivery, Subscription};
pub use memory::{MemoryKv, MemoryStore};
pub use resolver::{Resolved, Resolver};
pub use session::{Session, SessionOptions};
pub use store::{LocalKv, Store};
pub use timeline::{ConversationView, Live, SnapshotTicket, Timeline};
pub use unread::{InboxEntry, UnreadAggregator};
