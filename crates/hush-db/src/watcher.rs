use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hush_types::{ChangeEvent, Message};

use crate::store::SqliteStore;

const BATCH: u32 = 500;

/// Publishes rows that appear in the database after startup, whoever wrote
/// them. Rows inserted through the same store were already published once,
/// so subscribers see them twice and rely on timeline dedupe.
pub async fn run_watch_loop(store: SqliteStore, poll_interval: Duration) {
    let mut last_seen = match store.database().max_message_id() {
        Ok(id) => id,
        Err(e) => {
            warn!("Watcher could not read the message high-water mark: {}", e);
            0
        }
    };
    info!("Watching for messages after id {}", last_seen);

    let mut interval = tokio::time::interval(poll_interval);
    loop {
        interval.tick().await;

        match poll_once(&store, &mut last_seen).await {
            Ok(count) => {
                if count > 0 {
                    debug!("Watcher published {} messages", count);
                }
            }
            Err(e) => {
                warn!("Watcher error: {}", e);
            }
        }
    }
}

pub fn spawn_watcher(store: SqliteStore, poll_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(run_watch_loop(store, poll_interval))
}

/// One poll: publish everything above `last_seen` and advance it.
pub async fn poll_once(store: &SqliteStore, last_seen: &mut i64) -> anyhow::Result<usize> {
    let db = store.database().clone();
    let after = *last_seen;
    let rows = tokio::task::spawn_blocking(move || db.get_messages_after(after, BATCH)).await??;

    let count = rows.len();
    for row in rows {
        let id = row.id;
        let message = Message::try_from(row)?;
        store.feed().publish(ChangeEvent::MessageInsert { message });
        *last_seen = id;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hush_core::{Delivery, Resolver, Store};
    use hush_types::NewMessage;

    use crate::Database;

    #[tokio::test]
    async fn rows_from_another_handle_are_published() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let local = SqliteStore::new(db.clone());
        // A second store over the same database stands in for another client.
        let remote = SqliteStore::new(db);

        let alice = remote.insert_user("alice").await.unwrap();
        let bob = remote.insert_user("bob").await.unwrap();
        let conversation = Resolver::new(&remote).resolve(&alice, &bob).await.unwrap().id();

        let mut sub = local.subscribe(conversation);
        let mut last_seen = local.database().max_message_id().unwrap();

        let sent = remote
            .insert_message(NewMessage::new(conversation, alice.id, "from afar").unwrap())
            .await
            .unwrap();
        assert!(sub.try_recv().is_none());

        assert_eq!(poll_once(&local, &mut last_seen).await.unwrap(), 1);
        assert_eq!(last_seen, sent.id.0);
        match sub.recv().await {
            Some(Delivery::Event(ChangeEvent::MessageInsert { message })) => assert_eq!(message, sent),
            other => panic!("unexpected event: {:?}", other),
        }

        assert_eq!(poll_once(&local, &mut last_seen).await.unwrap(), 0);
    }
}
