use tracing::info;

use hush_types::{User, ValidationError};

use crate::error::{CoreError, Result};
use crate::store::Store;

/// Queries shorter than this return nothing without hitting the store.
pub const MIN_SEARCH_LEN: usize = 2;
pub const SEARCH_LIMIT: usize = 5;

fn normalize(username: &str) -> Result<&str> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ValidationError::BlankUsername.into());
    }
    Ok(username)
}

pub async fn find_user(store: &dyn Store, username: &str) -> Result<User> {
    let username = normalize(username)?;
    store
        .user_by_username(username)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("user '{}'", username)))
}

pub async fn sign_up(store: &dyn Store, username: &str) -> Result<User> {
    let username = normalize(username)?;
    if store.user_by_username(username).await?.is_some() {
        return Err(CoreError::UsernameTaken(username.to_string()));
    }
    let user = store.insert_user(username).await.map_err(|e| {
        if e.is_unique_violation() {
            CoreError::UsernameTaken(username.to_string())
        } else {
            e.into()
        }
    })?;
    info!("Registered {} ({})", user.username, user.id);
    Ok(user)
}

/// Other users whose name contains `query`, case-insensitively.
pub async fn search_users(store: &dyn Store, viewer: &User, query: &str) -> Result<Vec<User>> {
    let query = query.trim();
    if query.chars().count() < MIN_SEARCH_LEN {
        return Ok(vec![]);
    }
    Ok(store.search_users(query, viewer.id, SEARCH_LIMIT).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn sign_up_then_find() {
        let store = MemoryStore::new();
        let created = sign_up(&store, "  alice ").await.unwrap();
        assert_eq!(created.username, "alice");

        let found = find_user(&store, "alice").await.unwrap();
        assert_eq!(found, created);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let store = MemoryStore::new();
        let err = find_user(&store, "ghost").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "user 'ghost' does not exist");
    }

    #[tokio::test]
    async fn blank_and_taken_usernames_are_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            sign_up(&store, "   ").await,
            Err(CoreError::Validation(ValidationError::BlankUsername))
        ));

        sign_up(&store, "bob").await.unwrap();
        assert!(matches!(
            sign_up(&store, "bob").await,
            Err(CoreError::UsernameTaken(name)) if name == "bob"
        ));
    }

    #[tokio::test]
    async fn search_excludes_viewer_and_short_queries() {
        let store = MemoryStore::new();
        let alice = sign_up(&store, "alice").await.unwrap();
        for name in ["alicia", "Malik", "bob", "ALINE"] {
            sign_up(&store, name).await.unwrap();
        }

        assert!(search_users(&store, &alice, "a").await.unwrap().is_empty());

        let names: Vec<String> = search_users(&store, &alice, "li")
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, ["ALINE", "Malik", "alicia"]);
    }

    #[tokio::test]
    async fn search_is_capped() {
        let store = MemoryStore::new();
        let viewer = sign_up(&store, "viewer").await.unwrap();
        for i in 0..8 {
            sign_up(&store, &format!("user{}", i)).await.unwrap();
        }
        assert_eq!(
            search_users(&store, &viewer, "user").await.unwrap().len(),
            SEARCH_LIMIT
        );
    }
}
