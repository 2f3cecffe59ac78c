use crate::models::{ConversationRow, MessageRow, UserRow};
use crate::Database;
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use rusqlite::types::ToSql;

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username) VALUES (?1, ?2)",
                (id, username),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    pub fn get_users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, username FROM users WHERE id IN ({}) ORDER BY username",
                placeholders(1, ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(as_params(ids).as_slice(), |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Case-insensitive (ASCII) substring match, `needle` taken literally.
    pub fn search_users(&self, needle: &str, exclude: &str, limit: usize) -> Result<Vec<UserRow>> {
        let pattern = format!("%{}%", escape_like(needle));
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username FROM users
                 WHERE username LIKE ?1 ESCAPE '\\' AND id != ?2
                 ORDER BY username
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![pattern, exclude, limit as i64], |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Conversations --

    pub fn insert_conversation(
        &self,
        id: &str,
        is_group: bool,
        name: Option<&str>,
        created_by: &str,
        participant_key: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, is_group, name, created_by, participant_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, is_group, name, created_by, participant_key, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            query_conversation(conn, "WHERE id = ?1", id)
        })
    }

    pub fn get_conversation_by_participant_key(&self, key: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            query_conversation(conn, "WHERE participant_key = ?1", key)
        })
    }

    /// All rows go in together or not at all.
    pub fn insert_participants(&self, conversation_id: &str, user_ids: &[String]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id)
                     VALUES (?1, ?2)",
                )?;
                for user_id in user_ids {
                    stmt.execute((conversation_id, user_id))?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Fails with `QueryReturnedNoRows` when the conversation does not exist.
    pub fn rename_conversation(&self, id: &str, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET name = ?1 WHERE id = ?2",
                (name, id),
            )?;
            if changed == 0 {
                return Err(rusqlite::Error::QueryReturnedNoRows.into());
            }
            Ok(())
        })
    }

    /// Non-group conversations `user_id` takes part in.
    pub fn get_direct_conversations(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.is_group, c.name, c.created_by, c.created_at
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1 AND c.is_group = 0
                 ORDER BY c.created_at, c.id",
            )?;
            let rows = stmt
                .query_map([user_id], conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// (conversation_id, user_id) pairs for a set of conversations.
    pub fn get_participants(&self, conversation_ids: &[String]) -> Result<Vec<(String, String)>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT conversation_id, user_id FROM conversation_participants
                 WHERE conversation_id IN ({})",
                placeholders(1, conversation_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(as_params(conversation_ids).as_slice(), |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert and return the stored row, with its assigned id.
    pub fn insert_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        timestamp: &str,
    ) -> Result<MessageRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (conversation_id, sender_id, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                (conversation_id, sender_id, content, timestamp),
            )?;
            Ok(MessageRow {
                id: conn.last_insert_rowid(),
                conversation_id: conversation_id.to_string(),
                sender_id: sender_id.to_string(),
                content: content.to_string(),
                timestamp: timestamp.to_string(),
            })
        })
    }

    /// Messages of several conversations, each conversation's run in
    /// (timestamp, id) order.
    pub fn get_messages(&self, conversation_ids: &[String]) -> Result<Vec<MessageRow>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, conversation_id, sender_id, content, timestamp FROM messages
                 WHERE conversation_id IN ({})
                 ORDER BY timestamp, id",
                placeholders(1, conversation_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(as_params(conversation_ids).as_slice(), message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Messages with an id above `after`, oldest first, across all conversations.
    pub fn get_messages_after(&self, after: i64, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, content, timestamp FROM messages
                 WHERE id > ?1
                 ORDER BY id
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![after, limit], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn max_message_id(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let id = conn.query_row("SELECT COALESCE(MAX(id), 0) FROM messages", [], |row| {
                row.get(0)
            })?;
            Ok(id)
        })
    }
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare("SELECT id, username FROM users WHERE username = ?1")?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_conversation(conn: &Connection, filter: &str, value: &str) -> Result<Option<ConversationRow>> {
    let sql = format!(
        "SELECT id, is_group, name, created_by, created_at FROM conversations {}",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([value], conversation_row).optional()?;
    Ok(row)
}

fn conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        is_group: row.get(1)?,
        name: row.get(2)?,
        created_by: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

/// `?start, ?start+1, ...` for an IN list of `count` values.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn as_params(values: &[String]) -> Vec<&dyn ToSql> {
    values.iter().map(|v| v as &dyn ToSql).collect()
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
