//! Row types as read from SQLite, kept apart from the hush-types models so
//! the schema can drift without touching the engine.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

use hush_types::{Conversation, Message, MessageId, User};

pub struct UserRow {
    pub id: String,
    pub username: String,
}

pub struct ConversationRow {
    pub id: String,
    pub is_group: bool,
    pub name: Option<String>,
    pub created_by: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: String,
}

/// RFC 3339 as written by the queries, falling back to SQLite's
/// `datetime('now')` format for rows written by hand.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = raw.parse::<DateTime<Utc>>() {
        return Ok(ts);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| ndt.and_utc())
        .with_context(|| format!("Bad timestamp '{}'", raw))
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        let id = row.id.parse().with_context(|| format!("Bad user id '{}'", row.id))?;
        Ok(User::new(id, row.username)?)
    }
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = anyhow::Error;

    fn try_from(row: ConversationRow) -> Result<Self> {
        Ok(Conversation {
            id: row
                .id
                .parse()
                .with_context(|| format!("Bad conversation id '{}'", row.id))?,
            is_group: row.is_group,
            name: row.name,
            created_by: row
                .created_by
                .parse()
                .with_context(|| format!("Bad creator id '{}'", row.created_by))?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let conversation_id = row
            .conversation_id
            .parse()
            .with_context(|| format!("Bad conversation id '{}'", row.conversation_id))?;
        let sender_id = row
            .sender_id
            .parse()
            .with_context(|| format!("Bad sender id '{}'", row.sender_id))?;
        let timestamp = parse_timestamp(&row.timestamp)?;
        Message::new(MessageId(row.id), conversation_id, sender_id, row.content, timestamp)
            .with_context(|| format!("Bad message {}", row.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_timestamp_formats() {
        let rfc = parse_timestamp("2024-03-01T10:00:00.250000Z").unwrap();
        assert_eq!(rfc.timestamp_subsec_millis(), 250);

        let sqlite = parse_timestamp("2024-03-01 10:00:00").unwrap();
        assert_eq!(sqlite, rfc - chrono::Duration::milliseconds(250));

        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn bad_ids_are_rejected() {
        let row = UserRow {
            id: "not-a-uuid".into(),
            username: "alice".into(),
        };
        assert!(User::try_from(row).is_err());
    }

    #[test]
    fn blank_rows_fail_validation() {
        let user = UserRow {
            id: uuid::Uuid::new_v4().to_string(),
            username: "  ".into(),
        };
        assert!(User::try_from(user).is_err());

        let message = MessageRow {
            id: 7,
            conversation_id: uuid::Uuid::new_v4().to_string(),
            sender_id: uuid::Uuid::new_v4().to_string(),
            content: " \n".into(),
            timestamp: "2024-03-01T10:00:00.000000Z".into(),
        };
        let err = Message::try_from(message).unwrap_err();
        assert!(err.to_string().contains("Bad message 7"));
    }
}
