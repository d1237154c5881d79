//! Row types for the relay database.

use anyhow::{Context, Result};
use aurelay_protocol::ChatMessage;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A registered user (contact-list collaborator, not part of the relay core).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// Raw `messages` row. Timestamps are stored as RFC 3339 text with fixed
/// precision so lexicographic order matches chronological order.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub body: String,
    pub sent_at: String,
}

impl MessageRow {
    pub(crate) fn into_message(self) -> Result<ChatMessage> {
        let sent_at = DateTime::parse_from_rfc3339(&self.sent_at)
            .with_context(|| format!("parsing sent_at for message {}", self.id))?
            .with_timezone(&Utc);
        Ok(ChatMessage {
            id: self.id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            body: self.body,
            sent_at,
        })
    }
}
