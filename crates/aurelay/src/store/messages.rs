//! Repository for the append-only message log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use aurelay_protocol::ChatMessage;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use super::models::MessageRow;

/// Repository for chat message persistence.
///
/// `sent_at` is assigned here, at write time, never by the client. The stamp
/// is clamped against the last value issued for the same sender so the
/// persisted log is monotonically non-decreasing per sender even when the
/// wall clock steps backwards between writes.
#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
    last_sent: Arc<Mutex<HashMap<i64, DateTime<Utc>>>>,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            last_sent: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn stamp(&self, sender_id: i64) -> DateTime<Utc> {
        let mut last = self.last_sent.lock().expect("sent_at clamp poisoned");
        let mut now = Utc::now();
        if let Some(prev) = last.get(&sender_id) {
            if now < *prev {
                now = *prev;
            }
        }
        last.insert(sender_id, now);
        now
    }

    /// Persist a new message and return the stored record.
    pub async fn insert(&self, sender_id: i64, receiver_id: i64, body: &str) -> Result<ChatMessage> {
        let sent_at = self.stamp(sender_id);
        let sent_at_text = sent_at.to_rfc3339_opts(SecondsFormat::Micros, true);

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO messages (sender_id, receiver_id, body, sent_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(body)
        .bind(&sent_at_text)
        .fetch_one(&self.pool)
        .await
        .context("inserting message")?;

        self.get_by_id(id).await
    }

    /// Get a message by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<ChatMessage> {
        sqlx::query_as::<_, MessageRow>(
            "SELECT id, sender_id, receiver_id, body, sent_at FROM messages WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("fetching message")?
        .into_message()
    }

    /// Full history for one (user, peer) pair, both directions, oldest first.
    pub async fn conversation_between(&self, a: i64, b: i64) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, sender_id, receiver_id, body, sent_at
            FROM messages
            WHERE (sender_id = ? AND receiver_id = ?)
               OR (sender_id = ? AND receiver_id = ?)
            ORDER BY sent_at ASC, id ASC
            "#,
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_all(&self.pool)
        .await
        .context("fetching conversation")?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Count all persisted messages.
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await
            .context("counting messages")
    }
}
