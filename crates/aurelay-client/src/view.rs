//! Ordered, de-duplicated view of one conversation.

use aurelay_protocol::ChatMessage;
use chrono::{DateTime, Utc};

/// Delivery state of a rendered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Appended optimistically at send time, not yet confirmed.
    Pending,
    /// Backed by a server-persisted record.
    Confirmed,
    /// The relay rejected the send or persistence failed.
    Failed,
}

/// One entry in the conversation view.
#[derive(Debug, Clone)]
pub struct ViewMessage {
    /// Client-generated id for optimistic entries; `None` for history rows.
    pub correlation_id: Option<String>,
    /// Server-assigned id once confirmed.
    pub message_id: Option<i64>,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub body: String,
    /// Server stamp once confirmed; local display stamp while pending.
    pub sent_at: DateTime<Utc>,
    pub state: DeliveryState,
}

/// Ordered sequence of messages for one (user, peer) pair.
///
/// Entries arrive from three sources (the history fetch, optimistic local
/// sends, and live deliver events) and are kept stably sorted by `sent_at`
/// so two clients always converge on the same ordering regardless of arrival
/// interleaving. A message the sender already rendered optimistically is
/// never rendered a second time when its echo comes back: confirmation is
/// matched by correlation id, and stray duplicates by server id or the
/// `(sender, sent_at, body)` tuple.
#[derive(Debug)]
pub struct ConversationView {
    user_id: i64,
    peer_id: i64,
    entries: Vec<ViewMessage>,
}

impl ConversationView {
    pub fn new(user_id: i64, peer_id: i64) -> Self {
        Self {
            user_id,
            peer_id,
            entries: Vec::new(),
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn peer_id(&self) -> i64 {
        self.peer_id
    }

    /// Replace the confirmed portion of the view with a fresh history fetch.
    ///
    /// Pending and failed optimistic entries survive a reload, so a reconnect
    /// does not silently discard messages the user still sees as in flight.
    pub fn load_history(&mut self, history: Vec<ChatMessage>) {
        self.entries.retain(|e| e.state != DeliveryState::Confirmed);
        for message in history {
            self.insert_confirmed(message);
        }
        self.resort();
    }

    /// Append an optimistic local entry at send time.
    pub fn append_local(&mut self, correlation_id: &str, body: &str) {
        self.entries.push(ViewMessage {
            correlation_id: Some(correlation_id.to_string()),
            message_id: None,
            sender_id: self.user_id,
            receiver_id: self.peer_id,
            body: body.to_string(),
            sent_at: Utc::now(),
            state: DeliveryState::Pending,
        });
        self.resort();
    }

    /// Replace the optimistic placeholder with the server-confirmed record.
    ///
    /// Returns false if no placeholder matched (the confirmed record is then
    /// merged like any delivered message, so nothing is lost either way).
    pub fn confirm(&mut self, correlation_id: &str, message: ChatMessage) -> bool {
        let matched = self
            .entries
            .iter_mut()
            .find(|e| e.correlation_id.as_deref() == Some(correlation_id));
        match matched {
            Some(entry) => {
                entry.message_id = Some(message.id);
                entry.body = message.body;
                entry.sent_at = message.sent_at;
                entry.state = DeliveryState::Confirmed;
                self.resort();
                true
            }
            None => {
                self.apply_delivered(message);
                false
            }
        }
    }

    /// Merge a live deliver event into the view.
    ///
    /// Events for other conversations are ignored (the legacy broadcast-all
    /// relay pushes every message to every connection).
    pub fn apply_delivered(&mut self, message: ChatMessage) {
        if !self.belongs_here(&message) {
            return;
        }
        self.insert_confirmed(message);
        self.resort();
    }

    /// Mark an optimistic entry as failed. Returns false if no entry matched.
    pub fn mark_failed(&mut self, correlation_id: &str) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.correlation_id.as_deref() == Some(correlation_id))
        {
            Some(entry) => {
                entry.state = DeliveryState::Failed;
                true
            }
            None => false,
        }
    }

    /// The rendered entries, oldest first.
    pub fn messages(&self) -> &[ViewMessage] {
        &self.entries
    }

    fn belongs_here(&self, message: &ChatMessage) -> bool {
        (message.sender_id == self.peer_id && message.receiver_id == self.user_id)
            || (message.sender_id == self.user_id && message.receiver_id == self.peer_id)
    }

    fn insert_confirmed(&mut self, message: ChatMessage) {
        let duplicate = self.entries.iter().any(|e| {
            e.message_id == Some(message.id)
                || (e.state == DeliveryState::Confirmed
                    && e.sender_id == message.sender_id
                    && e.sent_at == message.sent_at
                    && e.body == message.body)
        });
        if duplicate {
            return;
        }
        self.entries.push(ViewMessage {
            correlation_id: None,
            message_id: Some(message.id),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            body: message.body,
            sent_at: message.sent_at,
            state: DeliveryState::Confirmed,
        });
    }

    fn resort(&mut self) {
        // Stable: ties keep their relative (arrival) order.
        self.entries.sort_by_key(|e| e.sent_at);
    }
}
