//! Wire types for the aurelay chat relay.
//!
//! These types define the protocol spoken over the WebSocket connection
//! between a chat client and the relay server, plus the message record shape
//! returned by the history endpoint. Both sides depend on this crate so the
//! two ends cannot drift apart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted chat message.
///
/// `id` and `sent_at` are assigned by the server at persistence time; clients
/// never supply them. The persisted log is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// Commands sent from client to server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Pong response to a server ping.
    Pong,

    /// Submit a new chat message.
    ///
    /// `correlation_id` is generated by the client per send so that the
    /// server's `Ack` (or failure event) can be matched back to the
    /// optimistic entry the client already rendered.
    Send {
        correlation_id: String,
        receiver_id: i64,
        body: String,
    },
}

/// Events sent from server to client over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection registered with the relay.
    Connected { user_id: i64 },

    /// Heartbeat/keepalive ping.
    Ping,

    /// A message addressed to this user was persisted and relayed.
    Deliver { message: ChatMessage },

    /// The sender's own message was persisted; carries the confirmed record
    /// so the client can replace its optimistic placeholder.
    Ack {
        correlation_id: String,
        message: ChatMessage,
    },

    /// The send was rejected before persistence (empty body, self-addressed).
    /// Nothing was stored and nothing was relayed.
    SendRejected {
        correlation_id: String,
        reason: String,
    },

    /// Persistence failed; the message was NOT relayed to anyone.
    SendFailed {
        correlation_id: String,
        reason: String,
    },

    /// Protocol-level error (unparseable command and the like).
    Error { message: String },
}
