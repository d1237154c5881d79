//! Connection registry and fan-out for the chat relay.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use aurelay_protocol::ServerEvent;

/// Size of the per-connection send buffer.
const CONNECTION_BUFFER_SIZE: usize = 64;

/// Identifier for one registered connection, unique for the hub's lifetime.
pub type ConnId = u64;

/// A sender for events to a specific client connection.
pub type EventSender = mpsc::Sender<ServerEvent>;

struct Registration {
    conn_id: ConnId,
    tx: EventSender,
}

/// Registry of live connections, keyed by owning user.
///
/// A user may hold several connections at once (one per device/screen). The
/// raw collection is never exposed; all mutation and iteration goes through
/// the methods here, so broadcast-while-disconnecting cannot observe a
/// half-removed entry.
pub struct ChatHub {
    connections: DashMap<i64, Vec<Registration>>,
    next_conn_id: AtomicU64,
}

impl ChatHub {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Register a new connection for a user.
    ///
    /// Returns the connection id and the receiver side of its event channel.
    pub fn register(&self, user_id: i64) -> (ConnId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER_SIZE);
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.connections
            .entry(user_id)
            .or_default()
            .push(Registration { conn_id, tx });
        debug!(user_id, conn_id, "registered connection");
        (conn_id, rx)
    }

    /// Remove a connection. Must run as soon as the socket closes so that
    /// fan-out stops issuing futile writes to it.
    pub fn unregister(&self, user_id: i64, conn_id: ConnId) {
        if let Some(mut conns) = self.connections.get_mut(&user_id) {
            conns.retain(|r| r.conn_id != conn_id);
        }
        self.connections.retain(|_, v| !v.is_empty());
        debug!(user_id, conn_id, "unregistered connection");
    }

    /// Send an event to every connection owned by `user_id`.
    ///
    /// Returns the number of connections the event was handed to. Zero means
    /// the user is offline; the caller decides whether that matters (for
    /// message delivery it does not, since history covers it).
    pub async fn send_to_user(&self, user_id: i64, event: ServerEvent) -> usize {
        let targets = self.senders_for(user_id);
        let mut delivered = 0;
        for (conn_id, tx) in targets {
            if tx.send(event.clone()).await.is_err() {
                warn!(user_id, conn_id, "dropping event for closed connection");
            } else {
                delivered += 1;
            }
        }
        delivered
    }

    /// Send an event to one specific connection (the ack path).
    pub async fn send_to_connection(&self, user_id: i64, conn_id: ConnId, event: ServerEvent) -> bool {
        let target = self.connections.get(&user_id).and_then(|conns| {
            conns
                .iter()
                .find(|r| r.conn_id == conn_id)
                .map(|r| r.tx.clone())
        });
        match target {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Send an event to every registered connection except the originating
    /// one. This is the legacy fan-out-to-all policy; targeted delivery via
    /// [`send_to_user`](Self::send_to_user) is the default.
    pub async fn broadcast_except(&self, origin: ConnId, event: ServerEvent) -> usize {
        let targets: Vec<(i64, ConnId, EventSender)> = self
            .connections
            .iter()
            .flat_map(|entry| {
                let user_id = *entry.key();
                entry
                    .value()
                    .iter()
                    .filter(|r| r.conn_id != origin)
                    .map(move |r| (user_id, r.conn_id, r.tx.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut delivered = 0;
        for (user_id, conn_id, tx) in targets {
            if tx.send(event.clone()).await.is_err() {
                warn!(user_id, conn_id, "dropping broadcast for closed connection");
            } else {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of users with at least one live connection.
    pub fn user_count(&self) -> usize {
        self.connections.len()
    }

    /// Total number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|e| e.value().len()).sum()
    }

    fn senders_for(&self, user_id: i64) -> Vec<(ConnId, EventSender)> {
        // Clone the senders out so the map shard is not held across await.
        self.connections
            .get(&user_id)
            .map(|conns| {
                conns
                    .iter()
                    .map(|r| (r.conn_id, r.tx.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for ChatHub {
    fn default() -> Self {
        Self::new()
    }
}
