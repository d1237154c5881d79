//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{DeliveryMode, RelayConfig};
use crate::db::Database;
use crate::store::{MessageRepository, UserRepository};
use crate::ws::ChatHub;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Append-only message store.
    pub messages: MessageRepository,
    /// User/contact store.
    pub users: UserRepository,
    /// Connection registry for live delivery.
    pub hub: Arc<ChatHub>,
    /// Fan-out policy for relayed messages.
    pub delivery_mode: DeliveryMode,
    /// Keepalive ping interval for client sockets.
    pub ping_interval: Duration,
}

impl AppState {
    /// Create new application state.
    pub fn new(db: &Database, config: &RelayConfig) -> Self {
        Self {
            messages: MessageRepository::new(db.pool().clone()),
            users: UserRepository::new(db.pool().clone()),
            hub: Arc::new(ChatHub::new()),
            delivery_mode: config.delivery_mode,
            ping_interval: Duration::from_secs(config.ping_interval_secs),
        }
    }
}
