//! WebSocket layer: connection registry and the relay socket handler.

pub mod handler;
pub mod hub;

pub use handler::ws_handler;
pub use hub::{ChatHub, ConnId};
