//! Aurelay relay server library.
//!
//! Provides the core components of the chat relay: the connection registry,
//! the WebSocket relay handler, the message/user stores, and the HTTP API.

pub mod api;
pub mod config;
pub mod db;
pub mod store;
pub mod ws;
