//! Client-side chat session for the aurelay relay.
//!
//! A [`ChatSession`] owns one conversation's visible state across history
//! load, live receive, and local send: it fetches history over HTTP, keeps a
//! WebSocket open with reconnect/backoff, and reconciles optimistic local
//! entries against server-confirmed records in a [`ConversationView`].

pub mod history;
pub mod session;
pub mod view;

pub use history::{ApiClient, ClientError, Contact};
pub use session::{
    BackoffConfig, ChatSession, SessionConfig, SessionEvent, SessionHandle, SessionState,
};
pub use view::{ConversationView, DeliveryState, ViewMessage};
