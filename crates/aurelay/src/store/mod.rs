//! Durable storage for the relay: users and the append-only message log.

mod messages;
mod models;
mod users;

pub use messages::MessageRepository;
pub use models::User;
pub use users::UserRepository;
