//! Repository implementations for database operations.

mod message_repo;

pub use message_repo::{MESSAGE_TABLE, MessageRepository, MessageStatus, StoredMessage};
