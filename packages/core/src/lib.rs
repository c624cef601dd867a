//! Core domain types for the transactional RPC consumer.
//!
//! This crate contains shared types used across all packages:
//! - Envelope and its routing properties
//! - Consumer and topic configuration
//! - The collaborator traits the consumer is written against
//! - Staged unit-of-work bookkeeping for transactional resources
//! - Errors, failure classes and events for real-time updates

mod config;
mod contracts;
mod encoder;
mod envelope;
mod error;
mod events;
mod queue;
mod staging;

pub use config::{ConsumerConfig, SchemaKind, TopicConfig};
pub use contracts::{MessageQueue, QueueDirectory, Subscription, TransactionalResource};
pub use encoder::{JsonEncoder, MessageEncoder};
pub use envelope::{Envelope, EnvelopeId, properties};
pub use error::{ConfigError, FailureClass, RpcError};
pub use events::ConsumerEvent;
pub use queue::{QueueConfig, QueueStats};
pub use staging::StagedUnit;
