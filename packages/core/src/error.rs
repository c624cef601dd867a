//! Error types and failure classification.

use thiserror::Error;

/// How the transactional executor recovers from a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient infrastructure failure. Roll back and leave the message for
    /// the broker to redeliver.
    ConnectionLost,
    /// Anything else. Roll back and explicitly reject the message.
    Other,
}

/// Errors raised while processing an RPC message.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("No reply message resulted in RPC for topic '{topic}'")]
    NoReply { topic: String },

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Missing envelope property '{0}'")]
    MissingProperty(&'static str),

    #[error("No handler configured for topic '{0}'")]
    UnknownTopic(String),

    #[error("Failed to decode message for topic '{topic}': {message}")]
    Decode { topic: String, message: String },

    #[error("Failed to encode reply for topic '{topic}': {message}")]
    Encode { topic: String, message: String },

    #[error("Handler '{handler}' failed: {message}")]
    Handler { handler: String, message: String },

    #[error("Handler '{handler}' timed out after {timeout_secs}s")]
    HandlerTimeout { handler: String, timeout_secs: u64 },

    #[error("Queue not found: {connection}/{queue}")]
    QueueNotFound { connection: String, queue: String },

    #[error("Queue '{queue}' {operation} failed: {message}")]
    Queue {
        queue: String,
        operation: &'static str,
        message: String,
    },

    #[error("Transaction error: {0}")]
    Transaction(String),
}

impl RpcError {
    /// Classify this error for the executor's recovery policy.
    pub fn class(&self) -> FailureClass {
        match self {
            RpcError::ConnectionLost(_) => FailureClass::ConnectionLost,
            _ => FailureClass::Other,
        }
    }

    /// Shorthand for a failed queue operation.
    pub fn queue(queue: impl Into<String>, operation: &'static str, message: impl Into<String>) -> Self {
        RpcError::Queue {
            queue: queue.into(),
            operation,
            message: message.into(),
        }
    }
}

/// Errors raised while loading or validating consumer configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Handler '{handler}' for topic '{topic}' is not registered")]
    UnknownHandler { topic: String, handler: String },
}
