//! Event types for real-time updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EnvelopeId;

/// Events emitted by a consumer while it processes messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConsumerEvent {
    // Consumer events
    /// A consumer started processing a queue.
    ConsumerStarted {
        consumer: String,
        queue: String,
        timestamp: DateTime<Utc>,
    },
    /// A consumer stopped processing a queue.
    ConsumerStopped {
        consumer: String,
        queue: String,
        timestamp: DateTime<Utc>,
    },

    // Message events
    /// A message was delivered to the consumer.
    MessageReceived {
        envelope_id: EnvelopeId,
        topic: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A reply was published for a message.
    ReplyPublished {
        envelope_id: EnvelopeId,
        reply_to: String,
        timestamp: DateTime<Utc>,
    },
    /// A message was acknowledged and its transaction committed.
    MessageCommitted {
        envelope_id: EnvelopeId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A message's transaction rolled back after a lost connection.
    /// The message is left for redelivery.
    MessageRolledBack {
        envelope_id: EnvelopeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A message's transaction rolled back and the message was rejected.
    MessageRejected {
        envelope_id: EnvelopeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ConsumerEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ConsumerEvent::ConsumerStarted { timestamp, .. } => *timestamp,
            ConsumerEvent::ConsumerStopped { timestamp, .. } => *timestamp,
            ConsumerEvent::MessageReceived { timestamp, .. } => *timestamp,
            ConsumerEvent::ReplyPublished { timestamp, .. } => *timestamp,
            ConsumerEvent::MessageCommitted { timestamp, .. } => *timestamp,
            ConsumerEvent::MessageRolledBack { timestamp, .. } => *timestamp,
            ConsumerEvent::MessageRejected { timestamp, .. } => *timestamp,
        }
    }

    /// Get the envelope ID associated with this event, if any.
    pub fn envelope_id(&self) -> Option<EnvelopeId> {
        match self {
            ConsumerEvent::MessageReceived { envelope_id, .. } => Some(*envelope_id),
            ConsumerEvent::ReplyPublished { envelope_id, .. } => Some(*envelope_id),
            ConsumerEvent::MessageCommitted { envelope_id, .. } => Some(*envelope_id),
            ConsumerEvent::MessageRolledBack { envelope_id, .. } => Some(*envelope_id),
            ConsumerEvent::MessageRejected { envelope_id, .. } => Some(*envelope_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            ConsumerEvent::ConsumerStarted {
                consumer, queue, ..
            } => format!("Consumer {} started on {}", consumer, queue),
            ConsumerEvent::ConsumerStopped {
                consumer, queue, ..
            } => format!("Consumer {} stopped on {}", consumer, queue),
            ConsumerEvent::MessageReceived {
                envelope_id, topic, ..
            } => {
                let topic = topic.as_deref().unwrap_or("unknown topic");
                format!("Message {} received ({})", envelope_id, topic)
            }
            ConsumerEvent::ReplyPublished {
                envelope_id,
                reply_to,
                ..
            } => format!("Reply to {} published on {}", envelope_id, reply_to),
            ConsumerEvent::MessageCommitted {
                envelope_id,
                duration_ms,
                ..
            } => format!("Message {} committed in {}ms", envelope_id, duration_ms),
            ConsumerEvent::MessageRolledBack {
                envelope_id, error, ..
            } => format!("Message {} rolled back for redelivery: {}", envelope_id, error),
            ConsumerEvent::MessageRejected {
                envelope_id, error, ..
            } => format!("Message {} rejected: {}", envelope_id, error),
        }
    }
}
