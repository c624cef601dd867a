//! Message types for actor communication.

use ractor::{ActorRef, RpcReplyPort};
use rpc_core::{Envelope, EnvelopeId, QueueConfig, QueueStats};
use tokio::sync::mpsc;

use crate::broker::QueueAddress;
use crate::consumer::ProcessReport;
use crate::queue_actor::DeadLetter;

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Append an envelope to the queue.
    Publish {
        envelope: Box<Envelope>,
        reply: RpcReplyPort<Result<(), String>>,
    },

    /// Open a push subscription. The queue keeps the sending half.
    Subscribe {
        reply: RpcReplyPort<mpsc::Receiver<Envelope>>,
    },

    /// Take the next pending envelope.
    Dequeue { reply: RpcReplyPort<Option<Envelope>> },

    /// Settle an in-flight envelope as processed.
    Acknowledge {
        envelope_id: EnvelopeId,
        reply: RpcReplyPort<Result<(), String>>,
    },

    /// Settle an in-flight envelope as failed.
    Reject {
        envelope_id: EnvelopeId,
        reason: String,
        reply: RpcReplyPort<Result<(), String>>,
    },

    /// Return every in-flight envelope to the queue now.
    Recover { reply: RpcReplyPort<usize> },

    /// Get queue stats.
    GetStats { reply: RpcReplyPort<QueueStats> },

    /// Get rejected and expired envelopes.
    GetDeadLetters { reply: RpcReplyPort<Vec<DeadLetter>> },

    /// Shutdown the queue, closing its subscriptions.
    Shutdown,

    /// Periodic tick for visibility timeouts.
    Tick,
}

/// Messages for the Broker.
#[derive(Debug)]
pub enum BrokerMessage {
    /// Declare a queue, creating it unless it already exists.
    DeclareQueue {
        address: QueueAddress,
        config: QueueConfig,
        reply: RpcReplyPort<Result<ActorRef<QueueMessage>, String>>,
    },

    /// Look up a declared queue.
    GetQueue {
        address: QueueAddress,
        reply: RpcReplyPort<Option<ActorRef<QueueMessage>>>,
    },

    /// List all declared queues.
    ListQueues { reply: RpcReplyPort<Vec<QueueAddress>> },

    /// Shutdown all queues.
    Shutdown,
}

/// Messages for the ConsumerActor.
#[derive(Debug)]
pub enum ConsumerMessage {
    /// Process a delivered envelope.
    Deliver { envelope: Box<Envelope> },

    /// The queue closed the subscription.
    SubscriptionClosed,

    /// Get the outcomes so far.
    GetReport { reply: RpcReplyPort<ProcessReport> },

    /// Stop after the envelope in progress.
    Shutdown,
}
