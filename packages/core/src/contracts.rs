//! Collaborator traits the consumer is written against.
//!
//! Transports, transaction managers and queue directories implement these.
//! Methods return `Send` futures so consumers can run inside actors and
//! spawned tasks.

use std::future::Future;

use tokio::sync::mpsc;

use crate::{Envelope, RpcError};

/// Delivery of envelopes from a queue.
///
/// Ends when the queue side drops its sender. A subscription created with
/// [`on_demand`](Self::on_demand) asks the queue for each envelope from
/// `recv`, so the queue never hands out more than the subscriber takes.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    inbox: mpsc::Receiver<Envelope>,
    demand: Option<mpsc::Sender<()>>,
}

impl Subscription {
    /// Wrap the receiving end of a push delivery channel.
    pub fn new(queue: impl Into<String>, inbox: mpsc::Receiver<Envelope>) -> Self {
        Self {
            queue: queue.into(),
            inbox,
            demand: None,
        }
    }

    /// Wrap a delivery channel fed one envelope per request on `demand`.
    pub fn on_demand(
        queue: impl Into<String>,
        inbox: mpsc::Receiver<Envelope>,
        demand: mpsc::Sender<()>,
    ) -> Self {
        Self {
            queue: queue.into(),
            inbox,
            demand: Some(demand),
        }
    }

    /// Name of the subscribed queue.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Wait for the next delivery.
    pub async fn recv(&mut self) -> Option<Envelope> {
        if let Some(demand) = &self.demand {
            // A request left over from a cancelled recv still stands.
            let _ = demand.try_send(());
        }
        self.inbox.recv().await
    }
}

/// A queue envelopes are delivered from and replies are pushed to.
pub trait MessageQueue: Send + Sync + 'static {
    /// Queue name.
    fn name(&self) -> &str;

    /// Start delivering envelopes to a subscription.
    fn subscribe(&self) -> impl Future<Output = Result<Subscription, RpcError>> + Send;

    /// Take the next envelope, if one is waiting.
    fn dequeue(&self) -> impl Future<Output = Result<Option<Envelope>, RpcError>> + Send;

    /// Publish the reply to `request` carrying `reply_body`.
    fn push(
        &self,
        request: &Envelope,
        reply_body: Vec<u8>,
    ) -> impl Future<Output = Result<(), RpcError>> + Send;

    /// Mark a delivered envelope as processed.
    fn acknowledge(&self, envelope: &Envelope) -> impl Future<Output = Result<(), RpcError>> + Send;

    /// Mark a delivered envelope as failed, handing it to the queue's
    /// dead-letter policy.
    fn reject(
        &self,
        envelope: &Envelope,
        reason: &str,
    ) -> impl Future<Output = Result<(), RpcError>> + Send;
}

/// Resolves queues by connection and name.
pub trait QueueDirectory: Send + Sync + 'static {
    type Queue: MessageQueue;

    fn resolve(
        &self,
        connection: &str,
        queue: &str,
    ) -> impl Future<Output = Result<Self::Queue, RpcError>> + Send;
}

/// Begin/commit/rollback capability of the underlying resource.
pub trait TransactionalResource: Send + Sync + 'static {
    fn begin(&self) -> impl Future<Output = Result<(), RpcError>> + Send;

    fn commit(&self) -> impl Future<Output = Result<(), RpcError>> + Send;

    fn rollback(&self) -> impl Future<Output = Result<(), RpcError>> + Send;
}
