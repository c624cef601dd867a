//! Durable queues stored in SurrealDB.

use std::time::Duration;

use rpc_core::{Envelope, MessageQueue, QueueDirectory, RpcError, Subscription};
use tokio::sync::mpsc::{self, error::SendError};

use crate::DbError;
use crate::repositories::MessageRepository;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// A queue whose messages live in the `queue_message` table.
///
/// Reply pushes and acknowledges are written through the shared unit of
/// work: issued inside an open transaction they only take effect on commit.
/// Claimed messages left unsettled for longer than the visibility timeout
/// are handed out again.
#[derive(Debug, Clone)]
pub struct DbQueue {
    name: String,
    repo: MessageRepository,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

impl DbQueue {
    pub fn new(name: impl Into<String>, repo: MessageRepository) -> Self {
        Self {
            name: name.into(),
            repo,
            poll_interval: DEFAULT_POLL_INTERVAL,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    /// Set how often a subscription polls for new messages.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set how long a claimed message may stay unsettled before it is
    /// redelivered.
    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    /// Publish a request onto this queue.
    pub async fn publish(&self, envelope: &Envelope) -> Result<(), RpcError> {
        self.repo
            .publish(&self.name, envelope)
            .await
            .map_err(|e| self.error("publish", e))
    }

    /// Requeue expired claims, then claim the oldest pending message.
    async fn claim(&self) -> Result<Option<Envelope>, RpcError> {
        self.repo
            .requeue_stale(&self.name, self.visibility_timeout)
            .await
            .map_err(|e| self.error("requeue", e))?;

        let claimed = self
            .repo
            .claim_next(&self.name)
            .await
            .map_err(|e| self.error("dequeue", e))?;

        Ok(claimed.map(|message| {
            if message.delivery_count > 1 {
                tracing::debug!(
                    queue = %self.name,
                    envelope_id = %message.envelope.id(),
                    deliveries = message.delivery_count,
                    "Redelivering message"
                );
            }
            message.envelope
        }))
    }

    /// Poll until a message is claimed or the subscriber goes away.
    async fn next_claim(&self, subscriber: &mpsc::Sender<Envelope>) -> Option<Envelope> {
        while !subscriber.is_closed() {
            match self.claim().await {
                Ok(Some(envelope)) => return Some(envelope),
                Ok(None) => {}
                Err(e) => tracing::warn!(queue = %self.name, "Polling failed: {}", e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        None
    }

    fn error(&self, operation: &'static str, err: DbError) -> RpcError {
        match err {
            DbError::ConnectionLost(message) => RpcError::ConnectionLost(message),
            other => RpcError::queue(&self.name, operation, other.to_string()),
        }
    }
}

impl MessageQueue for DbQueue {
    fn name(&self) -> &str {
        &self.name
    }

    /// Claims a message only while the subscriber waits in `recv`, so a
    /// subscriber that stops never strands a claimed message.
    async fn subscribe(&self) -> Result<Subscription, RpcError> {
        let (tx, rx) = mpsc::channel(1);
        let (demand_tx, mut demand_rx) = mpsc::channel(1);
        let queue = self.clone();

        tokio::spawn(async move {
            while demand_rx.recv().await.is_some() {
                let Some(envelope) = queue.next_claim(&tx).await else {
                    break;
                };
                if let Err(SendError(envelope)) = tx.send(envelope).await {
                    if let Err(e) = queue.repo.release(envelope.id()).await {
                        tracing::warn!(queue = %queue.name, "Failed to release message: {}", e);
                    }
                    break;
                }
            }
            tracing::debug!(queue = %queue.name, "Subscription closed");
        });

        Ok(Subscription::on_demand(self.name.clone(), rx, demand_tx))
    }

    async fn dequeue(&self) -> Result<Option<Envelope>, RpcError> {
        self.claim().await
    }

    async fn push(&self, request: &Envelope, reply_body: Vec<u8>) -> Result<(), RpcError> {
        let reply = request.reply(reply_body);
        self.repo
            .enqueue(&self.name, &reply)
            .await
            .map_err(|e| self.error("push", e))
    }

    async fn acknowledge(&self, envelope: &Envelope) -> Result<(), RpcError> {
        self.repo
            .acknowledge(envelope)
            .await
            .map_err(|e| self.error("acknowledge", e))
    }

    async fn reject(&self, envelope: &Envelope, reason: &str) -> Result<(), RpcError> {
        self.repo
            .reject(envelope, reason)
            .await
            .map_err(|e| self.error("reject", e))
    }
}

/// Resolves durable queues on a single named connection.
#[derive(Debug, Clone)]
pub struct DbQueueDirectory {
    connection: String,
    repo: MessageRepository,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

impl DbQueueDirectory {
    pub fn new(connection: impl Into<String>, repo: MessageRepository) -> Self {
        Self {
            connection: connection.into(),
            repo,
            poll_interval: DEFAULT_POLL_INTERVAL,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    /// Set the poll interval of resolved queues.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the visibility timeout of resolved queues.
    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    /// The queue named `name` on this directory's connection.
    pub fn queue(&self, name: impl Into<String>) -> DbQueue {
        DbQueue::new(name, self.repo.clone())
            .with_poll_interval(self.poll_interval)
            .with_visibility_timeout(self.visibility_timeout)
    }
}

impl QueueDirectory for DbQueueDirectory {
    type Queue = DbQueue;

    async fn resolve(&self, connection: &str, queue: &str) -> Result<DbQueue, RpcError> {
        if connection != self.connection {
            return Err(RpcError::QueueNotFound {
                connection: connection.to_string(),
                queue: queue.to_string(),
            });
        }
        Ok(self.queue(queue))
    }
}
