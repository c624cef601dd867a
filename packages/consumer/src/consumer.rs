//! The consumer loop.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use chrono::Utc;
use rpc_core::{
    ConsumerConfig, ConsumerEvent, Envelope, MessageEncoder, MessageQueue, QueueDirectory,
    RpcError, TransactionalResource,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::executor::{ConsumerContext, MessageOutcome, TransactionalExecutor};

/// Tally of envelope outcomes for one `process` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub committed: u64,
    pub rejected: u64,
    pub redelivered: u64,
}

impl ProcessReport {
    pub fn record(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::Committed { .. } => self.committed += 1,
            MessageOutcome::Rejected => self.rejected += 1,
            MessageOutcome::Redeliver => self.redelivered += 1,
        }
    }

    /// Envelopes processed, whatever their outcome.
    pub fn total(&self) -> u64 {
        self.committed + self.rejected + self.redelivered
    }
}

/// Consumes RPC requests from one queue.
pub struct Consumer<Q, D, E, T> {
    name: String,
    queue: Q,
    executor: TransactionalExecutor<D, E, T>,
    poll_interval: Duration,
    max_idle: Option<Duration>,
}

impl<Q, D, E, T> Consumer<Q, D, E, T>
where
    Q: MessageQueue,
    D: QueueDirectory,
    E: MessageEncoder,
    T: TransactionalResource,
{
    pub fn new(config: &ConsumerConfig, queue: Q, context: ConsumerContext<D, E, T>) -> Self {
        Self {
            name: config.name.clone(),
            queue,
            executor: TransactionalExecutor::new(context, config),
            poll_interval: config.poll_interval(),
            max_idle: config.max_idle(),
        }
    }

    /// Broadcast consumer and message events on `tx`.
    pub fn with_events(mut self, tx: broadcast::Sender<ConsumerEvent>) -> Self {
        self.executor = self.executor.with_events(tx);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Process envelopes from the queue.
    ///
    /// With no bound, subscribes and processes every delivery until the
    /// subscription closes. With a bound of `n`, dequeues until `n` envelopes
    /// were processed, waiting between empty polls, or until the queue stayed
    /// empty for the configured idle limit.
    ///
    /// Per-envelope failures never surface here; only failing to start
    /// consuming does.
    pub async fn process(&self, max_messages: Option<NonZeroU32>) -> Result<ProcessReport, RpcError> {
        tracing::info!(
            consumer = %self.name,
            queue = self.queue.name(),
            max_messages = max_messages.map(NonZeroU32::get),
            "Starting consumer"
        );
        self.emit(ConsumerEvent::ConsumerStarted {
            consumer: self.name.clone(),
            queue: self.queue.name().to_string(),
            timestamp: Utc::now(),
        });

        let result = match max_messages {
            None => self.consume_subscription().await,
            Some(limit) => Ok(self.consume_bounded(limit).await),
        };

        match &result {
            Ok(report) => tracing::info!(
                consumer = %self.name,
                committed = report.committed,
                rejected = report.rejected,
                redelivered = report.redelivered,
                "Consumer stopped"
            ),
            Err(e) => tracing::error!(consumer = %self.name, error = %e, "Consumer failed to start"),
        }
        self.emit(ConsumerEvent::ConsumerStopped {
            consumer: self.name.clone(),
            queue: self.queue.name().to_string(),
            timestamp: Utc::now(),
        });

        result
    }

    /// Process a single envelope delivered from this consumer's queue.
    pub async fn consume(&self, envelope: &Envelope) -> MessageOutcome {
        self.executor.execute(&self.queue, envelope).await
    }

    async fn consume_subscription(&self) -> Result<ProcessReport, RpcError> {
        let mut subscription = self.queue.subscribe().await?;
        let mut report = ProcessReport::default();

        while let Some(envelope) = subscription.recv().await {
            report.record(self.consume(&envelope).await);
        }

        tracing::debug!(queue = subscription.queue(), "Subscription closed");
        Ok(report)
    }

    async fn consume_bounded(&self, limit: NonZeroU32) -> ProcessReport {
        let mut report = ProcessReport::default();
        let mut idle_since = Instant::now();

        while report.total() < u64::from(limit.get()) {
            match self.queue.dequeue().await {
                Ok(Some(envelope)) => {
                    report.record(self.consume(&envelope).await);
                    idle_since = Instant::now();
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(queue = self.queue.name(), error = %e, "Dequeue failed");
                }
            }

            if let Some(max_idle) = self.max_idle
                && idle_since.elapsed() >= max_idle
            {
                tracing::debug!(queue = self.queue.name(), "Queue idle, stopping early");
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        report
    }

    pub(crate) fn emit(&self, event: ConsumerEvent) {
        if let Some(tx) = self.executor.events() {
            let _ = tx.send(event);
        }
    }
}
