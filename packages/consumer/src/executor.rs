//! Transactional processing of a single envelope.
//!
//! Every delivered envelope runs through one [`UnitOfWork`]:
//!
//! 1. begin
//! 2. dispatch to the topic handler
//! 3. publish the reply
//! 4. acknowledge the envelope
//! 5. commit
//!
//! A lost connection at any step rolls back and leaves the envelope for the
//! broker to redeliver. Any other failure rolls back and rejects it.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rpc_core::{
    ConsumerConfig, ConsumerEvent, Envelope, FailureClass, MessageEncoder, MessageQueue,
    QueueDirectory, RpcError, TransactionalResource, properties,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::bindings::TopicBindings;
use crate::dispatcher::Dispatcher;
use crate::reply_router::ReplyRouter;
use crate::transaction::UnitOfWork;

/// Collaborators a consumer runs against.
pub struct ConsumerContext<D, E, T> {
    pub bindings: Arc<TopicBindings>,
    pub encoder: Arc<E>,
    pub directory: Arc<D>,
    pub resource: Arc<T>,
}

impl<D, E, T> ConsumerContext<D, E, T> {
    pub fn new(bindings: TopicBindings, encoder: E, directory: D, resource: T) -> Self {
        Self {
            bindings: Arc::new(bindings),
            encoder: Arc::new(encoder),
            directory: Arc::new(directory),
            resource: Arc::new(resource),
        }
    }
}

impl<D, E, T> Clone for ConsumerContext<D, E, T> {
    fn clone(&self) -> Self {
        Self {
            bindings: self.bindings.clone(),
            encoder: self.encoder.clone(),
            directory: self.directory.clone(),
            resource: self.resource.clone(),
        }
    }
}

/// How an envelope's processing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOutcome {
    /// Acknowledged and committed. `replied` is false when the body decoded
    /// to nothing and no reply was published.
    Committed { replied: bool },
    /// Rolled back after a lost connection; neither acknowledged nor rejected.
    Redeliver,
    /// Rolled back and rejected.
    Rejected,
}

/// Runs the per-envelope transaction state machine.
pub struct TransactionalExecutor<D, E, T> {
    dispatcher: Dispatcher<E>,
    router: ReplyRouter<D>,
    resource: Arc<T>,
    reply_on_empty_decode: bool,
    events: Option<broadcast::Sender<ConsumerEvent>>,
}

impl<D, E, T> TransactionalExecutor<D, E, T>
where
    D: QueueDirectory,
    E: MessageEncoder,
    T: TransactionalResource,
{
    pub fn new(context: ConsumerContext<D, E, T>, config: &ConsumerConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(
                context.bindings.clone(),
                context.encoder,
                config.handler_timeout(),
            ),
            router: ReplyRouter::new(context.bindings, context.directory),
            resource: context.resource,
            reply_on_empty_decode: config.reply_on_empty_decode,
            events: None,
        }
    }

    /// Broadcast processing events on `tx`.
    pub fn with_events(mut self, tx: broadcast::Sender<ConsumerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn events(&self) -> Option<&broadcast::Sender<ConsumerEvent>> {
        self.events.as_ref()
    }

    /// Process one envelope delivered from `queue`.
    ///
    /// Never fails: every error is resolved into redelivery or rejection.
    pub async fn execute<Q: MessageQueue>(&self, queue: &Q, envelope: &Envelope) -> MessageOutcome {
        let span = tracing::info_span!(
            "rpc_message",
            envelope_id = %envelope.id(),
            topic = envelope.property(properties::TOPIC_NAME).unwrap_or("-"),
            queue = queue.name(),
        );
        self.run(queue, envelope).instrument(span).await
    }

    async fn run<Q: MessageQueue>(&self, queue: &Q, envelope: &Envelope) -> MessageOutcome {
        let started = Instant::now();
        self.emit(ConsumerEvent::MessageReceived {
            envelope_id: envelope.id(),
            topic: envelope.property(properties::TOPIC_NAME).map(str::to_string),
            timestamp: Utc::now(),
        });

        let mut unit = UnitOfWork::new(self.resource.as_ref());
        match self.transact(&mut unit, queue, envelope).await {
            Ok(replied) => {
                let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                tracing::info!(replied, duration_ms, "Message committed");
                self.emit(ConsumerEvent::MessageCommitted {
                    envelope_id: envelope.id(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                MessageOutcome::Committed { replied }
            }
            Err(err) => self.recover(&mut unit, queue, envelope, err).await,
        }
    }

    /// The happy path. Returns whether a reply was published.
    async fn transact<Q: MessageQueue>(
        &self,
        unit: &mut UnitOfWork<'_, T>,
        queue: &Q,
        envelope: &Envelope,
    ) -> Result<bool, RpcError> {
        unit.begin().await?;

        let reply = match self.dispatcher.dispatch(envelope).await? {
            Some(body) => Some(body),
            None if self.reply_on_empty_decode => Some(Vec::new()),
            None => None,
        };

        let replied = match reply {
            Some(body) => {
                let reply_to = self.router.send_response(envelope, body).await?;
                self.emit(ConsumerEvent::ReplyPublished {
                    envelope_id: envelope.id(),
                    reply_to,
                    timestamp: Utc::now(),
                });
                true
            }
            None => false,
        };

        queue.acknowledge(envelope).await?;
        unit.commit().await?;
        Ok(replied)
    }

    async fn recover<Q: MessageQueue>(
        &self,
        unit: &mut UnitOfWork<'_, T>,
        queue: &Q,
        envelope: &Envelope,
        err: RpcError,
    ) -> MessageOutcome {
        if let Err(e) = unit.rollback().await {
            tracing::error!(error = %e, "Rollback failed");
        }

        match err.class() {
            FailureClass::ConnectionLost => {
                tracing::warn!(error = %err, "Connection lost, leaving message for redelivery");
                self.emit(ConsumerEvent::MessageRolledBack {
                    envelope_id: envelope.id(),
                    error: err.to_string(),
                    timestamp: Utc::now(),
                });
                MessageOutcome::Redeliver
            }
            FailureClass::Other => {
                let reason = err.to_string();
                tracing::warn!(error = %reason, "Rejecting message");
                if let Err(e) = queue.reject(envelope, &reason).await {
                    tracing::error!(error = %e, "Reject failed");
                }
                self.emit(ConsumerEvent::MessageRejected {
                    envelope_id: envelope.id(),
                    error: reason,
                    timestamp: Utc::now(),
                });
                MessageOutcome::Rejected
            }
        }
    }

    fn emit(&self, event: ConsumerEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event);
        }
    }
}
