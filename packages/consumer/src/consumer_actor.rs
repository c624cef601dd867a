//! Consumer actor hosting a subscription-mode consumer.

use std::marker::PhantomData;

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use rpc_core::{
    ConsumerEvent, MessageEncoder, MessageQueue, QueueDirectory, TransactionalResource,
};
use tokio::task::JoinHandle;

use crate::consumer::{Consumer, ProcessReport};
use crate::messages::ConsumerMessage;

/// State for the consumer actor.
pub struct ConsumerActorState<Q, D, E, T> {
    consumer: Consumer<Q, D, E, T>,
    /// Outcomes of the envelopes processed so far.
    pub report: ProcessReport,
    forwarder: Option<JoinHandle<()>>,
}

/// Actor that consumes a queue subscription one envelope at a time.
///
/// Deliveries go through the actor mailbox, so a shutdown request is only
/// handled between envelopes. Deliveries still queued in the mailbox at that
/// point stay unacknowledged and are redelivered by the queue.
pub struct ConsumerActor<Q, D, E, T> {
    _marker: PhantomData<fn() -> (Q, D, E, T)>,
}

impl<Q, D, E, T> ConsumerActor<Q, D, E, T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Q, D, E, T> Default for ConsumerActor<Q, D, E, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q, D, E, T> Actor for ConsumerActor<Q, D, E, T>
where
    Q: MessageQueue,
    D: QueueDirectory,
    E: MessageEncoder,
    T: TransactionalResource,
{
    type Msg = ConsumerMessage;
    type State = ConsumerActorState<Q, D, E, T>;
    type Arguments = Consumer<Q, D, E, T>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting consumer: {} on {}", args.name(), args.queue().name());

        let mut subscription = args.queue().subscribe().await.map_err(|e| {
            ActorProcessingErr::from(format!("Failed to subscribe to {}: {}", args.queue().name(), e))
        })?;

        // Forward deliveries into the mailbox
        let myself_clone = myself.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                let delivery = ConsumerMessage::Deliver {
                    envelope: Box::new(envelope),
                };
                if myself_clone.send_message(delivery).is_err() {
                    return;
                }
            }
            let _ = myself_clone.send_message(ConsumerMessage::SubscriptionClosed);
        });

        args.emit(ConsumerEvent::ConsumerStarted {
            consumer: args.name().to_string(),
            queue: args.queue().name().to_string(),
            timestamp: Utc::now(),
        });

        Ok(ConsumerActorState {
            consumer: args,
            report: ProcessReport::default(),
            forwarder: Some(forwarder),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ConsumerMessage::Deliver { envelope } => {
                let outcome = state.consumer.consume(&envelope).await;
                state.report.record(outcome);
            }

            ConsumerMessage::SubscriptionClosed => {
                tracing::info!("Subscription of {} closed", state.consumer.name());
                myself.stop(None);
            }

            ConsumerMessage::GetReport { reply } => {
                let _ = reply.send(state.report);
            }

            ConsumerMessage::Shutdown => {
                tracing::info!("Shutting down consumer: {}", state.consumer.name());
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(forwarder) = state.forwarder.take() {
            forwarder.abort();
        }

        let report = state.report;
        tracing::info!(
            consumer = %state.consumer.name(),
            committed = report.committed,
            rejected = report.rejected,
            redelivered = report.redelivered,
            "Consumer stopped"
        );
        state.consumer.emit(ConsumerEvent::ConsumerStopped {
            consumer: state.consumer.name().to_string(),
            queue: state.consumer.queue().name().to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

/// Spawn a consumer actor subscribed to the consumer's queue.
pub async fn start_consumer<Q, D, E, T>(
    consumer: Consumer<Q, D, E, T>,
) -> Result<(ActorRef<ConsumerMessage>, JoinHandle<()>), ractor::SpawnErr>
where
    Q: MessageQueue,
    D: QueueDirectory,
    E: MessageEncoder,
    T: TransactionalResource,
{
    Actor::spawn(None, ConsumerActor::new(), consumer).await
}
