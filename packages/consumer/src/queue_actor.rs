//! Queue actor for a single in-process queue.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use ractor::{Actor, ActorProcessingErr, ActorRef};
use rpc_core::{Envelope, EnvelopeId, QueueConfig, QueueStats};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::broker::QueueAddress;
use crate::messages::QueueMessage;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// An envelope the queue gave up on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub envelope: Envelope,
    pub reason: String,
    pub deliveries: u32,
}

#[derive(Debug)]
struct Queued {
    envelope: Envelope,
    deliveries: u32,
}

#[derive(Debug)]
struct InFlight {
    envelope: Envelope,
    deliveries: u32,
    delivered_at: Instant,
}

/// State for the queue actor.
pub struct QueueActorState {
    /// Where the queue lives.
    pub address: QueueAddress,
    config: QueueConfig,
    /// Envelopes waiting for delivery, oldest first.
    pending: VecDeque<Queued>,
    /// Delivered envelopes awaiting acknowledge or reject.
    in_flight: HashMap<EnvelopeId, InFlight>,
    /// Push subscriptions, served round robin.
    subscribers: Vec<mpsc::Sender<Envelope>>,
    next_subscriber: usize,
    dead_letters: Vec<DeadLetter>,
    stats: QueueStats,
}

impl QueueActorState {
    /// Create a new queue actor state.
    pub fn new(address: QueueAddress, config: QueueConfig) -> Self {
        Self {
            address,
            config,
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            subscribers: Vec::new(),
            next_subscriber: 0,
            dead_letters: Vec::new(),
            stats: QueueStats::default(),
        }
    }

    fn prefetch(&self) -> usize {
        self.config.prefetch.max(1)
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending.len() as u64,
            in_flight: self.in_flight.len() as u64,
            ..self.stats.clone()
        }
    }

    fn take_in_flight(&mut self, queued: Queued) -> Envelope {
        let deliveries = queued.deliveries + 1;
        self.in_flight.insert(
            queued.envelope.id(),
            InFlight {
                envelope: queued.envelope.clone(),
                deliveries,
                delivered_at: Instant::now(),
            },
        );
        queued.envelope
    }

    /// Push pending envelopes to subscribers while the prefetch window allows.
    fn deliver(&mut self) {
        while self.in_flight.len() < self.prefetch() && !self.subscribers.is_empty() {
            let Some(queued) = self.pending.pop_front() else {
                break;
            };
            if self.offer(&queued.envelope) {
                self.take_in_flight(queued);
            } else {
                self.pending.push_front(queued);
                break;
            }
        }
    }

    /// Hand `envelope` to the next subscriber with room, dropping closed ones.
    fn offer(&mut self, envelope: &Envelope) -> bool {
        let mut tried = 0;
        while tried < self.subscribers.len() {
            let index = self.next_subscriber % self.subscribers.len();
            match self.subscribers[index].try_send(envelope.clone()) {
                Ok(()) => {
                    self.next_subscriber = index + 1;
                    return true;
                }
                Err(TrySendError::Full(_)) => {
                    self.next_subscriber = index + 1;
                    tried += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(queue = %self.address, "Dropping closed subscription");
                    self.subscribers.remove(index);
                }
            }
        }
        false
    }

    /// Return in-flight envelopes to the front of the queue, oldest delivery
    /// first. Envelopes past `max_deliveries` are dead-lettered instead.
    fn redeliver(&mut self, mut ids: Vec<EnvelopeId>) -> usize {
        ids.sort_by_key(|id| {
            self.in_flight
                .get(id)
                .map(|entry| entry.delivered_at)
                .unwrap_or_else(Instant::now)
        });

        let mut count = 0;
        for id in ids.into_iter().rev() {
            let Some(entry) = self.in_flight.remove(&id) else {
                continue;
            };
            count += 1;

            if let Some(max) = self.config.max_deliveries
                && entry.deliveries >= max
            {
                tracing::warn!(
                    queue = %self.address,
                    envelope_id = %id,
                    deliveries = entry.deliveries,
                    "Dead-lettering envelope after too many deliveries"
                );
                self.stats.rejected += 1;
                self.dead_letters.push(DeadLetter {
                    envelope: entry.envelope,
                    reason: format!("Exceeded {} deliveries", max),
                    deliveries: entry.deliveries,
                });
                continue;
            }

            self.stats.redelivered += 1;
            self.pending.push_front(Queued {
                envelope: entry.envelope,
                deliveries: entry.deliveries,
            });
        }
        count
    }

    fn expired(&self) -> Vec<EnvelopeId> {
        let timeout = self.config.visibility_timeout();
        self.in_flight
            .iter()
            .filter(|(_, entry)| entry.delivered_at.elapsed() >= timeout)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Queue actor that manages a single queue.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorState;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue actor: {}", args.address);

        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                if myself_clone.send_message(QueueMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Publish { envelope, reply } => {
                if let Some(max_size) = state.config.max_queue_size
                    && state.pending.len() >= max_size
                {
                    let _ = reply.send(Err("Queue is full".into()));
                    return Ok(());
                }

                state.pending.push_back(Queued {
                    envelope: *envelope,
                    deliveries: 0,
                });
                state.deliver();

                let _ = reply.send(Ok(()));
            }

            QueueMessage::Subscribe { reply } => {
                let (tx, rx) = mpsc::channel(state.prefetch());
                state.subscribers.push(tx);
                tracing::debug!(
                    queue = %state.address,
                    subscribers = state.subscribers.len(),
                    "Subscription opened"
                );
                let _ = reply.send(rx);
                state.deliver();
            }

            QueueMessage::Dequeue { reply } => {
                let envelope = state
                    .pending
                    .pop_front()
                    .map(|queued| state.take_in_flight(queued));
                let _ = reply.send(envelope);
            }

            QueueMessage::Acknowledge { envelope_id, reply } => {
                if state.in_flight.remove(&envelope_id).is_some() {
                    state.stats.acknowledged += 1;
                    state.deliver();
                    let _ = reply.send(Ok(()));
                } else {
                    let _ = reply.send(Err(format!("Envelope {} is not in flight", envelope_id)));
                }
            }

            QueueMessage::Reject {
                envelope_id,
                reason,
                reply,
            } => {
                if let Some(entry) = state.in_flight.remove(&envelope_id) {
                    state.stats.rejected += 1;
                    state.dead_letters.push(DeadLetter {
                        envelope: entry.envelope,
                        reason,
                        deliveries: entry.deliveries,
                    });
                    state.deliver();
                    let _ = reply.send(Ok(()));
                } else {
                    let _ = reply.send(Err(format!("Envelope {} is not in flight", envelope_id)));
                }
            }

            QueueMessage::Recover { reply } => {
                let ids = state.in_flight.keys().copied().collect();
                let count = state.redeliver(ids);
                state.deliver();
                let _ = reply.send(count);
            }

            QueueMessage::GetStats { reply } => {
                let _ = reply.send(state.stats());
            }

            QueueMessage::GetDeadLetters { reply } => {
                let _ = reply.send(state.dead_letters.clone());
            }

            QueueMessage::Shutdown => {
                tracing::info!("Shutting down queue: {}", state.address);
                state.subscribers.clear();
                myself.stop(None);
                return Ok(());
            }

            QueueMessage::Tick => {
                let expired = state.expired();
                if !expired.is_empty() {
                    let count = state.redeliver(expired);
                    tracing::info!(queue = %state.address, count, "Visibility timeout expired");
                    state.deliver();
                }
            }
        }

        Ok(())
    }
}
