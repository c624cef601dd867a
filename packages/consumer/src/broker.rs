//! In-process broker actor owning the queue actors.

use std::collections::HashMap;
use std::fmt;

use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use rpc_core::{QueueConfig, QueueDirectory, RpcError};
use serde::{Deserialize, Serialize};

use crate::broker_transaction::BrokerTransaction;
use crate::memory_queue::{MemoryQueue, call};
use crate::messages::{BrokerMessage, QueueMessage};
use crate::queue_actor::{QueueActor, QueueActorState};

/// A queue's connection and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueAddress {
    pub connection: String,
    pub name: String,
}

impl QueueAddress {
    pub fn new(connection: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for QueueAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection, self.name)
    }
}

/// State for the broker actor.
#[derive(Default)]
pub struct BrokerState {
    /// All queue actors by address.
    pub queues: HashMap<QueueAddress, ActorRef<QueueMessage>>,
}

/// Broker actor that manages all queues.
pub struct Broker;

impl Actor for Broker {
    type Msg = BrokerMessage;
    type State = BrokerState;
    type Arguments = ();

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        _args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting broker");
        Ok(BrokerState::default())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            BrokerMessage::DeclareQueue {
                address,
                config,
                reply,
            } => {
                if let Some(existing) = state.queues.get(&address) {
                    let _ = reply.send(Ok(existing.clone()));
                    return Ok(());
                }

                let queue_state = QueueActorState::new(address.clone(), config);
                match Actor::spawn_linked(None, QueueActor, queue_state, myself.get_cell()).await {
                    Ok((actor, _handle)) => {
                        state.queues.insert(address, actor.clone());
                        let _ = reply.send(Ok(actor));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(format!("Failed to spawn queue {}: {}", address, e)));
                    }
                }
            }

            BrokerMessage::GetQueue { address, reply } => {
                let _ = reply.send(state.queues.get(&address).cloned());
            }

            BrokerMessage::ListQueues { reply } => {
                let mut addresses: Vec<_> = state.queues.keys().cloned().collect();
                addresses.sort();
                let _ = reply.send(addresses);
            }

            BrokerMessage::Shutdown => {
                tracing::info!("Shutting down broker");
                for queue_ref in state.queues.values() {
                    let _ = queue_ref.send_message(QueueMessage::Shutdown);
                }
                myself.stop(None);
                return Ok(());
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                state.queues.retain(|address, actor| {
                    if actor.get_id() == cell.get_id() {
                        tracing::debug!("Queue {} terminated: {:?}", address, reason);
                        false
                    } else {
                        true
                    }
                });
            }
            SupervisionEvent::ActorFailed(cell, error) => {
                state.queues.retain(|address, actor| {
                    if actor.get_id() == cell.get_id() {
                        tracing::error!("Queue {} failed: {}", address, error);
                        false
                    } else {
                        true
                    }
                });
            }
            _ => {}
        }
        Ok(())
    }
}

/// Handle to a running broker.
///
/// Cheap to clone. Resolves queues for the consumer's reply router; queues
/// handed out by a handle bound with [`with_transaction`](Self::with_transaction)
/// write through that transaction.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    actor: ActorRef<BrokerMessage>,
    unit: Option<BrokerTransaction>,
}

impl BrokerHandle {
    /// Spawn a broker actor.
    pub async fn start() -> Result<(Self, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
        let (actor, handle) = Actor::spawn(None, Broker, ()).await?;
        Ok((Self { actor, unit: None }, handle))
    }

    /// This handle, binding the queues it hands out to `transaction`.
    pub fn with_transaction(mut self, transaction: &BrokerTransaction) -> Self {
        self.unit = Some(transaction.clone());
        self
    }

    fn bind(&self, queue: MemoryQueue) -> MemoryQueue {
        match &self.unit {
            Some(unit) => queue.with_transaction(unit),
            None => queue,
        }
    }

    /// Declare a queue with the given configuration.
    ///
    /// Declaring an existing queue returns it unchanged.
    pub async fn declare_queue(
        &self,
        connection: &str,
        name: &str,
        config: QueueConfig,
    ) -> Result<MemoryQueue, RpcError> {
        let address = QueueAddress::new(connection, name);
        let actor = call(&self.actor, "broker", |reply| BrokerMessage::DeclareQueue {
            address: address.clone(),
            config,
            reply,
        })
        .await?
        .map_err(|e| RpcError::queue(name, "declare", e))?;

        Ok(self.bind(MemoryQueue::new(address, actor)))
    }

    /// The declared queue `name` on `connection`.
    pub async fn queue(&self, connection: &str, name: &str) -> Result<MemoryQueue, RpcError> {
        let address = QueueAddress::new(connection, name);
        let actor = call(&self.actor, "broker", |reply| BrokerMessage::GetQueue {
            address: address.clone(),
            reply,
        })
        .await?
        .ok_or_else(|| RpcError::QueueNotFound {
            connection: connection.to_string(),
            queue: name.to_string(),
        })?;

        Ok(self.bind(MemoryQueue::new(address, actor)))
    }

    /// Addresses of all declared queues, sorted.
    pub async fn list_queues(&self) -> Result<Vec<QueueAddress>, RpcError> {
        call(&self.actor, "broker", |reply| BrokerMessage::ListQueues { reply }).await
    }

    /// Stop the broker and every queue it owns.
    pub fn shutdown(&self) {
        let _ = self.actor.send_message(BrokerMessage::Shutdown);
    }
}

impl QueueDirectory for BrokerHandle {
    type Queue = MemoryQueue;

    async fn resolve(&self, connection: &str, queue: &str) -> Result<MemoryQueue, RpcError> {
        self.queue(connection, queue).await
    }
}
