//! `MessageQueue` handle over a queue actor.

use std::time::Duration;

use ractor::rpc::CallResult;
use ractor::{ActorRef, RpcReplyPort};
use rpc_core::{Envelope, EnvelopeId, MessageQueue, QueueStats, RpcError, Subscription};

use crate::broker::QueueAddress;
use crate::broker_transaction::{BrokerTransaction, StagedOp};
use crate::messages::QueueMessage;
use crate::queue_actor::DeadLetter;

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Ask `actor` and wait for the answer.
///
/// An actor that is gone or does not answer counts as a lost connection.
pub(crate) async fn call<M, T, F>(actor: &ActorRef<M>, target: &str, build: F) -> Result<T, RpcError>
where
    M: ractor::Message,
    T: Send + 'static,
    F: FnOnce(RpcReplyPort<T>) -> M,
{
    match ractor::rpc::call(actor, build, Some(CALL_TIMEOUT)).await {
        Ok(CallResult::Success(value)) => Ok(value),
        Ok(CallResult::Timeout) => Err(RpcError::ConnectionLost(format!(
            "{} did not answer within {:?}",
            target, CALL_TIMEOUT
        ))),
        Ok(CallResult::SenderError) => Err(RpcError::ConnectionLost(format!(
            "{} dropped the request",
            target
        ))),
        Err(e) => Err(RpcError::ConnectionLost(format!("{} is unreachable: {}", target, e))),
    }
}

/// A queue hosted by the in-process broker.
///
/// Bound to a [`BrokerTransaction`], reply pushes and acknowledges join its
/// open unit of work. Publishing and rejecting always go straight to the
/// queue actor.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    address: QueueAddress,
    actor: ActorRef<QueueMessage>,
    unit: Option<BrokerTransaction>,
}

impl MemoryQueue {
    pub(crate) fn new(address: QueueAddress, actor: ActorRef<QueueMessage>) -> Self {
        Self {
            address,
            actor,
            unit: None,
        }
    }

    /// This queue, writing through `transaction`.
    pub fn with_transaction(mut self, transaction: &BrokerTransaction) -> Self {
        self.unit = Some(transaction.clone());
        self
    }

    /// Append an envelope to the queue.
    pub async fn publish(&self, envelope: Envelope) -> Result<(), RpcError> {
        self.settle("publish", |reply| QueueMessage::Publish {
            envelope: Box::new(envelope),
            reply,
        })
        .await
    }

    /// Current queue statistics.
    pub async fn stats(&self) -> Result<QueueStats, RpcError> {
        self.ask(|reply| QueueMessage::GetStats { reply }).await
    }

    /// Envelopes rejected by consumers or dead-lettered after too many
    /// deliveries.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, RpcError> {
        self.ask(|reply| QueueMessage::GetDeadLetters { reply }).await
    }

    /// Return every unacknowledged delivery to the queue. Returns how many
    /// deliveries were recovered.
    pub async fn recover(&self) -> Result<usize, RpcError> {
        self.ask(|reply| QueueMessage::Recover { reply }).await
    }

    pub(crate) async fn acknowledge_now(&self, envelope_id: EnvelopeId) -> Result<(), RpcError> {
        self.settle("acknowledge", |reply| QueueMessage::Acknowledge { envelope_id, reply })
            .await
    }

    fn unbound(&self) -> Self {
        Self::new(self.address.clone(), self.actor.clone())
    }

    async fn ask<T, F>(&self, build: F) -> Result<T, RpcError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> QueueMessage,
    {
        let target = format!("queue {}", self.address);
        call(&self.actor, &target, build).await
    }

    async fn settle<F>(&self, operation: &'static str, build: F) -> Result<(), RpcError>
    where
        F: FnOnce(RpcReplyPort<Result<(), String>>) -> QueueMessage,
    {
        self.ask(build)
            .await?
            .map_err(|e| RpcError::queue(&self.address.name, operation, e))
    }
}

impl MessageQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.address.name
    }

    async fn subscribe(&self) -> Result<Subscription, RpcError> {
        let inbox = self.ask(|reply| QueueMessage::Subscribe { reply }).await?;
        Ok(Subscription::new(self.address.name.clone(), inbox))
    }

    async fn dequeue(&self) -> Result<Option<Envelope>, RpcError> {
        self.ask(|reply| QueueMessage::Dequeue { reply }).await
    }

    async fn push(&self, request: &Envelope, reply_body: Vec<u8>) -> Result<(), RpcError> {
        let envelope = request.reply(reply_body);
        match &self.unit {
            Some(unit) => {
                let queue = self.unbound();
                unit.stage_or_apply(StagedOp::Publish { queue, envelope }).await
            }
            None => self.publish(envelope).await,
        }
    }

    async fn acknowledge(&self, envelope: &Envelope) -> Result<(), RpcError> {
        let envelope_id = envelope.id();
        match &self.unit {
            Some(unit) => {
                let queue = self.unbound();
                unit.stage_or_apply(StagedOp::Acknowledge { queue, envelope_id }).await
            }
            None => self.acknowledge_now(envelope_id).await,
        }
    }

    async fn reject(&self, envelope: &Envelope, reason: &str) -> Result<(), RpcError> {
        let envelope_id = envelope.id();
        let reason = reason.to_string();
        self.settle("reject", |reply| QueueMessage::Reject {
            envelope_id,
            reason,
            reply,
        })
        .await
    }
}
