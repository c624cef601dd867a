//! Unit of work over the in-process broker.

use rpc_core::{Envelope, EnvelopeId, RpcError, StagedUnit, TransactionalResource};

use crate::memory_queue::MemoryQueue;

/// A queue operation held back until commit.
#[derive(Debug)]
pub(crate) enum StagedOp {
    Publish {
        queue: MemoryQueue,
        envelope: Envelope,
    },
    Acknowledge {
        queue: MemoryQueue,
        envelope_id: EnvelopeId,
    },
}

impl StagedOp {
    pub(crate) async fn apply(self) -> Result<(), RpcError> {
        match self {
            StagedOp::Publish { queue, envelope } => queue.publish(envelope).await,
            StagedOp::Acknowledge { queue, envelope_id } => {
                queue.acknowledge_now(envelope_id).await
            }
        }
    }
}

/// Transactional resource for queues bound to it with
/// [`MemoryQueue::with_transaction`].
///
/// Reply pushes and acknowledges issued while a unit of work is open are
/// held back and applied in order on commit; rollback drops them. Queue
/// actors have no atomic multi-queue write, so a commit that fails half way
/// keeps whatever was applied before the failure.
#[derive(Debug, Clone, Default)]
pub struct BrokerTransaction {
    unit: StagedUnit<StagedOp>,
}

impl BrokerTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a unit of work is currently open.
    pub async fn is_open(&self) -> bool {
        self.unit.is_open().await
    }

    /// Number of operations waiting for commit.
    pub async fn staged_len(&self) -> usize {
        self.unit.staged_len().await
    }

    /// Stage `op`, or apply it right away when no unit of work is open.
    pub(crate) async fn stage_or_apply(&self, op: StagedOp) -> Result<(), RpcError> {
        match self.unit.stage(op).await {
            Some(op) => op.apply().await,
            None => Ok(()),
        }
    }
}

impl TransactionalResource for BrokerTransaction {
    async fn begin(&self) -> Result<(), RpcError> {
        self.unit.open().await?;
        tracing::trace!("Broker unit of work opened");
        Ok(())
    }

    async fn commit(&self) -> Result<(), RpcError> {
        let ops = self.unit.drain().await?;
        let count = ops.len();
        for op in ops {
            op.apply().await?;
        }
        self.unit.close().await;
        tracing::debug!(operations = count, "Broker unit of work committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), RpcError> {
        if let Some(discarded) = self.unit.close().await {
            tracing::debug!(discarded, "Broker unit of work rolled back");
        }
        Ok(())
    }
}
