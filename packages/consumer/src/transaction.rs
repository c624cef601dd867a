//! Per-envelope transaction state machine.

use rpc_core::{RpcError, TransactionalResource};

/// Where a unit of work is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    InTransaction,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::RolledBack)
    }
}

/// One transaction over a [`TransactionalResource`], for one envelope.
///
/// Moves `Idle -> InTransaction -> {Committed, RolledBack}` and refuses any
/// other transition. A unit of work counts as in transaction as soon as
/// `begin` is attempted, so a failed begin can still be rolled back.
pub struct UnitOfWork<'a, T> {
    resource: &'a T,
    state: TransactionState,
}

impl<'a, T: TransactionalResource> UnitOfWork<'a, T> {
    pub fn new(resource: &'a T) -> Self {
        Self {
            resource,
            state: TransactionState::Idle,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub async fn begin(&mut self) -> Result<(), RpcError> {
        self.require(TransactionState::Idle, "begin")?;
        self.state = TransactionState::InTransaction;
        self.resource.begin().await
    }

    /// Commit. On failure the unit stays in transaction and must be rolled back.
    pub async fn commit(&mut self) -> Result<(), RpcError> {
        self.require(TransactionState::InTransaction, "commit")?;
        self.resource.commit().await?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Roll back. The unit is terminal afterwards even if the resource fails.
    pub async fn rollback(&mut self) -> Result<(), RpcError> {
        self.require(TransactionState::InTransaction, "rollback")?;
        self.state = TransactionState::RolledBack;
        self.resource.rollback().await
    }

    fn require(&self, state: TransactionState, operation: &str) -> Result<(), RpcError> {
        if self.state != state {
            return Err(RpcError::Transaction(format!(
                "cannot {} a unit of work in state {:?}",
                operation, self.state
            )));
        }
        Ok(())
    }
}
