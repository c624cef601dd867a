//! Unit-of-work bookkeeping for resources that stage writes until commit.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::RpcError;

struct OpenUnit<W> {
    writes: Vec<W>,
    _permit: OwnedSemaphorePermit,
}

/// Writes staged by the unit of work open on a resource.
///
/// At most one unit is open at a time: [`open`](Self::open) waits until the
/// current unit is closed. Clones share the same unit, so a queue handle and
/// the executor driving it see the same staged writes.
pub struct StagedUnit<W> {
    gate: Arc<Semaphore>,
    open: Arc<Mutex<Option<OpenUnit<W>>>>,
}

impl<W> StagedUnit<W> {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(1)),
            open: Arc::new(Mutex::new(None)),
        }
    }

    /// Open a unit of work, waiting for any unit already open to close.
    pub async fn open(&self) -> Result<(), RpcError> {
        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RpcError::Transaction("unit of work gate closed".into()))?;

        *self.open.lock().await = Some(OpenUnit {
            writes: Vec::new(),
            _permit: permit,
        });
        Ok(())
    }

    /// Stage `write` in the open unit. Hands it back when no unit is open.
    pub async fn stage(&self, write: W) -> Option<W> {
        match self.open.lock().await.as_mut() {
            Some(unit) => {
                unit.writes.push(write);
                None
            }
            None => Some(write),
        }
    }

    /// Take the staged writes for commit.
    ///
    /// The unit stays open until [`close`](Self::close), so a commit that
    /// fails half way is still rolled back by its owner.
    pub async fn drain(&self) -> Result<Vec<W>, RpcError> {
        let mut open = self.open.lock().await;
        let unit = open
            .as_mut()
            .ok_or_else(|| RpcError::Transaction("no unit of work to commit".into()))?;
        Ok(std::mem::take(&mut unit.writes))
    }

    /// Close the open unit and discard whatever is still staged.
    ///
    /// Returns the number of discarded writes, or `None` if no unit was open.
    pub async fn close(&self) -> Option<usize> {
        self.open.lock().await.take().map(|unit| unit.writes.len())
    }

    /// Whether a unit of work is open.
    pub async fn is_open(&self) -> bool {
        self.open.lock().await.is_some()
    }

    /// Number of writes waiting for commit.
    pub async fn staged_len(&self) -> usize {
        self.open
            .lock()
            .await
            .as_ref()
            .map_or(0, |unit| unit.writes.len())
    }
}

impl<W> Default for StagedUnit<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> Clone for StagedUnit<W> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            open: self.open.clone(),
        }
    }
}

impl<W> std::fmt::Debug for StagedUnit<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedUnit").finish_non_exhaustive()
    }
}
