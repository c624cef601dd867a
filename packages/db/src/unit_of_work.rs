//! SurrealDB-backed transactional resource.
//!
//! SurrealDB only keeps a transaction open for the duration of a single
//! query, so writes issued while a unit of work is open are staged in
//! memory and flushed in one `BEGIN … COMMIT` query at commit time.

use rpc_core::{RpcError, StagedUnit, TransactionalResource};
use serde_json::Value;

use crate::{Database, DbError};

/// A write that joins the open unit of work, if there is one.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedWrite {
    /// Create a record with the given content.
    Create {
        table: String,
        key: String,
        content: Value,
    },
    /// Merge fields into an existing record.
    Merge {
        table: String,
        key: String,
        patch: Value,
    },
}

impl StagedWrite {
    fn statement(&self, index: usize) -> String {
        match self {
            StagedWrite::Create { .. } => {
                format!("CREATE type::thing($t{index}, $k{index}) CONTENT $v{index};\n")
            }
            StagedWrite::Merge { .. } => {
                format!("UPDATE type::thing($t{index}, $k{index}) MERGE $v{index};\n")
            }
        }
    }

    fn into_bindings(self) -> (String, String, Value) {
        match self {
            StagedWrite::Create {
                table,
                key,
                content,
            } => (table, key, content),
            StagedWrite::Merge { table, key, patch } => (table, key, patch),
        }
    }
}

/// Unit of work over a SurrealDB connection.
///
/// Clones share the same unit of work, so a queue and the executor driving
/// it can hold their own handle. Only one unit is open at a time; `begin`
/// waits for the open one to finish.
#[derive(Clone)]
pub struct SurrealTransaction {
    db: Database,
    unit: StagedUnit<StagedWrite>,
}

impl SurrealTransaction {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            unit: StagedUnit::new(),
        }
    }

    /// The underlying connection, for reads.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Whether a unit of work is currently open.
    pub async fn is_open(&self) -> bool {
        self.unit.is_open().await
    }

    /// Number of writes waiting for commit.
    pub async fn staged_len(&self) -> usize {
        self.unit.staged_len().await
    }

    /// Stage `write` in the open unit of work, or apply it right away when
    /// none is open.
    pub async fn execute(&self, write: StagedWrite) -> Result<(), DbError> {
        match self.unit.stage(write).await {
            Some(write) => self.apply(vec![write]).await,
            None => Ok(()),
        }
    }

    /// Apply `write` right away, even while a unit of work is open.
    pub async fn execute_now(&self, write: StagedWrite) -> Result<(), DbError> {
        self.apply(vec![write]).await
    }

    async fn apply(&self, writes: Vec<StagedWrite>) -> Result<(), DbError> {
        if writes.is_empty() {
            return Ok(());
        }

        let mut sql = String::from("BEGIN TRANSACTION;\n");
        for (index, write) in writes.iter().enumerate() {
            sql.push_str(&write.statement(index));
        }
        sql.push_str("COMMIT TRANSACTION;");

        let mut query = self.db.query(sql);
        for (index, write) in writes.into_iter().enumerate() {
            let (table, key, value) = write.into_bindings();
            query = query
                .bind((format!("t{index}"), table))
                .bind((format!("k{index}"), key))
                .bind((format!("v{index}"), value));
        }

        query.await?.check()?;
        Ok(())
    }
}

impl std::fmt::Debug for SurrealTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealTransaction").finish_non_exhaustive()
    }
}

impl TransactionalResource for SurrealTransaction {
    async fn begin(&self) -> Result<(), RpcError> {
        self.unit.open().await?;
        tracing::trace!("Unit of work opened");
        Ok(())
    }

    async fn commit(&self) -> Result<(), RpcError> {
        let writes = self.unit.drain().await?;
        let count = writes.len();

        // A failed apply leaves the unit open for the owner's rollback.
        self.apply(writes).await?;
        self.unit.close().await;
        tracing::debug!(writes = count, "Unit of work committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), RpcError> {
        match self.unit.close().await {
            Some(discarded) => tracing::debug!(discarded, "Unit of work rolled back"),
            None => tracing::trace!("Rollback without an open unit of work"),
        }
        Ok(())
    }
}
