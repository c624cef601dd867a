//! SurrealDB integration for the RPC consumer.
//!
//! This crate provides the database connection, a transactional resource
//! built on it, and durable queues stored in the database.
//!
//! # Features
//!
//! In-memory storage (`mem://`) is always available.
//!
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod queue;
mod schema;
mod unit_of_work;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use queue::{DbQueue, DbQueueDirectory};
pub use schema::init_schema;
pub use unit_of_work::{StagedWrite, SurrealTransaction};

/// Connect to the database and make sure the schema exists.
///
/// This should be called once at application startup.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}
