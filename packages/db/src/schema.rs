//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(QUEUE_MESSAGE_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Queue message table schema.
const QUEUE_MESSAGE_SCHEMA: &str = r#"
-- Messages of the durable queues, requests and replies alike
DEFINE TABLE IF NOT EXISTS queue_message SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS envelope_id ON queue_message TYPE string;
DEFINE FIELD IF NOT EXISTS queue ON queue_message TYPE string;
DEFINE FIELD IF NOT EXISTS body ON queue_message TYPE array<int>;
DEFINE FIELD IF NOT EXISTS properties ON queue_message FLEXIBLE TYPE object DEFAULT {};
DEFINE FIELD IF NOT EXISTS status ON queue_message TYPE string DEFAULT "pending";
DEFINE FIELD IF NOT EXISTS delivery_count ON queue_message TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS error ON queue_message TYPE option<string>;
DEFINE FIELD IF NOT EXISTS created_at ON queue_message TYPE datetime DEFAULT time::now();
DEFINE FIELD IF NOT EXISTS updated_at ON queue_message TYPE datetime VALUE time::now();

-- Indexes for queue polling
DEFINE INDEX IF NOT EXISTS message_envelope ON queue_message FIELDS envelope_id UNIQUE;
DEFINE INDEX IF NOT EXISTS message_queue_status ON queue_message FIELDS queue, status;
"#;
