//! Message repository backing the durable queues.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use rpc_core::{Envelope, EnvelopeId};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{DbError, StagedWrite, SurrealTransaction};

/// Table holding queue messages.
pub const MESSAGE_TABLE: &str = "queue_message";

/// Processing status of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting for a consumer.
    Pending,
    /// Claimed by a consumer, not yet settled.
    InProgress,
    /// Acknowledged.
    Complete,
    /// Rejected.
    Rejected,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::InProgress => "in_progress",
            MessageStatus::Complete => "complete",
            MessageStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct MessageRecord {
    envelope_id: String,
    queue: String,
    body: Vec<u8>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    status: MessageStatus,
    #[serde(default)]
    delivery_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl MessageRecord {
    fn new(queue: &str, envelope: &Envelope) -> Self {
        Self {
            envelope_id: envelope.id().to_string(),
            queue: queue.to_string(),
            body: envelope.body().to_vec(),
            properties: envelope.properties().clone(),
            status: MessageStatus::Pending,
            delivery_count: 0,
            error: None,
        }
    }

    fn into_stored(self) -> Result<StoredMessage, DbError> {
        let id = EnvelopeId::parse(&self.envelope_id)
            .map_err(|e| DbError::Serialization(format!("bad envelope id: {}", e)))?;
        Ok(StoredMessage {
            envelope: Envelope::with_id(id, self.body, self.properties),
            queue: self.queue,
            status: self.status,
            delivery_count: self.delivery_count,
            error: self.error,
        })
    }
}

/// A message as stored, with its queue bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub envelope: Envelope,
    pub queue: String,
    pub status: MessageStatus,
    pub delivery_count: u32,
    pub error: Option<String>,
}

/// Repository for queue message persistence.
///
/// Replies and acknowledgements go through the shared [`SurrealTransaction`]
/// and join an open unit of work. Publishing, claiming, releasing and
/// rejecting always hit the database directly: they belong to no consumer's
/// unit of work.
#[derive(Debug, Clone)]
pub struct MessageRepository {
    tx: SurrealTransaction,
}

const RECORD_FIELDS: &str = "envelope_id, queue, body, properties, status, delivery_count, error";

impl MessageRepository {
    pub fn new(tx: SurrealTransaction) -> Self {
        Self { tx }
    }

    /// The unit of work this repository writes through.
    pub fn transaction(&self) -> &SurrealTransaction {
        &self.tx
    }

    /// Store a new pending message on `queue`, joining the open unit of work.
    pub async fn enqueue(&self, queue: &str, envelope: &Envelope) -> Result<(), DbError> {
        let write = Self::create(queue, envelope)?;
        self.tx.execute(write).await
    }

    /// Store a new pending message on `queue` right away.
    pub async fn publish(&self, queue: &str, envelope: &Envelope) -> Result<(), DbError> {
        let write = Self::create(queue, envelope)?;
        self.tx.execute_now(write).await
    }

    fn create(queue: &str, envelope: &Envelope) -> Result<StagedWrite, DbError> {
        let content = serde_json::to_value(MessageRecord::new(queue, envelope))
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        Ok(StagedWrite::Create {
            table: MESSAGE_TABLE.to_string(),
            key: envelope.id().to_string(),
            content,
        })
    }

    /// Claim the oldest pending message on `queue`.
    ///
    /// The claim is conditional on the message still being pending, so two
    /// consumers racing for the same message cannot both win it.
    pub async fn claim_next(&self, queue: &str) -> Result<Option<StoredMessage>, DbError> {
        let db = self.tx.database();

        let mut result = db
            .query(
                r#"
                SELECT envelope_id, created_at FROM queue_message
                WHERE queue = $queue AND status = "pending"
                ORDER BY created_at ASC
                LIMIT 1
                "#,
            )
            .bind(("queue", queue.to_string()))
            .await?;

        #[derive(Deserialize)]
        struct Candidate {
            envelope_id: String,
        }

        let candidates: Vec<Candidate> = result.take(0)?;
        let Some(candidate) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let mut result = db
            .query(format!(
                r#"
                UPDATE type::thing($table, $key)
                SET status = "in_progress", delivery_count += 1
                WHERE status = "pending"
                RETURN {RECORD_FIELDS}
                "#
            ))
            .bind(("table", MESSAGE_TABLE))
            .bind(("key", candidate.envelope_id))
            .await?;

        let claimed: Vec<MessageRecord> = result.take(0)?;
        claimed.into_iter().next().map(MessageRecord::into_stored).transpose()
    }

    /// Mark a message as processed, joining the open unit of work.
    pub async fn acknowledge(&self, envelope: &Envelope) -> Result<(), DbError> {
        self.tx
            .execute(Self::merge(envelope, json!({ "status": MessageStatus::Complete })))
            .await
    }

    /// Mark a message as failed.
    ///
    /// Rejection follows a rollback, so it never waits for a unit of work.
    pub async fn reject(&self, envelope: &Envelope, reason: &str) -> Result<(), DbError> {
        let patch = json!({ "status": MessageStatus::Rejected, "error": reason });
        self.tx.execute_now(Self::merge(envelope, patch)).await
    }

    fn merge(envelope: &Envelope, patch: serde_json::Value) -> StagedWrite {
        StagedWrite::Merge {
            table: MESSAGE_TABLE.to_string(),
            key: envelope.id().to_string(),
            patch,
        }
    }

    /// Return a claimed message that was never handed to a consumer.
    pub async fn release(&self, id: EnvelopeId) -> Result<(), DbError> {
        self.tx
            .database()
            .query(
                r#"
                UPDATE type::thing($table, $key)
                SET status = "pending", delivery_count -= 1
                WHERE status = "in_progress"
                "#,
            )
            .bind(("table", MESSAGE_TABLE))
            .bind(("key", id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    /// Get a message by envelope ID.
    pub async fn get(&self, id: EnvelopeId) -> Result<StoredMessage, DbError> {
        let mut result = self
            .tx
            .database()
            .query(format!(
                "SELECT {RECORD_FIELDS} FROM type::thing($table, $key)"
            ))
            .bind(("table", MESSAGE_TABLE))
            .bind(("key", id.to_string()))
            .await?;

        let records: Vec<MessageRecord> = result.take(0)?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("Message not found: {}", id)))?
            .into_stored()
    }

    /// List messages on `queue` with the given status, oldest first.
    pub async fn list(&self, queue: &str, status: MessageStatus) -> Result<Vec<StoredMessage>, DbError> {
        let mut result = self
            .tx
            .database()
            .query(format!(
                r#"
                SELECT {RECORD_FIELDS}, created_at FROM queue_message
                WHERE queue = $queue AND status = $status
                ORDER BY created_at ASC
                "#
            ))
            .bind(("queue", queue.to_string()))
            .bind(("status", status.as_str()))
            .await?;

        let records: Vec<MessageRecord> = result.take(0)?;
        records.into_iter().map(MessageRecord::into_stored).collect()
    }

    /// Return in-progress messages untouched for `older_than` to pending.
    ///
    /// Returns the number of messages requeued.
    pub async fn requeue_stale(&self, queue: &str, older_than: Duration) -> Result<u64, DbError> {
        let mut result = self
            .tx
            .database()
            .query(
                r#"
                UPDATE queue_message
                SET status = "pending"
                WHERE queue = $queue
                    AND status = "in_progress"
                    AND updated_at < time::now() - <duration> $age
                RETURN envelope_id
                "#,
            )
            .bind(("queue", queue.to_string()))
            .bind(("age", format!("{}ms", older_than.as_millis())))
            .await?;

        #[derive(Deserialize)]
        struct Requeued {
            #[allow(dead_code)]
            envelope_id: String,
        }

        let requeued: Vec<Requeued> = result.take(0)?;
        if !requeued.is_empty() {
            tracing::info!(queue, count = requeued.len(), "Requeued stale messages");
        }
        Ok(requeued.len() as u64)
    }

    /// Count messages by status for a queue.
    pub async fn count_by_status(&self, queue: &str) -> Result<HashMap<String, u64>, DbError> {
        let mut result = self
            .tx
            .database()
            .query(
                r#"
                SELECT status, count() AS count
                FROM queue_message
                WHERE queue = $queue
                GROUP BY status
                "#,
            )
            .bind(("queue", queue.to_string()))
            .await?;

        #[derive(Deserialize)]
        struct StatusCount {
            status: Option<String>,
            count: i64,
        }

        let counts: Vec<StatusCount> = result.take(0)?;

        let mut map = HashMap::new();
        for count in counts {
            if let Some(status) = count.status {
                map.insert(status, count.count.max(0) as u64);
            }
        }

        Ok(map)
    }
}
