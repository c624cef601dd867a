use db::repositories::MessageRepository;
use db::{Database, DbConfig, DbError, SurrealTransaction};

/// Each call gets its own in-memory datastore.
pub async fn setup_db() -> Result<(Database, MessageRepository), DbError> {
    let db_conn = db::init(&DbConfig::memory()).await?;
    let repo = MessageRepository::new(SurrealTransaction::new(db_conn.clone()));
    Ok((db_conn, repo))
}
