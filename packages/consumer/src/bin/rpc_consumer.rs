//! Runs an RPC consumer against the SurrealDB-backed queues.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use db::repositories::MessageRepository;
use db::{DbConfig, DbQueueDirectory, SurrealTransaction};
use rpc_consumer::{
    Consumer, ConsumerContext, HandlerArgs, HandlerRegistry, TopicBindings, rpc_handler,
};
use rpc_core::{ConsumerConfig, ConsumerEvent, JsonEncoder};
use serde_json::json;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rpc-consumer")]
#[command(about = "Consume RPC requests and publish their replies")]
#[command(version)]
struct Cli {
    /// Consumer configuration file (JSON)
    #[arg(short, long, env = "RPC_CONSUMER_CONFIG")]
    config: PathBuf,

    /// Stop after this many messages. Overrides the configuration file.
    #[arg(short = 'n', long, env = "RPC_CONSUMER_MAX_MESSAGES")]
    max_messages: Option<NonZeroU32>,

    /// SurrealDB endpoint, e.g. `mem://` or `rocksdb://./data`
    #[arg(long, env = "RPC_CONSUMER_DB", default_value = "mem://")]
    db_endpoint: String,

    /// SurrealDB namespace
    #[arg(long, env = "RPC_CONSUMER_DB_NAMESPACE")]
    namespace: Option<String>,

    /// SurrealDB database
    #[arg(long, env = "RPC_CONSUMER_DB_DATABASE")]
    database: Option<String>,

    /// Root user for remote endpoints
    #[arg(long, env = "RPC_CONSUMER_DB_USERNAME", requires = "password")]
    username: Option<String>,

    /// Root password for remote endpoints
    #[arg(long, env = "RPC_CONSUMER_DB_PASSWORD", requires = "username", hide_env_values = true)]
    password: Option<String>,

    /// Seconds a claimed message may stay unsettled before it is redelivered
    #[arg(long, env = "RPC_CONSUMER_VISIBILITY_TIMEOUT", default_value_t = 30)]
    visibility_timeout_secs: u64,
}

impl Cli {
    fn db_config(&self) -> DbConfig {
        let mut config = DbConfig::endpoint(&self.db_endpoint);
        if let Some(namespace) = &self.namespace {
            config = config.with_namespace(namespace);
        }
        if let Some(database) = &self.database {
            config = config.with_database(database);
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            config = config.with_credentials(username, password);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ConsumerConfig::from_path(&cli.config)?;
    let max_messages = cli
        .max_messages
        .or_else(|| config.max_messages.and_then(NonZeroU32::new));

    let database = db::init(&cli.db_config()).await?;
    let transaction = SurrealTransaction::new(database);
    let repo = MessageRepository::new(transaction.clone());
    let directory = DbQueueDirectory::new(&config.connection, repo.clone())
        .with_poll_interval(config.poll_interval())
        .with_visibility_timeout(Duration::from_secs(cli.visibility_timeout_secs));
    let queue = directory.queue(&config.queue);

    let handlers = demo_handlers();
    let mut names = handlers.names();
    names.sort_unstable();
    tracing::info!(handlers = ?names, "Registered handlers");

    let bindings = TopicBindings::resolve(&config, &handlers)?;
    let mut topics = bindings.topics();
    topics.sort_unstable();
    tracing::info!(topics = ?topics, "Bound topics");

    let (events_tx, events_rx) = broadcast::channel(256);
    tokio::spawn(log_events(events_rx));

    let context = ConsumerContext::new(bindings, JsonEncoder::new(), directory, transaction);
    let consumer = Consumer::new(&config, queue, context).with_events(events_tx);

    let report = consumer.process(max_messages).await?;
    tracing::info!(
        committed = report.committed,
        rejected = report.rejected,
        redelivered = report.redelivered,
        "Done"
    );

    let counts = repo.count_by_status(&config.queue).await?;
    tracing::info!(queue = %config.queue, ?counts, "Queue status");

    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<ConsumerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => tracing::debug!(
                envelope_id = ?event.envelope_id(),
                at = %event.timestamp(),
                "{}",
                event.description()
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn demo_handlers() -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();

    // Demo: Echo handler
    handlers.register(rpc_handler!("echo", |args| {
        Ok(Some(args.into_value()))
    }));

    // Demo: Price lookup
    handlers.register(rpc_handler!("catalog.price", |args| {
        let sku = match &args {
            HandlerArgs::Single(request) => request.get("sku").and_then(|v| v.as_str()),
            HandlerArgs::Positional(_) => args.arg(0).and_then(|v| v.as_str()),
        };
        match sku {
            Some("A1") => Ok(Some(json!({ "price": 19.99 }))),
            Some(_) => Ok(None),
            None => Err("Request has no sku".to_string()),
        }
    }));

    handlers
}
