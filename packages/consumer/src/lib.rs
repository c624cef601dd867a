//! Transactional RPC consumer.
//!
//! Takes request envelopes off a queue, hands each to the handler bound to
//! its topic and publishes the handler's reply to the request's `reply_to`
//! queue. Every envelope is processed in its own unit of work.
//!
//! # Architecture
//!
//! - `Dispatcher` - Decodes a request and invokes the topic handler
//! - `ReplyRouter` - Publishes the encoded reply
//! - `TransactionalExecutor` - Wraps both in begin/acknowledge/commit and
//!   decides between redelivery and rejection on failure
//! - `Consumer` - Bounded polling or subscription loop around the executor
//! - `Broker` / `QueueActor` - In-process queues
//! - `BrokerTransaction` - Holds back broker replies and acknowledges until
//!   commit
//! - `ConsumerActor` - Hosts a subscription-mode consumer
//!
//! # Usage
//!
//! ```ignore
//! use rpc_consumer::{
//!     BrokerHandle, BrokerTransaction, Consumer, ConsumerContext, HandlerRegistry, TopicBindings,
//! };
//!
//! let transaction = BrokerTransaction::new();
//! let (broker, _handle) = BrokerHandle::start().await?;
//! let broker = broker.with_transaction(&transaction);
//! let queue = broker.declare_queue("default", "rpc.requests", QueueConfig::default()).await?;
//!
//! let bindings = TopicBindings::resolve(&config, &handlers)?;
//! let context = ConsumerContext::new(bindings, JsonEncoder::new(), broker, transaction);
//! Consumer::new(&config, queue, context).process(NonZeroU32::new(5)).await?;
//! ```

mod bindings;
mod broker;
mod broker_transaction;
mod consumer;
mod consumer_actor;
mod dispatcher;
mod executor;
mod handler;
mod memory_queue;
mod messages;
mod queue_actor;
mod reply_router;
mod transaction;

pub use bindings::{TopicBinding, TopicBindings};
pub use broker::{Broker, BrokerHandle, QueueAddress};
pub use broker_transaction::BrokerTransaction;
pub use consumer::{Consumer, ProcessReport};
pub use consumer_actor::{ConsumerActor, start_consumer};
pub use dispatcher::Dispatcher;
pub use executor::{ConsumerContext, MessageOutcome, TransactionalExecutor};
pub use handler::{FnHandler, HandlerArgs, HandlerFuture, HandlerRegistry, HandlerResult, RpcHandler};
pub use memory_queue::MemoryQueue;
pub use messages::{BrokerMessage, ConsumerMessage, QueueMessage};
pub use queue_actor::{DeadLetter, QueueActor};
pub use reply_router::ReplyRouter;
pub use transaction::{TransactionState, UnitOfWork};

/// Re-export ractor types for convenience.
pub use ractor::{ActorRef, RpcReplyPort};
