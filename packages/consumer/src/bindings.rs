//! Topic bindings resolved from consumer configuration.

use std::collections::HashMap;
use std::sync::Arc;

use rpc_core::{ConfigError, ConsumerConfig, RpcError, SchemaKind};

use crate::handler::{HandlerRegistry, RpcHandler};

/// Everything the consumer needs to know about one topic.
#[derive(Clone)]
pub struct TopicBinding {
    topic: String,
    schema: SchemaKind,
    connection: String,
    handlers: Vec<Arc<dyn RpcHandler>>,
}

impl TopicBinding {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn schema(&self) -> SchemaKind {
        self.schema
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn handlers(&self) -> &[Arc<dyn RpcHandler>] {
        &self.handlers
    }

    /// The handler that answers requests on this topic.
    ///
    /// RPC has a single responder: only the first configured handler is
    /// invoked, further handlers are kept for configuration parity.
    pub fn primary_handler(&self) -> Option<&Arc<dyn RpcHandler>> {
        self.handlers.first()
    }
}

impl std::fmt::Debug for TopicBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicBinding")
            .field("topic", &self.topic)
            .field("schema", &self.schema)
            .field("connection", &self.connection)
            .field(
                "handlers",
                &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Topic bindings for a consumer, keyed by topic name.
#[derive(Debug, Clone, Default)]
pub struct TopicBindings {
    topics: HashMap<String, TopicBinding>,
}

impl TopicBindings {
    /// Resolve handler names and connections for every configured topic.
    ///
    /// Fails if a topic names a handler the registry does not know.
    pub fn resolve(config: &ConsumerConfig, registry: &HandlerRegistry) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut topics = HashMap::new();
        for topic in &config.topics {
            let handlers = topic
                .handlers
                .iter()
                .map(|name| {
                    registry.get(name).ok_or_else(|| ConfigError::UnknownHandler {
                        topic: topic.name.clone(),
                        handler: name.clone(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            if handlers.len() > 1 {
                tracing::warn!(
                    topic = %topic.name,
                    handlers = handlers.len(),
                    "Only the first handler of an RPC topic is invoked"
                );
            }

            topics.insert(
                topic.name.clone(),
                TopicBinding {
                    topic: topic.name.clone(),
                    schema: topic.schema,
                    connection: config.connection_for(topic),
                    handlers,
                },
            );
        }

        Ok(Self { topics })
    }

    /// Binding for `topic`.
    pub fn binding(&self, topic: &str) -> Result<&TopicBinding, RpcError> {
        self.topics
            .get(topic)
            .ok_or_else(|| RpcError::UnknownTopic(topic.to_string()))
    }

    /// Ordered handlers for `topic`.
    pub fn handlers_for(&self, topic: &str) -> Result<&[Arc<dyn RpcHandler>], RpcError> {
        Ok(self.binding(topic)?.handlers())
    }

    /// Schema kind of `topic`.
    pub fn schema_kind_for(&self, topic: &str) -> Result<SchemaKind, RpcError> {
        Ok(self.binding(topic)?.schema())
    }

    /// Connection replies on `topic` are published on.
    pub fn connection_for(&self, topic: &str) -> Result<&str, RpcError> {
        Ok(self.binding(topic)?.connection())
    }

    /// Names of all bound topics.
    pub fn topics(&self) -> Vec<&str> {
        self.topics.keys().map(String::as_str).collect()
    }
}
