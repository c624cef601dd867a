//! Consumer and topic configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// How a decoded message is handed to its handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    /// The decoded message is spread into the handler's parameter list.
    #[serde(alias = "method")]
    Positional,
    /// The decoded message is passed as one argument.
    #[default]
    #[serde(alias = "object")]
    Single,
}

impl std::fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaKind::Positional => write!(f, "positional"),
            SchemaKind::Single => write!(f, "single"),
        }
    }
}

/// Configuration for one RPC topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Topic name, matched against the `topic_name` envelope property.
    pub name: String,
    /// Argument shape for this topic's handlers.
    #[serde(default)]
    pub schema: SchemaKind,
    /// Connection replies for this topic are published on.
    /// Falls back to the consumer's connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    /// Registered handler names, in invocation order.
    pub handlers: Vec<String>,
}

impl TopicConfig {
    /// Create a topic with a single handler.
    pub fn new(name: impl Into<String>, schema: SchemaKind, handler: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema,
            connection: None,
            handlers: vec![handler.into()],
        }
    }

    /// Publish replies for this topic on a different connection.
    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }
}

/// Configuration for a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Consumer name, used in logs and events.
    pub name: String,
    /// Queue requests are consumed from.
    pub queue: String,
    /// Connection the request queue lives on.
    pub connection: String,
    /// Default bound for `process`. `None` subscribes instead of polling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<u32>,
    /// Timeout for a single handler invocation (seconds).
    pub handler_timeout_secs: u64,
    /// Wait between empty polls in bounded mode (milliseconds).
    pub poll_interval_ms: u64,
    /// Stop bounded polling after this long without a message (seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_idle_secs: Option<u64>,
    /// Publish an empty reply when a message decodes to nothing.
    pub reply_on_empty_decode: bool,
    /// Topics this consumer answers.
    pub topics: Vec<TopicConfig>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            name: "rpc-consumer".to_string(),
            queue: "rpc.requests".to_string(),
            connection: "default".to_string(),
            max_messages: None,
            handler_timeout_secs: 300,
            poll_interval_ms: 1000,
            max_idle_secs: None,
            reply_on_empty_decode: false,
            topics: Vec::new(),
        }
    }
}

impl ConsumerConfig {
    /// Create a config consuming `queue` on `connection`.
    pub fn new(name: impl Into<String>, connection: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: connection.into(),
            queue: queue.into(),
            ..Default::default()
        }
    }

    /// Add a topic.
    pub fn with_topic(mut self, topic: TopicConfig) -> Self {
        self.topics.push(topic);
        self
    }

    /// Set the handler timeout.
    pub fn with_handler_timeout(mut self, timeout_secs: u64) -> Self {
        self.handler_timeout_secs = timeout_secs;
        self
    }

    /// Set the wait between empty polls.
    pub fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Stop bounded polling after `max_idle_secs` without a message.
    pub fn with_max_idle(mut self, max_idle_secs: u64) -> Self {
        self.max_idle_secs = Some(max_idle_secs);
        self
    }

    /// Publish empty replies for messages that decode to nothing.
    pub fn with_reply_on_empty_decode(mut self, enabled: bool) -> Self {
        self.reply_on_empty_decode = enabled;
        self
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        tracing::debug!(path = %path.display(), topics = config.topics.len(), "Loaded consumer config");
        Ok(config)
    }

    /// Check the config for mistakes that would only surface per message.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.trim().is_empty() {
            return Err(ConfigError::Invalid("queue name must not be empty".into()));
        }
        if self.connection.trim().is_empty() {
            return Err(ConfigError::Invalid("connection must not be empty".into()));
        }
        if self.handler_timeout_secs == 0 {
            return Err(ConfigError::Invalid("handler_timeout_secs must be positive".into()));
        }
        if self.max_messages == Some(0) {
            return Err(ConfigError::Invalid("max_messages must be positive".into()));
        }
        if self.topics.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "consumer '{}' has no topics",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for topic in &self.topics {
            if !seen.insert(topic.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "topic '{}' is configured twice",
                    topic.name
                )));
            }
            if topic.handlers.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "topic '{}' has no handlers",
                    topic.name
                )));
            }
        }
        Ok(())
    }

    /// Connection replies for `topic` are published on.
    pub fn connection_for(&self, topic: &TopicConfig) -> String {
        topic
            .connection
            .clone()
            .unwrap_or_else(|| self.connection.clone())
    }

    /// Handler timeout as a duration.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Idle cut-off as a duration.
    pub fn max_idle(&self) -> Option<Duration> {
        self.max_idle_secs.map(Duration::from_secs)
    }
}
