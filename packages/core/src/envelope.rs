//! Envelope domain types for request and reply messages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::RpcError;

/// Well-known envelope property keys.
pub mod properties {
    /// Routing key used for decode, encode and configuration lookup.
    pub const TOPIC_NAME: &str = "topic_name";
    /// Name of the queue the response belongs on.
    pub const REPLY_TO: &str = "reply_to";
    /// Ties a reply back to the request that produced it.
    pub const CORRELATION_ID: &str = "correlation_id";
}

/// Unique identifier for an envelope, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(pub Ulid);

impl EnvelopeId {
    /// Create a new unique envelope ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse an envelope ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message body plus its routing and reply metadata.
///
/// Envelopes are immutable once built. Processing a request never changes it;
/// a reply is a new envelope created with [`Envelope::reply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    id: EnvelopeId,
    body: Vec<u8>,
    properties: BTreeMap<String, String>,
}

impl Envelope {
    /// Create an envelope with a fresh ID.
    pub fn new(body: impl Into<Vec<u8>>, properties: BTreeMap<String, String>) -> Self {
        Self::with_id(EnvelopeId::new(), body, properties)
    }

    /// Rebuild an envelope that already has an identity (e.g. loaded from storage).
    pub fn with_id(
        id: EnvelopeId,
        body: impl Into<Vec<u8>>,
        properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id,
            body: body.into(),
            properties,
        }
    }

    /// Build an RPC request for `topic` whose response belongs on `reply_to`.
    pub fn request(
        topic: impl Into<String>,
        reply_to: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        let mut props = BTreeMap::new();
        props.insert(properties::TOPIC_NAME.to_string(), topic.into());
        props.insert(properties::REPLY_TO.to_string(), reply_to.into());
        Self::new(body, props)
    }

    /// Add a property while a producer is still assembling the request.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The envelope's unique ID.
    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    /// The opaque message body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// All properties carried by this envelope.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Look up a single property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The topic this message was published on.
    pub fn topic_name(&self) -> Result<&str, RpcError> {
        self.property(properties::TOPIC_NAME)
            .ok_or(RpcError::MissingProperty(properties::TOPIC_NAME))
    }

    /// The queue the response to this message belongs on.
    pub fn reply_to(&self) -> Result<&str, RpcError> {
        self.property(properties::REPLY_TO)
            .ok_or(RpcError::MissingProperty(properties::REPLY_TO))
    }

    /// The correlation ID, if the producer set one.
    pub fn correlation_id(&self) -> Option<&str> {
        self.property(properties::CORRELATION_ID)
    }

    /// Create the reply envelope for this request.
    ///
    /// The reply keeps the topic name and correlation ID. When the request had
    /// no correlation ID, the request's envelope ID takes its place.
    pub fn reply(&self, body: impl Into<Vec<u8>>) -> Envelope {
        let mut props = BTreeMap::new();
        if let Some(topic) = self.property(properties::TOPIC_NAME) {
            props.insert(properties::TOPIC_NAME.to_string(), topic.to_string());
        }
        let correlation = self
            .correlation_id()
            .map_or_else(|| self.id.to_string(), str::to_string);
        props.insert(properties::CORRELATION_ID.to_string(), correlation);
        Envelope::new(body, props)
    }
}
