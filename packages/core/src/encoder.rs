//! Message body encoding.

use serde_json::{Map, Value};

use crate::RpcError;

/// Converts message bodies to handler arguments and handler results back
/// to reply bodies, per topic.
pub trait MessageEncoder: Send + Sync + 'static {
    /// Decode a body. `Ok(None)` means there is nothing to process.
    fn decode(&self, topic: &str, body: &[u8]) -> Result<Option<Value>, RpcError>;

    /// Encode a handler result into a reply body.
    fn encode(&self, topic: &str, value: &Value, include_metadata: bool) -> Result<Vec<u8>, RpcError>;
}

/// JSON message encoder.
///
/// Empty bodies and a JSON `null` decode to nothing. With metadata, the
/// encoded value is wrapped as `{"topic_name": .., "body": ..}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl JsonEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl MessageEncoder for JsonEncoder {
    fn decode(&self, topic: &str, body: &[u8]) -> Result<Option<Value>, RpcError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let value: Value = serde_json::from_slice(body).map_err(|e| RpcError::Decode {
            topic: topic.to_string(),
            message: e.to_string(),
        })?;

        Ok(match value {
            Value::Null => None,
            other => Some(other),
        })
    }

    fn encode(&self, topic: &str, value: &Value, include_metadata: bool) -> Result<Vec<u8>, RpcError> {
        let encoded = if include_metadata {
            let mut wrapper = Map::new();
            wrapper.insert("topic_name".to_string(), Value::String(topic.to_string()));
            wrapper.insert("body".to_string(), value.clone());
            serde_json::to_vec(&Value::Object(wrapper))
        } else {
            serde_json::to_vec(value)
        };

        encoded.map_err(|e| RpcError::Encode {
            topic: topic.to_string(),
            message: e.to_string(),
        })
    }
}
