//! Routes a request envelope to its topic handler.

use std::sync::Arc;
use std::time::Duration;

use rpc_core::{Envelope, MessageEncoder, RpcError};

use crate::bindings::TopicBindings;
use crate::handler::HandlerArgs;

/// Decodes requests, invokes the topic handler and encodes its reply.
pub struct Dispatcher<E> {
    bindings: Arc<TopicBindings>,
    encoder: Arc<E>,
    handler_timeout: Duration,
}

impl<E: MessageEncoder> Dispatcher<E> {
    pub fn new(bindings: Arc<TopicBindings>, encoder: Arc<E>, handler_timeout: Duration) -> Self {
        Self {
            bindings,
            encoder,
            handler_timeout,
        }
    }

    /// Dispatch `envelope` and return the encoded reply body.
    ///
    /// Returns `Ok(None)` when the body decodes to nothing; such a message is
    /// a no-op rather than a failure. A handler that answers with nothing is
    /// an error, since the caller is waiting for a reply.
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<Option<Vec<u8>>, RpcError> {
        let topic = envelope.topic_name()?;

        let Some(decoded) = self.encoder.decode(topic, envelope.body())? else {
            tracing::debug!(topic, envelope_id = %envelope.id(), "Message decoded to nothing");
            return Ok(None);
        };

        let binding = self.bindings.binding(topic)?;
        let handler = binding
            .primary_handler()
            .ok_or_else(|| RpcError::UnknownTopic(topic.to_string()))?;

        let args = HandlerArgs::shape(binding.schema(), decoded);

        tracing::debug!(topic, handler = handler.name(), "Invoking handler");
        let result = tokio::time::timeout(self.handler_timeout, handler.handle(args))
            .await
            .map_err(|_| RpcError::HandlerTimeout {
                handler: handler.name().to_string(),
                timeout_secs: self.handler_timeout.as_secs(),
            })?
            .map_err(|message| RpcError::Handler {
                handler: handler.name().to_string(),
                message,
            })?;

        match result {
            Some(value) if !value.is_null() => {
                let body = self.encoder.encode(topic, &value, false)?;
                Ok(Some(body))
            }
            _ => Err(RpcError::NoReply {
                topic: topic.to_string(),
            }),
        }
    }

    pub fn bindings(&self) -> &TopicBindings {
        &self.bindings
    }
}

impl<E> Clone for Dispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            bindings: self.bindings.clone(),
            encoder: self.encoder.clone(),
            handler_timeout: self.handler_timeout,
        }
    }
}

