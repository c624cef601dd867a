//! Publishes replies to the queue named by the request.

use std::sync::Arc;

use rpc_core::{Envelope, MessageQueue, QueueDirectory, RpcError};

use crate::bindings::TopicBindings;

/// Sends reply bodies to the request's `reply_to` queue, on the connection
/// configured for the request's topic.
pub struct ReplyRouter<D> {
    bindings: Arc<TopicBindings>,
    directory: Arc<D>,
}

impl<D: QueueDirectory> ReplyRouter<D> {
    pub fn new(bindings: Arc<TopicBindings>, directory: Arc<D>) -> Self {
        Self {
            bindings,
            directory,
        }
    }

    /// Publish `reply_body` as the reply to `original`.
    ///
    /// Returns the name of the queue the reply went to.
    pub async fn send_response(&self, original: &Envelope, reply_body: Vec<u8>) -> Result<String, RpcError> {
        let topic = original.topic_name()?;
        let reply_to = original.reply_to()?;
        let connection = self.bindings.connection_for(topic)?;

        let queue = self.directory.resolve(connection, reply_to).await?;
        queue.push(original, reply_body).await?;

        tracing::debug!(topic, connection, reply_to, "Reply published");
        Ok(reply_to.to_string())
    }
}

impl<D> Clone for ReplyRouter<D> {
    fn clone(&self) -> Self {
        Self {
            bindings: self.bindings.clone(),
            directory: self.directory.clone(),
        }
    }
}
