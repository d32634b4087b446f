//! Hand-off of decrypted messages to the rest of the agent.

use async_trait::async_trait;
use custodia_crypto::Key;
use serde_json::Value;
use tokio::sync::mpsc;

/// A message decrypted with custodian help, shaped like a local unpack.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedMessageContext {
    pub plaintext: Value,
    pub sender_key: Option<Key>,
    pub recipient_key: Key,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("Inbound pipeline closed")]
    Closed,

    #[error("Inbound pipeline rejected message: {0}")]
    Rejected(String),
}

/// Consumer of decrypted inbound messages.
#[async_trait]
pub trait InboundPipeline: Send + Sync {
    async fn receive(&self, message: DecryptedMessageContext) -> Result<(), PipelineError>;
}

/// Pipeline backed by an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelPipeline {
    tx: mpsc::Sender<DecryptedMessageContext>,
}

impl ChannelPipeline {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DecryptedMessageContext>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl InboundPipeline for ChannelPipeline {
    async fn receive(&self, message: DecryptedMessageContext) -> Result<(), PipelineError> {
        self.tx.send(message).await.map_err(|_| PipelineError::Closed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message() -> DecryptedMessageContext {
        DecryptedMessageContext {
            plaintext: json!({"hello": "world"}),
            sender_key: None,
            recipient_key: Key::ed25519(vec![1; 32]),
        }
    }

    #[tokio::test]
    async fn forwards_to_receiver() {
        let (pipeline, mut rx) = ChannelPipeline::new(4);
        pipeline.receive(message()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), message());
    }

    #[tokio::test]
    async fn closed_receiver_is_reported() {
        let (pipeline, rx) = ChannelPipeline::new(1);
        drop(rx);
        assert_eq!(pipeline.receive(message()).await, Err(PipelineError::Closed));
    }
}
