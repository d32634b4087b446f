//! Broker seam: outbound publishing and inbound dispatch.

mod dispatcher;
mod sender;

pub use dispatcher::{HandlerOutcome, InboundDispatcher, MessageHandler};
pub use sender::MessageSender;

use async_trait::async_trait;

/// Errors from the broker collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("No topic for message type {0}")]
    NoRoute(String),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Topic-based publish, at-least-once.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Resolves once the broker acknowledged the publish.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}
