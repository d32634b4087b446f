use std::sync::Arc;

use custodia_proto::ProtocolMessage;
use custodia_proto::topics::topic_for_message_type;
use tracing::debug;

use super::{Broker, TransportError};

/// Publishes typed messages on the device's request topics.
#[derive(Clone)]
pub struct MessageSender {
    broker: Arc<dyn Broker>,
    device_id: String,
}

impl std::fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSender")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl MessageSender {
    pub fn new(broker: Arc<dyn Broker>, device_id: impl Into<String>) -> Self {
        Self {
            broker,
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub async fn send<M: ProtocolMessage>(&self, message: &M) -> Result<(), TransportError> {
        let topic = topic_for_message_type(&self.device_id, M::MESSAGE_TYPE)
            .ok_or_else(|| TransportError::NoRoute(M::MESSAGE_TYPE.to_string()))?;
        let payload =
            serde_json::to_vec(message).map_err(|e| TransportError::Encoding(e.to_string()))?;

        debug!(
            topic = %topic,
            message_type = M::MESSAGE_TYPE,
            message_id = %message.id(),
            bytes = payload.len(),
            "Publishing message"
        );
        self.broker.publish(&topic, payload).await
    }
}
