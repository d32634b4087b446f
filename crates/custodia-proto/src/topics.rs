//! Broker topic names.
//!
//! Requests go out on `{device_id}/{protocol}/request`; the custodian
//! answers on `{device_id}/{protocol}/response`.

use crate::types::{Direction, Protocol};

pub fn topic(device_id: &str, protocol: Protocol, direction: Direction) -> String {
    format!(
        "{device_id}/{}/{}",
        protocol.topic_segment(),
        direction.as_str()
    )
}

/// Topic a message of type `message_type` is published on.
pub fn topic_for_message_type(device_id: &str, message_type: &str) -> Option<String> {
    Protocol::from_message_type(message_type)
        .map(|(protocol, direction)| topic(device_id, protocol, direction))
}

/// Every topic a device publishes requests on.
pub fn outbound_topics(device_id: &str) -> Vec<String> {
    Protocol::ALL
        .iter()
        .map(|p| topic(device_id, *p, Direction::Request))
        .collect()
}

/// Every topic a device subscribes to for custodian responses.
pub fn inbound_topics(device_id: &str) -> Vec<String> {
    Protocol::ALL
        .iter()
        .map(|p| topic(device_id, *p, Direction::Response))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PUB_KEY_REQUEST, SIGNATURE_EXCHANGE_RESPONSE};

    #[test]
    fn pub_key_request_topic() {
        assert_eq!(
            topic_for_message_type("device-1", PUB_KEY_REQUEST).as_deref(),
            Some("device-1/pubKey/request")
        );
    }

    #[test]
    fn signature_response_topic() {
        assert_eq!(
            topic_for_message_type("device-1", SIGNATURE_EXCHANGE_RESPONSE).as_deref(),
            Some("device-1/signatureExchange/response")
        );
    }

    #[test]
    fn inbound_topics_cover_every_protocol() {
        let topics = inbound_topics("d");
        assert_eq!(topics.len(), Protocol::ALL.len());
        assert!(topics.iter().all(|t| t.starts_with("d/") && t.ends_with("/response")));
        assert!(topics.contains(&"d/distributedUnpack/response".to_string()));
    }

    #[test]
    fn outbound_topics_are_requests() {
        assert!(outbound_topics("d").iter().all(|t| t.ends_with("/request")));
    }

    #[test]
    fn unknown_type_has_no_topic() {
        assert_eq!(topic_for_message_type("d", "https://example.com/x"), None);
    }
}
