//! Record state change fan-out.
//!
//! Every persisted transition is published here. Waiters subscribe before
//! sending a request so a fast response cannot slip past them.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::record::{ExchangeState, ProtocolRecord};

const DEFAULT_CAPACITY: usize = 256;

/// A record moved from `previous_state` to `state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordStateChanged {
    pub context_id: String,
    pub record_type: &'static str,
    pub record_id: String,
    /// `None` when the record was just created.
    pub previous_state: Option<String>,
    pub state: String,
    /// Snapshot of the record after the change.
    pub record: Value,
}

impl RecordStateChanged {
    pub(crate) fn from_record<R: ProtocolRecord>(
        context_id: &str,
        previous_state: Option<R::State>,
        record: &R,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            context_id: context_id.to_string(),
            record_type: R::RECORD_TYPE,
            record_id: record.id().to_string(),
            previous_state: previous_state.map(|s| s.as_str().to_string()),
            state: record.state().as_str().to_string(),
            record: serde_json::to_value(record)?,
        })
    }

    /// Decode the snapshot back into the concrete record type.
    pub fn decode<R: ProtocolRecord>(&self) -> Option<Result<R, serde_json::Error>> {
        (self.record_type == R::RECORD_TYPE).then(|| serde_json::from_value(self.record.clone()))
    }
}

/// Broadcast channel for [`RecordStateChanged`].
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RecordStateChanged>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordStateChanged> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: RecordStateChanged) {
        let receivers = self.tx.send(event).unwrap_or(0);
        trace!(receivers, "Record event published");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::tests::{DummyRecord, DummyState};

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let mut record = DummyRecord::new("r1", "blue");
        record.state = DummyState::Completed;
        let event =
            RecordStateChanged::from_record("ctx", Some(DummyState::RequestSent), &record).unwrap();
        bus.publish(event);

        let got = rx.recv().await.unwrap();
        assert_eq!(got.record_id, "r1");
        assert_eq!(got.previous_state.as_deref(), Some("request-sent"));
        assert_eq!(got.state, "completed");
        assert_eq!(got.decode::<DummyRecord>().unwrap().unwrap(), record);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        let record = DummyRecord::new("r1", "blue");
        bus.publish(RecordStateChanged::from_record("ctx", None, &record).unwrap());
    }
}
