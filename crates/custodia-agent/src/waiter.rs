//! Wait for a record to reach a state.
//!
//! Subscribe first, then read the record's current value, then wait: the
//! subscription is live before the read so no transition is missed. A
//! waiter that falls behind the bus re-reads the record from the store.

use std::marker::PhantomData;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::events::{EventBus, RecordStateChanged};
use crate::record::ProtocolRecord;
use crate::storage::{DatabaseError, Repository};

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Event bus closed")]
    Closed,

    #[error("Event snapshot did not decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Record reload failed: {0}")]
    Store(#[from] DatabaseError),
}

/// A live subscription filtered to one record.
pub struct CompletionWaiter<R> {
    rx: broadcast::Receiver<RecordStateChanged>,
    context_id: String,
    record_id: String,
    store: Option<Repository<R>>,
    _record: PhantomData<fn() -> R>,
}

impl<R> std::fmt::Debug for CompletionWaiter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionWaiter")
            .field("context_id", &self.context_id)
            .field("record_id", &self.record_id)
            .finish_non_exhaustive()
    }
}

impl<R: ProtocolRecord> CompletionWaiter<R> {
    pub fn subscribe(
        bus: &EventBus,
        context_id: impl Into<String>,
        record_id: impl Into<String>,
    ) -> Self {
        Self {
            rx: bus.subscribe(),
            context_id: context_id.into(),
            record_id: record_id.into(),
            store: None,
            _record: PhantomData,
        }
    }

    /// Reload from `store` when events were dropped before this waiter
    /// read them.
    #[must_use]
    pub fn with_store(mut self, store: Repository<R>) -> Self {
        self.store = Some(store);
        self
    }

    async fn reload(&self) -> Result<Option<R>, WaitError> {
        match &self.store {
            Some(store) => Ok(store.find_by_id(&self.record_id).await?),
            None => Ok(None),
        }
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    fn matches(&self, event: &RecordStateChanged) -> bool {
        event.record_type == R::RECORD_TYPE
            && event.context_id == self.context_id
            && event.record_id == self.record_id
    }

    /// Resolve with the first record value satisfying `predicate`.
    ///
    /// `current` is checked before any event; a match returns without
    /// waiting.
    pub async fn wait<F>(
        mut self,
        current: Option<R>,
        predicate: F,
        timeout: Duration,
    ) -> Result<R, WaitError>
    where
        F: Fn(&R) -> bool,
    {
        if let Some(record) = current
            && predicate(&record)
        {
            return Ok(record);
        }

        let wait_loop = async {
            loop {
                match self.rx.recv().await {
                    Ok(event) if self.matches(&event) => {
                        if let Some(decoded) = event.decode::<R>() {
                            let record = match decoded {
                                Ok(record) => record,
                                Err(e) => return Err(WaitError::Decode(e)),
                            };
                            if predicate(&record) {
                                return Ok(record);
                            }
                            debug!(
                                record_id = %self.record_id,
                                state = %event.state,
                                "Record changed, still waiting"
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(record_id = %self.record_id, skipped, "Waiter lagged behind events");
                        match self.reload().await {
                            Ok(Some(record)) if predicate(&record) => return Ok(record),
                            Ok(_) => {}
                            Err(e) => return Err(e),
                        }
                    }
                    Err(RecvError::Closed) => return Err(WaitError::Closed),
                }
            }
        };

        match tokio::time::timeout(timeout, wait_loop).await {
            Ok(result) => result,
            Err(_) => Err(WaitError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::ExchangeState;
    use crate::record::tests::{DummyRecord, DummyState};
    use crate::storage::RecordDatabase;

    fn event(record: &DummyRecord, context: &str) -> RecordStateChanged {
        RecordStateChanged::from_record(context, None, record).unwrap()
    }

    fn completed(id: &str) -> DummyRecord {
        let mut record = DummyRecord::new(id, "x");
        record.state = DummyState::Completed;
        record
    }

    #[tokio::test]
    async fn returns_current_when_already_matching() {
        let bus = EventBus::default();
        let waiter = CompletionWaiter::<DummyRecord>::subscribe(&bus, "ctx", "r1");
        let got = waiter
            .wait(
                Some(completed("r1")),
                |r| r.state.is_terminal(),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert_eq!(got.state, DummyState::Completed);
    }

    #[tokio::test]
    async fn ignores_other_records_and_contexts() {
        let bus = EventBus::default();
        let waiter = CompletionWaiter::<DummyRecord>::subscribe(&bus, "ctx", "r1");

        bus.publish(event(&completed("r2"), "ctx"));
        bus.publish(event(&completed("r1"), "other-ctx"));
        bus.publish(event(&DummyRecord::new("r1", "x"), "ctx"));
        bus.publish(event(&completed("r1"), "ctx"));

        let got = waiter
            .wait(None, |r| r.state == DummyState::Completed, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(got.id, "r1");
    }

    #[tokio::test]
    async fn times_out() {
        let bus = EventBus::default();
        let waiter = CompletionWaiter::<DummyRecord>::subscribe(&bus, "ctx", "r1");
        let result = waiter
            .wait(
                Some(DummyRecord::new("r1", "x")),
                |r| r.state.is_terminal(),
                Duration::from_millis(20),
            )
            .await;
        assert!(matches!(result, Err(WaitError::Timeout(_))));
    }

    #[tokio::test]
    async fn resolves_from_concurrent_publish() {
        let bus = EventBus::default();
        let waiter = CompletionWaiter::<DummyRecord>::subscribe(&bus, "ctx", "r1");
        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            publisher.publish(event(&completed("r1"), "ctx"));
        });

        let got = waiter
            .wait(None, |r| r.state.is_terminal(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(got.state, DummyState::Completed);
    }

    #[tokio::test]
    async fn lagged_waiter_resolves_from_store() {
        let bus = EventBus::new(1);
        let repository =
            Repository::<DummyRecord>::new(RecordDatabase::open_in_memory().await.unwrap());
        repository.save(&completed("r1")).await.unwrap();

        let waiter =
            CompletionWaiter::<DummyRecord>::subscribe(&bus, "ctx", "r1").with_store(repository);
        // The completion event is overwritten before the waiter reads it.
        bus.publish(event(&completed("r1"), "ctx"));
        bus.publish(event(&DummyRecord::new("r2", "x"), "ctx"));

        let got = waiter
            .wait(None, |r| r.state.is_terminal(), Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(got.state, DummyState::Completed);
    }

    #[tokio::test]
    async fn lagged_waiter_without_store_keeps_waiting() {
        let bus = EventBus::new(1);
        let waiter = CompletionWaiter::<DummyRecord>::subscribe(&bus, "ctx", "r1");
        bus.publish(event(&completed("r1"), "ctx"));
        bus.publish(event(&DummyRecord::new("r2", "x"), "ctx"));

        let result = waiter
            .wait(None, |r| r.state.is_terminal(), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(WaitError::Timeout(_))));
    }
}
