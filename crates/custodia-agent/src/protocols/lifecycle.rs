//! Guarded record transitions shared by every service.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{AgentError, Result};
use crate::events::{EventBus, RecordStateChanged};
use crate::record::{ExchangeState, ProtocolRecord, ProtocolStateError};
use crate::storage::{RecordDatabase, Repository, Tags};
use crate::waiter::{CompletionWaiter, WaitError};

/// Store access plus event emission for one record type.
pub(crate) struct RecordLifecycle<R> {
    repository: Repository<R>,
    events: EventBus,
    context_id: String,
    in_flight: Mutex<HashSet<String>>,
}

/// A record id reserved for one response.
pub(crate) struct ResponseClaim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> ResponseClaim<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        let fresh = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
        fresh.then(|| Self {
            in_flight,
            id: id.to_string(),
        })
    }
}

impl Drop for ResponseClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl<R: ProtocolRecord> RecordLifecycle<R> {
    pub(crate) fn new(
        database: RecordDatabase,
        events: EventBus,
        context_id: String,
    ) -> Self {
        Self {
            repository: Repository::new(database),
            events,
            context_id,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) const fn repository(&self) -> &Repository<R> {
        &self.repository
    }

    fn emit(&self, previous: Option<R::State>, record: &R) {
        match RecordStateChanged::from_record(&self.context_id, previous, record) {
            Ok(event) => self.events.publish(event),
            Err(e) => warn!(record_id = %record.id(), error = %e, "Record event not encodable"),
        }
    }

    /// Persist a new record.
    pub(crate) async fn create(&self, record: &R) -> Result<()> {
        self.repository.save(record).await?;
        info!(
            record_type = R::RECORD_TYPE,
            record_id = %record.id(),
            state = %record.state(),
            "Record created"
        );
        self.emit(None, record);
        Ok(())
    }

    /// Load a record by its correlation id.
    pub(crate) async fn get(&self, id: &str) -> Result<R> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| AgentError::not_found(R::RECORD_TYPE, id))
    }

    pub(crate) async fn find(&self, query: &Tags) -> Result<Vec<R>> {
        Ok(self.repository.find_by_query(query).await?)
    }

    pub(crate) async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.repository.delete(id).await?)
    }

    /// Move `record` to `next` and persist it.
    ///
    /// The write only lands if the stored record is still in the state
    /// `record` was read in; otherwise the stored record wins and the
    /// in-memory one keeps its previous state. Terminal records refuse.
    pub(crate) async fn transition(&self, record: &mut R, next: R::State) -> Result<()> {
        let previous = record.state();
        if previous.is_terminal() {
            return Err(Self::terminal(record.id(), previous).into());
        }

        record.set_state(next);
        let written = self.repository.update_from(record, previous).await;
        match written {
            Ok(true) => {}
            Ok(false) => {
                record.set_state(previous);
                return Err(self.stale(record.id(), previous).await.into());
            }
            Err(e) => {
                record.set_state(previous);
                return Err(e.into());
            }
        }

        info!(
            record_type = R::RECORD_TYPE,
            record_id = %record.id(),
            from = %previous,
            to = %next,
            "Record state changed"
        );
        self.emit(Some(previous), record);
        Ok(())
    }

    fn terminal(id: &str, state: R::State) -> ProtocolStateError {
        ProtocolStateError::Terminal {
            record_type: R::RECORD_TYPE,
            record_id: id.to_string(),
            state: state.to_string(),
        }
    }

    async fn stale(&self, id: &str, expected: R::State) -> ProtocolStateError {
        let actual = match self.repository.find_by_id(id).await {
            Ok(Some(stored)) => stored.state(),
            _ => expected,
        };
        if actual.is_terminal() {
            return Self::terminal(id, actual);
        }
        ProtocolStateError::InvalidState {
            record_type: R::RECORD_TYPE,
            record_id: id.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Reserve `id` for one response and load it. The record must be a
    /// requester record in `request-sent`; a second response for the same
    /// id while the first is still running is refused. The reservation is
    /// released when the returned claim drops.
    pub(crate) async fn claim_response(&self, id: &str) -> Result<(ResponseClaim<'_>, R)> {
        let claim = ResponseClaim::acquire(&self.in_flight, id).ok_or_else(|| {
            ProtocolStateError::ResponseInProgress {
                record_type: R::RECORD_TYPE,
                record_id: id.to_string(),
            }
        })?;
        let record = self.get(id).await?;
        record.assert_awaiting_response()?;
        Ok((claim, record))
    }

    /// Move a failed exchange to `abandoned`. Errors here are logged only;
    /// the caller reports the original failure.
    pub(crate) async fn abandon(&self, record: &mut R, reason: &AgentError) {
        if record.state().is_terminal() {
            return;
        }
        warn!(
            record_type = R::RECORD_TYPE,
            record_id = %record.id(),
            error = %reason,
            "Abandoning record"
        );
        if let Err(e) = self.transition(record, R::State::ABANDONED).await {
            warn!(record_id = %record.id(), error = %e, "Failed to abandon record");
        }
    }

    /// Pass `result` through, abandoning `record` if it is an error.
    pub(crate) async fn abandon_on_error<T>(&self, record: &mut R, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.abandon(record, e).await;
        }
        result
    }

    /// Wait until the record is `completed`. An abandoned record is an error.
    pub(crate) async fn wait_for_completion(&self, id: &str, timeout: Duration) -> Result<R> {
        let waiter = CompletionWaiter::<R>::subscribe(&self.events, &self.context_id, id)
            .with_store(self.repository.clone());
        let current = self.repository.find_by_id(id).await?;
        if current.is_none() {
            return Err(AgentError::not_found(R::RECORD_TYPE, id));
        }

        let record = waiter
            .wait(current, |r| r.state().is_terminal(), timeout)
            .await
            .map_err(|e| match e {
                WaitError::Timeout(after) => AgentError::Timeout {
                    record_id: id.to_string(),
                    after,
                },
                WaitError::Closed => AgentError::Timeout {
                    record_id: id.to_string(),
                    after: timeout,
                },
                WaitError::Decode(e) => AgentError::Storage(e.into()),
                WaitError::Store(e) => AgentError::Storage(e),
            })?;

        if record.state() == R::State::ABANDONED {
            return Err(AgentError::Abandoned {
                record_type: R::RECORD_TYPE,
                record_id: id.to_string(),
            });
        }
        Ok(record)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::tests::{DummyRecord, DummyState};

    async fn lifecycle() -> RecordLifecycle<DummyRecord> {
        RecordLifecycle::new(
            RecordDatabase::open_in_memory().await.unwrap(),
            EventBus::default(),
            "ctx".into(),
        )
    }

    #[tokio::test]
    async fn transition_persists_and_emits() {
        let lc = lifecycle().await;
        let mut rx = lc.events.subscribe();
        let mut record = DummyRecord::new("r1", "x");
        lc.create(&record).await.unwrap();
        lc.transition(&mut record, DummyState::RequestSent).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().previous_state, None);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.previous_state.as_deref(), Some("start"));
        assert_eq!(event.state, "request-sent");
        assert_eq!(lc.get("r1").await.unwrap().state, DummyState::RequestSent);
    }

    #[tokio::test]
    async fn terminal_records_refuse_transitions() {
        let lc = lifecycle().await;
        let mut record = DummyRecord::new("r1", "x");
        lc.create(&record).await.unwrap();
        lc.transition(&mut record, DummyState::Completed).await.unwrap();

        let err = lc
            .transition(&mut record, DummyState::RequestSent)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::ProtocolState(ProtocolStateError::Terminal { .. })
        ));
        assert_eq!(lc.get("r1").await.unwrap().state, DummyState::Completed);
    }

    #[tokio::test]
    async fn failed_store_write_keeps_previous_state() {
        let lc = lifecycle().await;
        let mut record = DummyRecord::new("never-saved", "x");
        assert!(lc.transition(&mut record, DummyState::RequestSent).await.is_err());
        assert_eq!(record.state, DummyState::Start);
    }

    #[tokio::test]
    async fn abandon_on_error_marks_record() {
        let lc = lifecycle().await;
        let mut record = DummyRecord::new("r1", "x");
        lc.create(&record).await.unwrap();
        lc.transition(&mut record, DummyState::RequestSent).await.unwrap();

        let result: Result<()> = Err(AgentError::KeyMismatch);
        assert!(lc.abandon_on_error(&mut record, result).await.is_err());
        assert_eq!(lc.get("r1").await.unwrap().state, DummyState::Abandoned);
    }

    #[tokio::test]
    async fn wait_reports_abandoned_and_unknown_records() {
        let lc = lifecycle().await;
        let mut record = DummyRecord::new("r1", "x");
        lc.create(&record).await.unwrap();
        lc.transition(&mut record, DummyState::Abandoned).await.unwrap();

        assert!(matches!(
            lc.wait_for_completion("r1", Duration::from_millis(10)).await,
            Err(AgentError::Abandoned { .. })
        ));
        assert!(matches!(
            lc.wait_for_completion("missing", Duration::from_millis(10)).await,
            Err(AgentError::RecordNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn wait_times_out_on_pending_record() {
        let lc = lifecycle().await;
        let mut record = DummyRecord::new("r1", "x");
        lc.create(&record).await.unwrap();
        lc.transition(&mut record, DummyState::RequestSent).await.unwrap();

        assert!(matches!(
            lc.wait_for_completion("r1", Duration::from_millis(10)).await,
            Err(AgentError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn stale_copy_cannot_move_a_completed_record() {
        let lc = lifecycle().await;
        let mut record = DummyRecord::new("r1", "x");
        lc.create(&record).await.unwrap();
        lc.transition(&mut record, DummyState::RequestSent).await.unwrap();

        let mut stale = record.clone();
        lc.transition(&mut record, DummyState::Completed).await.unwrap();

        let err = lc
            .transition(&mut stale, DummyState::Abandoned)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::ProtocolState(ProtocolStateError::Terminal { .. })
        ));
        assert_eq!(stale.state, DummyState::RequestSent);

        lc.abandon(&mut stale, &AgentError::KeyMismatch).await;
        assert_eq!(lc.get("r1").await.unwrap().state, DummyState::Completed);
    }

    #[tokio::test]
    async fn second_claim_on_the_same_record_is_refused() {
        let lc = lifecycle().await;
        let mut record = DummyRecord::new("r1", "x");
        lc.create(&record).await.unwrap();
        lc.transition(&mut record, DummyState::RequestSent).await.unwrap();

        let (claim, _) = lc.claim_response("r1").await.unwrap();
        assert!(matches!(
            lc.claim_response("r1").await,
            Err(AgentError::ProtocolState(
                ProtocolStateError::ResponseInProgress { .. }
            ))
        ));

        drop(claim);
        assert!(lc.claim_response("r1").await.is_ok());
    }
}
