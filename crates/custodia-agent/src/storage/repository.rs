//! Typed access to one kind of protocol record.

use std::marker::PhantomData;

use super::db::{DatabaseError, RecordDatabase};
use super::models::{StoredRecord, Tags};
use crate::record::{ExchangeState, ProtocolRecord};

/// Repository for records of type `R`, stored as JSON under `R::RECORD_TYPE`.
pub struct Repository<R> {
    db: RecordDatabase,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for Repository<R> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _record: PhantomData,
        }
    }
}

impl<R> std::fmt::Debug for Repository<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("record_type", &std::any::type_name::<R>())
            .finish_non_exhaustive()
    }
}

impl<R: ProtocolRecord> Repository<R> {
    pub const fn new(db: RecordDatabase) -> Self {
        Self {
            db,
            _record: PhantomData,
        }
    }

    fn decode(row: &StoredRecord) -> Result<R, DatabaseError> {
        Ok(serde_json::from_str(&row.value)?)
    }

    pub async fn save(&self, record: &R) -> Result<(), DatabaseError> {
        let value = serde_json::to_string(record)?;
        self.db
            .insert_record(R::RECORD_TYPE, record.id(), &value, &record.tags())
            .await
    }

    pub async fn update(&self, record: &R) -> Result<(), DatabaseError> {
        let value = serde_json::to_string(record)?;
        self.db
            .update_record(R::RECORD_TYPE, record.id(), &value, &record.tags())
            .await
    }

    /// Compare-and-set on the stored state. `false` means the stored
    /// record is no longer in `expected`.
    pub async fn update_from(
        &self,
        record: &R,
        expected: R::State,
    ) -> Result<bool, DatabaseError> {
        let value = serde_json::to_string(record)?;
        self.db
            .update_record_in_state(
                R::RECORD_TYPE,
                record.id(),
                expected.as_str(),
                &value,
                &record.tags(),
            )
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        self.db.delete_record(R::RECORD_TYPE, id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<R, DatabaseError> {
        Self::decode(&self.db.get_record(R::RECORD_TYPE, id).await?)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<R>, DatabaseError> {
        self.db
            .find_record(R::RECORD_TYPE, id)
            .await?
            .as_ref()
            .map(Self::decode)
            .transpose()
    }

    pub async fn find_by_query(&self, query: &Tags) -> Result<Vec<R>, DatabaseError> {
        self.db
            .find_records(R::RECORD_TYPE, query)
            .await?
            .iter()
            .map(Self::decode)
            .collect()
    }

    /// At most one match; more than one is a query error.
    pub async fn find_single_by_query(&self, query: &Tags) -> Result<Option<R>, DatabaseError> {
        let mut matches = self.find_by_query(query).await?;
        match matches.len() {
            0 | 1 => Ok(matches.pop()),
            n => Err(DatabaseError::Query(format!(
                "expected at most one {} record, found {n}",
                R::RECORD_TYPE
            ))),
        }
    }
}
