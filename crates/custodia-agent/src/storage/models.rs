//! Database models for the record store.

use serde::{Deserialize, Serialize};

/// A protocol record row. `value` is the record's JSON.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredRecord {
    pub record_type: String,
    pub id: String,
    pub value: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Record tags used by `find_by_query`; every tag must match.
pub type Tags = std::collections::BTreeMap<String, String>;
