//! `SQLite` record store.
//!
//! Records are stored as JSON blobs keyed by `(record_type, id)` with a
//! side table of string tags for queries.

mod db;
mod models;
mod queries;
mod repository;


pub use db::{DatabaseError, RecordDatabase};
pub use models::{StoredRecord, Tags};
pub use repository::Repository;
