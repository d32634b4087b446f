//! Database connection and initialization.

pub use custodia_core::db::DatabaseError;

custodia_core::define_database!(RecordDatabase, "Record store migrations complete");
