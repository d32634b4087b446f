//! `Custodia` Core Library
//!
//! Shared functionality for `Custodia` components:
//! - Configuration resolution and hierarchy
//! - Tracing subscriber setup
//! - `SQLite` pool helpers and the `define_database!` macro
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
