//! Shared tracing/logging initialization.
//!
//! Agents and test harnesses use the same pattern for setting up
//! `tracing_subscriber` with an env-filter and optional JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"custodia_agent=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
///
/// Panics if a global subscriber is already installed; use
/// [`try_init_tracing`] where that can happen.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Like [`init_tracing`] but reports an already-installed subscriber as an
/// error instead of panicking.
pub fn try_init_tracing(default_filter: &str, log_json: bool) -> Result<()> {
    let result = if log_json {
        tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };
    result.map_err(|e| Error::Tracing(e.to_string()))
}

/// Build the default filter string for a crate at the given level.
pub fn default_filter_for(crate_name: &str, level: &str) -> String {
    format!("{}={level}", crate_name.replace('-', "_"))
}
