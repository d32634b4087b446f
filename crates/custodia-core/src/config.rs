//! Configuration resolution for Custodia.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/custodia/settings.json)
//! 3. Project config (.custodia/settings.json)
//! 4. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default bound for waiting on a custodian round-trip.
pub const DEFAULT_COMPLETION_TIMEOUT_MS: u64 = 20_000;

/// Complete Custodia configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub custody: CustodyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity of this device towards the custodian.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Human-readable label sent with signature requests.
    pub label: String,
    /// Prefix of every broker topic this device publishes or subscribes to.
    pub device_id: String,
    /// Logical context correlation id the device key is bound to.
    pub context_id: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            label: "custodia-agent".to_string(),
            device_id: String::new(),
            context_id: "default".to_string(),
        }
    }
}

/// Record store location.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// `None` keeps records in memory for the lifetime of the process.
    pub database_path: Option<PathBuf>,
}

/// Custodian round-trip tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CustodyConfig {
    pub completion_timeout_ms: u64,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            completion_timeout_ms: DEFAULT_COMPLETION_TIMEOUT_MS,
        }
    }
}

impl CustodyConfig {
    pub const fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Reject configurations the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.agent.device_id.trim().is_empty() {
            return Err(Error::Config("agent.device_id must not be empty".into()));
        }
        if self.agent.context_id.trim().is_empty() {
            return Err(Error::Config("agent.context_id must not be empty".into()));
        }
        if self.custody.completion_timeout_ms == 0 {
            return Err(Error::Config(
                "custody.completion_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        let global = load_config_file(&global_path)?;
        merge_config(&mut config, global);
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".custodia").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".custodia").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/custodia/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("custodia").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    let defaults = AgentConfig::default();
    if overlay.agent.label != defaults.label {
        base.agent.label = overlay.agent.label;
    }
    if !overlay.agent.device_id.is_empty() {
        base.agent.device_id = overlay.agent.device_id;
    }
    if overlay.agent.context_id != defaults.context_id {
        base.agent.context_id = overlay.agent.context_id;
    }

    if overlay.storage.database_path.is_some() {
        base.storage.database_path = overlay.storage.database_path;
    }

    if overlay.custody != CustodyConfig::default() {
        base.custody = overlay.custody;
    }

    let default_logging = LoggingConfig::default();
    if overlay.logging.level != default_logging.level {
        base.logging.level = overlay.logging.level;
    }
    if overlay.logging.json {
        base.logging.json = true;
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("CUSTODIA_DEVICE_ID") {
        config.agent.device_id = val;
    }
    if let Ok(val) = std::env::var("CUSTODIA_LABEL") {
        config.agent.label = val;
    }
    if let Ok(val) = std::env::var("CUSTODIA_CONTEXT_ID") {
        config.agent.context_id = val;
    }
    if let Ok(val) = std::env::var("CUSTODIA_DATABASE_PATH") {
        config.storage.database_path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("CUSTODIA_COMPLETION_TIMEOUT_MS")
        && let Ok(n) = val.parse()
    {
        config.custody.completion_timeout_ms = n;
    }
    if let Ok(val) = std::env::var("CUSTODIA_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Ok(val) = std::env::var("CUSTODIA_LOG_JSON") {
        config.logging.json = matches!(val.as_str(), "1" | "true" | "yes");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_20s_completion_timeout() {
        let config = Config::default();
        assert_eq!(config.custody.completion_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn default_config_requires_device_id() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = Config::default();
        config.agent.device_id = "device-1".into();
        config.custody.completion_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"agent": {"device_id": "device-7"}}"#).unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.agent.device_id, "device-7");
        assert_eq!(config.agent.context_id, "default");
        assert_eq!(
            config.custody.completion_timeout_ms,
            DEFAULT_COMPLETION_TIMEOUT_MS
        );
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_config_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn project_overlay_replaces_identity_and_keeps_base_path() {
        let mut base = Config::default();
        base.storage.database_path = Some(PathBuf::from("/var/lib/custodia/records.db"));

        let mut overlay = Config::default();
        overlay.agent.device_id = "device-9".into();
        overlay.agent.label = "kiosk".into();
        overlay.custody.completion_timeout_ms = 5_000;

        merge_config(&mut base, overlay);
        assert_eq!(base.agent.device_id, "device-9");
        assert_eq!(base.agent.label, "kiosk");
        assert_eq!(base.custody.completion_timeout_ms, 5_000);
        assert_eq!(
            base.storage.database_path,
            Some(PathBuf::from("/var/lib/custodia/records.db"))
        );
    }

    #[test]
    fn overlay_without_custody_or_logging_keeps_base_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"agent": {"device_id": "device-3"}}"#).unwrap();

        let mut base = Config::default();
        base.custody.completion_timeout_ms = 45_000;
        base.logging.level = "debug".into();
        base.logging.json = true;

        merge_config(&mut base, load_config_file(&path).unwrap());
        assert_eq!(base.agent.device_id, "device-3");
        assert_eq!(base.custody.completion_timeout_ms, 45_000);
        assert_eq!(base.logging.level, "debug");
        assert!(base.logging.json);
    }
}
