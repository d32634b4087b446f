//! Per-agent identity carried through every handler call.

use custodia_core::Config;

/// Identity of the agent that owns a set of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentContext {
    /// Correlates a device with its custodian-held key.
    pub context_id: String,
    pub label: String,
    /// Prefix of every topic this agent publishes or subscribes to.
    pub device_id: String,
}

impl AgentContext {
    pub fn new(
        context_id: impl Into<String>,
        label: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            context_id: context_id.into(),
            label: label.into(),
            device_id: device_id.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.agent.context_id.clone(),
            config.agent.label.clone(),
            config.agent.device_id.clone(),
        )
    }
}
