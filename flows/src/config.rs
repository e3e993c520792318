use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Timeouts and retry budgets for the commit flows. Every field has a default,
/// so a config file only needs the values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// How many times a failed session is reopened before giving up on a party.
    pub session_retries: u32,
    pub signature_timeout_ms: u64,
    pub finality_ack_timeout_ms: u64,
    pub ordering_poll_attempts: u32,
    pub ordering_poll_interval_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            session_retries: 2,
            signature_timeout_ms: 5_000,
            finality_ack_timeout_ms: 2_000,
            ordering_poll_attempts: 3,
            ordering_poll_interval_ms: 100,
        }
    }
}

impl FlowConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse flow configuration")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    pub fn signature_timeout(&self) -> Duration {
        Duration::from_millis(self.signature_timeout_ms)
    }

    pub fn finality_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.finality_ack_timeout_ms)
    }

    pub fn ordering_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ordering_poll_interval_ms)
    }
}
