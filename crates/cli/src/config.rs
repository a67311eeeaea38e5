//! Client configuration

use fsqsb_common::ActionKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Base URL of the control API (endpoint paths are appended)
    pub api_base_url: String,

    /// How long fetched status is trusted, in seconds
    pub freshness_timeout_secs: u64,

    /// Disable every action while status is stale
    pub require_fresh_status: bool,

    /// How service status is obtained
    pub service_status_mode: ServiceStatusMode,

    /// Reconciliation delays
    pub reconcile: ReconcileConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            freshness_timeout_secs: 30,
            require_fresh_status: true,
            service_status_mode: ServiceStatusMode::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

/// Service status source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatusMode {
    /// Fetch `/service_status` while the instance is running
    #[default]
    Endpoint,
    /// Service mirrors the instance: running iff the instance is running
    Derived,
}

/// Delay before the authoritative poll that follows each action, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub start_instance_secs: u64,
    pub stop_instance_secs: u64,
    pub start_service_secs: u64,
    pub stop_service_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            start_instance_secs: 7,
            stop_instance_secs: 10,
            start_service_secs: 5,
            stop_service_secs: 5,
        }
    }
}

impl ReconcileConfig {
    pub fn delay_for(&self, action: ActionKind) -> Duration {
        let secs = match action {
            ActionKind::StartInstance => self.start_instance_secs,
            ActionKind::StopInstance => self.stop_instance_secs,
            ActionKind::StartService => self.start_service_secs,
            ActionKind::StopService => self.stop_service_secs,
        };
        Duration::from_secs(secs)
    }
}

impl ControlConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> fsqsb_common::Result<()> {
        if self.freshness_timeout_secs == 0 {
            return Err(fsqsb_common::Error::InvalidConfig(
                "freshness_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(fsqsb_common::Error::InvalidConfig(format!(
                "api_base_url must be an http(s) URL, got {}",
                self.api_base_url
            )));
        }
        Ok(())
    }

    pub fn freshness_timeout(&self) -> Duration {
        Duration::from_secs(self.freshness_timeout_secs)
    }
}
