//! Tunnel orchestrator configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_millis;
use crate::error::ConfigError;

/// Configuration for the tunnel orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Interval of the data counter poll while connected
    #[serde(with = "duration_millis")]
    pub data_count_interval: Duration,

    /// Pause between the disconnect and connect phases of a reconnect
    #[serde(with = "duration_millis")]
    pub reconnection_delay: Duration,

    /// Capacity of the internal event channels
    pub event_buffer: usize,

    /// System extension to activate before connecting, on platforms that need one
    pub system_extension: Option<SystemExtensionConfig>,

    /// Preferences forwarded to the tunnel on install
    pub preferences: AppPreferences,

    /// Tunnel engine settings
    pub engine: EngineConfig,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            data_count_interval: Duration::from_secs(3),
            reconnection_delay: Duration::ZERO,
            event_buffer: 64,
            system_extension: None,
            preferences: AppPreferences::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl TunnelConfig {
    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_count_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "data_count_interval must be greater than zero".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid(
                "event_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identity of the OS network extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemExtensionConfig {
    pub identifier: String,
    pub version: String,
    pub build: u32,
}

/// Application preferences shared with the tunnel process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppPreferences {
    /// Fall back to the system DNS when the tunnel DNS fails
    pub dns_fallback: bool,
    /// Include private data in the tunnel log
    pub logs_private_data: bool,
    /// Skip eligibility checks (beta builds)
    pub skips_purchases: bool,
}

/// Settings of the bundled `wg-quick` engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Identifier reported with every engine notification
    pub instance_id: String,
    /// Path of the wg-quick executable
    pub wg_quick_path: PathBuf,
    /// Root of the per-interface network statistics
    pub sysfs_net_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_id: "tunnelwright.wg-quick".to_string(),
            wg_quick_path: PathBuf::from("wg-quick"),
            sysfs_net_path: PathBuf::from("/sys/class/net"),
        }
    }
}
