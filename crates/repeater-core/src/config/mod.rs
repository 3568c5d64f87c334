//! Configuration
//!
//! A configuration file is a concentrator `global_conf.json`: the board
//! description lives under `SX1301_conf`, and an optional `repeater_conf`
//! object tunes the pipeline. Missing repeater keys take their defaults.
//!
//! ```json
//! {
//!     "SX1301_conf": { "lorawan_public": true, "clksrc": 1, "radio_0": { ... } },
//!     "repeater_conf": { "eviction_period_ms": 5000, "tx_rf_power": 14 }
//! }
//! ```

pub mod board;
pub mod settings;

pub use board::{BoardConfig, ChannelConf, GainTableConf, RadioConf};
pub use settings::{
    BoardSettings, HalSettings, IfChainSettings, RadioType, RfChainSettings, TxGain,
};

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Pipeline tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeaterConfig {
    /// Idle backoff between empty receive polls (µs)
    pub uplink_poll_us: u64,
    /// TX status poll interval while waiting for the radio (µs)
    pub tx_poll_us: u64,
    /// Duplicate cache eviction period (ms)
    pub eviction_period_ms: u64,
    /// Intake → dispatcher queue bound
    pub queue_capacity: usize,
    /// Frames fetched per receive poll
    pub rx_batch_size: usize,
    /// TX power for repeated frames (dBm)
    pub tx_rf_power: i8,
    /// Time the supervisor gives the remaining worker at shutdown (ms)
    pub shutdown_grace_ms: u64,
}

/// Most frames a single receive poll can return
pub const MAX_RX_BATCH: usize = 8;

impl Default for RepeaterConfig {
    fn default() -> Self {
        Self {
            uplink_poll_us: 100,
            tx_poll_us: 100,
            eviction_period_ms: 5_000,
            queue_capacity: 16,
            rx_batch_size: MAX_RX_BATCH,
            tx_rf_power: 14,
            shutdown_grace_ms: 500,
        }
    }
}

impl RepeaterConfig {
    /// Idle backoff between empty receive polls
    pub fn uplink_poll_interval(&self) -> Duration {
        Duration::from_micros(self.uplink_poll_us)
    }

    /// TX status poll interval
    pub fn tx_poll_interval(&self) -> Duration {
        Duration::from_micros(self.tx_poll_us)
    }

    /// Duplicate cache eviction period
    pub fn eviction_period(&self) -> Duration {
        Duration::from_millis(self.eviction_period_ms)
    }

    /// Shutdown grace period
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Reject zero intervals and out-of-range sizes
    pub fn validate(&self) -> ConfigResult<()> {
        let zero = [
            ("uplink_poll_us", self.uplink_poll_us),
            ("tx_poll_us", self.tx_poll_us),
            ("eviction_period_ms", self.eviction_period_ms),
            ("queue_capacity", self.queue_capacity as u64),
            ("rx_batch_size", self.rx_batch_size as u64),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);
        if let Some((name, _)) = zero {
            return Err(ConfigError::InvalidSetting(format!("{} must be non-zero", name)));
        }
        if self.rx_batch_size > MAX_RX_BATCH {
            return Err(ConfigError::InvalidSetting(format!(
                "rx_batch_size {} exceeds the concentrator limit of {}",
                self.rx_batch_size, MAX_RX_BATCH
            )));
        }
        Ok(())
    }
}

/// A whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Board description
    #[serde(rename = "SX1301_conf")]
    pub board: BoardConfig,
    /// Pipeline settings
    #[serde(rename = "repeater_conf", default)]
    pub repeater: RepeaterConfig,
}

impl ConfigFile {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse and validate configuration JSON
    pub fn parse(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.repeater.validate()?;
        Ok(config)
    }

    /// Marshal the board section into concentrator settings
    pub fn hal_settings(&self) -> ConfigResult<HalSettings> {
        HalSettings::from_board(&self.board)
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeater_config_default() {
        let config = RepeaterConfig::default();
        assert_eq!(config.uplink_poll_interval(), Duration::from_micros(100));
        assert_eq!(config.eviction_period(), Duration::from_secs(5));
        assert_eq!(config.rx_batch_size, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_repeater_section_is_optional() {
        let config = ConfigFile::parse(r#"{"SX1301_conf": {"lorawan_public": true, "clksrc": 1}}"#)
            .unwrap();
        assert_eq!(config.repeater, RepeaterConfig::default());
    }

    #[test]
    fn test_partial_repeater_section() {
        let config = ConfigFile::parse(
            r#"{
                "SX1301_conf": {"lorawan_public": true, "clksrc": 1},
                "repeater_conf": {"eviction_period_ms": 2000, "tx_rf_power": 20}
            }"#,
        )
        .unwrap();
        assert_eq!(config.repeater.eviction_period(), Duration::from_secs(2));
        assert_eq!(config.repeater.tx_rf_power, 20);
        assert_eq!(config.repeater.queue_capacity, 16);
    }

    #[test]
    fn test_zero_settings_rejected() {
        let result = ConfigFile::parse(
            r#"{"SX1301_conf": {"lorawan_public": true, "clksrc": 1}, "repeater_conf": {"queue_capacity": 0}}"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidSetting(msg)) if msg.contains("queue_capacity")));

        let config = RepeaterConfig {
            rx_batch_size: 9,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_board_section() {
        assert!(matches!(ConfigFile::parse("{}"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_default_file_round_trip() {
        let json = ConfigFile::default().to_json();
        let parsed = ConfigFile::parse(&json).unwrap();
        assert_eq!(parsed, ConfigFile::default());
        assert!(parsed.hal_settings().is_ok());
    }
}
