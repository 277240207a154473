//! # Network Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an
//! empty file is a valid configuration:
//!
//! ```toml
//! tick_rate = 60
//! snapshot_payload_budget = 1200
//! baseline_history = 32
//! command_redundancy = 4
//! connection_timeout_ticks = 300
//! max_prediction_offset = 16
//! compression = "lz4"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::command::COMMAND_BUFFER_CAPACITY;
use crate::error::{NetError, NetResult};
use crate::protocol::CompressionKind;

/// Ticks covered by the snapshot acknowledgement mask.
const ACK_WINDOW: usize = 64;

/// Replication settings shared by server and client sessions.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetConfig {
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Uncompressed snapshot payload budget per client and tick, in bytes.
    pub snapshot_payload_budget: usize,
    /// Ticks of baseline history kept per ghost.
    pub baseline_history: usize,
    /// Packets each command sample is repeated in.
    pub command_redundancy: usize,
    /// Silent ticks before a connection is dropped.
    pub connection_timeout_ticks: u32,
    /// Upper bound on how far ahead of the last snapshot clients predict.
    pub max_prediction_offset: u32,
    /// Snapshot payload compression.
    pub compression: CompressionKind,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            snapshot_payload_budget: 1200,
            baseline_history: 32,
            command_redundancy: 4,
            connection_timeout_ticks: 300,
            max_prediction_offset: 16,
            compression: CompressionKind::Lz4,
        }
    }
}

impl NetConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidConfig`] on syntax errors, unknown keys or
    /// out-of-range values.
    pub fn from_toml_str(source: &str) -> NetResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|err| NetError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidConfig`] if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> NetResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|err| NetError::InvalidConfig(format!("{}: {err}", path.display())))?;
        let config = Self::from_toml_str(&source)?;
        tracing::info!(path = %path.display(), tick_rate = config.tick_rate, "network config loaded");
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> NetResult<()> {
        let invalid = |msg: String| Err(NetError::InvalidConfig(msg));
        if !(1..=1000).contains(&self.tick_rate) {
            return invalid(format!("tick_rate {} not in 1..=1000", self.tick_rate));
        }
        if self.snapshot_payload_budget < 64 {
            return invalid(format!(
                "snapshot_payload_budget {} is below 64 bytes",
                self.snapshot_payload_budget
            ));
        }
        if !(1..=ACK_WINDOW).contains(&self.baseline_history) {
            return invalid(format!(
                "baseline_history {} not in 1..={ACK_WINDOW}",
                self.baseline_history
            ));
        }
        if !(1..=COMMAND_BUFFER_CAPACITY).contains(&self.command_redundancy) {
            return invalid(format!(
                "command_redundancy {} not in 1..={COMMAND_BUFFER_CAPACITY}",
                self.command_redundancy
            ));
        }
        if self.connection_timeout_ticks == 0 {
            return invalid("connection_timeout_ticks must be positive".into());
        }
        if self.max_prediction_offset as usize > COMMAND_BUFFER_CAPACITY {
            return invalid(format!(
                "max_prediction_offset {} exceeds {COMMAND_BUFFER_CAPACITY}",
                self.max_prediction_offset
            ));
        }
        Ok(())
    }

    /// Duration of one tick.
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(NetConfig::from_toml_str("").unwrap(), NetConfig::default());
        assert!(NetConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_override() {
        let config = NetConfig::from_toml_str(
            "tick_rate = 30\ncompression = \"none\"\nsnapshot_payload_budget = 512\n",
        )
        .unwrap();
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.compression, CompressionKind::None);
        assert_eq!(config.snapshot_payload_budget, 512);
        assert_eq!(config.baseline_history, 32);
        assert_eq!(config.tick_duration(), Duration::from_micros(33_333));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            NetConfig::from_toml_str("baseline_history = 65"),
            Err(NetError::InvalidConfig(msg)) if msg.contains("baseline_history")
        ));
        assert!(matches!(
            NetConfig::from_toml_str("tick_rate = 0"),
            Err(NetError::InvalidConfig(_))
        ));
        assert!(matches!(
            NetConfig::from_toml_str("tickrate = 60"),
            Err(NetError::InvalidConfig(_))
        ));
        assert!(matches!(
            NetConfig::from_toml_str("compression = \"zstd\""),
            Err(NetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = NetConfig::load("/nonexistent/spectre.toml").unwrap_err();
        assert!(matches!(err, NetError::InvalidConfig(msg) if msg.contains("spectre.toml")));
    }
}
