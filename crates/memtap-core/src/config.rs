//! Tunables of a memtap session.

use crate::pattern::SignatureConfig;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// The configuration file is not valid JSON for [`MemtapConfig`].
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    /// The configuration is well-formed but unusable.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Configuration parameters for memtap sessions.
///
/// Controls discovery and acquisition deadlines, polling cadence and the buffer
/// signature. Durations are stored in milliseconds in JSON (`*_ms` keys); missing
/// keys take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemtapConfig {
    /// Time budget for finding the buffer
    #[serde(rename = "discovery_timeout_ms", with = "millis")]
    pub discovery_timeout: Duration,
    /// Time budget for polling the buffer once found
    #[serde(rename = "session_timeout_ms", with = "millis")]
    pub session_timeout: Duration,
    /// Pause between two unsuccessful discovery sweeps
    #[serde(rename = "sweep_delay_ms", with = "millis")]
    pub sweep_delay: Duration,
    /// Pause between two acquisition ticks
    #[serde(rename = "tick_interval_ms", with = "millis")]
    pub tick_interval: Duration,
    /// Free regions larger than this many bytes end a discovery sweep
    pub free_region_threshold: usize,
    /// Committed regions larger than this many bytes are not read during discovery
    pub max_region_size: usize,
    /// Layout of the buffer signature
    pub signature: SignatureConfig,
}

impl Default for MemtapConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(60),
            session_timeout: Duration::from_secs(600),
            sweep_delay: Duration::from_millis(100),
            tick_interval: Duration::from_millis(10),
            free_region_threshold: 10_000_000,
            max_region_size: 256 << 20,
            signature: SignatureConfig::default(),
        }
    }
}

impl MemtapConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Arguments
    ///
    /// * `filepath` - Path to the JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed, or the result fails
    /// [`validate`](Self::validate)
    pub fn from_jsonfile(filepath: impl AsRef<Path>) -> Result<MemtapConfig, ConfigError> {
        let mut file = File::open(filepath.as_ref())?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_json(&contents)
    }

    /// Parses configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns error if the string cannot be parsed or the result fails
    /// [`validate`](Self::validate)
    pub fn from_json(json: &str) -> Result<MemtapConfig, ConfigError> {
        let config: MemtapConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration can drive a session.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if
    /// * any signature length is zero,
    /// * the signature window does not fit into one super-block,
    /// * the trailing-zero window is empty,
    /// * the discovery read cap is zero, or
    /// * the tick interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sig = &self.signature;
        if sig.super_block_len == 0 || sig.sub_block_len == 0 || sig.sub_blocks == 0 {
            return Err(ConfigError::Invalid(
                "Signature block lengths must be greater than 0".into(),
            ));
        }
        if sig.window_len() > sig.super_block_len {
            return Err(ConfigError::Invalid(format!(
                "{} sub-blocks of {} samples do not fit into a super-block of {} samples",
                sig.sub_blocks, sig.sub_block_len, sig.super_block_len
            )));
        }
        if sig.trailing_lower >= sig.trailing_upper {
            return Err(ConfigError::Invalid(format!(
                "Empty trailing zero window ({}, {})",
                sig.trailing_lower, sig.trailing_upper
            )));
        }
        if self.max_region_size == 0 {
            return Err(ConfigError::Invalid(
                "Maximum region size must be greater than 0".into(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("Tick interval must be greater than 0".into()));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
