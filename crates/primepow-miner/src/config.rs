//! Miner configuration.

use std::time::Duration;

use primepow_core::primes::PRIME_TABLE_SIZE;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of table primes used for sieving.
pub const DEFAULT_SIEVE_PRIMES: usize = 16_384;

/// Default number of primorial multipliers sieved per segment.
pub const DEFAULT_SEGMENT_SIZE: usize = 1 << 16;

/// Errors raised while loading or validating a [`MinerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid miner configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sieve_primes must be between 1 and {available}, got {requested}")]
    SievePrimes { requested: usize, available: usize },

    #[error("segment_size must be a non-zero multiple of 64, got {0}")]
    SegmentSize(usize),

    #[error("max_segments must be non-zero when set")]
    MaxSegments,

    #[error("accelerator batch_size must be non-zero")]
    BatchSize,

    #[error("accelerator deadline_ms must be non-zero")]
    Deadline,
}

/// Accelerator pre-filter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    /// Device index passed to the backend's `init`.
    pub device: u32,
    /// Candidates per batch.
    pub batch_size: usize,
    /// Time allowed for one batch before it is treated as a failure.
    pub deadline_ms: u64,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        AcceleratorConfig {
            device: 0,
            batch_size: 256,
            deadline_ms: 2_000,
        }
    }
}

impl AcceleratorConfig {
    /// Per-batch deadline.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Tunables of the mining pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Worker threads; 0 means one per CPU.
    pub threads: usize,
    /// Table primes sieved against, counted from the start of the table.
    pub sieve_primes: usize,
    /// Multipliers per sieve segment.
    pub segment_size: usize,
    /// Primorial number to mine with; chosen from the difficulty when absent.
    pub primorial_number: Option<u16>,
    /// Which of the active patterns to search for.
    pub pattern_index: usize,
    /// Stop after this many segments.
    pub max_segments: Option<u64>,
    /// Accelerator pre-filter, disabled when absent.
    pub accelerator: Option<AcceleratorConfig>,
}

impl Default for MinerConfig {
    fn default() -> Self {
        MinerConfig {
            threads: 0,
            sieve_primes: DEFAULT_SIEVE_PRIMES,
            segment_size: DEFAULT_SEGMENT_SIZE,
            primorial_number: None,
            pattern_index: 0,
            max_segments: None,
            accelerator: None,
        }
    }
}

impl MinerConfig {
    /// Parse and validate a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: MinerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sieve_primes == 0 || self.sieve_primes > PRIME_TABLE_SIZE {
            return Err(ConfigError::SievePrimes {
                requested: self.sieve_primes,
                available: PRIME_TABLE_SIZE,
            });
        }
        if self.segment_size == 0 || self.segment_size % 64 != 0 {
            return Err(ConfigError::SegmentSize(self.segment_size));
        }
        if self.max_segments == Some(0) {
            return Err(ConfigError::MaxSegments);
        }
        if let Some(accelerator) = &self.accelerator {
            if accelerator.batch_size == 0 {
                return Err(ConfigError::BatchSize);
            }
            if accelerator.deadline_ms == 0 {
                return Err(ConfigError::Deadline);
            }
        }
        Ok(())
    }

    /// Number of worker threads to start.
    pub fn worker_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.threads
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MinerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.worker_threads() >= 1);
        assert_eq!(config.primorial_number, None);
        assert_eq!(config.accelerator, None);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = MinerConfig::from_json(r#"{"threads": 3, "accelerator": {"device": 1}}"#).unwrap();
        assert_eq!(config.threads, 3);
        assert_eq!(config.worker_threads(), 3);
        assert_eq!(config.sieve_primes, DEFAULT_SIEVE_PRIMES);
        assert_eq!(config.segment_size, DEFAULT_SEGMENT_SIZE);

        let accelerator = config.accelerator.unwrap();
        assert_eq!(accelerator.device, 1);
        assert_eq!(accelerator.batch_size, 256);
        assert_eq!(accelerator.deadline(), Duration::from_secs(2));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = MinerConfig {
            threads: 2,
            primorial_number: Some(12),
            max_segments: Some(100),
            accelerator: Some(AcceleratorConfig::default()),
            ..MinerConfig::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(MinerConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            MinerConfig::from_json(r#"{"sieve_primes": 0}"#),
            Err(ConfigError::SievePrimes { requested: 0, .. })
        ));
        assert!(matches!(
            MinerConfig::from_json(r#"{"sieve_primes": 70000}"#),
            Err(ConfigError::SievePrimes { requested: 70000, .. })
        ));
        assert!(matches!(
            MinerConfig::from_json(r#"{"segment_size": 100}"#),
            Err(ConfigError::SegmentSize(100))
        ));
        assert!(matches!(
            MinerConfig::from_json(r#"{"max_segments": 0}"#),
            Err(ConfigError::MaxSegments)
        ));
        assert!(matches!(
            MinerConfig::from_json(r#"{"accelerator": {"batch_size": 0}}"#),
            Err(ConfigError::BatchSize)
        ));
        assert!(matches!(
            MinerConfig::from_json(r#"{"accelerator": {"deadline_ms": 0}}"#),
            Err(ConfigError::Deadline)
        ));
        assert!(matches!(
            MinerConfig::from_json("{threads: 1}"),
            Err(ConfigError::Json(_))
        ));
    }
}
