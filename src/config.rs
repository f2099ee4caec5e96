//! Counter Configuration
//!
//! Deployment parameters supplied once at startup. Loaded from YAML or JSON
//! documents; every field has a default so partial documents are accepted.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ec::encoder::MAX_TOTAL_SHARDS;
use crate::ec::protected::PAYLOAD_LEN;
use crate::error::{Error, Result};
use crate::telemetry::LoggingConfig;

/// Default per-replica deadline
pub const DEFAULT_DEADLINE_MS: u64 = 1_000;

/// Default number of corrupted shards tolerated per value
pub const DEFAULT_CORRECTION_CAPACITY: usize = 4;

/// Largest supported correction capacity
pub const MAX_CORRECTION_CAPACITY: usize = 32;

/// Configuration for the object counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Deadline shared by the three replicas, in milliseconds
    pub deadline_ms: u64,

    /// Parity shards per protected value (correctable corrupted shards)
    pub correction_capacity: usize,

    /// Data shards per protected value
    pub data_shards: usize,

    /// Extra attempts for a replica failing with a retryable error
    pub replica_retries: u32,

    /// How long the synchronous entry point waits for cancelled replicas
    pub shutdown_grace_ms: u64,

    /// Log output settings
    pub logging: LoggingConfig,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            deadline_ms: DEFAULT_DEADLINE_MS,
            correction_capacity: DEFAULT_CORRECTION_CAPACITY,
            data_shards: PAYLOAD_LEN,
            replica_retries: 1,
            shutdown_grace_ms: 100,
            logging: LoggingConfig::default(),
        }
    }
}

impl CounterConfig {
    /// Configuration tolerating ten corrupted shards per value
    pub fn high_assurance() -> Self {
        Self {
            correction_capacity: 10,
            replica_retries: 2,
            ..Self::default()
        }
    }

    /// Set the per-replica deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = deadline.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    /// Set the correction capacity
    pub fn with_correction_capacity(mut self, capacity: usize) -> Self {
        self.correction_capacity = capacity;
        self
    }

    /// Set the number of retries per replica
    pub fn with_replica_retries(mut self, retries: u32) -> Self {
        self.replica_retries = retries;
        self
    }

    /// Per-replica deadline
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Grace period granted to cancelled replicas on shutdown
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Check that the configuration describes a usable codec and deadline
    pub fn validate(&self) -> Result<()> {
        if self.deadline_ms == 0 {
            return Err(Error::Config("deadline_ms must be greater than 0".to_string()));
        }
        if self.correction_capacity == 0 || self.correction_capacity > MAX_CORRECTION_CAPACITY {
            return Err(Error::Config(format!(
                "correction_capacity must be within 1..={}, got {}",
                MAX_CORRECTION_CAPACITY, self.correction_capacity
            )));
        }
        if self.data_shards == 0 || self.data_shards > PAYLOAD_LEN {
            return Err(Error::Config(format!(
                "data_shards must be within 1..={}, got {}",
                PAYLOAD_LEN, self.data_shards
            )));
        }
        if self.data_shards + self.correction_capacity > MAX_TOTAL_SHARDS {
            return Err(Error::Config(format!(
                "data_shards + correction_capacity exceeds {}",
                MAX_TOTAL_SHARDS
            )));
        }
        Ok(())
    }

    /// Parse a YAML document
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("invalid YAML configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("invalid JSON configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, choosing the format by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            _ => Self::from_yaml(&text),
        }
    }
}
