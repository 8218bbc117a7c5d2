//! Configuration for layerstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Main configuration for a repository instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for layers whose URI is not a `file://` path
    /// Internal structure:
    ///   {data_dir}/
    ///     └── {layer}/
    ///           ├── layer.idx          (unit table)
    ///           ├── unit_00000.seg     (records of one unit)
    ///           └── unit_00000.dict    (file paths dictionary of one unit)
    pub data_dir: PathBuf,

    /// Version of the on-disk persist mechanism. Layers written with a
    /// different version are discarded on open.
    pub persist_mechanism_version: u32,

    /// Sync strategy: when to fsync segment files
    pub sync_policy: SyncPolicy,

    // -------------------------------------------------------------------------
    // Unit Cache Configuration
    // -------------------------------------------------------------------------
    /// Max number of cached descriptor → unit ID mappings (0 disables caching)
    pub unit_cache_capacity: usize,

    // -------------------------------------------------------------------------
    // Maintenance Configuration
    // -------------------------------------------------------------------------
    /// Storages with a maintenance weight below this are left alone (0..=100)
    pub defrag_threshold: u32,

    /// Period between background maintenance passes (milliseconds)
    pub maintenance_period_ms: u64,

    /// Time budget of a single maintenance pass (milliseconds)
    pub maintenance_budget_ms: u64,
}

/// Segment sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync after every committed record (safest, slowest)
    EveryWrite,

    /// fsync only on flush/close/shutdown
    OnFlush,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./layerstore_data"),
            persist_mechanism_version: 1,
            sync_policy: SyncPolicy::OnFlush,
            unit_cache_capacity: 4096,
            defrag_threshold: 10,
            maintenance_period_ms: 5000,
            maintenance_budget_ms: 200,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.persist_mechanism_version == 0 {
            return Err(StoreError::Config(
                "persist_mechanism_version must be positive".to_string(),
            ));
        }
        if self.defrag_threshold > 100 {
            return Err(StoreError::Config(format!(
                "defrag_threshold is a percentage, got {}",
                self.defrag_threshold
            )));
        }
        Ok(())
    }

    pub fn maintenance_period(&self) -> Duration {
        Duration::from_millis(self.maintenance_period_ms)
    }

    pub fn maintenance_budget(&self) -> Duration {
        Duration::from_millis(self.maintenance_budget_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for relative layers)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the persist mechanism version
    pub fn persist_mechanism_version(mut self, version: u32) -> Self {
        self.config.persist_mechanism_version = version;
        self
    }

    /// Set the segment sync policy
    pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.config.sync_policy = policy;
        self
    }

    /// Set the unit ID cache capacity
    pub fn unit_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.unit_cache_capacity = capacity;
        self
    }

    /// Set the defragmentation threshold (percent of dead bytes)
    pub fn defrag_threshold(mut self, threshold: u32) -> Self {
        self.config.defrag_threshold = threshold;
        self
    }

    /// Set the background maintenance period (in milliseconds)
    pub fn maintenance_period_ms(mut self, ms: u64) -> Self {
        self.config.maintenance_period_ms = ms;
        self
    }

    /// Set the background maintenance budget (in milliseconds)
    pub fn maintenance_budget_ms(mut self, ms: u64) -> Self {
        self.config.maintenance_budget_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
