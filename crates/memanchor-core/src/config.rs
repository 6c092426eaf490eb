//! Tuning knobs for scanning, chain discovery and tracking.
//!
//! Loaded from an optional TOML file; every key has a default so a partial
//! file only overrides what it names.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::layout::FieldLayout;
use crate::memory::RegionFilter;
use crate::memory::region::{
    MEM_COMMIT, PAGE_EXECUTE_READWRITE, PAGE_EXECUTE_WRITECOPY, PAGE_READWRITE, PAGE_WRITECOPY,
    USER_SPACE_END,
};
use crate::scan::RecordProfile;

pub const DEFAULT_CONFIG_FILE: &str = "memanchor.toml";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub chain: ChainConfig,
    pub tracking: TrackingConfig,
    pub memory: MemoryConfig,
    pub verify: VerifyConfig,
}

/// Reverse pointer search limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub max_levels: usize,
    /// Largest offset a single hop may add.
    pub search_range: u64,
    pub max_targets_per_level: usize,
    /// Preferred load base of the main module, used for suggested constants.
    pub module_load_offset: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_levels: 5,
            search_range: 2048,
            max_targets_per_level: 200,
            module_load_offset: 0x0040_0000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub poll_interval_ms: u64,
    /// Consecutive failures before the anchor is discarded.
    pub failure_threshold: u32,
    pub reconnect_attempts: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            failure_threshold: 3,
            reconnect_attempts: 1,
        }
    }
}

impl TrackingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_address: u64,
    pub readable_protections: Vec<u32>,
    pub committed_state: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_address: USER_SPACE_END,
            readable_protections: vec![
                PAGE_READWRITE,
                PAGE_WRITECOPY,
                PAGE_EXECUTE_READWRITE,
                PAGE_EXECUTE_WRITECOPY,
            ],
            committed_state: MEM_COMMIT,
        }
    }
}

impl MemoryConfig {
    pub fn region_filter(&self) -> RegionFilter {
        RegionFilter {
            committed_state: self.committed_state,
            readable_protections: self.readable_protections.clone(),
            max_address: self.max_address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub accept_threshold: f64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.8,
        }
    }
}

impl VerifyConfig {
    /// Verifier profile for `layout` at the configured threshold.
    pub fn profile(&self, layout: &FieldLayout) -> RecordProfile {
        RecordProfile::from_layout(layout).with_threshold(self.accept_threshold)
    }
}

impl ScanConfig {
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `path`, falling back to defaults when it is missing or invalid.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => {
                debug!("Loaded config from {}", path.display());
                config
            }
            Err(e) if e.is_not_found() => {
                debug!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("Failed to load config {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Overrides for the chain-discovery part of a [`ScanConfig`].
#[derive(Debug, Clone, Default)]
pub struct ScanConfigBuilder {
    base: ScanConfig,
    max_levels: Option<usize>,
    search_range: Option<u64>,
    max_targets_per_level: Option<usize>,
    module_load_offset: Option<u64>,
    accept_threshold: Option<f64>,
}

impl ScanConfigBuilder {
    /// Start from an already loaded config instead of the defaults.
    pub fn from_config(base: ScanConfig) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    pub fn max_levels(mut self, levels: usize) -> Self {
        self.max_levels = Some(levels);
        self
    }

    pub fn search_range(mut self, range: u64) -> Self {
        self.search_range = Some(range);
        self
    }

    pub fn max_targets_per_level(mut self, targets: usize) -> Self {
        self.max_targets_per_level = Some(targets);
        self
    }

    pub fn module_load_offset(mut self, offset: u64) -> Self {
        self.module_load_offset = Some(offset);
        self
    }

    pub fn accept_threshold(mut self, threshold: f64) -> Self {
        self.accept_threshold = Some(threshold);
        self
    }

    pub fn build(self) -> ScanConfig {
        let base = self.base;
        ScanConfig {
            chain: ChainConfig {
                max_levels: self.max_levels.unwrap_or(base.chain.max_levels),
                search_range: self.search_range.unwrap_or(base.chain.search_range),
                max_targets_per_level: self
                    .max_targets_per_level
                    .unwrap_or(base.chain.max_targets_per_level),
                module_load_offset: self
                    .module_load_offset
                    .unwrap_or(base.chain.module_load_offset),
            },
            verify: VerifyConfig {
                accept_threshold: self
                    .accept_threshold
                    .unwrap_or(base.verify.accept_threshold),
            },
            ..base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.chain.max_levels, 5);
        assert_eq!(config.chain.search_range, 2048);
        assert_eq!(config.chain.max_targets_per_level, 200);
        assert_eq!(config.tracking.failure_threshold, 3);
        assert_eq!(config.tracking.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.memory.region_filter(), RegionFilter::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[chain]\nsearch_range = 4096\n\n[tracking]\npoll_interval_ms = 250").unwrap();

        let config = ScanConfig::load(file.path()).unwrap();
        assert_eq!(config.chain.search_range, 4096);
        assert_eq!(config.chain.max_levels, 5);
        assert_eq!(config.tracking.poll_interval_ms, 250);
        assert_eq!(config.tracking.failure_threshold, 3);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig::load_or_default(dir.path().join("absent.toml"));
        assert_eq!(config, ScanConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[chain\nmax_levels = ").unwrap();
        let err = ScanConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(_)));
    }

    #[test]
    fn test_builder() {
        let config = ScanConfig::builder()
            .max_levels(3)
            .search_range(512)
            .accept_threshold(0.9)
            .build();
        assert_eq!(config.chain.max_levels, 3);
        assert_eq!(config.chain.search_range, 512);
        assert_eq!(config.chain.max_targets_per_level, 200);
        assert_eq!(config.verify.profile(&FieldLayout::builtin()).accept_threshold, 0.9);
    }

    #[test]
    fn test_builder_keeps_loaded_values() {
        let mut loaded = ScanConfig::default();
        loaded.chain.search_range = 4096;
        loaded.tracking.poll_interval_ms = 250;

        let config = ScanConfigBuilder::from_config(loaded).max_levels(2).build();
        assert_eq!(config.chain.max_levels, 2);
        assert_eq!(config.chain.search_range, 4096);
        assert_eq!(config.tracking.poll_interval_ms, 250);
    }
}
