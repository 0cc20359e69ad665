//! Configuration management for ferroscan.

use crate::core::error::{Error, Result};
use crate::core::types::AlertPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Extraction and recursion limits
    pub scan: ScanLimits,
    /// Default alerting policy when no CLI flag is given
    pub default_policy: AlertPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan: ScanLimits::default(),
            default_policy: AlertPolicy::FirstMatch,
        }
    }
}

/// Extraction and recursion limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanLimits {
    /// Maximum container nesting depth before descent stops
    pub max_recursion_depth: usize,
    /// Maximum uncompressed size of one extracted item (MB)
    pub max_embedded_file_mb: u64,
    /// Maximum number of entries processed per archive
    pub max_archive_entries: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_recursion_depth: 16,
            max_embedded_file_mb: 100,
            max_archive_entries: 10_000,
        }
    }
}

impl ScanLimits {
    /// Maximum extracted item size in bytes.
    pub fn max_embedded_bytes(&self) -> u64 {
        self.max_embedded_file_mb * 1024 * 1024
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigLoad(format!("Failed to read config file: {}", e)))?;

        serde_json::from_str(&contents)
            .map_err(|e| Error::ConfigLoad(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::ConfigSave(format!("Failed to create config directory: {}", e)))?;
        }

        std::fs::write(path, contents)
            .map_err(|e| Error::ConfigSave(format!("Failed to write config file: {}", e)))
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.scan.max_recursion_depth == 0 {
            return Err(Error::ConfigInvalid {
                field: "scan.max_recursion_depth".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.scan.max_embedded_file_mb == 0 {
            return Err(Error::ConfigInvalid {
                field: "scan.max_embedded_file_mb".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.scan.max_archive_entries == 0 {
            return Err(Error::ConfigInvalid {
                field: "scan.max_archive_entries".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}
