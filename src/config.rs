//! Directory configuration
//!
//! Stored as TOML in ~/.config/keytrie/config.toml unless a path is given.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest history-forest depth accepted
pub const MAX_HISTORY_DEPTH: u32 = 48;

/// Epoch cadence and partition layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Length of a verification period in milliseconds
    pub verification_period_ms: u64,
    /// Length of an update epoch in milliseconds
    pub update_period_ms: u64,
    /// Number of partitions identifiers are spread over
    pub partitions: usize,
    /// Keep a history forest instead of the two-epoch window
    pub aggregated_history: bool,
    /// History forest holds at most `2^history_depth` periods
    pub history_depth: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            verification_period_ms: 10_000,
            update_period_ms: 1_000,
            partitions: 1,
            aggregated_history: false,
            history_depth: 31,
        }
    }
}

impl Config {
    /// Default config file location (~/.config/keytrie/config.toml)
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not find config directory".into()))?
            .join("keytrie");
        Ok(config_dir.join("config.toml"))
    }

    pub fn update_period(&self) -> Duration {
        Duration::from_millis(self.update_period_ms)
    }

    pub fn verification_period(&self) -> Duration {
        Duration::from_millis(self.verification_period_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.partitions == 0 {
            return Err(Error::Config("partitions must be at least 1".into()));
        }
        if self.update_period_ms == 0 || self.verification_period_ms == 0 {
            return Err(Error::Config("epoch periods must be non-zero".into()));
        }
        if self.update_period_ms > self.verification_period_ms {
            return Err(Error::Config(format!(
                "update period ({} ms) is longer than the verification period ({} ms)",
                self.update_period_ms, self.verification_period_ms
            )));
        }
        if self.history_depth > MAX_HISTORY_DEPTH {
            return Err(Error::Config(format!(
                "history depth {} exceeds {}",
                self.history_depth, MAX_HISTORY_DEPTH
            )));
        }
        Ok(())
    }

    /// Load and validate a config file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {}", e)))?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            partitions: 4,
            aggregated_history: true,
            ..Config::default()
        };
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "partitions = 3\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.partitions, 3);
        assert_eq!(config.update_period_ms, 1_000);
    }

    #[test]
    fn test_validate_rejects() {
        let bad = [
            Config { partitions: 0, ..Config::default() },
            Config { update_period_ms: 0, ..Config::default() },
            Config { update_period_ms: 20_000, ..Config::default() },
            Config { history_depth: 49, ..Config::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::Config(_))));
        }
    }
}
