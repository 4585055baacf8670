//! Lifecycle configuration management.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Configuration for the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Minutes between expiry sweeps.
    pub sweep_interval_minutes: u64,

    /// Remaining-usage threshold below which a grant is reported as
    /// nearly exhausted.
    pub near_limit_threshold: u32,

    /// Days an expired grant or rule is retained before cleanup may
    /// delete it.
    pub retention_days: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            sweep_interval_minutes: 5,
            near_limit_threshold: 3,
            retention_days: 90,
        }
    }
}

impl LifecycleConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Rejects values that would make the sweep loop degenerate.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_minutes == 0 {
            return Err(Error::InvalidConfig(
                "sweep_interval_minutes must be >= 1".to_string(),
            ));
        }
        if self.retention_days == 0 {
            return Err(Error::InvalidConfig(
                "retention_days must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The sweep interval as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes * 60)
    }
}
