//! Provider configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};

/// Aquifer depth table location and interpolation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AquiferDepthConfig {
    /// Tab-separated crustal model table.
    pub table_path: Option<PathBuf>,

    /// Number of nearest samples weighted per cell.
    pub neighbours: usize,

    /// Inverse-distance power.
    pub power: f64,

    /// Cells farther than this from every sample are left empty (degrees).
    pub max_distance_deg: f64,
}

impl Default for AquiferDepthConfig {
    fn default() -> Self {
        Self {
            table_path: None,
            neighbours: 8,
            power: 2.0,
            max_distance_deg: 1.0,
        }
    }
}

impl AquiferDepthConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("AQUIFER_DEPTH_TABLE") {
            if !val.is_empty() {
                config.table_path = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = std::env::var("AQUIFER_DEPTH_NEIGHBOURS") {
            if let Ok(n) = val.parse() {
                config.neighbours = n;
            }
        }

        if let Ok(val) = std::env::var("AQUIFER_DEPTH_POWER") {
            if let Ok(p) = val.parse() {
                config.power = p;
            }
        }

        if let Ok(val) = std::env::var("AQUIFER_DEPTH_MAX_DISTANCE") {
            if let Ok(d) = val.parse() {
                config.max_distance_deg = d;
            }
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.neighbours == 0 {
            return Err(ProviderError::Config(
                "neighbours must be at least 1".to_string(),
            ));
        }

        if !(self.power.is_finite() && self.power > 0.0) {
            return Err(ProviderError::Config("power must be positive".to_string()));
        }

        if !(self.max_distance_deg.is_finite() && self.max_distance_deg > 0.0) {
            return Err(ProviderError::Config(
                "max_distance_deg must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Macrostrat API endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacrostratConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for MacrostratConfig {
    fn default() -> Self {
        Self {
            base_url: "https://macrostrat.org/api".to_string(),
            timeout_secs: 30,
        }
    }
}

impl MacrostratConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MACROSTRAT_URL") {
            config.base_url = val;
        }

        if let Ok(val) = std::env::var("MACROSTRAT_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.timeout_secs = secs;
            }
        }

        config
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ProviderError::Config(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }

        if self.timeout_secs == 0 {
            return Err(ProviderError::Config(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
