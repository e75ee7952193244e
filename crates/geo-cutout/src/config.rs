//! Configuration for cutout preparation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CutoutError, Result};
use crate::persist::WriteOptions;

/// Settings shared by every cutout a process prepares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Scratch directory handed to providers. A temporary directory is
    /// created per `prepare` call when unset.
    pub scratch_dir: Option<PathBuf>,

    /// Gzip cutout files.
    pub compress: bool,

    /// Compression level (1-9).
    pub compression_level: u32,

    /// Grid step in degrees when `dx`/`dy` are not given.
    pub default_step: f64,

    /// Maximum feature fetches in flight within one provider round.
    pub parallel_fetches: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            compress: true,
            compression_level: 6,
            default_step: 0.25,
            parallel_fetches: 4,
        }
    }
}

impl RetrieverConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GEORETRIEVER_SCRATCH_DIR") {
            if !val.is_empty() {
                config.scratch_dir = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = std::env::var("GEORETRIEVER_COMPRESS") {
            config.compress = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("GEORETRIEVER_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                config.compression_level = level;
            }
        }

        if let Ok(val) = std::env::var("GEORETRIEVER_DEFAULT_STEP") {
            if let Ok(step) = val.parse() {
                config.default_step = step;
            }
        }

        if let Ok(val) = std::env::var("GEORETRIEVER_PARALLEL_FETCHES") {
            if let Ok(n) = val.parse() {
                config.parallel_fetches = n;
            }
        }

        config
    }

    /// Load configuration from a YAML file. Missing keys take defaults.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CutoutError::io("read config", path, e))?;
        let config: Self = serde_yaml::from_str(&text)
            .map_err(|e| CutoutError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.compression_level == 0 || self.compression_level > 9 {
            return Err(CutoutError::Config(
                "compression_level must be 1-9".to_string(),
            ));
        }

        if !(self.default_step.is_finite() && self.default_step > 0.0) {
            return Err(CutoutError::Config(
                "default_step must be a positive number of degrees".to_string(),
            ));
        }

        if self.parallel_fetches == 0 {
            return Err(CutoutError::Config(
                "parallel_fetches must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            compress: self.compress,
            level: self.compression_level,
        }
    }
}
