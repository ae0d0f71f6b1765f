use crate::core::catalog::SUPPORTED_EXTENSIONS;
use crate::core::similarity::DEFAULT_THRESHOLD;
use crate::core::thumbnail::DEFAULT_THUMBNAIL_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const APP_DIR_NAME: &str = "dupecheck";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Similarity threshold must be within [0, 1], got {0}")]
    Threshold(f64),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Perceptual hash used by the default feature extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[default]
    Mean,
    Gradient,
    DoubleGradient,
    Blockhash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub threshold: f64,
    pub thumbnail_size: u32,
    pub hash_size: u32,
    pub hash_alg: HashAlgorithm,
    pub supported_extensions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            hash_size: 16,
            hash_alg: HashAlgorithm::default(),
            supported_extensions: SUPPORTED_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
        }
    }
}

impl ScanConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ScanConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Config from the user config directory, or defaults when there is none.
    pub fn load_default() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) if path.is_file() => {
                log::debug!("Using config {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::Threshold(self.threshold));
        }
        if self.thumbnail_size == 0 {
            return Err(ConfigError::Zero { field: "thumbnail_size" });
        }
        if self.hash_size == 0 {
            return Err(ConfigError::Zero { field: "hash_size" });
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
