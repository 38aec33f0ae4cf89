//! Configuration management for PageDB

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Main configuration structure for PageDB
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML, JSON or properties file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let extension = path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        let config: Config = match extension {
            "toml" => toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e)))?,
            "properties" => Self::from_properties(&content)?,
            _ => serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse the flat `key=value` properties format.
    ///
    /// Blank lines and lines starting with `#` or `!` are ignored; unknown
    /// keys are ignored with a warning.
    pub fn from_properties(content: &str) -> Result<Self> {
        let mut config = Config::default();

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once(['=', ':']) else {
                return Err(Error::Config(format!("Malformed property line: {line}")));
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "MaximumRowsCountinPage" => {
                    config.storage.table_page_capacity = parse_capacity(key, value)?;
                }
                "BitmapSize" => {
                    config.storage.index_page_capacity = parse_capacity(key, value)?;
                }
                "DataDirectory" => config.storage.data_dir = value.to_string(),
                "Compression" => config.storage.compression_algorithm = value.to_string(),
                _ => tracing::warn!("Ignoring unknown property: {}", key),
            }
        }

        Ok(config)
    }

    /// Reject settings the storage engine cannot work with
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()
    }
}

fn parse_capacity(key: &str, value: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .map_err(|e| Error::Config(format!("Invalid value for {key}: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding the catalog and every table
    pub data_dir: String,
    /// Maximum number of records in one table page
    pub table_page_capacity: usize,
    /// Maximum number of presence matrices in one index page
    pub index_page_capacity: usize,
    /// Compression applied to index pages: "none", "lz4" or "zstd"
    pub compression_algorithm: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            table_page_capacity: 200,
            index_page_capacity: 15,
            compression_algorithm: "lz4".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.table_page_capacity == 0 {
            return Err(Error::Config(
                "table_page_capacity must be at least 1".to_string(),
            ));
        }
        if self.index_page_capacity == 0 {
            return Err(Error::Config(
                "index_page_capacity must be at least 1".to_string(),
            ));
        }
        if u32::try_from(self.table_page_capacity).is_err() {
            return Err(Error::Config(format!(
                "table_page_capacity must not exceed {}",
                u32::MAX
            )));
        }
        match self.compression_algorithm.to_ascii_lowercase().as_str() {
            "none" | "lz4" | "zstd" => Ok(()),
            other => Err(Error::Config(format!(
                "Unknown compression algorithm: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for PageDB targets
    pub level: String,
    /// Output format: "text" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
