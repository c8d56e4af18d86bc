use crate::constants;
use crate::error::{ImportError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a config file to load
pub const CONFIG_ENV: &str = "LASERCHRON_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub import: ImportConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("laserchron.db"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the content-addressed copy of raw workbooks; disabled when unset
    pub cas_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// `host:port` for a Prometheus scrape endpoint; metrics stay in-process when unset
    pub prometheus_addr: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub data_sheet: String,
    pub expected_columns: usize,
    /// Minimum share of distinct analysis names a sample group needs to keep its split
    pub uniqueness_threshold: f64,
    pub max_sample_fraction: f64,
    pub min_samples_for_check: usize,
    /// Use the file modification time when no date can be read from the path
    pub trust_file_times: bool,
    pub default_project: String,
    pub error_metric: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            data_sheet: constants::DATA_SHEET.to_string(),
            expected_columns: constants::EXPECTED_COLUMNS,
            uniqueness_threshold: 0.4,
            max_sample_fraction: 0.3,
            min_samples_for_check: 20,
            trust_file_times: false,
            default_project: constants::DEFAULT_PROJECT.to_string(),
            error_metric: constants::ERROR_METRIC.to_string(),
        }
    }
}

impl Config {
    /// Resolve configuration: explicit path, then `LASERCHRON_CONFIG`, then
    /// `config.toml` in the working directory, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        let local = Path::new("config.toml");
        if local.exists() {
            return Self::from_file(local);
        }
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ImportError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let threshold = self.import.uniqueness_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ImportError::Config(format!(
                "uniqueness_threshold must be between 0 and 1, got {}",
                threshold
            )));
        }
        if self.import.expected_columns == 0 {
            return Err(ImportError::Config(
                "expected_columns must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
