use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TciaError;
use crate::series::{DEFAULT_MIN_SERIES_LEN, FilterOptions};
use crate::tcia::TCIA_ENDPOINT;

pub const DEFAULT_CONFIG_FILE: &str = "tcia-dl.json";
pub const DEFAULT_WORKERS: usize = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub filter_slices: Option<bool>,
    #[serde(default)]
    pub filter_small_series: Option<bool>,
    #[serde(default)]
    pub min_series_len: Option<usize>,
    #[serde(default)]
    pub volumes: Option<bool>,
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub endpoint: String,
    pub workers: usize,
    pub timeout: Duration,
    pub filters: FilterOptions,
    pub volumes: bool,
    pub staging_dir: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            endpoint: TCIA_ENDPOINT.to_string(),
            workers: DEFAULT_WORKERS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            filters: FilterOptions::default(),
            volumes: false,
            staging_dir: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit paths must exist; without one, `tcia-dl.json` in the working
    /// directory is used when present and defaults otherwise.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, TciaError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(ResolvedConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| TciaError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| TciaError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, TciaError> {
        let workers = config.workers.unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(TciaError::ConfigParse(
                "workers must be at least 1".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            endpoint: config
                .endpoint
                .unwrap_or_else(|| TCIA_ENDPOINT.to_string()),
            workers,
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            filters: FilterOptions {
                slice_type: config.filter_slices.unwrap_or(false),
                small_series: config.filter_small_series.unwrap_or(false),
                min_series_len: config.min_series_len.unwrap_or(DEFAULT_MIN_SERIES_LEN),
            },
            volumes: config.volumes.unwrap_or(false),
            staging_dir: config.staging_dir,
        })
    }
}
