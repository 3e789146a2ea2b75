//! Runtime configuration and logging setup.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::harvest::schema::DEFAULT_SAMPLE_SIZE;

const ENV_PREFIX: &str = "DATA_HARVESTER_";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },

    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

/// Settings for the harvester, read from `DATA_HARVESTER_*` variables.
#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    /// Where the upload collaborator places files handed to file jobs
    pub upload_dir: PathBuf,

    /// Upper bound on jobs processed at once by [`crate::JobExecutor`]
    pub max_concurrent_jobs: usize,

    /// Request timeout for the API and web variants
    pub http_timeout: Duration,

    pub user_agent: String,

    /// Rows inspected for column type inference
    pub schema_sample_size: usize,

    /// Failure ratio above which an integration run is marked FAILED even
    /// though some records succeeded. `None` only fails when every record failed.
    pub max_failure_ratio: Option<f64>,

    pub log_level: String,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./uploads"),
            max_concurrent_jobs: 5,
            http_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            schema_sample_size: DEFAULT_SAMPLE_SIZE,
            max_failure_ratio: None,
            log_level: "info".to_string(),
        }
    }
}

impl HarvesterConfig {
    /// Loads configuration from the environment, reading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Keys are the full
    /// variable names, e.g. `DATA_HARVESTER_MAX_CONCURRENT_JOBS`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        let max_failure_ratio = match get("MAX_FAILURE_RATIO") {
            Some(raw) => {
                let ratio: f64 = parse_value("MAX_FAILURE_RATIO", &raw)?;
                if !(0.0..=1.0).contains(&ratio) {
                    return Err(invalid("MAX_FAILURE_RATIO", &raw));
                }
                Some(ratio)
            }
            None => None,
        };

        let max_concurrent_jobs = match get("MAX_CONCURRENT_JOBS") {
            Some(raw) => match parse_value::<usize>("MAX_CONCURRENT_JOBS", &raw)? {
                0 => return Err(invalid("MAX_CONCURRENT_JOBS", &raw)),
                n => n,
            },
            None => defaults.max_concurrent_jobs,
        };

        Ok(Self {
            upload_dir: get("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            max_concurrent_jobs,
            http_timeout: match get("HTTP_TIMEOUT_SECS") {
                Some(raw) => Duration::from_secs(parse_value("HTTP_TIMEOUT_SECS", &raw)?),
                None => defaults.http_timeout,
            },
            user_agent: get("USER_AGENT").unwrap_or(defaults.user_agent),
            schema_sample_size: match get("SCHEMA_SAMPLE_SIZE") {
                Some(raw) => parse_value("SCHEMA_SAMPLE_SIZE", &raw)?,
                None => defaults.schema_sample_size,
            },
            max_failure_ratio,
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| invalid(name, raw))
}

fn invalid(name: &str, raw: &str) -> ConfigError {
    ConfigError::Invalid {
        key: format!("{ENV_PREFIX}{name}"),
        value: raw.to_string(),
    }
}

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))
}
