use crate::constants::{self, ENV_API_KEY, ENV_DB_PATH};
use crate::error::ConfigError;
use crate::types::AreaCode;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Usually supplied through SEOUL_API_KEY instead of the file
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Areas fetched at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "constants::default_area_codes")]
    pub area_codes: Vec<String>,
    #[serde(default = "default_run_timeout_seconds")]
    pub run_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_base_url() -> String {
    constants::DEFAULT_API_BASE_URL.to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_concurrency() -> usize {
    4
}

fn default_db_path() -> PathBuf {
    PathBuf::from(constants::DEFAULT_DB_PATH)
}

fn default_run_timeout_seconds() -> u64 {
    15 * 60
}

fn default_interval_seconds() -> u64 {
    60 * 60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout_seconds: default_timeout_seconds(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            area_codes: constants::default_area_codes(),
            run_timeout_seconds: default_run_timeout_seconds(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
        }
    }
}

impl Config {
    /// Load from a TOML file and apply environment overrides. Call
    /// [`Config::validate`] before running the pipeline.
    ///
    /// A missing file is not an error: defaults plus environment are enough
    /// to run as long as an API key is provided.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
                path: path.display().to_string(),
                source: e,
            })?;
            Self::from_toml_str(&content)?
        } else {
            Self::from_toml_str("")?
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Override file values from the environment; `lookup` is injectable for tests
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_API_KEY).filter(|k| !k.trim().is_empty()) {
            self.api.api_key = key;
        }
        if let Some(path) = lookup(ENV_DB_PATH).filter(|p| !p.trim().is_empty()) {
            self.database.path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "API key is empty; set api.api_key or {}",
                ENV_API_KEY
            )));
        }
        if self.api.concurrency == 0 {
            return Err(ConfigError::Invalid("api.concurrency must be at least 1".into()));
        }
        if self.api.timeout_seconds == 0 || self.pipeline.run_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.schedule.interval_seconds == 0 {
            return Err(ConfigError::Invalid("schedule.interval_seconds must be non-zero".into()));
        }
        if self.pipeline.area_codes.is_empty() {
            return Err(ConfigError::Invalid("pipeline.area_codes is empty".into()));
        }
        let mut seen = HashSet::new();
        for code in &self.pipeline.area_codes {
            if code.trim().is_empty() {
                return Err(ConfigError::Invalid("blank area code".into()));
            }
            if !seen.insert(code.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate area code: {}", code)));
            }
        }
        Ok(())
    }

    pub fn area_codes(&self) -> Vec<AreaCode> {
        self.pipeline.area_codes.iter().map(|c| AreaCode::new(c.as_str())).collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_seconds)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.run_timeout_seconds)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.interval_seconds)
    }
}
