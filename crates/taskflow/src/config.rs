use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Server configuration. Loaded from an optional TOML file; CLI flags and
/// environment variables override individual fields in `main`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    pub generator: Option<GeneratorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db")]
    pub db: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Exact origin allowed to send credentialed requests. Any origin when unset.
    pub cors_origin: Option<String>,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_limit")]
    pub default_limit: u32,
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl")]
    pub ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    /// OpenAI-compatible chat completions URL
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,
}

fn default_port() -> u16 {
    3001
}
fn default_db() -> String {
    "taskflow.db".to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_body_limit() -> usize {
    50 * 1024 * 1024
}
fn default_limit() -> u32 {
    2
}
fn default_max_limit() -> u32 {
    100
}
fn default_session_ttl() -> i64 {
    30
}
fn default_api_key_env() -> String {
    "TASKFLOW_GENERATOR_API_KEY".to_string()
}
fn default_generator_timeout() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            db: default_db(),
            request_timeout_secs: default_request_timeout(),
            cors_origin: None,
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_session_ttl(),
        }
    }
}

impl Config {
    /// Defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pagination;
        if p.default_limit == 0 || p.max_limit == 0 {
            return Err(ConfigError::Invalid(
                "pagination limits must be positive".to_string(),
            ));
        }
        if p.default_limit > p.max_limit {
            return Err(ConfigError::Invalid(format!(
                "pagination.default_limit ({}) exceeds pagination.max_limit ({})",
                p.default_limit, p.max_limit
            )));
        }
        if self.sessions.ttl_days <= 0 {
            return Err(ConfigError::Invalid("sessions.ttl_days must be positive".to_string()));
        }
        Ok(())
    }
}
