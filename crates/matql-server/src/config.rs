//! Configuration for the MATQL server
//!
//! Loads configuration from:
//! 1. config.yaml - operational settings (port, store, materialization, logging)
//! 2. .env file - picked up by `dotenvy` before loading
//!
//! Environment variables always override config.yaml values. A missing
//! config file is not an error; defaults apply.

use matql_materialize::{MaterializeOptions, DEFAULT_BATCH_SIZE};
use matql_sql::GroupingPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnvVar { name: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Internal destination store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// DuckDB database file; `:memory:` keeps everything in process
    pub database: String,
    /// Schema that receives materialized tables and provenance
    pub schema: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: "./matql.duckdb".to_string(),
            schema: "materialized".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterializeConfig {
    pub grouping_policy: GroupingPolicy,
    pub batch_size: usize,
    pub table_prefix: String,
}

impl Default for MaterializeConfig {
    fn default() -> Self {
        Self {
            grouping_policy: GroupingPolicy::Strict,
            batch_size: DEFAULT_BATCH_SIZE,
            table_prefix: "mq".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub materialize: MaterializeConfig,
    pub logging: LoggingConfig,
}

fn parse_env<T: std::str::FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvVar {
        name: name.to_string(),
        value,
    })
}

impl Config {
    /// Load configuration from a YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::read(path.as_ref())?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("MATQL_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("MATQL_SERVER_PORT") {
            self.server.port = parse_env("MATQL_SERVER_PORT", port)?;
        }

        if let Ok(database) = std::env::var("MATQL_STORE_DATABASE") {
            self.store.database = database;
        }
        if let Ok(schema) = std::env::var("MATQL_STORE_SCHEMA") {
            self.store.schema = schema;
        }

        if let Ok(policy) = std::env::var("MATQL_GROUPING_POLICY") {
            self.materialize.grouping_policy = match policy.as_str() {
                "strict" => GroupingPolicy::Strict,
                "auto_complete" => GroupingPolicy::AutoComplete,
                _ => {
                    return Err(ConfigError::InvalidEnvVar {
                        name: "MATQL_GROUPING_POLICY".to_string(),
                        value: policy,
                    })
                }
            };
        }
        if let Ok(size) = std::env::var("MATQL_BATCH_SIZE") {
            self.materialize.batch_size = parse_env("MATQL_BATCH_SIZE", size)?;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.logging.directory = dir;
        }
        Ok(())
    }

    /// Materializer options for one request
    pub fn materialize_options(&self) -> MaterializeOptions {
        MaterializeOptions {
            grouping: self.materialize.grouping_policy,
            batch_size: self.materialize.batch_size.max(1),
            destination_schema: self.store.schema.clone(),
            table_prefix: self.materialize.table_prefix.clone(),
            table_name: None,
        }
    }

    /// Set logging environment variables for the logging module
    pub fn apply_logging_env(&self) {
        std::env::set_var("RUST_LOG", &self.logging.level);
        std::env::set_var("LOG_FORMAT", &self.logging.format);
        std::env::set_var("LOG_OUTPUT", &self.logging.output);
        std::env::set_var("LOG_DIR", &self.logging.directory);
    }
}
