//! Configuration loading and validation.
//!
//! Instance credentials come from a YAML file or from environment variables
//! (`SOURCE_*` / `TARGET_*`), never from embedded literals. The file also
//! carries executor options and optional paths to a mapping file and a
//! tracking store.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MigrateError, Result};
use crate::executor::ExecutorOptions;

/// Connection descriptor for one instance of the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Instance host.
    pub host: String,

    /// Instance port.
    pub port: u16,

    /// RPC protocol identifier (default: "jsonrpc").
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Database name within the instance.
    pub database: String,

    /// Login user.
    pub user: String,

    /// Login password.
    pub password: String,
}

fn default_protocol() -> String {
    "jsonrpc".to_string()
}

impl InstanceConfig {
    /// Load a descriptor from `<PREFIX>_HOST`, `<PREFIX>_PORT`,
    /// `<PREFIX>_DB`, `<PREFIX>_DB_USER`, `<PREFIX>_DB_PASSWORD` and the
    /// optional `<PREFIX>_PROTOCOL`.
    pub fn from_env(prefix: &str) -> Result<Self> {
        let var = |suffix: &str| -> Result<String> {
            let key = format!("{}_{}", prefix, suffix);
            std::env::var(&key)
                .map_err(|_| MigrateError::config(format!("missing environment variable {}", key)))
        };

        let port: u16 = var("PORT")?
            .parse()
            .map_err(|e| MigrateError::config(format!("invalid {}_PORT: {}", prefix, e)))?;

        Ok(Self {
            host: var("HOST")?,
            port,
            protocol: std::env::var(format!("{}_PROTOCOL", prefix))
                .unwrap_or_else(|_| default_protocol()),
            database: var("DB")?,
            user: var("DB_USER")?,
            password: var("DB_PASSWORD")?,
        })
    }

    /// Cache key identifying the instance/session this descriptor opens.
    pub fn cache_key(&self) -> String {
        format!(
            "{}://{}:{}/{}@{}",
            self.protocol, self.host, self.port, self.database, self.user
        )
    }
}

/// Root configuration: both instances plus executor behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source instance (records are read from here).
    pub source: InstanceConfig,

    /// Target instance (records are written here).
    pub target: InstanceConfig,

    /// Executor options.
    #[serde(default)]
    pub executor: ExecutorOptions,

    /// Path to a serialized migration map to load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_file: Option<PathBuf>,

    /// Path to the tracking store file; tracking is disabled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from `SOURCE_*`/`TARGET_*` environment
    /// variables with default executor options.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            source: InstanceConfig::from_env("SOURCE")?,
            target: InstanceConfig::from_env("TARGET")?,
            executor: ExecutorOptions::default(),
            mapping_file: None,
            tracking_file: None,
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        for (side, instance) in [("source", &self.source), ("target", &self.target)] {
            if instance.host.is_empty() {
                return Err(MigrateError::config(format!("{}: host is empty", side)));
            }
            if instance.port == 0 {
                return Err(MigrateError::config(format!("{}: port is zero", side)));
            }
            if instance.database.is_empty() {
                return Err(MigrateError::config(format!("{}: database is empty", side)));
            }
        }
        self.executor.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
source:
  host: old.example.com
  port: 8069
  database: prod
  user: admin
  password: secret
target:
  host: new.example.com
  port: 8069
  protocol: xmlrpc
  database: prod-v2
  user: admin
  password: secret
executor:
  max_depth: 3
  batch_size: 25
tracking_file: migrated.json
"#;

    #[test]
    fn test_from_yaml() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.protocol, "jsonrpc");
        assert_eq!(config.target.protocol, "xmlrpc");
        assert_eq!(config.executor.max_depth, 3);
        assert_eq!(config.executor.batch_size, 25);
        assert_eq!(config.tracking_file, Some(PathBuf::from("migrated.json")));
        assert!(config.mapping_file.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = Config::from_yaml(YAML).unwrap();
        config.target.port = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("port is zero"));
    }

    #[test]
    fn test_cache_key_distinguishes_databases() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_ne!(config.source.cache_key(), config.target.cache_key());
    }
}
