//! Secrets loader for Home Assistant configuration
//!
//! Loads `secrets.yaml` from the config directory. Values keep their YAML
//! type, so `port: !secret http_port` substitutes a number, not a string.

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Secrets store loaded from secrets.yaml
#[derive(Debug, Clone)]
pub struct Secrets {
    /// The secrets as key-value pairs
    secrets: HashMap<String, Value>,
    /// Path to the secrets file
    path: PathBuf,
}

impl Secrets {
    /// Load secrets from a secrets.yaml file
    pub fn load(config_dir: &Path) -> ConfigResult<Self> {
        let path = config_dir.join("secrets.yaml");

        if !path.exists() {
            debug!("No secrets.yaml found at {:?}, using empty secrets", path);
            return Ok(Self {
                secrets: HashMap::new(),
                path,
            });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        let secrets: HashMap<String, Value> = match serde_yaml::from_str(&content) {
            Ok(Value::Null) => HashMap::new(),
            Ok(value) => serde_yaml::from_value(value).map_err(|e| ConfigError::ParseYaml {
                path: path.clone(),
                source: e,
            })?,
            Err(e) => {
                return Err(ConfigError::ParseYaml {
                    path: path.clone(),
                    source: e,
                })
            }
        };

        debug!("Loaded {} secrets from {:?}", secrets.len(), path);

        Ok(Self { secrets, path })
    }

    /// Get a secret by key
    pub fn get(&self, key: &str) -> ConfigResult<&Value> {
        self.secrets
            .get(key)
            .ok_or_else(|| ConfigError::SecretNotFound {
                key: key.to_string(),
            })
    }

    /// Check if a secret exists
    pub fn contains(&self, key: &str) -> bool {
        self.secrets.contains_key(key)
    }

    /// Get the path to the secrets file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the number of secrets loaded
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Check if secrets store is empty
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl Default for Secrets {
    fn default() -> Self {
        Self {
            secrets: HashMap::new(),
            path: PathBuf::from("secrets.yaml"),
        }
    }
}
