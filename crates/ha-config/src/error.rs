//! Error types for configuration loading and processing

use std::path::PathBuf;
use thiserror::Error;

use crate::schema::Invalid;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading or processing configuration
///
/// Only failures that abort a load are represented here. Per-domain and
/// per-package problems are collected as values in the load report.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration file in the config directory
    #[error("Config file not found in: {}", .dir.display())]
    ConfigNotFound { dir: PathBuf },

    /// Failed to read a file
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file of the default configuration
    #[error("failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML
    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The root of the configuration file is not a mapping
    #[error("The configuration file {file} does not contain a dictionary")]
    NotAMapping { file: String },

    /// Secret not found
    #[error("secret '{key}' not found in secrets.yaml")]
    SecretNotFound { key: String },

    /// Invalid include path
    #[error("invalid include path '{path}': {reason}")]
    InvalidIncludePath { path: String, reason: String },

    /// Include file not found
    #[error("included file not found: {path}")]
    IncludeNotFound { path: PathBuf },

    /// Directory not found for include_dir_*
    #[error("directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// Circular include detected
    #[error("circular include detected: {path}")]
    CircularInclude { path: PathBuf },

    /// Environment variable not found
    #[error("environment variable '{var}' not set")]
    EnvVarNotFound { var: String },

    /// Invalid value for a loader tag
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    /// The core section failed its schema; fatal for the whole load
    #[error("Invalid config for [homeassistant]: {0}")]
    CoreInvalid(#[source] Invalid),

    /// The packages section failed its schema
    #[error("Invalid packages configuration: {0}")]
    PackagesInvalid(#[source] Invalid),

    /// A blocking load task did not complete
    #[error("configuration task failed: {0}")]
    Task(String),
}
