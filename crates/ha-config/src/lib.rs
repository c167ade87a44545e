//! Configuration loading, merging and validation for Home Assistant
//!
//! The pipeline reads `configuration.yaml` with Home Assistant's custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!include_dir_list dir` - Include all YAML files in a directory as a list
//! - `!include_dir_merge_list dir` - Merge lists from all YAML files
//! - `!include_dir_named dir` - Include all YAML files as a mapping
//! - `!include_dir_merge_named dir` - Merge mappings from all YAML files
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR` - Environment variable substitution
//!
//! It then applies the `homeassistant:` core section, merges packages into
//! the tree and validates every domain against the schemas its integration
//! declares. Failures are reported with the file and line they came from.
//!
//! # Example
//!
//! ```ignore
//! use ha_config::{HomeAssistant, IntegrationRegistry};
//! use std::sync::Arc;
//!
//! let hass = HomeAssistant::new("/config", Arc::new(IntegrationRegistry::new()));
//! let report = hass.bootstrap().await?;
//! for domain in report.domains.keys() {
//!     println!("{domain} is ready to set up");
//! }
//! ```

pub mod auth;
pub mod bootstrap;
pub mod component;
pub mod core_config;
pub mod customize;
mod error;
pub mod hass;
pub mod integration;
mod loader;
pub mod location;
pub mod packages;
pub mod path;
pub mod provenance;
pub mod report;
pub mod schema;
mod secrets;
pub mod validation;

/// Top-level configuration: domain keys mapped to their configuration
pub type ConfigTree = serde_yaml::Mapping;

pub use auth::{AuthDefaults, AuthManager, AuthProviderConfig, MfaModuleConfig};
pub use bootstrap::{
    create_default_config, default_config_dir, ensure_config_exists, find_config_file,
    load_yaml_config_file,
};
pub use component::{validate_component_config, ComponentFailure, ComponentOutcome};
pub use core_config::{process_core_config, CoreConfig, UnitSystem};
pub use customize::CustomizeRuleSet;
pub use error::{ConfigError, ConfigResult};
pub use hass::{HomeAssistant, LoadReport};
pub use integration::{
    domain_schema, Component, ComponentSchema, ConfigShape, Integration, IntegrationError, IntegrationLoader,
    IntegrationRegistry, Platform, SchemaRegistry,
};
pub use loader::{load_yaml, load_yaml_string, LoadedYaml, YamlLoader};
pub use location::{HttpLocationService, LocationInfo, LocationService};
pub use packages::{merge_packages_config, PackageError, PackageErrorReason};
pub use provenance::{Location, ProvenanceMap};
pub use report::{format_config_error, ErrorReporter};
pub use schema::{Invalid, InvalidKind, MapSchema, Schema};
pub use secrets::Secrets;

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
