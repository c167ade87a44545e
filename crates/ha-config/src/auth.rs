//! Auth provider and multi-factor module configuration
//!
//! The core section may list auth providers and MFA modules. Their internals
//! live elsewhere; this module validates the lists, supplies the defaults
//! and installs the process-wide [`AuthManager`] exactly once.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::info;

use crate::schema::{ensure_list, Invalid, MapSchema, Schema};

pub const CONF_AUTH_PROVIDERS: &str = "auth_providers";
pub const CONF_AUTH_MFA_MODULES: &str = "auth_mfa_modules";
pub const CONF_TYPE: &str = "type";
pub const CONF_ID: &str = "id";
pub const CONF_NAME: &str = "name";

const INSECURE_EXAMPLE: &str = "insecure_example";

/// One configured auth provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Provider specific options
    #[serde(flatten)]
    pub options: IndexMap<String, Value>,
}

impl AuthProviderConfig {
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            id: None,
            name: None,
            options: IndexMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// One configured multi-factor auth module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfaModuleConfig {
    #[serde(rename = "type")]
    pub module_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub options: IndexMap<String, Value>,
}

fn string_at(config: &Value, key: &str) -> Option<String> {
    config.get(key).and_then(Value::as_str).map(str::to_string)
}

fn no_duplicate_auth_provider(configs: &Value) -> Result<Value, Invalid> {
    let mut seen = HashSet::new();
    for config in configs.as_sequence().into_iter().flatten() {
        let provider_type = string_at(config, CONF_TYPE).unwrap_or_default();
        if !seen.insert((provider_type.clone(), string_at(config, CONF_ID))) {
            return Err(Invalid::value(format!(
                "Duplicate auth provider {} found. Please add unique IDs if you want to have \
                 the same auth provider twice",
                provider_type
            )));
        }
    }
    Ok(configs.clone())
}

/// Modules are keyed by their id, falling back to their type
fn no_duplicate_auth_mfa_module(configs: &Value) -> Result<Value, Invalid> {
    let mut seen = HashSet::new();
    for config in configs.as_sequence().into_iter().flatten() {
        let module_type = string_at(config, CONF_TYPE).unwrap_or_default();
        let key = string_at(config, CONF_ID).unwrap_or_else(|| module_type.clone());
        if !seen.insert(key) {
            return Err(Invalid::value(format!(
                "Duplicate mfa module {} found. Please add unique IDs if you want to have \
                 the same mfa module twice",
                module_type
            )));
        }
    }
    Ok(configs.clone())
}

fn entry_schema(insecure_message: &str) -> Schema {
    Schema::map(
        MapSchema::new()
            .required(
                CONF_TYPE,
                Schema::All(vec![
                    Schema::String,
                    Schema::not_in(&[INSECURE_EXAMPLE], insecure_message),
                ]),
            )
            .optional(CONF_NAME, Schema::String)
            .optional(CONF_ID, Schema::String)
            .allow_extra(),
    )
}

pub fn auth_providers_schema() -> Schema {
    Schema::All(vec![
        Schema::ensure_list(entry_schema(
            "The insecure_example auth provider is for testing only.",
        )),
        Schema::custom(no_duplicate_auth_provider),
    ])
}

pub fn auth_mfa_modules_schema() -> Schema {
    Schema::All(vec![
        Schema::ensure_list(entry_schema(
            "The insecure_example mfa module is for testing only.",
        )),
        Schema::custom(no_duplicate_auth_mfa_module),
    ])
}

/// Parse a validated provider list
pub fn parse_auth_providers(validated: &Value) -> Result<Vec<AuthProviderConfig>, Invalid> {
    serde_yaml::from_value(validated.clone()).map_err(|e| Invalid::value(e.to_string()))
}

/// Parse a validated MFA module list
pub fn parse_auth_mfa_modules(validated: &Value) -> Result<Vec<MfaModuleConfig>, Invalid> {
    serde_yaml::from_value(validated.clone()).map_err(|e| Invalid::value(e.to_string()))
}

/// Settings of other components that shape the default providers
#[derive(Debug, Clone, Default)]
pub struct AuthDefaults {
    pub api_password: Option<String>,
    pub trusted_networks: Vec<String>,
}

impl AuthDefaults {
    /// Read `api_password` and `trusted_networks` from a raw `http:` section
    pub fn from_http_config(http: &Value) -> Self {
        Self {
            api_password: string_at(http, "api_password"),
            trusted_networks: http
                .get("trusted_networks")
                .map(ensure_list)
                .unwrap_or_default()
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        }
    }

    /// Fill fields that are unset here from `other`
    pub fn or(self, other: AuthDefaults) -> Self {
        Self {
            api_password: self.api_password.or(other.api_password),
            trusted_networks: if self.trusted_networks.is_empty() {
                other.trusted_networks
            } else {
                self.trusted_networks
            },
        }
    }
}

pub fn default_auth_providers(defaults: &AuthDefaults) -> Vec<AuthProviderConfig> {
    let mut providers = vec![AuthProviderConfig::new("homeassistant")];
    if let Some(password) = &defaults.api_password {
        providers.push(
            AuthProviderConfig::new("legacy_api_password")
                .with_option("api_password", password.as_str()),
        );
    }
    if !defaults.trusted_networks.is_empty() {
        providers.push(AuthProviderConfig::new("trusted_networks").with_option(
            "trusted_networks",
            defaults
                .trusted_networks
                .iter()
                .map(|n| Value::from(n.as_str()))
                .collect::<Vec<_>>(),
        ));
    }
    providers
}

pub fn default_mfa_modules() -> Vec<MfaModuleConfig> {
    vec![MfaModuleConfig {
        module_type: "totp".to_string(),
        id: Some("totp".to_string()),
        name: Some("Authenticator app".to_string()),
        options: IndexMap::new(),
    }]
}

/// The installed auth configuration
#[derive(Debug)]
pub struct AuthManager {
    providers: Vec<AuthProviderConfig>,
    mfa_modules: Vec<MfaModuleConfig>,
}

impl AuthManager {
    pub fn new(providers: Vec<AuthProviderConfig>, mfa_modules: Vec<MfaModuleConfig>) -> Self {
        Self {
            providers,
            mfa_modules,
        }
    }

    pub fn providers(&self) -> &[AuthProviderConfig] {
        &self.providers
    }

    pub fn mfa_modules(&self) -> &[MfaModuleConfig] {
        &self.mfa_modules
    }
}

/// Install the auth manager on first use; later calls return the installed
/// instance and ignore their arguments
pub fn ensure_auth_manager(
    slot: &OnceLock<Arc<AuthManager>>,
    providers: Option<Vec<AuthProviderConfig>>,
    mfa_modules: Option<Vec<MfaModuleConfig>>,
    defaults: &AuthDefaults,
) -> Arc<AuthManager> {
    slot.get_or_init(|| {
        let providers = providers.unwrap_or_else(|| default_auth_providers(defaults));
        let mfa_modules = mfa_modules.unwrap_or_else(default_mfa_modules);
        info!(
            providers = providers.len(),
            mfa_modules = mfa_modules.len(),
            "Installing auth manager"
        );
        Arc::new(AuthManager::new(providers, mfa_modules))
    })
    .clone()
}
