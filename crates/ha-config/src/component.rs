//! Per-component configuration validation
//!
//! A component either validates the whole configuration tree with one
//! schema, or declares a platform schema that every entry under the domain (and
//! under labelled keys such as `light kitchen`) must satisfy. Named
//! platforms may refine the entry further with their own schema.
//!
//! Failures stay local: a bad domain yields no configuration, a bad platform
//! entry is dropped, and everything else carries on. Each failure is
//! returned as a [`ComponentFailure`] for the error reporter.

use serde_yaml::Value;

use crate::integration::{Integration, IntegrationError, SchemaRegistry};
use crate::path::{key_to_string, PathSegment};
use crate::schema::{is_falsy, Invalid};
use crate::ConfigTree;

pub const CONF_PLATFORM: &str = "platform";

/// Whether a top-level key belongs to `domain` (`light` or `light <label>`)
fn is_domain_key(key: &str, domain: &str) -> bool {
    match key.strip_prefix(domain) {
        Some("") => true,
        Some(rest) => rest.strip_prefix(' ').is_some_and(|label| !label.is_empty()),
        None => false,
    }
}

/// Top-level keys holding configuration for `domain`, in config order
pub fn extract_domain_configs(config: &ConfigTree, domain: &str) -> Vec<String> {
    config
        .keys()
        .map(key_to_string)
        .filter(|key| is_domain_key(key, domain))
        .collect()
}

/// One platform entry of a domain
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformEntry {
    /// Value of the entry's `platform:` key, if any
    pub platform: Option<String>,
    pub config: Value,
    /// Position of the entry in the configuration tree
    pub path: Vec<PathSegment>,
}

/// Every platform entry configured for `domain`
///
/// Each matching key is coerced to a list; empty values are skipped.
pub fn config_per_platform(config: &ConfigTree, domain: &str) -> Vec<PlatformEntry> {
    let mut entries = Vec::new();

    for (key, value) in config {
        let key = key_to_string(key);
        if !is_domain_key(&key, domain) || is_falsy(value) {
            continue;
        }

        let items: Vec<(Vec<PathSegment>, &Value)> = match value {
            Value::Sequence(seq) => seq
                .iter()
                .enumerate()
                .map(|(index, item)| (vec![PathSegment::from(key.as_str()), index.into()], item))
                .collect(),
            single => vec![(vec![PathSegment::from(key.as_str())], single)],
        };

        for (path, item) in items {
            let platform = item
                .get(CONF_PLATFORM)
                .filter(|p| !p.is_null())
                .map(key_to_string);
            entries.push(PlatformEntry {
                platform,
                config: item.clone(),
                path,
            });
        }
    }

    entries
}

/// A failure isolated to one domain or one platform entry
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentFailure {
    /// Configuration rejected by a schema
    Invalid {
        /// `<domain>` or `<domain>.<platform>`
        domain: String,
        error: Invalid,
        /// The node that was validated
        config: Value,
        /// Position of `config` in the configuration tree
        path: Vec<PathSegment>,
    },
    /// The component, or a platform named by an entry, could not be loaded
    Unresolved {
        domain: String,
        error: IntegrationError,
        path: Vec<PathSegment>,
    },
}

impl ComponentFailure {
    /// Name under which the failure is reported
    pub fn domain(&self) -> &str {
        match self {
            Self::Invalid { domain, .. } | Self::Unresolved { domain, .. } => domain,
        }
    }
}

/// Result of validating one domain
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentOutcome {
    pub domain: String,
    /// Processed configuration tree, `None` when the domain failed as a whole
    pub config: Option<ConfigTree>,
    pub failures: Vec<ComponentFailure>,
}

impl ComponentOutcome {
    fn failed(domain: &str, failure: ComponentFailure) -> Self {
        Self {
            domain: domain.to_string(),
            config: None,
            failures: vec![failure],
        }
    }

    pub fn is_ok(&self) -> bool {
        self.config.is_some() && self.failures.is_empty()
    }
}

/// Validate the configuration of one integration's domain
///
/// Returns the processed configuration tree: a component schema validates
/// the whole tree and its result is the processed tree, for platform domains
/// all matching keys are collapsed into one list of surviving entries.
pub async fn validate_component_config(
    config: &ConfigTree,
    integration: &Integration,
    registry: &SchemaRegistry,
) -> ComponentOutcome {
    let domain = integration.domain();
    let component = match integration.component() {
        Ok(component) => component,
        Err(error) => {
            return ComponentOutcome::failed(
                domain,
                ComponentFailure::Unresolved {
                    domain: domain.to_string(),
                    error,
                    path: vec![PathSegment::from(domain)],
                },
            )
        }
    };

    if let Some(component_schema) = component.config_schema() {
        let whole = Value::Mapping(config.clone());
        let validated = component_schema
            .schema
            .validate(&whole)
            .and_then(|validated| match validated {
                Value::Mapping(processed) => Ok(processed),
                _ => Err(Invalid::unsupported_type("expected a dictionary")),
            });

        return match validated {
            Ok(processed) => ComponentOutcome {
                domain: domain.to_string(),
                config: Some(processed),
                failures: Vec::new(),
            },
            Err(error) => ComponentOutcome::failed(
                domain,
                ComponentFailure::Invalid {
                    domain: domain.to_string(),
                    error,
                    config: whole,
                    path: Vec::new(),
                },
            ),
        };
    }

    let Some(platform_schema) = component.platform_schema() else {
        return ComponentOutcome {
            domain: domain.to_string(),
            config: Some(config.clone()),
            failures: Vec::new(),
        };
    };

    let mut platforms = Vec::new();
    let mut failures = Vec::new();

    for entry in config_per_platform(config, domain) {
        let validated = match platform_schema.validate(&entry.config) {
            Ok(validated) => validated,
            Err(error) => {
                failures.push(ComponentFailure::Invalid {
                    domain: domain.to_string(),
                    error,
                    config: entry.config,
                    path: entry.path,
                });
                continue;
            }
        };

        // Domains like automation have entries without a driving platform
        let Some(platform_name) = entry.platform else {
            platforms.push(validated);
            continue;
        };

        let qualified = format!("{}.{}", domain, platform_name);
        let platform = match registry.integration(&platform_name).await {
            Ok(platform_integration) => platform_integration.platform(domain),
            Err(error) => Err(error),
        };
        let platform = match platform {
            Ok(platform) => platform,
            Err(error) => {
                failures.push(ComponentFailure::Unresolved {
                    domain: qualified,
                    error,
                    path: entry.path,
                });
                continue;
            }
        };

        match platform.platform_schema() {
            Some(schema) => match schema.validate(&entry.config) {
                Ok(refined) => platforms.push(refined),
                Err(error) => failures.push(ComponentFailure::Invalid {
                    domain: qualified,
                    error,
                    config: entry.config,
                    path: entry.path,
                }),
            },
            None => platforms.push(validated),
        }
    }

    let mut processed: ConfigTree = config
        .iter()
        .filter(|(key, _)| !is_domain_key(&key_to_string(key), domain))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    processed.insert(Value::from(domain), Value::Sequence(platforms));

    ComponentOutcome {
        domain: domain.to_string(),
        config: Some(processed),
        failures,
    }
}
