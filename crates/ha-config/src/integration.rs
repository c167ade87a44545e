//! Integration descriptors and the schema registry
//!
//! Each integration publishes a statically declared [`Component`]: an
//! optional whole-of-domain schema tagged with its [`ConfigShape`], and an
//! optional platform schema. Platforms of other domains provided by the
//! integration publish a [`Platform`] with an optional refinement schema.
//!
//! Integrations are resolved through an [`IntegrationLoader`]. During one
//! configuration load the [`SchemaRegistry`] caches each resolution, so a
//! domain is looked up at most once.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::schema::{MapSchema, Schema};

/// How a component's configuration is shaped, and therefore how package
/// fragments are merged into it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigShape {
    /// Keyed mapping; fragments are merged key by key
    Dict,
    /// List of entries; fragments are appended
    List,
    /// Anything else; merged like a mapping
    Opaque,
}

/// A whole-of-domain configuration schema
#[derive(Debug, Clone)]
pub struct ComponentSchema {
    pub shape: ConfigShape,
    /// Validates the whole configuration tree, not only the domain key
    pub schema: Schema,
}

/// Schema for a tree where only `domain` is checked
///
/// Other top-level keys pass through untouched and an absent section stays
/// absent. A mapping section written as `domain:` with no value validates
/// as an empty mapping.
pub fn domain_schema(domain: &str, section: Schema) -> Schema {
    let section = match section {
        Schema::Map(_) | Schema::KeyedMap { .. } => Schema::All(vec![
            Schema::custom(|value| match value {
                Value::Null => Ok(Value::Mapping(Mapping::new())),
                other => Ok(other.clone()),
            }),
            section,
        ]),
        other => other,
    };
    Schema::map(MapSchema::new().optional(domain, section).allow_extra())
}

impl ComponentSchema {
    pub fn dict(schema: Schema) -> Self {
        Self {
            shape: ConfigShape::Dict,
            schema,
        }
    }

    pub fn list(schema: Schema) -> Self {
        Self {
            shape: ConfigShape::List,
            schema,
        }
    }

    pub fn opaque(schema: Schema) -> Self {
        Self {
            shape: ConfigShape::Opaque,
            schema,
        }
    }
}

/// Configuration capabilities of an integration's main module
#[derive(Debug, Clone, Default)]
pub struct Component {
    config_schema: Option<ComponentSchema>,
    platform_schema: Option<Schema>,
}

impl Component {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_schema(mut self, schema: ComponentSchema) -> Self {
        self.config_schema = Some(schema);
        self
    }

    /// Schema every platform entry of this domain must satisfy
    pub fn with_platform_schema(mut self, schema: Schema) -> Self {
        self.platform_schema = Some(schema);
        self
    }

    pub fn config_schema(&self) -> Option<&ComponentSchema> {
        self.config_schema.as_ref()
    }

    pub fn platform_schema(&self) -> Option<&Schema> {
        self.platform_schema.as_ref()
    }

    /// Whether package fragments for this component are appended as list
    /// entries instead of merged as mappings
    pub fn merges_as_list(&self) -> bool {
        self.platform_schema.is_some()
            || matches!(
                self.config_schema,
                Some(ComponentSchema {
                    shape: ConfigShape::List,
                    ..
                })
            )
    }
}

/// A platform an integration provides for another domain
#[derive(Debug, Clone, Default)]
pub struct Platform {
    platform_schema: Option<Schema>,
}

impl Platform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(schema: Schema) -> Self {
        Self {
            platform_schema: Some(schema),
        }
    }

    pub fn platform_schema(&self) -> Option<&Schema> {
        self.platform_schema.as_ref()
    }
}

/// Errors resolving an integration or one of its modules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrationError {
    #[error("Integration '{0}' not found.")]
    NotFound(String),

    #[error("Unable to import {module}: {reason}")]
    ImportFailed { module: String, reason: String },
}

/// An integration as returned by a loader
#[derive(Debug, Clone)]
pub struct Integration {
    domain: String,
    component: Result<Arc<Component>, String>,
    platforms: HashMap<String, Result<Platform, String>>,
}

impl Integration {
    pub fn new(domain: impl Into<String>, component: Component) -> Self {
        Self {
            domain: domain.into(),
            component: Ok(Arc::new(component)),
            platforms: HashMap::new(),
        }
    }

    /// An integration whose main module cannot be imported
    pub fn broken(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            component: Err(reason.into()),
            platforms: HashMap::new(),
        }
    }

    /// Register the platform this integration provides for `domain`
    pub fn with_platform(mut self, domain: impl Into<String>, platform: Platform) -> Self {
        self.platforms.insert(domain.into(), Ok(platform));
        self
    }

    /// Register a platform module that fails to import
    pub fn with_broken_platform(
        mut self,
        domain: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        self.platforms.insert(domain.into(), Err(reason.into()));
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Import the integration's main module
    pub fn component(&self) -> Result<Arc<Component>, IntegrationError> {
        self.component
            .clone()
            .map_err(|reason| IntegrationError::ImportFailed {
                module: self.domain.clone(),
                reason,
            })
    }

    /// Import the platform this integration provides for `domain`
    pub fn platform(&self, domain: &str) -> Result<Platform, IntegrationError> {
        let module = format!("{}.{}", self.domain, domain);
        match self.platforms.get(domain) {
            Some(Ok(platform)) => Ok(platform.clone()),
            Some(Err(reason)) => Err(IntegrationError::ImportFailed {
                module,
                reason: reason.clone(),
            }),
            None => Err(IntegrationError::ImportFailed {
                module,
                reason: "No module named platform".to_string(),
            }),
        }
    }
}

/// Resolves integrations by domain
#[async_trait]
pub trait IntegrationLoader: Send + Sync {
    async fn get_integration(&self, domain: &str) -> Result<Arc<Integration>, IntegrationError>;
}

/// In-memory set of known integrations
#[derive(Debug, Default)]
pub struct IntegrationRegistry {
    integrations: DashMap<String, Arc<Integration>>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, integration: Integration) {
        debug!(domain = %integration.domain(), "Registering integration");
        self.integrations
            .insert(integration.domain().to_string(), Arc::new(integration));
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.integrations.contains_key(domain)
    }

    pub fn len(&self) -> usize {
        self.integrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }
}

#[async_trait]
impl IntegrationLoader for IntegrationRegistry {
    async fn get_integration(&self, domain: &str) -> Result<Arc<Integration>, IntegrationError> {
        self.integrations
            .get(domain)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| IntegrationError::NotFound(domain.to_string()))
    }
}

/// Per-load cache of integration resolutions
pub struct SchemaRegistry {
    loader: Arc<dyn IntegrationLoader>,
    resolved: DashMap<String, Result<Arc<Integration>, IntegrationError>>,
}

impl SchemaRegistry {
    pub fn new(loader: Arc<dyn IntegrationLoader>) -> Self {
        Self {
            loader,
            resolved: DashMap::new(),
        }
    }

    /// Resolve an integration, consulting the loader at most once per domain
    pub async fn integration(&self, domain: &str) -> Result<Arc<Integration>, IntegrationError> {
        let cached = self.resolved.get(domain).map(|entry| entry.value().clone());
        if let Some(result) = cached {
            return result;
        }

        let result = self.loader.get_integration(domain).await;
        debug!(domain, found = result.is_ok(), "Resolved integration");
        self.resolved.insert(domain.to_string(), result.clone());
        result
    }

    /// Resolve an integration and import its main module
    pub async fn component(&self, domain: &str) -> Result<Arc<Component>, IntegrationError> {
        self.integration(domain).await?.component()
    }

    /// Number of domains resolved so far
    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::InvalidKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        inner: IntegrationRegistry,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IntegrationLoader for CountingLoader {
        async fn get_integration(
            &self,
            domain: &str,
        ) -> Result<Arc<Integration>, IntegrationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get_integration(domain).await
        }
    }

    #[test]
    fn test_merge_shape() {
        let dict = Component::new()
            .with_config_schema(ComponentSchema::dict(Schema::map(MapSchema::new())));
        let list = Component::new().with_config_schema(ComponentSchema::list(Schema::Any));
        let platforms = Component::new().with_platform_schema(Schema::Any);

        assert!(!dict.merges_as_list());
        assert!(list.merges_as_list());
        assert!(platforms.merges_as_list());
        assert!(!Component::new().merges_as_list());
    }

    #[test]
    fn test_domain_schema() {
        let schema = domain_schema(
            "http",
            Schema::map(MapSchema::new().optional_with_default("server_port", 8123, Schema::Integer)),
        );
        let tree = |s: &str| serde_yaml::from_str::<Value>(s).unwrap();

        assert_eq!(schema.validate(&tree("zone: []")).unwrap(), tree("zone: []"));
        assert_eq!(
            schema.validate(&tree("http:\nzone: []")).unwrap(),
            tree("http: {server_port: 8123}\nzone: []")
        );

        let err = schema.validate(&tree("http: {server_port: abc}")).unwrap_err();
        assert_eq!(err.kind, InvalidKind::Value);
        assert_eq!(err.to_string(), "expected int @ data['http']['server_port']");

        let zones = domain_schema("zone", Schema::ensure_list(Schema::Any));
        assert_eq!(zones.validate(&tree("zone:")).unwrap(), tree("zone: []"));
    }

    #[test]
    fn test_platform_resolution() {
        let hue = Integration::new("hue", Component::new())
            .with_platform("light", Platform::with_schema(Schema::Any))
            .with_broken_platform("sensor", "missing dependency");

        assert!(hue.platform("light").unwrap().platform_schema().is_some());
        assert_eq!(
            hue.platform("sensor").unwrap_err(),
            IntegrationError::ImportFailed {
                module: "hue.sensor".to_string(),
                reason: "missing dependency".to_string(),
            }
        );
        assert!(hue.platform("switch").is_err());
    }

    #[test]
    fn test_broken_component() {
        let broken = Integration::broken("zwave", "No module named 'openzwave'");
        let err = broken.component().unwrap_err();

        assert_eq!(err.to_string(), "Unable to import zwave: No module named 'openzwave'");
    }

    #[tokio::test]
    async fn test_schema_registry_caches_resolutions() {
        let inner = IntegrationRegistry::new();
        inner.register(Integration::new("light", Component::new()));
        let loader = Arc::new(CountingLoader {
            inner,
            calls: AtomicUsize::new(0),
        });
        let registry = SchemaRegistry::new(loader.clone());

        assert!(registry.component("light").await.is_ok());
        assert!(registry.integration("light").await.is_ok());
        assert_eq!(
            registry.integration("nope").await.unwrap_err(),
            IntegrationError::NotFound("nope".to_string())
        );
        assert!(registry.integration("nope").await.is_err());

        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.resolved_count(), 2);
    }
}
