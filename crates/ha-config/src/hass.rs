//! Configuration runtime
//!
//! [`HomeAssistant`] owns the collaborators of a configuration load and runs
//! the pipeline: load the YAML tree, apply the core section, merge packages,
//! then validate every domain in config order.

use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::{debug, info};

use ha_components::{create_manager, NotificationSink};
use ha_core::CORE_DOMAIN;

use crate::auth::{AuthDefaults, AuthManager};
use crate::bootstrap::{find_config_file, load_yaml_config_file, YAML_CONFIG_FILE};
use crate::component::{validate_component_config, ComponentFailure};
use crate::core_config::{process_core_config, CoreConfig, CoreConfigContext};
use crate::error::{ConfigError, ConfigResult};
use crate::integration::{Integration, IntegrationLoader, SchemaRegistry};
use crate::loader::LoadedYaml;
use crate::location::LocationService;
use crate::packages::{merge_packages_config, PackageError, CONF_PACKAGES};
use crate::path::{key_to_string, PathSegment};
use crate::provenance::ProvenanceMap;
use crate::report::ErrorReporter;
use crate::ConfigTree;

/// Outcome of a full configuration load
#[derive(Debug)]
pub struct LoadReport {
    pub core: Arc<CoreConfig>,
    /// Validated configuration of every domain that passed, in config order
    pub domains: IndexMap<String, Value>,
    pub package_errors: Vec<PackageError>,
    /// Domains and `<domain>.<platform>` names that failed, in order
    pub failed: Vec<String>,
    /// Every logged error message
    pub errors: Vec<String>,
}

impl LoadReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

fn core_section(config: &ConfigTree) -> Value {
    config
        .get(CORE_DOMAIN)
        .cloned()
        .unwrap_or_else(|| Value::Mapping(Mapping::new()))
}

/// Domains configured in `config`, in order, without the core key
///
/// Labelled keys (`light kitchen`) collapse into their domain.
pub fn config_domains(config: &ConfigTree) -> Vec<String> {
    let mut domains: Vec<String> = Vec::new();
    for key in config.keys() {
        let key = key_to_string(key);
        let domain = key.split(' ').next().unwrap_or_default();
        if domain.is_empty() || domain == CORE_DOMAIN || domains.iter().any(|d| d == domain) {
            continue;
        }
        domains.push(domain.to_string());
    }
    domains
}

/// Runtime state of the configuration pipeline
pub struct HomeAssistant {
    config_dir: PathBuf,
    integrations: Arc<dyn IntegrationLoader>,
    location: Option<Arc<dyn LocationService>>,
    notifications: Arc<dyn NotificationSink>,
    reporter: ErrorReporter,
    auth: OnceLock<Arc<AuthManager>>,
    auth_defaults: AuthDefaults,
    core: RwLock<Arc<CoreConfig>>,
}

impl HomeAssistant {
    pub fn new(config_dir: impl Into<PathBuf>, integrations: Arc<dyn IntegrationLoader>) -> Self {
        let config_dir = config_dir.into();
        let notifications: Arc<dyn NotificationSink> = create_manager();
        Self {
            core: RwLock::new(Arc::new(CoreConfig::new(config_dir.clone()))),
            config_dir,
            integrations,
            location: None,
            reporter: ErrorReporter::new(notifications.clone()),
            notifications,
            auth: OnceLock::new(),
            auth_defaults: AuthDefaults::default(),
        }
    }

    /// Enable auto-detection of missing location settings
    pub fn with_location_service(mut self, location: Arc<dyn LocationService>) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.reporter = ErrorReporter::new(sink.clone());
        self.notifications = sink;
        self
    }

    pub fn with_auth_defaults(mut self, defaults: AuthDefaults) -> Self {
        self.auth_defaults = defaults;
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// The core configuration currently in effect
    pub fn core_config(&self) -> Arc<CoreConfig> {
        self.core
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The auth manager, once the core section has been processed
    pub fn auth(&self) -> Option<Arc<AuthManager>> {
        self.auth.get().cloned()
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    pub fn notifications(&self) -> &Arc<dyn NotificationSink> {
        &self.notifications
    }

    pub fn location_service(&self) -> Option<&dyn LocationService> {
        self.location.as_deref()
    }

    /// Load `configuration.yaml` off the async runtime
    pub async fn load_config(&self) -> ConfigResult<LoadedYaml> {
        let config_dir = self.config_dir.clone();
        tokio::task::spawn_blocking(move || {
            let path = find_config_file(&config_dir).ok_or_else(|| ConfigError::ConfigNotFound {
                dir: config_dir.clone(),
            })?;
            load_yaml_config_file(&path)
        })
        .await
        .map_err(|e| ConfigError::Task(e.to_string()))?
    }

    async fn load_tree(&self) -> ConfigResult<(ConfigTree, ProvenanceMap)> {
        let LoadedYaml { value, provenance } = self.load_config().await?;
        match value {
            Value::Mapping(config) => Ok((config, provenance)),
            _ => Err(ConfigError::NotAMapping {
                file: YAML_CONFIG_FILE.to_string(),
            }),
        }
    }

    /// Load the configuration with packages merged in
    ///
    /// For components that reload their own configuration.
    pub async fn hass_config_yaml(&self) -> ConfigResult<ConfigTree> {
        let (mut config, mut provenance) = self.load_tree().await?;
        let registry = SchemaRegistry::new(self.integrations.clone());
        self.merge_packages(&mut config, &registry, &mut provenance)
            .await?;
        Ok(config)
    }

    async fn merge_packages(
        &self,
        config: &mut ConfigTree,
        registry: &SchemaRegistry,
        provenance: &mut ProvenanceMap,
    ) -> ConfigResult<Vec<PackageError>> {
        let packages = core_section(config)
            .get(CONF_PACKAGES)
            .cloned()
            .unwrap_or_else(|| Value::Mapping(Mapping::new()));
        merge_packages_config(config, &packages, registry, provenance)
            .await
            .map_err(ConfigError::PackagesInvalid)
    }

    /// Validate and apply the core section, replacing the current core config
    ///
    /// Default auth providers follow the `http:` section unless configured
    /// on the runtime.
    async fn process_core(
        &self,
        config: &ConfigTree,
        provenance: &ProvenanceMap,
    ) -> ConfigResult<Arc<CoreConfig>> {
        let section = core_section(config);
        let http = config.get("http").cloned().unwrap_or(Value::Null);
        let auth_defaults = self
            .auth_defaults
            .clone()
            .or(AuthDefaults::from_http_config(&http));
        let ctx = CoreConfigContext {
            config_dir: &self.config_dir,
            location: self.location.as_deref(),
            auth: &self.auth,
            auth_defaults: &auth_defaults,
        };

        match process_core_config(&ctx, &section).await {
            Ok(core) => {
                let core = Arc::new(core);
                *self.core.write().unwrap_or_else(PoisonError::into_inner) = core.clone();
                Ok(core)
            }
            Err(invalid) => {
                let rooted = invalid.clone().with_prefix(&[PathSegment::from(CORE_DOMAIN)]);
                self.reporter
                    .log_exception(&invalid, CORE_DOMAIN, &section, provenance.locate(&rooted.path));
                Err(ConfigError::CoreInvalid(invalid))
            }
        }
    }

    /// Reload the core section; the auth manager is kept
    pub async fn reload_core_config(&self) -> ConfigResult<Arc<CoreConfig>> {
        let (config, provenance) = self.load_tree().await?;
        self.process_core(&config, &provenance).await
    }

    /// Validate one integration's configuration and report its failures
    ///
    /// Returns the processed tree, or `None` when the domain failed as a whole.
    pub async fn process_component_config(
        &self,
        config: &ConfigTree,
        integration: &Integration,
        provenance: &ProvenanceMap,
    ) -> Option<ConfigTree> {
        let registry = SchemaRegistry::new(self.integrations.clone());
        let mut errors = Vec::new();
        let mut failed = Vec::new();
        self.process_with(config, integration, &registry, provenance, &mut failed, &mut errors)
            .await
    }

    async fn process_with(
        &self,
        config: &ConfigTree,
        integration: &Integration,
        registry: &SchemaRegistry,
        provenance: &ProvenanceMap,
        failed: &mut Vec<String>,
        errors: &mut Vec<String>,
    ) -> Option<ConfigTree> {
        let outcome = validate_component_config(config, integration, registry).await;
        for failure in &outcome.failures {
            errors.push(self.reporter.report_failure(failure, provenance));
            failed.push(failure.domain().to_string());
        }
        outcome.config
    }

    /// Run the whole pipeline
    ///
    /// Only an unreadable configuration or an invalid core section abort the
    /// load; every other problem is reported and collected in the report.
    pub async fn bootstrap(&self) -> ConfigResult<LoadReport> {
        let (mut config, mut provenance) = self.load_tree().await?;
        let core = self.process_core(&config, &provenance).await?;

        let registry = SchemaRegistry::new(self.integrations.clone());
        let package_errors = self
            .merge_packages(&mut config, &registry, &mut provenance)
            .await?;

        let mut errors: Vec<String> = package_errors.iter().map(ToString::to_string).collect();
        let mut failed = Vec::new();
        let mut domains = IndexMap::new();

        for domain in config_domains(&config) {
            let integration = match registry.integration(&domain).await {
                Ok(integration) => integration,
                Err(error) => {
                    let failure = ComponentFailure::Unresolved {
                        domain: domain.clone(),
                        error,
                        path: vec![PathSegment::from(domain.as_str())],
                    };
                    errors.push(self.reporter.report_failure(&failure, &provenance));
                    failed.push(domain);
                    continue;
                }
            };

            let processed = self
                .process_with(&config, &integration, &registry, &provenance, &mut failed, &mut errors)
                .await;
            if let Some(processed) = processed {
                let value = processed.get(domain.as_str()).cloned().unwrap_or(Value::Null);
                debug!(domain = %domain, "Configuration validated");
                domains.insert(domain, value);
            }
        }

        info!(
            domains = domains.len(),
            failed = failed.len(),
            integrations = registry.resolved_count(),
            "Configuration loaded"
        );

        Ok(LoadReport {
            core,
            domains,
            package_errors,
            failed,
            errors,
        })
    }

    /// Check the configuration without touching this runtime
    ///
    /// Returns the error messages joined by newlines, or `None` when the
    /// configuration is valid.
    pub async fn check_config(&self) -> Option<String> {
        let scratch = HomeAssistant::new(self.config_dir.clone(), self.integrations.clone())
            .with_auth_defaults(self.auth_defaults.clone());

        match scratch.bootstrap().await {
            Ok(report) if report.is_ok() => None,
            Ok(report) => Some(report.errors.join("\n")),
            Err(e) => Some(e.to_string()),
        }
    }
}

impl std::fmt::Debug for HomeAssistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeAssistant")
            .field("config_dir", &self.config_dir)
            .field("detect_location", &self.location.is_some())
            .finish_non_exhaustive()
    }
}
