//! Configuration error reporting
//!
//! Validation failures are logged with the file and line they came from and
//! collected into one persistent notification that lists every component
//! and platform that could not be set up.

use indexmap::IndexMap;
use serde_yaml::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

use ha_components::NotificationSink;
use ha_core::CORE_DOMAIN;

use crate::component::ComponentFailure;
use crate::integration::IntegrationError;
use crate::path::{join_path, PathSegment};
use crate::provenance::{describe_location, Location, ProvenanceMap};
use crate::schema::{Invalid, InvalidKind};

pub const DOCS_URL: &str = "https://www.home-assistant.io/integrations";
pub const NOTIFICATION_ID: &str = "invalid_config";
pub const NOTIFICATION_TITLE: &str = "Invalid config";

/// Render a schema violation found while validating `domain`
///
/// `config` is the node that was validated and `location` where it (or the
/// offending key below it) was written.
pub fn format_config_error(
    err: &Invalid,
    domain: &str,
    config: &Value,
    location: Option<&Location>,
) -> String {
    let mut message = format!("Invalid config for [{}]: ", domain);

    match (err.kind, err.path.last()) {
        (InvalidKind::UnknownKey, Some(option)) => {
            message.push_str(&format!(
                "[{}] is an invalid option for [{}]. Check: {}->{}.",
                option,
                domain,
                domain,
                join_path(&err.path, "->")
            ));
        }
        _ => {
            message.push_str(&err.humanize(config));
            message.push('.');
        }
    }

    let (file, line) = describe_location(location);
    message.push_str(&format!(" (See {}, line {}). ", file, line));

    if domain != CORE_DOMAIN {
        message.push_str(&format!("Please check the docs at {}/{}/", DOCS_URL, domain));
    }

    message
}

fn component_link(name: &str) -> String {
    format!("[{}]({}/{}/)", name.replace('_', "-"), DOCS_URL, name)
}

/// Logs configuration failures and keeps the setup-error notification current
pub struct ErrorReporter {
    sink: Arc<dyn NotificationSink>,
    /// Failed component → whether to link its documentation
    errors: Mutex<IndexMap<String, bool>>,
}

impl ErrorReporter {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            errors: Mutex::new(IndexMap::new()),
        }
    }

    /// Log a schema violation and add the domain to the notification
    ///
    /// Returns the logged message.
    pub fn log_exception(
        &self,
        err: &Invalid,
        domain: &str,
        config: &Value,
        location: Option<&Location>,
    ) -> String {
        self.notify_setup_error(domain, true);
        let message = format_config_error(err, domain, config, location);
        error!("{}", message);
        message
    }

    /// Record a failed component and re-render the notification
    ///
    /// A component keeps its documentation link once one was requested.
    pub fn notify_setup_error(&self, component: &str, display_link: bool) {
        let message = {
            let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
            let link = errors.get(component).copied().unwrap_or(false) || display_link;
            errors.insert(component.to_string(), link);

            let mut message =
                String::from("The following components and platforms could not be set up:\n\n");
            for (name, link) in errors.iter() {
                let part = if *link {
                    component_link(name)
                } else {
                    name.clone()
                };
                message.push_str(&format!(" - {}\n", part));
            }
            message.push_str("\nPlease check your config.");
            message
        };

        self.sink
            .notify(&message, Some(NOTIFICATION_TITLE), NOTIFICATION_ID);
    }

    /// Log and notify one component failure; returns the logged message
    pub fn report_failure(&self, failure: &ComponentFailure, provenance: &ProvenanceMap) -> String {
        match failure {
            ComponentFailure::Invalid {
                domain,
                error,
                config,
                path,
            } => {
                let full: Vec<PathSegment> = path.iter().chain(&error.path).cloned().collect();
                self.log_exception(error, domain, config, provenance.locate(&full))
            }
            ComponentFailure::Unresolved {
                domain,
                error,
                path,
            } => {
                let display_link = matches!(error, IntegrationError::ImportFailed { .. });
                self.notify_setup_error(domain, display_link);
                let (file, line) = provenance.describe(path);
                let message = format!("Unable to set up {}: {} (See {}, line {}). ", domain, error, file, line);
                error!("{}", message);
                message
            }
        }
    }

    /// Components reported so far, in order of first failure
    pub fn failed_components(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("errors", &self.failed_components())
            .finish_non_exhaustive()
    }
}
