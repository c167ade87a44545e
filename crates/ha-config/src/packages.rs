//! Package merging
//!
//! Packages bundle configuration for several domains under one name:
//!
//! ```yaml
//! homeassistant:
//!   packages:
//!     kitchen:
//!       light:
//!         platform: hue
//!       http:
//!         server_port: 8124
//! ```
//!
//! Each fragment is merged into the top-level tree before validation. Domains
//! whose entries form a list (platform domains and list-shaped components)
//! get the fragment appended; all other domains are merged key by key, and a
//! scalar that is already set is reported as a duplicate instead of being
//! overwritten.

use serde_yaml::{Mapping, Value};
use std::fmt;
use thiserror::Error;
use tracing::error;

use ha_core::CORE_DOMAIN;

use crate::integration::{IntegrationError, SchemaRegistry};
use crate::path::{join_path, key_to_string, PathSegment};
use crate::provenance::ProvenanceMap;
use crate::schema::{ensure_list, is_falsy, Invalid, Schema};
use crate::validation::slug;
use crate::ConfigTree;

pub const CONF_PACKAGES: &str = "packages";

/// Package names are slugs; each package maps domain keys to a mapping,
/// a list or nothing
pub fn packages_config_schema() -> Schema {
    let fragment = Schema::custom(|value| match value {
        Value::Mapping(_) | Value::Sequence(_) | Value::Null => Ok(value.clone()),
        _ => Err(Invalid::value("expected a dictionary, a list or null")),
    });
    Schema::keyed(slug(), Schema::keyed(Schema::String, fragment))
}

/// Why one domain of one package could not be merged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageErrorReason {
    DoesNotExist,
    UnableToImport,
    /// The fragment for a mapping-shaped domain is not a mapping
    NotADict,
    /// The main configuration holds a non-mapping for a mapping-shaped domain
    DictExpectedInMainConfig,
    /// A scalar was already set; carries the dotted key path inside the domain
    DuplicateKey(String),
}

impl fmt::Display for PackageErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoesNotExist => write!(f, "does not exist"),
            Self::UnableToImport => write!(f, "unable to import"),
            Self::NotADict => write!(f, "cannot be merged. Expected a dict."),
            Self::DictExpectedInMainConfig => {
                write!(f, "cannot be merged. Dict expected in main config.")
            }
            Self::DuplicateKey(key) => write!(f, "has duplicate key '{}'", key),
        }
    }
}

/// A domain of a package that was skipped or only partially merged
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Package {package} setup failed. Component {component} {reason}")]
pub struct PackageError {
    pub package: String,
    /// Domain key as written in the package, including any descriptor
    pub component: String,
    pub reason: PackageErrorReason,
}

/// Depth of a package's domain key (`homeassistant.packages.<pkg>.<domain>`);
/// merged nodes never borrow a location from above it
const PACKAGE_DOMAIN_DEPTH: usize = 4;

/// Log a package error with the location of the package definition
pub fn log_package_error(err: &PackageError, provenance: &ProvenanceMap) {
    let path = [
        PathSegment::from(CORE_DOMAIN),
        PathSegment::from(CONF_PACKAGES),
        PathSegment::from(err.package.as_str()),
    ];
    let (file, line) = provenance.describe(&path);
    error!("{} (See {}:{}). ", err, file, line);
}

fn report(
    errors: &mut Vec<PackageError>,
    provenance: &ProvenanceMap,
    package: &str,
    component: &str,
    reason: PackageErrorReason,
) {
    let err = PackageError {
        package: package.to_string(),
        component: component.to_string(),
        reason,
    };
    log_package_error(&err, provenance);
    errors.push(err);
}

fn child(path: &[PathSegment], segment: impl Into<PathSegment>) -> Vec<PathSegment> {
    let mut path = path.to_vec();
    path.push(segment.into());
    path
}

fn joined(base: &[PathSegment], rest: &[PathSegment]) -> Vec<PathSegment> {
    base.iter().chain(rest).cloned().collect()
}

/// Merge packages into the top-level configuration, mutating it in place
///
/// Merged nodes take the provenance of the package they came from. Returns
/// every per-domain problem encountered; only an invalid `packages` section
/// as a whole is an error.
pub async fn merge_packages_config(
    config: &mut ConfigTree,
    packages: &Value,
    registry: &SchemaRegistry,
    provenance: &mut ProvenanceMap,
) -> Result<Vec<PackageError>, Invalid> {
    let packages = packages_config_schema().validate(packages)?;
    let Value::Mapping(packages) = packages else {
        return Ok(Vec::new());
    };

    let mut errors = Vec::new();

    for (pack_key, pack_conf) in &packages {
        let pack_name = key_to_string(pack_key);
        let Value::Mapping(pack_conf) = pack_conf else {
            continue;
        };

        for (comp_key, comp_conf) in pack_conf {
            let comp_name = key_to_string(comp_key);
            if comp_name == CORE_DOMAIN {
                continue;
            }

            // "light kitchen" is the light domain with a descriptor
            let domain = comp_name.split(' ').next().unwrap_or_default();

            let component = match registry.component(domain).await {
                Ok(component) => component,
                Err(IntegrationError::NotFound(_)) => {
                    report(
                        &mut errors,
                        provenance,
                        &pack_name,
                        &comp_name,
                        PackageErrorReason::DoesNotExist,
                    );
                    continue;
                }
                Err(IntegrationError::ImportFailed { .. }) => {
                    report(
                        &mut errors,
                        provenance,
                        &pack_name,
                        &comp_name,
                        PackageErrorReason::UnableToImport,
                    );
                    continue;
                }
            };

            let source = vec![
                PathSegment::from(CORE_DOMAIN),
                PathSegment::from(CONF_PACKAGES),
                PathSegment::from_key(pack_key),
                PathSegment::from_key(comp_key),
            ];
            let dest = vec![PathSegment::from_key(comp_key)];

            if component.merges_as_list() {
                if is_falsy(comp_conf) {
                    continue;
                }
                let mut entries = config
                    .get(comp_key)
                    .filter(|existing| !is_falsy(existing))
                    .map(ensure_list)
                    .unwrap_or_default();
                let offset = entries.len();
                match comp_conf {
                    Value::Sequence(items) => {
                        for index in 0..items.len() {
                            provenance.copy_subtree(
                                &child(&source, index),
                                &child(&dest, offset + index),
                                PACKAGE_DOMAIN_DEPTH,
                            );
                        }
                    }
                    _ => provenance.copy_subtree(
                        &source,
                        &child(&dest, offset),
                        PACKAGE_DOMAIN_DEPTH,
                    ),
                }
                provenance.copy_if_absent(&source, &dest, PACKAGE_DOMAIN_DEPTH);

                entries.extend(ensure_list(comp_conf));
                config.insert(comp_key.clone(), Value::Sequence(entries));
                continue;
            }

            let fragment = match comp_conf {
                Value::Null => Mapping::new(),
                Value::Mapping(map) => map.clone(),
                _ => {
                    report(
                        &mut errors,
                        provenance,
                        &pack_name,
                        &comp_name,
                        PackageErrorReason::NotADict,
                    );
                    continue;
                }
            };

            if config.get(comp_key).map_or(true, Value::is_null) {
                config.insert(comp_key.clone(), Value::Mapping(Mapping::new()));
            }
            let Some(Value::Mapping(existing)) = config.get_mut(comp_key) else {
                report(
                    &mut errors,
                    provenance,
                    &pack_name,
                    &comp_name,
                    PackageErrorReason::DictExpectedInMainConfig,
                );
                continue;
            };

            let outcome = recursive_merge(existing, &fragment);
            provenance.copy_if_absent(&source, &dest, PACKAGE_DOMAIN_DEPTH);
            for (from, to) in &outcome.taken {
                provenance.copy_subtree(
                    &joined(&source, from),
                    &joined(&dest, to),
                    PACKAGE_DOMAIN_DEPTH,
                );
            }
            for key in outcome.duplicates {
                report(
                    &mut errors,
                    provenance,
                    &pack_name,
                    &comp_name,
                    PackageErrorReason::DuplicateKey(key),
                );
            }
        }
    }

    Ok(errors)
}

/// What [`recursive_merge`] did with a package fragment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Dotted paths of scalars that were already set
    pub duplicates: Vec<String>,
    /// Nodes taken from the fragment: path in the fragment, path in the result
    pub taken: Vec<(Vec<PathSegment>, Vec<PathSegment>)>,
}

/// Merge `package` into `conf`
///
/// Nested mappings recurse and nested lists are concatenated; empty ones are
/// skipped. A conflicting scalar keeps its existing value and merging carries
/// on with the remaining keys.
pub fn recursive_merge(conf: &mut Mapping, package: &Mapping) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    merge_into(conf, package, &[], &mut outcome);
    outcome
}

fn merge_into(
    conf: &mut Mapping,
    package: &Mapping,
    path: &[PathSegment],
    outcome: &mut MergeOutcome,
) {
    for (key, incoming) in package {
        let key_path = child(path, PathSegment::from_key(key));
        let absent = conf.get(key).map_or(true, Value::is_null);

        match incoming {
            Value::Mapping(nested) => {
                if nested.is_empty() {
                    continue;
                }
                if absent {
                    conf.insert(key.clone(), Value::Mapping(Mapping::new()));
                    outcome.taken.push((key_path.clone(), key_path.clone()));
                }
                match conf.get_mut(key) {
                    Some(Value::Mapping(existing)) => {
                        merge_into(existing, nested, &key_path, outcome)
                    }
                    _ => outcome.duplicates.push(join_path(&key_path, ".")),
                }
            }
            Value::Sequence(items) => {
                if items.is_empty() {
                    continue;
                }
                let mut merged = conf.get(key).map(ensure_list).unwrap_or_default();
                let offset = merged.len();
                if offset == 0 {
                    outcome.taken.push((key_path.clone(), key_path.clone()));
                } else {
                    for index in 0..items.len() {
                        outcome
                            .taken
                            .push((child(&key_path, index), child(&key_path, offset + index)));
                    }
                }
                merged.extend(items.iter().cloned());
                conf.insert(key.clone(), Value::Sequence(merged));
            }
            _ => {
                if absent {
                    conf.insert(key.clone(), incoming.clone());
                    outcome.taken.push((key_path.clone(), key_path));
                } else {
                    outcome.duplicates.push(join_path(&key_path, "."));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::{Component, ComponentSchema, Integration, IntegrationRegistry};
    use crate::schema::{InvalidKind, MapSchema};
    use std::sync::Arc;

    fn registry() -> SchemaRegistry {
        let integrations = IntegrationRegistry::new();
        integrations.register(Integration::new(
            "light",
            Component::new().with_platform_schema(Schema::Any),
        ));
        integrations.register(Integration::new(
            "http",
            Component::new()
                .with_config_schema(ComponentSchema::dict(Schema::map(MapSchema::new().allow_extra()))),
        ));
        integrations.register(Integration::new(
            "zone",
            Component::new().with_config_schema(ComponentSchema::list(Schema::Any)),
        ));
        integrations.register(Integration::new("input_boolean", Component::new()));
        integrations.register(Integration::broken("zwave", "No module named 'openzwave'"));
        SchemaRegistry::new(Arc::new(integrations))
    }

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn tree(s: &str) -> ConfigTree {
        match yaml(s) {
            Value::Mapping(map) => map,
            _ => panic!("not a mapping"),
        }
    }

    async fn merge(config: &mut ConfigTree, packages: &str) -> Vec<PackageError> {
        merge_packages_config(config, &yaml(packages), &registry(), &mut ProvenanceMap::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_platform_domains_append_in_package_order() {
        let mut config = tree("light:\n  - platform: hue\n");
        let errors = merge(
            &mut config,
            "pkg1:\n  light:\n    platform: test\npkg2:\n  light:\n    platform: test2\n",
        )
        .await;

        assert!(errors.is_empty());
        assert_eq!(
            config.get("light"),
            Some(&yaml("[{platform: hue}, {platform: test}, {platform: test2}]"))
        );
    }

    #[tokio::test]
    async fn test_platform_domain_created_from_packages() {
        let mut config = ConfigTree::new();
        merge(
            &mut config,
            "pkg1:\n  light:\n    platform: test\npkg2:\n  light:\n    platform: test2\n",
        )
        .await;

        assert_eq!(
            config.get("light"),
            Some(&yaml("[{platform: test}, {platform: test2}]"))
        );
    }

    #[tokio::test]
    async fn test_empty_fragment_is_noop() {
        let mut config = tree("zone:\n  - name: Home\n");
        let errors = merge(&mut config, "pkg1:\n  zone:\n  light: []\n").await;

        assert!(errors.is_empty());
        assert_eq!(config.get("zone"), Some(&yaml("[{name: Home}]")));
        assert!(config.get("light").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_scalar_keeps_first_value() {
        let mut config = ConfigTree::new();
        let errors = merge(
            &mut config,
            "pkg1:\n  http:\n    port: 1234\npkg2:\n  http:\n    port: 5678\n    base_url: example.org\n",
        )
        .await;

        assert_eq!(
            errors,
            vec![PackageError {
                package: "pkg2".to_string(),
                component: "http".to_string(),
                reason: PackageErrorReason::DuplicateKey("port".to_string()),
            }]
        );
        assert_eq!(
            errors[0].to_string(),
            "Package pkg2 setup failed. Component http has duplicate key 'port'"
        );
        assert_eq!(
            config.get("http"),
            Some(&yaml("{port: 1234, base_url: example.org}"))
        );
    }

    #[tokio::test]
    async fn test_disjoint_dict_fragments_union() {
        let mut config = tree("http:\n  ssl: true\n");
        let errors = merge(
            &mut config,
            "pkg1:\n  http:\n    port: 1\npkg2:\n  http:\n    cors:\n      - a\n",
        )
        .await;

        assert!(errors.is_empty());
        assert_eq!(
            config.get("http"),
            Some(&yaml("{ssl: true, port: 1, cors: [a]}"))
        );
    }

    #[tokio::test]
    async fn test_nested_merge() {
        let mut config = tree("input_boolean:\n  a:\n    name: A\n    icons: [x]\n");
        let errors = merge(
            &mut config,
            "pkg:\n  input_boolean:\n    a:\n      name: Other\n      icons: [y]\n      initial: true\n    b: {}\n",
        )
        .await;

        assert_eq!(
            errors.iter().map(|e| e.reason.clone()).collect::<Vec<_>>(),
            vec![PackageErrorReason::DuplicateKey("a.name".to_string())]
        );
        assert_eq!(
            config.get("input_boolean"),
            Some(&yaml("{a: {name: A, icons: [x, y], initial: true}}"))
        );
    }

    #[tokio::test]
    async fn test_unknown_and_broken_domains_are_skipped() {
        let mut config = ConfigTree::new();
        let errors = merge(
            &mut config,
            "pkg:\n  nonexistent_domain:\n    a: 1\n  zwave:\n    usb_path: /dev/x\n  http:\n    port: 1\n",
        )
        .await;

        let reasons: Vec<_> = errors.iter().map(|e| e.reason.to_string()).collect();
        assert_eq!(reasons, vec!["does not exist", "unable to import"]);
        assert_eq!(errors[0].component, "nonexistent_domain");
        assert_eq!(config.get("http"), Some(&yaml("{port: 1}")));
    }

    #[tokio::test]
    async fn test_shape_conflicts() {
        let mut config = tree("input_boolean:\n  - not a dict\n");
        let errors = merge(
            &mut config,
            "pkg:\n  http: [1, 2]\n  input_boolean:\n    a: {}\n",
        )
        .await;

        let reasons: Vec<_> = errors.into_iter().map(|e| e.reason).collect();
        assert_eq!(
            reasons,
            vec![
                PackageErrorReason::NotADict,
                PackageErrorReason::DictExpectedInMainConfig
            ]
        );
        assert!(config.get("http").is_none());
    }

    #[tokio::test]
    async fn test_descriptor_suffix_resolves_domain() {
        let mut config = ConfigTree::new();
        let errors = merge(&mut config, "pkg:\n  light kitchen:\n    platform: hue\n").await;

        assert!(errors.is_empty());
        assert_eq!(config.get("light kitchen"), Some(&yaml("[{platform: hue}]")));
    }

    #[tokio::test]
    async fn test_core_fragment_is_not_merged() {
        let mut config = ConfigTree::new();
        let errors = merge(
            &mut config,
            "pkg:\n  homeassistant:\n    customize:\n      light.a: {hidden: true}\n",
        )
        .await;

        assert!(errors.is_empty());
        assert!(config.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_package_name() {
        let mut config = ConfigTree::new();
        let err = merge_packages_config(
            &mut config,
            &yaml("Bad Name:\n  http: {}\n"),
            &registry(),
            &mut ProvenanceMap::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, InvalidKind::Value);
        assert_eq!(err.path, vec![PathSegment::from("Bad Name")]);
        assert!(config.is_empty());
    }

    #[tokio::test]
    async fn test_opaque_component_merges_key_by_key() {
        let mut config = tree("sun:\n  elevation: 10\n");
        let errors = merge(&mut config, "pkg:\n  sun:\n    name: home\n").await;

        assert!(errors.is_empty());
        assert_eq!(config.get("sun"), Some(&yaml("{elevation: 10, name: home}")));
    }

    #[tokio::test]
    async fn test_merged_nodes_keep_package_locations() {
        let content = "\
homeassistant:
  packages:
    pkg1:
      http:
        server_port: abc
      light:
        - name: no_platform
      zone:
        - name: home
light:
  - platform: demo
http:
  base_url: example.com
";
        let mut config = tree(content);
        let packages = yaml(content)["homeassistant"]["packages"].clone();
        let mut provenance = ProvenanceMap::scan(std::path::Path::new("configuration.yaml"), content);

        let errors = merge_packages_config(&mut config, &packages, &registry(), &mut provenance)
            .await
            .unwrap();
        assert!(errors.is_empty());

        let line = |path: &[PathSegment]| provenance.locate(path).map(|location| location.line);
        assert_eq!(line(&["http".into(), "server_port".into()]), Some(5));
        assert_eq!(line(&["http".into(), "base_url".into()]), Some(13));
        assert_eq!(line(&["http".into()]), Some(12));
        assert_eq!(line(&["light".into(), 0.into()]), Some(11));
        assert_eq!(line(&["light".into(), 1.into(), "name".into()]), Some(7));
        assert_eq!(line(&["zone".into()]), Some(8));
        assert_eq!(line(&["zone".into(), 0.into(), "name".into()]), Some(9));
    }

    #[test]
    fn test_recursive_merge_outcome() {
        let mut conf = match yaml("{a: 1, b: {c: 1}, l: [x]}") {
            Value::Mapping(map) => map,
            _ => unreachable!(),
        };
        let package = match yaml("{a: 2, b: {d: 2}, l: [y, z], e: [w]}") {
            Value::Mapping(map) => map,
            _ => unreachable!(),
        };

        let outcome = recursive_merge(&mut conf, &package);

        assert_eq!(outcome.duplicates, vec!["a".to_string()]);
        let key = |segments: &[PathSegment]| segments.to_vec();
        assert_eq!(
            outcome.taken,
            vec![
                (key(&["b".into(), "d".into()]), key(&["b".into(), "d".into()])),
                (key(&["l".into(), 0.into()]), key(&["l".into(), 1.into()])),
                (key(&["l".into(), 1.into()]), key(&["l".into(), 2.into()])),
                (key(&["e".into()]), key(&["e".into()])),
            ]
        );
        assert_eq!(Value::Mapping(conf), yaml("{a: 1, b: {c: 1, d: 2}, l: [x, y, z], e: [w]}"));
    }
}
