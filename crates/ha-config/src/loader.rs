//! YAML configuration loader with custom tag support
//!
//! Supports Home Assistant's custom YAML tags:
//! - `!include path` - Include another YAML file
//! - `!include_dir_list dir` - Include all YAML files in a directory as a list
//! - `!include_dir_merge_list dir` - Merge lists from all YAML files in a directory
//! - `!include_dir_named dir` - Include all YAML files as a mapping keyed by filename
//! - `!include_dir_merge_named dir` - Merge mappings from all YAML files
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR` - Environment variable substitution

use crate::error::{ConfigError, ConfigResult};
use crate::path::PathSegment;
use crate::provenance::ProvenanceMap;
use crate::secrets::Secrets;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// A loaded document together with the source location of its nodes
#[derive(Debug, Clone)]
pub struct LoadedYaml {
    pub value: Value,
    pub provenance: ProvenanceMap,
}

/// YAML loader with support for Home Assistant custom tags
pub struct YamlLoader {
    /// Base directory for resolving relative paths
    config_dir: PathBuf,
    /// Secrets store
    secrets: Secrets,
    /// Track included files to detect circular includes
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    /// Create a new YAML loader for the given config directory
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;

        Ok(Self {
            config_dir,
            secrets,
            include_stack: HashSet::new(),
        })
    }

    /// Create a loader with pre-loaded secrets
    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            include_stack: HashSet::new(),
        }
    }

    /// Load and process a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<LoadedYaml> {
        let path = self.resolve_path(path.as_ref());
        debug!("Loading YAML file: {:?}", path);

        // Check for circular includes
        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound && !self.include_stack.is_empty() {
                ConfigError::IncludeNotFound { path: path.clone() }
            } else {
                ConfigError::ReadFile {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);

        result
    }

    /// Load and process YAML from a string
    ///
    /// An empty document loads as an empty mapping.
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<LoadedYaml> {
        let value = if content.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
                path: source_path.to_path_buf(),
                source: e,
            })?
        };
        let value = match value {
            Value::Null => Value::Mapping(Mapping::new()),
            other => other,
        };

        let mut provenance = ProvenanceMap::scan(source_path, content);
        let mut path = Vec::new();
        let value = self.process_value(value, source_path, &mut path, &mut provenance)?;

        Ok(LoadedYaml { value, provenance })
    }

    /// Process a YAML value, handling custom tags
    ///
    /// `path` is the position of `value` in the current document; included
    /// files have their provenance grafted there.
    fn process_value(
        &mut self,
        value: Value,
        source_path: &Path,
        path: &mut Vec<PathSegment>,
        provenance: &mut ProvenanceMap,
    ) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path, path, provenance),
            Value::Mapping(map) => {
                let mut result = Mapping::new();
                for (k, v) in map {
                    path.push(PathSegment::from_key(&k));
                    let processed = self.process_value(v, source_path, path, provenance);
                    path.pop();
                    result.insert(k, processed?);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => {
                let mut result = Vec::with_capacity(seq.len());
                for (index, item) in seq.into_iter().enumerate() {
                    path.push(PathSegment::Index(index));
                    let processed = self.process_value(item, source_path, path, provenance);
                    path.pop();
                    result.push(processed?);
                }
                Ok(Value::Sequence(result))
            }
            _ => Ok(value),
        }
    }

    /// Process a tagged value
    fn process_tagged(
        &mut self,
        tagged: serde_yaml::value::TaggedValue,
        source_path: &Path,
        path: &mut Vec<PathSegment>,
        provenance: &mut ProvenanceMap,
    ) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        let value = tagged.value;

        trace!("Processing tag '{}' with value {:?}", tag, value);

        match tag.as_str() {
            "!include" => self.process_include(value, source_path, path, provenance),
            "!include_dir_list" => self.process_include_dir_list(value, source_path, path, provenance),
            "!include_dir_merge_list" => {
                self.process_include_dir_merge_list(value, source_path, path, provenance)
            }
            "!include_dir_named" => self.process_include_dir_named(value, source_path, path, provenance),
            "!include_dir_merge_named" => {
                self.process_include_dir_merge_named(value, source_path, path, provenance)
            }
            "!secret" => self.process_secret(value),
            "!env_var" => self.process_env_var(value),
            _ => {
                // Unknown tag, keep it as-is but process the inner value
                let processed = self.process_value(value, source_path, path, provenance)?;
                Ok(Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                    tag: tagged.tag,
                    value: processed,
                })))
            }
        }
    }

    /// Process !include tag
    fn process_include(
        &mut self,
        value: Value,
        source_path: &Path,
        path: &[PathSegment],
        provenance: &mut ProvenanceMap,
    ) -> ConfigResult<Value> {
        let include_path = self.value_to_path(&value, source_path)?;
        debug!("Including file: {:?}", include_path);

        let loaded = self.load_file(&include_path)?;
        provenance.graft(path, loaded.provenance);
        Ok(loaded.value)
    }

    /// Process !include_dir_list tag - include all YAML files as a list
    fn process_include_dir_list(
        &mut self,
        value: Value,
        source_path: &Path,
        path: &[PathSegment],
        provenance: &mut ProvenanceMap,
    ) -> ConfigResult<Value> {
        let dir_path = self.value_to_path(&value, source_path)?;
        debug!("Including directory as list: {:?}", dir_path);

        let files = self.get_yaml_files(&dir_path)?;
        let mut result = Vec::new();

        for file in files {
            let loaded = self.load_file(&file)?;
            provenance.graft(&child_path(path, result.len()), loaded.provenance);
            result.push(loaded.value);
        }

        Ok(Value::Sequence(result))
    }

    /// Process !include_dir_merge_list tag - merge lists from all YAML files
    fn process_include_dir_merge_list(
        &mut self,
        value: Value,
        source_path: &Path,
        path: &[PathSegment],
        provenance: &mut ProvenanceMap,
    ) -> ConfigResult<Value> {
        let dir_path = self.value_to_path(&value, source_path)?;
        debug!("Including directory as merged list: {:?}", dir_path);

        let files = self.get_yaml_files(&dir_path)?;
        let mut result = Vec::new();

        for file in files {
            let loaded = self.load_file(&file)?;
            match loaded.value {
                Value::Sequence(seq) => {
                    provenance.graft_with_offset(path, loaded.provenance, result.len());
                    result.extend(seq);
                }
                other => {
                    provenance.graft(&child_path(path, result.len()), loaded.provenance);
                    result.push(other);
                }
            }
        }

        Ok(Value::Sequence(result))
    }

    /// Process !include_dir_named tag - include all YAML files as a mapping
    fn process_include_dir_named(
        &mut self,
        value: Value,
        source_path: &Path,
        path: &[PathSegment],
        provenance: &mut ProvenanceMap,
    ) -> ConfigResult<Value> {
        let dir_path = self.value_to_path(&value, source_path)?;
        debug!("Including directory as named mapping: {:?}", dir_path);

        let files = self.get_yaml_files(&dir_path)?;
        let mut result = Mapping::new();

        for file in files {
            let name = file
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let loaded = self.load_file(&file)?;

            let mut prefix = path.to_vec();
            prefix.push(PathSegment::Key(name.clone()));
            provenance.graft(&prefix, loaded.provenance);
            result.insert(Value::String(name), loaded.value);
        }

        Ok(Value::Mapping(result))
    }

    /// Process !include_dir_merge_named tag - merge mappings from all YAML files
    fn process_include_dir_merge_named(
        &mut self,
        value: Value,
        source_path: &Path,
        path: &[PathSegment],
        provenance: &mut ProvenanceMap,
    ) -> ConfigResult<Value> {
        let dir_path = self.value_to_path(&value, source_path)?;
        debug!("Including directory as merged mapping: {:?}", dir_path);

        let files = self.get_yaml_files(&dir_path)?;
        let mut result = Mapping::new();

        for file in files {
            let loaded = self.load_file(&file)?;
            if let Value::Mapping(map) = loaded.value {
                provenance.graft(path, loaded.provenance);
                for (k, v) in map {
                    result.insert(k, v);
                }
            }
        }

        Ok(Value::Mapping(result))
    }

    /// Process !secret tag
    fn process_secret(&self, value: Value) -> ConfigResult<Value> {
        let key = match value {
            Value::String(s) => s,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "!secret".to_string(),
                    reason: "secret key must be a string".to_string(),
                })
            }
        };

        let secret_value = self.secrets.get(&key)?;
        debug!("Secret {} retrieved from {:?}", key, self.secrets.path());
        Ok(secret_value.clone())
    }

    /// Process !env_var tag
    fn process_env_var(&self, value: Value) -> ConfigResult<Value> {
        let var_name = match value {
            Value::String(s) => s,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "!env_var".to_string(),
                    reason: "environment variable name must be a string".to_string(),
                })
            }
        };

        let env_value = std::env::var(&var_name).map_err(|_| ConfigError::EnvVarNotFound {
            var: var_name.clone(),
        })?;

        debug!("Substituted env var: {}", var_name);
        Ok(Value::String(env_value))
    }

    /// Convert a YAML value to a path, resolving relative to source file
    fn value_to_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let path_str = match value {
            Value::String(s) => s.clone(),
            _ => {
                return Err(ConfigError::InvalidIncludePath {
                    path: format!("{:?}", value),
                    reason: "path must be a string".to_string(),
                })
            }
        };

        // Resolve relative to the source file's directory
        let base_dir = source_path.parent().unwrap_or(&self.config_dir);
        let resolved = if Path::new(&path_str).is_absolute() {
            PathBuf::from(&path_str)
        } else {
            base_dir.join(&path_str)
        };

        Ok(resolved)
    }

    /// Resolve a path relative to the config directory
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    /// Get all YAML files below a directory, sorted by path
    ///
    /// Hidden entries and `secrets.yaml` are skipped.
    fn get_yaml_files(&self, dir: &Path) -> ConfigResult<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(ConfigError::DirectoryNotFound {
                path: dir.to_path_buf(),
            });
        }

        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let entries = fs::read_dir(&current).map_err(|e| ConfigError::ReadFile {
                path: current.clone(),
                source: e,
            })?;

            for path in entries.filter_map(|entry| entry.ok()).map(|entry| entry.path()) {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default();
                if name.starts_with('.') || name == "secrets.yaml" {
                    continue;
                }
                if path.is_dir() {
                    pending.push(path);
                } else if path
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
                {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// Get a reference to the secrets store
    pub fn secrets(&self) -> &Secrets {
        &self.secrets
    }

    /// Get the config directory
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

fn child_path(path: &[PathSegment], index: usize) -> Vec<PathSegment> {
    let mut child = path.to_vec();
    child.push(PathSegment::Index(index));
    child
}

/// Load a YAML file with full tag processing
pub fn load_yaml(
    config_dir: impl Into<PathBuf>,
    file: impl AsRef<Path>,
) -> ConfigResult<LoadedYaml> {
    let mut loader = YamlLoader::new(config_dir)?;
    loader.load_file(file)
}

/// Load a YAML string with tag processing
pub fn load_yaml_string(
    config_dir: impl Into<PathBuf>,
    content: &str,
    source_name: &str,
) -> ConfigResult<LoadedYaml> {
    let mut loader = YamlLoader::new(config_dir)?;
    loader.load_string(content, Path::new(source_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = fs::File::create(path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_simple_yaml() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "config.yaml",
            r#"
key: value
number: 42
list:
  - one
  - two
"#,
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap().value;
        assert!(value.is_mapping());
    }

    #[test]
    fn test_include() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "included.yaml",
            "included_key: included_value\n",
        );
        write_file(
            dir.path(),
            "config.yaml",
            "main_key: main_value\nincluded: !include included.yaml\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap().value;
        let map = value.as_mapping().unwrap();
        let included = map.get(&Value::String("included".to_string())).unwrap();
        let included_map = included.as_mapping().unwrap();
        assert_eq!(
            included_map.get(&Value::String("included_key".to_string())),
            Some(&Value::String("included_value".to_string()))
        );
    }

    #[test]
    fn test_secret() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "secrets.yaml", "my_password: secret123\nhttp_port: 8080\n");
        write_file(
            dir.path(),
            "config.yaml",
            "password: !secret my_password\nport: !secret http_port\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap().value;
        let map = value.as_mapping().unwrap();
        assert_eq!(
            map.get(&Value::String("password".to_string())),
            Some(&Value::String("secret123".to_string()))
        );
        assert_eq!(map.get("port"), Some(&Value::from(8080)));
    }

    #[test]
    fn test_env_var() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("TEST_HA_CONFIG_VAR", "env_value");
        write_file(
            dir.path(),
            "config.yaml",
            "from_env: !env_var TEST_HA_CONFIG_VAR\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap().value;
        let map = value.as_mapping().unwrap();
        assert_eq!(
            map.get(&Value::String("from_env".to_string())),
            Some(&Value::String("env_value".to_string()))
        );

        std::env::remove_var("TEST_HA_CONFIG_VAR");
    }

    #[test]
    fn test_include_dir_list() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("automations")).unwrap();
        write_file(
            dir.path(),
            "automations/auto1.yaml",
            "alias: Automation 1\n",
        );
        write_file(
            dir.path(),
            "automations/auto2.yaml",
            "alias: Automation 2\n",
        );
        write_file(
            dir.path(),
            "config.yaml",
            "automation: !include_dir_list automations\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap().value;
        let map = value.as_mapping().unwrap();
        let automation = map.get(&Value::String("automation".to_string())).unwrap();
        let seq = automation.as_sequence().unwrap();
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn test_include_dir_merge_list() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("automations")).unwrap();
        write_file(
            dir.path(),
            "automations/auto1.yaml",
            "- alias: Automation 1\n- alias: Automation 2\n",
        );
        write_file(
            dir.path(),
            "automations/auto2.yaml",
            "- alias: Automation 3\n",
        );
        write_file(
            dir.path(),
            "config.yaml",
            "automation: !include_dir_merge_list automations\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap().value;
        let map = value.as_mapping().unwrap();
        let automation = map.get(&Value::String("automation".to_string())).unwrap();
        let seq = automation.as_sequence().unwrap();
        assert_eq!(seq.len(), 3);
    }

    #[test]
    fn test_include_dir_named() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("lights")).unwrap();
        write_file(dir.path(), "lights/bedroom.yaml", "brightness: 100\n");
        write_file(dir.path(), "lights/kitchen.yaml", "brightness: 50\n");
        write_file(
            dir.path(),
            "config.yaml",
            "lights: !include_dir_named lights\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap().value;
        let map = value.as_mapping().unwrap();
        let lights = map.get(&Value::String("lights".to_string())).unwrap();
        let lights_map = lights.as_mapping().unwrap();
        assert!(lights_map.contains_key(&Value::String("bedroom".to_string())));
        assert!(lights_map.contains_key(&Value::String("kitchen".to_string())));
    }

    #[test]
    fn test_circular_include_detection() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.yaml", "include_b: !include b.yaml\n");
        write_file(dir.path(), "b.yaml", "include_a: !include a.yaml\n");

        let result = load_yaml(dir.path(), "a.yaml");
        assert!(matches!(result, Err(ConfigError::CircularInclude { .. })));
    }

    #[test]
    fn test_missing_secret() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "secrets.yaml", "existing: value\n");
        write_file(dir.path(), "config.yaml", "password: !secret nonexistent\n");

        let result = load_yaml(dir.path(), "config.yaml");
        assert!(matches!(result, Err(ConfigError::SecretNotFound { .. })));
    }

    #[test]
    fn test_empty_document_is_empty_mapping() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "groups.yaml", "");
        write_file(dir.path(), "config.yaml", "group: !include groups.yaml\n");

        let value = load_yaml(dir.path(), "config.yaml").unwrap().value;
        assert_eq!(value.get("group"), Some(&Value::Mapping(Mapping::new())));
    }

    #[test]
    fn test_missing_include() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "config.yaml", "group: !include nope.yaml\n");

        let result = load_yaml(dir.path(), "config.yaml");
        assert!(matches!(result, Err(ConfigError::IncludeNotFound { .. })));
    }

    #[test]
    fn test_include_dir_skips_hidden_and_secrets() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "sensors/a.yaml", "platform: a\n");
        write_file(dir.path(), "sensors/nested/b.yaml", "platform: b\n");
        write_file(dir.path(), "sensors/.hidden.yaml", "platform: hidden\n");
        write_file(dir.path(), "sensors/secrets.yaml", "token: x\n");
        write_file(
            dir.path(),
            "config.yaml",
            "sensor: !include_dir_list sensors\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap().value;
        let sensors = value.get("sensor").unwrap().as_sequence().unwrap();
        assert_eq!(sensors.len(), 2);
    }

    #[test]
    fn test_provenance_follows_includes() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "automations/one.yaml",
            "- alias: first\n- alias: second\n",
        );
        write_file(
            dir.path(),
            "automations/two.yaml",
            "# more\n- alias: third\n",
        );
        write_file(dir.path(), "http.yaml", "\nserver_port: 80\n");
        write_file(
            dir.path(),
            "config.yaml",
            "homeassistant:\n  name: Home\nhttp: !include http.yaml\nautomation: !include_dir_merge_list automations\n",
        );

        let loaded = load_yaml(dir.path(), "config.yaml").unwrap();
        let provenance = &loaded.provenance;

        let name = provenance.get(&["homeassistant".into(), "name".into()]).unwrap();
        assert_eq!(name.line, 2);
        assert_eq!(name.file, dir.path().join("config.yaml"));

        let port = provenance.get(&["http".into(), "server_port".into()]).unwrap();
        assert_eq!(port.line, 2);
        assert_eq!(port.file, dir.path().join("http.yaml"));

        let third = provenance.get(&["automation".into(), 2.into()]).unwrap();
        assert_eq!(third.line, 2);
        assert_eq!(third.file, dir.path().join("automations/two.yaml"));
    }
}
