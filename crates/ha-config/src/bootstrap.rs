//! Locating, loading and scaffolding the configuration directory

use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use ha_core::{CORE_DOMAIN, VERSION};

use crate::error::{ConfigError, ConfigResult};
use crate::loader::{LoadedYaml, YamlLoader};
use crate::location::LocationService;

pub const YAML_CONFIG_FILE: &str = "configuration.yaml";
pub const SECRET_YAML: &str = "secrets.yaml";
pub const VERSION_FILE: &str = ".HA_VERSION";
pub const CONFIG_DIR_NAME: &str = ".homeassistant";

pub const GROUP_CONFIG_PATH: &str = "groups.yaml";
pub const AUTOMATION_CONFIG_PATH: &str = "automations.yaml";
pub const SCRIPT_CONFIG_PATH: &str = "scripts.yaml";
pub const CUSTOMIZE_CONFIG_PATH: &str = "customize.yaml";

/// Which location property fills a core default when detection succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detected {
    Latitude,
    Longitude,
    TimeZone,
}

struct CoreDefault {
    key: &'static str,
    value: &'static str,
    detected: Option<Detected>,
    description: Option<&'static str>,
}

const DEFAULT_CORE_CONFIG: [CoreDefault; 7] = [
    CoreDefault {
        key: "name",
        value: "Home",
        detected: None,
        description: Some("Name of the location where Home Assistant is running"),
    },
    CoreDefault {
        key: "latitude",
        value: "0",
        detected: Some(Detected::Latitude),
        description: Some("Location required to calculate the time the sun rises and sets"),
    },
    CoreDefault {
        key: "longitude",
        value: "0",
        detected: Some(Detected::Longitude),
        description: None,
    },
    CoreDefault {
        key: "elevation",
        value: "0",
        detected: None,
        description: Some("Impacts weather/sunrise data (altitude above sea level in meters)"),
    },
    CoreDefault {
        key: "unit_system",
        value: "metric",
        detected: None,
        description: Some("metric for Metric, imperial for Imperial"),
    },
    CoreDefault {
        key: "time_zone",
        value: "UTC",
        detected: Some(Detected::TimeZone),
        description: Some(
            "Pick yours from here: http://en.wikipedia.org/wiki/List_of_tz_database_time_zones",
        ),
    },
    CoreDefault {
        key: "customize",
        value: "!include customize.yaml",
        detected: None,
        description: Some("Customization file"),
    },
];

const DEFAULT_CONFIG: &str = r#"
# Configure a default setup of Home Assistant (frontend, api, etc)
default_config:

# Uncomment this if you are using SSL/TLS, running in Docker container, etc.
# http:
#   base_url: example.duckdns.org:8123

# Sensors
sensor:
  # Weather prediction
  - platform: yr

group: !include groups.yaml
automation: !include automations.yaml
script: !include scripts.yaml
"#;

const DEFAULT_SECRETS: &str = r#"
# Use this file to store secrets like usernames and passwords.
# Learn more at https://www.home-assistant.io/docs/configuration/secrets/
some_password: welcome
"#;

/// `~/.homeassistant`
pub fn default_config_dir() -> PathBuf {
    let base = std::env::var_os(if cfg!(windows) { "APPDATA" } else { "HOME" })
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    base.join(CONFIG_DIR_NAME)
}

/// Path of `configuration.yaml` if the directory has one
pub fn find_config_file(config_dir: &Path) -> Option<PathBuf> {
    let path = config_dir.join(YAML_CONFIG_FILE);
    path.is_file().then_some(path)
}

/// Load a configuration file whose root must be a mapping
///
/// Top-level `null` values are replaced by empty mappings. Blocking; run it
/// off the async runtime.
pub fn load_yaml_config_file(config_path: &Path) -> ConfigResult<LoadedYaml> {
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let mut loader = YamlLoader::new(config_dir)?;

    let mut loaded = loader.load_file(config_path).map_err(|e| match e {
        ConfigError::ReadFile { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
            ConfigError::ConfigNotFound {
                dir: config_dir.to_path_buf(),
            }
        }
        other => other,
    })?;

    let Value::Mapping(map) = &mut loaded.value else {
        let err = ConfigError::NotAMapping {
            file: config_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        error!("{}", err);
        return Err(err);
    };

    for (_, value) in map.iter_mut() {
        if value.is_null() {
            *value = Value::Mapping(Mapping::new());
        }
    }

    Ok(loaded)
}

/// Return the configuration file, creating a default one when missing
pub async fn ensure_config_exists(
    config_dir: &Path,
    location: Option<&dyn LocationService>,
) -> ConfigResult<PathBuf> {
    if let Some(path) = find_config_file(config_dir) {
        return Ok(path);
    }

    info!(
        "Unable to find configuration. Creating default one in {}",
        config_dir.display()
    );
    create_default_config(config_dir, location).await
}

/// Write a default configuration directory
///
/// Location settings are auto-detected when a location service is given.
pub async fn create_default_config(
    config_dir: &Path,
    location: Option<&dyn LocationService>,
) -> ConfigResult<PathBuf> {
    let mut values: Vec<String> = DEFAULT_CORE_CONFIG
        .iter()
        .map(|default| default.value.to_string())
        .collect();

    let info = match location {
        Some(service) => service.detect_location_info().await,
        None => None,
    };

    if let Some(info) = &info {
        for (default, value) in DEFAULT_CORE_CONFIG.iter().zip(values.iter_mut()) {
            match default.detected {
                Some(Detected::Latitude) => *value = info.latitude.to_string(),
                Some(Detected::Longitude) => *value = info.longitude.to_string(),
                Some(Detected::TimeZone) => {
                    if let Some(zone) = &info.time_zone {
                        *value = zone.clone();
                    }
                }
                None if default.key == "unit_system" => {
                    *value = if info.use_metric { "metric" } else { "imperial" }.to_string();
                }
                None => {}
            }
        }

        if info.latitude != 0.0 && info.longitude != 0.0 {
            let elevation = match location {
                Some(service) => service.get_elevation(info.latitude, info.longitude).await,
                None => None,
            };
            if let Some(elevation) = elevation {
                set_value(&mut values, "elevation", elevation.to_string());
            }
        }
    }

    let mut config = format!("{}:\n", CORE_DOMAIN);
    for (default, value) in DEFAULT_CORE_CONFIG.iter().zip(&values) {
        if let Some(description) = default.description {
            config.push_str(&format!("  # {}\n", description));
        }
        config.push_str(&format!("  {}: {}\n", default.key, value));
    }
    config.push_str(DEFAULT_CONFIG);

    tokio::fs::create_dir_all(config_dir)
        .await
        .map_err(|source| ConfigError::WriteFile {
            path: config_dir.to_path_buf(),
            source,
        })?;

    let config_path = config_dir.join(YAML_CONFIG_FILE);
    let files = [
        (config_path.clone(), config),
        (config_dir.join(SECRET_YAML), DEFAULT_SECRETS.to_string()),
        (config_dir.join(VERSION_FILE), VERSION.to_string()),
        (config_dir.join(GROUP_CONFIG_PATH), String::new()),
        (config_dir.join(AUTOMATION_CONFIG_PATH), "[]".to_string()),
        (config_dir.join(SCRIPT_CONFIG_PATH), String::new()),
        (config_dir.join(CUSTOMIZE_CONFIG_PATH), String::new()),
    ];

    for (path, content) in files {
        if let Err(source) = tokio::fs::write(&path, content).await {
            error!("Unable to create default configuration file {}", config_path.display());
            return Err(ConfigError::WriteFile { path, source });
        }
    }

    Ok(config_path)
}

fn set_value(values: &mut [String], key: &str, value: String) {
    if let Some(index) = DEFAULT_CORE_CONFIG.iter().position(|d| d.key == key) {
        values[index] = value;
    }
}
