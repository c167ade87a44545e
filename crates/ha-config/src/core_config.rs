//! Core configuration
//!
//! Validates the `homeassistant:` section, applies it, and fills in location
//! settings the user left out from a [`LocationService`].

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{error, warn};

use crate::auth::{
    auth_mfa_modules_schema, auth_providers_schema, ensure_auth_manager, parse_auth_mfa_modules,
    parse_auth_providers, AuthDefaults, AuthManager, AuthProviderConfig, MfaModuleConfig,
    CONF_AUTH_MFA_MODULES, CONF_AUTH_PROVIDERS,
};
use crate::customize::{customize_config_schema, CustomizeRuleSet};
use crate::location::LocationService;
use crate::packages::{packages_config_schema, CONF_PACKAGES};
use crate::path::key_to_string;
use crate::schema::{Invalid, MapSchema, Schema};
use crate::validation::{
    is_dir, is_valid_time_zone, latitude, longitude, temperature_unit, time_zone, unit_system,
};
use ha_core::CORE_DOMAIN;

pub const CONF_NAME: &str = "name";
pub const CONF_LATITUDE: &str = "latitude";
pub const CONF_LONGITUDE: &str = "longitude";
pub const CONF_ELEVATION: &str = "elevation";
pub const CONF_TEMPERATURE_UNIT: &str = "temperature_unit";
pub const CONF_UNIT_SYSTEM: &str = "unit_system";
pub const CONF_TIME_ZONE: &str = "time_zone";
pub const CONF_ALLOWLIST_EXTERNAL_DIRS: &str = "allowlist_external_dirs";

pub const CONF_UNIT_SYSTEM_METRIC: &str = "metric";
pub const CONF_UNIT_SYSTEM_IMPERIAL: &str = "imperial";

const TEMP_CELSIUS: &str = "°C";

/// Unit system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSystem {
    pub name: String,
    pub length: String,
    pub accumulated_precipitation: String,
    pub mass: String,
    pub pressure: String,
    pub temperature: String,
    pub volume: String,
    pub wind_speed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
}

impl UnitSystem {
    /// Create metric unit system
    pub fn metric() -> Self {
        Self {
            name: CONF_UNIT_SYSTEM_METRIC.to_string(),
            length: "km".to_string(),
            accumulated_precipitation: "mm".to_string(),
            mass: "g".to_string(),
            pressure: "Pa".to_string(),
            temperature: "°C".to_string(),
            volume: "L".to_string(),
            wind_speed: "m/s".to_string(),
            area: Some("m²".to_string()),
        }
    }

    /// Create imperial unit system
    pub fn imperial() -> Self {
        Self {
            name: CONF_UNIT_SYSTEM_IMPERIAL.to_string(),
            length: "mi".to_string(),
            accumulated_precipitation: "in".to_string(),
            mass: "lb".to_string(),
            pressure: "psi".to_string(),
            temperature: "°F".to_string(),
            volume: "gal".to_string(),
            wind_speed: "mph".to_string(),
            area: Some("ft²".to_string()),
        }
    }

    /// Anything but `imperial` is metric
    pub fn from_name(name: &str) -> Self {
        if name == CONF_UNIT_SYSTEM_IMPERIAL {
            Self::imperial()
        } else {
            Self::metric()
        }
    }

    pub fn is_metric(&self) -> bool {
        self.name == CONF_UNIT_SYSTEM_METRIC
    }
}

/// Schema of the `homeassistant:` section
pub fn core_config_schema() -> MapSchema {
    customize_config_schema().extend(
        MapSchema::new()
            .optional(CONF_NAME, Schema::String)
            .optional(CONF_LATITUDE, latitude())
            .optional(CONF_LONGITUDE, longitude())
            .optional(CONF_ELEVATION, Schema::Integer)
            .optional(CONF_TEMPERATURE_UNIT, temperature_unit())
            .optional(CONF_UNIT_SYSTEM, unit_system())
            .optional(CONF_TIME_ZONE, time_zone())
            .optional(CONF_ALLOWLIST_EXTERNAL_DIRS, Schema::ensure_list(is_dir()))
            .optional_with_default(CONF_PACKAGES, Mapping::new(), packages_config_schema())
            .optional(CONF_AUTH_PROVIDERS, auth_providers_schema())
            .optional(CONF_AUTH_MFA_MODULES, auth_mfa_modules_schema()),
    )
}

/// Applied core configuration
///
/// Settings that are neither configured nor detected stay `None`.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub config_dir: PathBuf,
    pub location_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Meters above sea level
    pub elevation: Option<i32>,
    pub time_zone: Option<String>,
    pub units: Option<UnitSystem>,
    /// Directories outside the config dir that integrations may read
    pub allowlist_external_dirs: BTreeSet<PathBuf>,
    pub customize: Arc<CustomizeRuleSet>,
    pub auth_providers: Option<Vec<AuthProviderConfig>>,
    pub auth_mfa_modules: Option<Vec<MfaModuleConfig>>,
}

impl CoreConfig {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            location_name: None,
            latitude: None,
            longitude: None,
            elevation: None,
            time_zone: None,
            units: None,
            allowlist_external_dirs: BTreeSet::new(),
            customize: Arc::new(CustomizeRuleSet::new()),
            auth_providers: None,
            auth_mfa_modules: None,
        }
    }

    /// Path relative to the config dir
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.config_dir.join(relative)
    }

    /// Whether `path` lies inside an allowlisted directory
    pub fn is_allowed_path(&self, path: &Path) -> bool {
        self.allowlist_external_dirs
            .iter()
            .any(|dir| path.starts_with(dir))
    }

    /// Set the time zone if it names a known zone
    pub fn set_time_zone(&mut self, name: Option<&str>) {
        let Some(name) = name else {
            return;
        };
        if is_valid_time_zone(name) {
            self.time_zone = Some(name.to_string());
        } else {
            error!("Received invalid time zone {}", name);
        }
    }

    fn is_complete(&self) -> bool {
        self.latitude.is_some()
            && self.longitude.is_some()
            && self.units.is_some()
            && self.time_zone.is_some()
            && self.elevation.is_some()
    }

    fn needs_location_info(&self) -> bool {
        self.latitude.is_none()
            || self.longitude.is_none()
            || self.units.is_none()
            || self.time_zone.is_none()
    }

    /// Summary of the configuration, e.g. for an API response
    pub fn as_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "latitude": self.latitude,
            "longitude": self.longitude,
            "elevation": self.elevation,
            "unit_system": self.units,
            "location_name": self.location_name,
            "time_zone": self.time_zone,
            "config_dir": self.config_dir,
            "allowlist_external_dirs": self.allowlist_external_dirs,
            "version": ha_core::VERSION,
        })
    }
}

/// Collaborators used while applying the core section
pub struct CoreConfigContext<'a> {
    pub config_dir: &'a Path,
    /// `None` disables auto-detection
    pub location: Option<&'a dyn LocationService>,
    pub auth: &'a OnceLock<Arc<AuthManager>>,
    pub auth_defaults: &'a AuthDefaults,
}

fn mapping_entries<'v>(value: Option<&'v Value>) -> impl Iterator<Item = (&'v Value, &'v Value)> {
    value.and_then(Value::as_mapping).into_iter().flatten()
}

/// Validate and apply the `homeassistant:` section
///
/// A schema violation is returned untouched for the caller to report.
pub async fn process_core_config(
    ctx: &CoreConfigContext<'_>,
    section: &Value,
) -> Result<CoreConfig, Invalid> {
    let empty = Value::Mapping(Mapping::new());
    let section = if section.is_null() { &empty } else { section };
    let config = Schema::map(core_config_schema()).validate(section)?;

    let mut core = CoreConfig::new(ctx.config_dir);

    if let Some(providers) = config.get(CONF_AUTH_PROVIDERS) {
        core.auth_providers = Some(parse_auth_providers(providers)?);
    }
    if let Some(modules) = config.get(CONF_AUTH_MFA_MODULES) {
        core.auth_mfa_modules = Some(parse_auth_mfa_modules(modules)?);
    }
    ensure_auth_manager(
        ctx.auth,
        core.auth_providers.clone(),
        core.auth_mfa_modules.clone(),
        ctx.auth_defaults,
    );

    core.latitude = config.get(CONF_LATITUDE).and_then(Value::as_f64);
    core.longitude = config.get(CONF_LONGITUDE).and_then(Value::as_f64);
    core.location_name = config
        .get(CONF_NAME)
        .and_then(Value::as_str)
        .map(str::to_string);
    core.elevation = config
        .get(CONF_ELEVATION)
        .and_then(Value::as_i64)
        .and_then(|e| i32::try_from(e).ok());
    core.set_time_zone(config.get(CONF_TIME_ZONE).and_then(Value::as_str));

    core.allowlist_external_dirs.insert(core.path("www"));
    for dir in config
        .get(CONF_ALLOWLIST_EXTERNAL_DIRS)
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
    {
        core.allowlist_external_dirs.insert(PathBuf::from(dir));
    }

    let mut customize = CustomizeRuleSet::from_config(&config);
    let package_customize = Schema::map(customize_config_schema());
    for (name, package) in mapping_entries(config.get(CONF_PACKAGES)) {
        let Some(fragment) = package.get(CORE_DOMAIN) else {
            continue;
        };
        match package_customize.validate(fragment) {
            Ok(rules) => customize.update(&rules),
            Err(_) => warn!("Package {} contains invalid customize", key_to_string(name)),
        }
    }
    core.customize = Arc::new(customize);

    if let Some(name) = config.get(CONF_UNIT_SYSTEM).and_then(Value::as_str) {
        core.units = Some(UnitSystem::from_name(name));
    } else if let Some(unit) = config.get(CONF_TEMPERATURE_UNIT).and_then(Value::as_str) {
        let units = if unit == TEMP_CELSIUS {
            UnitSystem::metric()
        } else {
            UnitSystem::imperial()
        };
        warn!(
            "Found deprecated temperature unit in core configuration expected unit system. \
             Replace '{}: {}' with '{}: {}'",
            CONF_TEMPERATURE_UNIT, unit, CONF_UNIT_SYSTEM, units.name
        );
        core.units = Some(units);
    }

    if let Some(location) = ctx.location {
        detect_missing(&mut core, location).await;
    }

    Ok(core)
}

/// Fill unset location settings from the location service
async fn detect_missing(core: &mut CoreConfig, location: &dyn LocationService) {
    if core.is_complete() {
        return;
    }

    let mut discovered: Vec<(&str, String)> = Vec::new();

    if core.needs_location_info() || core.location_name.is_none() {
        match location.detect_location_info().await {
            None => error!("Could not detect location information"),
            Some(info) => {
                if core.latitude.is_none() && core.longitude.is_none() {
                    core.latitude = Some(info.latitude);
                    core.longitude = Some(info.longitude);
                    discovered.push((CONF_LATITUDE, format!("{:?}", info.latitude)));
                    discovered.push((CONF_LONGITUDE, format!("{:?}", info.longitude)));
                }

                if core.units.is_none() {
                    let units = if info.use_metric {
                        UnitSystem::metric()
                    } else {
                        UnitSystem::imperial()
                    };
                    discovered.push((CONF_UNIT_SYSTEM, units.name.clone()));
                    core.units = Some(units);
                }

                if core.location_name.is_none() {
                    if let Some(city) = info.city {
                        discovered.push((CONF_NAME, city.clone()));
                        core.location_name = Some(city);
                    }
                }

                if core.time_zone.is_none() {
                    core.set_time_zone(info.time_zone.as_deref());
                    if let Some(zone) = &core.time_zone {
                        discovered.push((CONF_TIME_ZONE, zone.clone()));
                    }
                }
            }
        }
    }

    if core.elevation.is_none() {
        if let (Some(lat), Some(lon)) = (core.latitude, core.longitude) {
            if let Some(elevation) = location.get_elevation(lat, lon).await {
                core.elevation = Some(elevation);
                discovered.push((CONF_ELEVATION, elevation.to_string()));
            }
        }
    }

    if !discovered.is_empty() {
        let summary = discovered
            .iter()
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect::<Vec<_>>()
            .join(", ");
        warn!("Incomplete core configuration. Auto detected {}", summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationInfo;
    use crate::schema::InvalidKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeLocation {
        info: Option<LocationInfo>,
        elevation: Option<i32>,
        detect_calls: AtomicUsize,
        elevation_calls: AtomicUsize,
    }

    impl FakeLocation {
        fn testville() -> Self {
            Self {
                info: Some(LocationInfo {
                    ip: Some("1.2.3.4".to_string()),
                    country_code: Some("US".to_string()),
                    country_name: Some("United States".to_string()),
                    region_code: Some("NY".to_string()),
                    region_name: Some("New York".to_string()),
                    city: Some("Testville".to_string()),
                    zip_code: Some("10001".to_string()),
                    time_zone: Some("America/New_York".to_string()),
                    latitude: 40.0,
                    longitude: -73.0,
                    use_metric: false,
                }),
                elevation: Some(101),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl LocationService for FakeLocation {
        async fn detect_location_info(&self) -> Option<LocationInfo> {
            self.detect_calls.fetch_add(1, Ordering::SeqCst);
            self.info.clone()
        }

        async fn get_elevation(&self, _latitude: f64, _longitude: f64) -> Option<i32> {
            self.elevation_calls.fetch_add(1, Ordering::SeqCst);
            self.elevation
        }
    }

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    async fn process(
        section: &str,
        location: Option<&FakeLocation>,
    ) -> Result<CoreConfig, Invalid> {
        let auth = OnceLock::new();
        let defaults = AuthDefaults::default();
        let ctx = CoreConfigContext {
            config_dir: Path::new("/config"),
            location: location.map(|l| l as &dyn LocationService),
            auth: &auth,
            auth_defaults: &defaults,
        };
        process_core_config(&ctx, &yaml(section)).await
    }

    #[tokio::test]
    async fn test_explicit_values_applied() {
        let core = process(
            "name: Huis\nlatitude: 52.3\nlongitude: 4.9\nelevation: 2\ntime_zone: Europe/Amsterdam\nunit_system: metric\n",
            None,
        )
        .await
        .unwrap();

        assert_eq!(core.location_name.as_deref(), Some("Huis"));
        assert_eq!(core.latitude, Some(52.3));
        assert_eq!(core.longitude, Some(4.9));
        assert_eq!(core.elevation, Some(2));
        assert_eq!(core.time_zone.as_deref(), Some("Europe/Amsterdam"));
        assert!(core.units.as_ref().unwrap().is_metric());
        assert!(core.is_allowed_path(Path::new("/config/www/image.png")));
        assert!(!core.is_allowed_path(Path::new("/etc/passwd")));
    }

    #[tokio::test]
    async fn test_complete_config_skips_detection() {
        let location = FakeLocation::testville();
        process(
            "latitude: 1\nlongitude: 2\nelevation: 3\ntime_zone: UTC\nunit_system: imperial\n",
            Some(&location),
        )
        .await
        .unwrap();

        assert_eq!(location.detect_calls.load(Ordering::SeqCst), 0);
        assert_eq!(location.elevation_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_detection_fills_missing_values() {
        let location = FakeLocation::testville();
        let core = process("{}", Some(&location)).await.unwrap();

        assert_eq!(core.latitude, Some(40.0));
        assert_eq!(core.longitude, Some(-73.0));
        assert_eq!(core.time_zone.as_deref(), Some("America/New_York"));
        assert_eq!(core.units, Some(UnitSystem::imperial()));
        assert_eq!(core.location_name.as_deref(), Some("Testville"));
        assert_eq!(core.elevation, Some(101));
        assert_eq!(location.detect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(location.elevation_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detection_keeps_configured_values() {
        let location = FakeLocation::testville();
        let core = process("latitude: 10\nname: Cabin\n", Some(&location))
            .await
            .unwrap();

        assert_eq!(core.latitude, Some(10.0));
        assert_eq!(core.longitude, None);
        assert_eq!(core.location_name.as_deref(), Some("Cabin"));
        assert_eq!(core.time_zone.as_deref(), Some("America/New_York"));
        assert_eq!(location.elevation_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_detection_failure_leaves_values_unset() {
        let location = FakeLocation {
            elevation: Some(7),
            ..Default::default()
        };
        let core = process("latitude: 1\nlongitude: 2\n", Some(&location))
            .await
            .unwrap();

        assert_eq!(core.time_zone, None);
        assert_eq!(core.units, None);
        assert_eq!(core.elevation, Some(7));
    }

    #[tokio::test]
    async fn test_deprecated_temperature_unit() {
        let core = process("temperature_unit: F\n", None).await.unwrap();
        assert_eq!(core.units.unwrap().name, "imperial");

        let core = process("temperature_unit: C\nunit_system: imperial\n", None)
            .await
            .unwrap();
        assert_eq!(core.units.unwrap().name, "imperial");

        let core = process("temperature_unit: c\n", None).await.unwrap();
        assert!(core.units.unwrap().is_metric());
    }

    #[tokio::test]
    async fn test_unknown_key_rejected() {
        let err = process("bogus: 1\n", None).await.unwrap_err();

        assert_eq!(err.kind, InvalidKind::UnknownKey);
        assert_eq!(err.to_string(), "extra keys not allowed @ data['bogus']");
    }

    #[tokio::test]
    async fn test_invalid_values_rejected() {
        assert!(process("latitude: 91\n", None).await.is_err());
        assert!(process("time_zone: Not a zone\n", None).await.is_err());
        assert!(process("time_zone: Europe/Atlantis\n", None).await.is_err());
        assert!(process("unit_system: martian\n", None).await.is_err());
        assert!(process("auth_providers:\n  - type: insecure_example\n", None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_package_customize_merged() {
        let core = process(
            r#"
customize:
  light.kitchen:
    friendly_name: Kitchen
packages:
  porch:
    homeassistant:
      customize:
        light.porch:
          hidden: true
  broken:
    homeassistant:
      customize:
        invalid: {}
"#,
            None,
        )
        .await
        .unwrap();

        assert_eq!(
            core.customize.get("light.kitchen").get("friendly_name"),
            Some(&Value::from("Kitchen"))
        );
        assert_eq!(
            core.customize.get("light.porch").get("hidden"),
            Some(&Value::Bool(true))
        );
        assert_eq!(core.customize.len(), 2);
    }

    #[tokio::test]
    async fn test_auth_lists_parsed() {
        let core = process(
            "auth_providers:\n  - type: homeassistant\n  - type: trusted_networks\nauth_mfa_modules:\n  type: totp\n",
            None,
        )
        .await
        .unwrap();

        assert_eq!(core.auth_providers.unwrap().len(), 2);
        assert_eq!(core.auth_mfa_modules.unwrap()[0].module_type, "totp");
    }

    #[test]
    fn test_set_time_zone_rejects_invalid() {
        let mut core = CoreConfig::new("/config");
        core.set_time_zone(Some("Europe/Amsterdam"));
        core.set_time_zone(Some("not a zone"));
        core.set_time_zone(Some("Europe/Atlantis"));
        core.set_time_zone(None);

        assert_eq!(core.time_zone.as_deref(), Some("Europe/Amsterdam"));
    }

    #[test]
    fn test_as_dict() {
        let mut core = CoreConfig::new("/config");
        core.latitude = Some(1.0);
        core.units = Some(UnitSystem::metric());

        let dict = core.as_dict();
        assert_eq!(dict["latitude"], 1.0);
        assert_eq!(dict["unit_system"]["temperature"], "°C");
        assert_eq!(dict["elevation"], serde_json::Value::Null);
    }
}
