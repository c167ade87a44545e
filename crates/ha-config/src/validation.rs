//! Reusable validators for common configuration values

use chrono_tz::Tz;
use serde_yaml::Value;
use std::path::Path;

use ha_core::{is_valid_slug, slugify, valid_entity_id};

use crate::schema::{Invalid, Schema};

pub const TIME_ZONE_HELP: &str = "Invalid time zone passed in. Valid options can be found here: \
    http://en.wikipedia.org/wiki/List_of_tz_database_time_zones";

fn string_value(value: &Value) -> Result<String, Invalid> {
    Schema::String
        .validate(value)
        .map(|v| v.as_str().unwrap_or_default().to_string())
}

fn float_value(value: &Value) -> Result<f64, Invalid> {
    Schema::Float
        .validate(value)
        .map(|v| v.as_f64().unwrap_or_default())
}

fn int_value(value: &Value) -> Result<i64, Invalid> {
    Schema::Integer
        .validate(value)
        .map(|v| v.as_i64().unwrap_or_default())
}

/// Lowercase letters, digits and underscores
pub fn slug() -> Schema {
    Schema::custom(|value| {
        let s = string_value(value)?;
        if is_valid_slug(&s) {
            Ok(Value::String(s))
        } else {
            Err(Invalid::value(format!(
                "invalid slug {} (try {})",
                s,
                slugify(&s)
            )))
        }
    })
}

/// `<domain>.<object_id>`, lowercased
pub fn entity_id() -> Schema {
    Schema::custom(|value| {
        let s = string_value(value)?.to_lowercase();
        if valid_entity_id(&s) {
            Ok(Value::String(s))
        } else {
            Err(Invalid::value(format!("Entity ID {} is an invalid entity id", s)))
        }
    })
}

pub fn latitude() -> Schema {
    Schema::custom(|value| {
        let lat = float_value(value).map_err(|_| Invalid::value("invalid latitude"))?;
        if (-90.0..=90.0).contains(&lat) {
            Ok(Value::from(lat))
        } else {
            Err(Invalid::value("invalid latitude"))
        }
    })
}

pub fn longitude() -> Schema {
    Schema::custom(|value| {
        let lon = float_value(value).map_err(|_| Invalid::value("invalid longitude"))?;
        if (-180.0..=180.0).contains(&lon) {
            Ok(Value::from(lon))
        } else {
            Err(Invalid::value("invalid longitude"))
        }
    })
}

/// Whether a name is in the IANA time zone database (`Europe/Amsterdam`, `UTC`)
pub fn is_valid_time_zone(name: &str) -> bool {
    name.parse::<Tz>().is_ok()
}

pub fn time_zone() -> Schema {
    Schema::custom(|value| {
        let name = string_value(value)?;
        if is_valid_time_zone(&name) {
            Ok(Value::String(name))
        } else {
            Err(Invalid::value(TIME_ZONE_HELP))
        }
    })
}

/// `metric` or `imperial`, case-insensitive
pub fn unit_system() -> Schema {
    Schema::custom(|value| {
        let name = string_value(value)?.to_lowercase();
        match name.as_str() {
            "metric" | "imperial" => Ok(Value::String(name)),
            _ => Err(Invalid::value(format!("invalid unit system {}", name))),
        }
    })
}

/// `C` or `F`, normalized to `°C` / `°F`
pub fn temperature_unit() -> Schema {
    Schema::custom(|value| {
        let unit = string_value(value)?.to_uppercase();
        match unit.as_str() {
            "C" => Ok(Value::from("°C")),
            "F" => Ok(Value::from("°F")),
            _ => Err(Invalid::value("invalid temperature unit (expected C or F)")),
        }
    })
}

/// An existing directory
pub fn is_dir() -> Schema {
    Schema::custom(|value| {
        let path = string_value(value)?;
        if Path::new(&path).is_dir() {
            Ok(Value::String(path))
        } else {
            Err(Invalid::value(format!("path {} is not a directory", path)))
        }
    })
}

pub fn port() -> Schema {
    Schema::custom(|value| {
        let port = int_value(value)?;
        if (1..=65535).contains(&port) {
            Ok(Value::from(port))
        } else {
            Err(Invalid::value("value must be a valid port (1-65535)"))
        }
    })
}

pub fn positive_int() -> Schema {
    Schema::custom(|value| {
        let n = int_value(value)?;
        if n >= 0 {
            Ok(Value::from(n))
        } else {
            Err(Invalid::value("value must be at least 0"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        assert_eq!(slug().validate(&Value::from("pkg_1")).unwrap(), Value::from("pkg_1"));

        let err = slug().validate(&Value::from("My Package")).unwrap_err();
        assert_eq!(err.message, "invalid slug My Package (try my_package)");
    }

    #[test]
    fn test_entity_id_lowercases() {
        assert_eq!(
            entity_id().validate(&Value::from("Light.Kitchen")).unwrap(),
            Value::from("light.kitchen")
        );
        assert!(entity_id().validate(&Value::from("kitchen")).is_err());
    }

    #[test]
    fn test_coordinates() {
        assert_eq!(latitude().validate(&Value::from("52.3")).unwrap(), Value::from(52.3));
        assert!(latitude().validate(&Value::from(91)).is_err());
        assert!(longitude().validate(&Value::from(-180.0)).is_ok());
        assert_eq!(
            longitude().validate(&Value::from("east")).unwrap_err().message,
            "invalid longitude"
        );
    }

    #[test]
    fn test_time_zone() {
        for name in ["UTC", "Europe/Amsterdam", "America/Argentina/Buenos_Aires", "Etc/GMT+5"] {
            assert!(is_valid_time_zone(name), "{}", name);
        }
        for name in [
            "",
            "Not a zone",
            "europe/amsterdam",
            "Europe/Atlantis",
            "Mars/Olympus_Mons",
            "Foo/Bar",
        ] {
            assert!(!is_valid_time_zone(name), "{}", name);
        }
        assert_eq!(
            time_zone().validate(&Value::from("Mars")).unwrap_err().message,
            TIME_ZONE_HELP
        );
    }

    #[test]
    fn test_units() {
        assert_eq!(unit_system().validate(&Value::from("Metric")).unwrap(), Value::from("metric"));
        assert!(unit_system().validate(&Value::from("kelvin")).is_err());
        assert_eq!(temperature_unit().validate(&Value::from("f")).unwrap(), Value::from("°F"));
        assert!(temperature_unit().validate(&Value::from("K")).is_err());
    }

    #[test]
    fn test_port_and_dir() {
        assert_eq!(port().validate(&Value::from("8123")).unwrap(), Value::from(8123));
        assert!(port().validate(&Value::from(0)).is_err());
        assert!(positive_int().validate(&Value::from(-1)).is_err());

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        assert!(is_dir().validate(&Value::from(path.as_str())).is_ok());
        assert!(is_dir().validate(&Value::from("/definitely/not/here")).is_err());
    }
}
