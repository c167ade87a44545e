//! Integrations bundled with the server
//!
//! Each entry declares the configuration schema of one domain. Platform
//! integrations (`demo`, `template`, `yr`) register the platforms they
//! provide for entity domains such as `light` or `sensor`.

use ha_config::component::CONF_PLATFORM;
use ha_config::validation::{entity_id, port, positive_int, slug};
use ha_config::{
    domain_schema, Component, ComponentSchema, Integration, IntegrationRegistry, MapSchema,
    Platform, Schema,
};

/// Entity domains that are configured through platforms
pub const ENTITY_DOMAINS: [&str; 4] = ["binary_sensor", "light", "sensor", "switch"];

/// Base schema of every platform entry
fn platform_schema() -> Schema {
    Schema::map(
        MapSchema::new()
            .required(CONF_PLATFORM, Schema::String)
            .optional("scan_interval", positive_int())
            .allow_extra(),
    )
}

fn http() -> Integration {
    Integration::new(
        "http",
        Component::new().with_config_schema(ComponentSchema::dict(domain_schema(
            "http",
            Schema::map(
                MapSchema::new()
                    .optional("server_host", Schema::String)
                    .optional_with_default("server_port", 8123, port())
                    .optional("base_url", Schema::String)
                    .optional("api_password", Schema::String)
                    .optional("ssl_certificate", Schema::String)
                    .optional("ssl_key", Schema::String)
                    .optional("trusted_networks", Schema::ensure_list(Schema::String))
                    .optional("cors_allowed_origins", Schema::ensure_list(Schema::String))
                    .optional("use_x_forwarded_for", Schema::Boolean),
            ),
        ))),
    )
}

fn automation() -> Integration {
    let entry = MapSchema::new()
        .optional("id", Schema::String)
        .optional("alias", Schema::String)
        .optional("description", Schema::String)
        .optional("initial_state", Schema::Boolean)
        .required("trigger", Schema::ensure_list(Schema::Any))
        .optional("condition", Schema::ensure_list(Schema::Any))
        .required("action", Schema::ensure_list(Schema::Any));

    Integration::new(
        "automation",
        Component::new().with_config_schema(ComponentSchema::list(domain_schema(
            "automation",
            Schema::ensure_list(Schema::map(entry)),
        ))),
    )
}

fn script() -> Integration {
    let entry = MapSchema::new()
        .optional("alias", Schema::String)
        .optional("description", Schema::String)
        .required("sequence", Schema::ensure_list(Schema::Any));

    Integration::new(
        "script",
        Component::new().with_config_schema(ComponentSchema::dict(domain_schema(
            "script",
            Schema::keyed(slug(), Schema::map(entry)),
        ))),
    )
}

fn group() -> Integration {
    let entry = MapSchema::new()
        .optional("name", Schema::String)
        .optional("icon", Schema::String)
        .optional("entities", Schema::ensure_list(entity_id()))
        .optional("view", Schema::Boolean)
        .optional("control", Schema::String);

    Integration::new(
        "group",
        Component::new().with_config_schema(ComponentSchema::dict(domain_schema(
            "group",
            Schema::keyed(slug(), Schema::map(entry)),
        ))),
    )
}

fn zone() -> Integration {
    let entry = MapSchema::new()
        .required("name", Schema::String)
        .required("latitude", Schema::Float)
        .required("longitude", Schema::Float)
        .optional_with_default("radius", 100.0, Schema::Float)
        .optional("icon", Schema::String)
        .optional("passive", Schema::Boolean);

    Integration::new(
        "zone",
        Component::new().with_config_schema(ComponentSchema::list(domain_schema(
            "zone",
            Schema::ensure_list(Schema::map(entry)),
        ))),
    )
}

fn input_boolean() -> Integration {
    let entry = MapSchema::new()
        .optional("name", Schema::String)
        .optional("initial", Schema::Boolean)
        .optional("icon", Schema::String);

    Integration::new(
        "input_boolean",
        Component::new().with_config_schema(ComponentSchema::dict(domain_schema(
            "input_boolean",
            Schema::keyed(slug(), Schema::map(entry)),
        ))),
    )
}

/// Any value enables the integration
fn sun() -> Integration {
    Integration::new(
        "sun",
        Component::new()
            .with_config_schema(ComponentSchema::opaque(domain_schema("sun", Schema::Any))),
    )
}

fn demo() -> Integration {
    ENTITY_DOMAINS
        .iter()
        .fold(Integration::new("demo", Component::new()), |integration, domain| {
            integration.with_platform(*domain, Platform::new())
        })
}

fn template() -> Integration {
    let schema = Schema::map(
        MapSchema::new()
            .required(CONF_PLATFORM, Schema::String)
            .required("sensors", Schema::keyed(slug(), Schema::Any))
            .optional("scan_interval", positive_int()),
    );

    ["binary_sensor", "sensor"]
        .iter()
        .fold(Integration::new("template", Component::new()), |integration, domain| {
            integration.with_platform(*domain, Platform::with_schema(schema.clone()))
        })
}

fn yr() -> Integration {
    Integration::new("yr", Component::new()).with_platform(
        "sensor",
        Platform::with_schema(Schema::map(
            MapSchema::new()
                .required(CONF_PLATFORM, Schema::String)
                .optional("name", Schema::String)
                .optional("monitored_conditions", Schema::ensure_list(Schema::String))
                .optional("forecast", Schema::Integer)
                .optional("elevation", Schema::Integer),
        )),
    )
}

/// Registry with every integration shipped with the server
pub fn builtin_integrations() -> IntegrationRegistry {
    let registry = IntegrationRegistry::new();

    for domain in ENTITY_DOMAINS {
        registry.register(Integration::new(
            domain,
            Component::new().with_platform_schema(platform_schema()),
        ));
    }

    for integration in [
        http(),
        automation(),
        script(),
        group(),
        zone(),
        input_boolean(),
        demo(),
        template(),
        yr(),
        Integration::new("default_config", Component::new()),
        sun(),
    ] {
        registry.register(integration);
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_config::{create_default_config, HomeAssistant};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) {
        std::fs::write(dir.path().join("configuration.yaml"), content).unwrap();
    }

    #[test]
    fn test_builtin_domains_registered() {
        let registry = builtin_integrations();

        for domain in ["http", "light", "sensor", "zone", "yr", "default_config"] {
            assert!(registry.contains(domain), "{} missing", domain);
        }
        assert!(!registry.contains("hue"));
    }

    #[tokio::test]
    async fn test_default_config_is_valid() {
        let dir = TempDir::new().unwrap();
        create_default_config(dir.path(), None).await.unwrap();

        let hass = HomeAssistant::new(dir.path(), Arc::new(builtin_integrations()));
        let report = hass.bootstrap().await.unwrap();

        assert!(report.is_ok(), "{:?}", report.errors);
        assert_eq!(
            report.domains.keys().collect::<Vec<_>>(),
            vec!["default_config", "sensor", "group", "automation", "script"]
        );
    }

    #[tokio::test]
    async fn test_http_defaults_and_bad_port() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "http:\n  base_url: example.org\n");
        let hass = HomeAssistant::new(dir.path(), Arc::new(builtin_integrations()));

        let report = hass.bootstrap().await.unwrap();
        assert_eq!(report.domains["http"]["server_port"], ha_config::Value::from(8123));

        write_config(&dir, "http:\n  server_port: 70000\n");
        let report = hass.bootstrap().await.unwrap();
        assert_eq!(report.failed, vec!["http"]);
    }

    #[tokio::test]
    async fn test_package_sections_merge_before_validation() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            "homeassistant:\n  packages:\n    garden:\n      sun:\n        elevation: 12\n      zone:\n        - name: Garden\n          latitude: 52.1\n          longitude: 4.3\nsun:\nzone:\n  - name: Work\n    latitude: 52.3\n    longitude: 4.9\n",
        );
        let hass = HomeAssistant::new(dir.path(), Arc::new(builtin_integrations()));

        let report = hass.bootstrap().await.unwrap();

        assert!(report.is_ok(), "{:?}", report.errors);
        assert_eq!(report.domains["sun"]["elevation"], ha_config::Value::from(12));
        let zones: Vec<_> = report.domains["zone"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|zone| zone["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(zones, vec!["Work", "Garden"]);
        assert_eq!(report.domains["zone"][1]["radius"], ha_config::Value::from(100.0));
    }

    #[tokio::test]
    async fn test_platforms_validated() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            "sensor:\n  - platform: template\n    sensors:\n      power: {}\n  - platform: template\n  - platform: hue\nlight kitchen:\n  platform: demo\n",
        );
        let hass = HomeAssistant::new(dir.path(), Arc::new(builtin_integrations()));

        let report = hass.bootstrap().await.unwrap();

        assert_eq!(report.failed, vec!["sensor.template", "sensor.hue"]);
        assert_eq!(
            report.domains["sensor"].as_sequence().map(Vec::len),
            Some(1)
        );
        assert_eq!(report.domains["light"].as_sequence().map(Vec::len), Some(1));
    }
}
