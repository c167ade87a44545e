//! Entity customization rules
//!
//! Rules override entity attributes and come in three layers: by glob
//! pattern over the entity id, by domain, and by exact entity id. A lookup
//! applies them from least to most specific, so an exact rule wins over a
//! domain rule, which wins over a glob rule.

use dashmap::DashMap;
use indexmap::IndexMap;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use tracing::warn;

use ha_core::split_entity_id;

use crate::path::key_to_string;
use crate::schema::{MapSchema, Schema};
use crate::validation::entity_id;

pub const CONF_CUSTOMIZE: &str = "customize";
pub const CONF_CUSTOMIZE_DOMAIN: &str = "customize_domain";
pub const CONF_CUSTOMIZE_GLOB: &str = "customize_glob";

pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";
pub const ATTR_HIDDEN: &str = "hidden";
pub const ATTR_ASSUMED_STATE: &str = "assumed_state";

/// Attribute overrides of one rule; unknown attributes pass through
pub fn customize_dict_schema() -> Schema {
    Schema::map(
        MapSchema::new()
            .optional(ATTR_FRIENDLY_NAME, Schema::String)
            .optional(ATTR_HIDDEN, Schema::Boolean)
            .optional(ATTR_ASSUMED_STATE, Schema::Boolean)
            .allow_extra(),
    )
}

/// The three customize sections, each defaulting to `{}`
pub fn customize_config_schema() -> MapSchema {
    MapSchema::new()
        .optional_with_default(
            CONF_CUSTOMIZE,
            Mapping::new(),
            Schema::keyed(entity_id(), customize_dict_schema()),
        )
        .optional_with_default(
            CONF_CUSTOMIZE_DOMAIN,
            Mapping::new(),
            Schema::keyed(Schema::String, customize_dict_schema()),
        )
        .optional_with_default(
            CONF_CUSTOMIZE_GLOB,
            Mapping::new(),
            Schema::keyed(Schema::String, customize_dict_schema()),
        )
}

/// Translate a shell-style glob (`*`, `?`, `[seq]`, `[!seq]`) to an
/// anchored regular expression
pub fn translate_glob(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut j = i + 1;
                if chars.get(j) == Some(&'!') {
                    j += 1;
                }
                if chars.get(j) == Some(&']') {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str(r"\[");
                } else {
                    let mut class: String = chars[i + 1..j].iter().collect();
                    if let Some(rest) = class.strip_prefix('!') {
                        class = format!("^{}", rest);
                    }
                    out.push('[');
                    out.push_str(&class.replace('\\', r"\\"));
                    out.push(']');
                    i = j;
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

#[derive(Debug)]
struct GlobRule {
    pattern: String,
    regex: Regex,
    values: Mapping,
}

/// Layered attribute overrides with a per-entity lookup cache
#[derive(Debug, Default)]
pub struct CustomizeRuleSet {
    exact: IndexMap<String, Mapping>,
    domain: IndexMap<String, Mapping>,
    glob: Vec<GlobRule>,
    cache: DashMap<String, Mapping>,
}

impl CustomizeRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a validated customize section
    pub fn from_config(config: &Value) -> Self {
        let mut rules = Self::new();
        rules.update(config);
        rules
    }

    /// Add the rules of a validated customize section
    ///
    /// A rule for an id, domain or pattern that already exists replaces it.
    pub fn update(&mut self, config: &Value) {
        for (key, values) in section(config, CONF_CUSTOMIZE) {
            self.exact.insert(key, values);
        }
        for (key, values) in section(config, CONF_CUSTOMIZE_DOMAIN) {
            self.domain.insert(key, values);
        }
        for (pattern, values) in section(config, CONF_CUSTOMIZE_GLOB) {
            self.insert_glob(pattern, values);
        }
        self.cache.clear();
    }

    fn insert_glob(&mut self, pattern: String, values: Mapping) {
        if let Some(existing) = self.glob.iter_mut().find(|rule| rule.pattern == pattern) {
            existing.values = values;
            return;
        }
        match Regex::new(&translate_glob(&pattern)) {
            Ok(regex) => self.glob.push(GlobRule {
                pattern,
                regex,
                values,
            }),
            Err(e) => warn!("Ignoring customize_glob pattern {}: {}", pattern, e),
        }
    }

    /// Attribute overrides that apply to an entity
    pub fn get(&self, entity_id: &str) -> Mapping {
        if let Some(cached) = self.cache.get(entity_id) {
            return cached.value().clone();
        }

        let mut result = Mapping::new();
        for rule in self.glob.iter().filter(|rule| rule.regex.is_match(entity_id)) {
            extend(&mut result, &rule.values);
        }
        if let Some(values) = split_entity_id(entity_id).and_then(|(domain, _)| self.domain.get(domain)) {
            extend(&mut result, values);
        }
        if let Some(values) = self.exact.get(entity_id) {
            extend(&mut result, values);
        }

        self.cache.insert(entity_id.to_string(), result.clone());
        result
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.domain.len() + self.glob.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn section(config: &Value, key: &str) -> Vec<(String, Mapping)> {
    config
        .get(key)
        .and_then(Value::as_mapping)
        .map(|rules| {
            rules
                .iter()
                .filter_map(|(k, v)| v.as_mapping().map(|m| (key_to_string(k), m.clone())))
                .collect()
        })
        .unwrap_or_default()
}

fn extend(target: &mut Mapping, values: &Mapping) {
    for (k, v) in values {
        target.insert(k.clone(), v.clone());
    }
}
