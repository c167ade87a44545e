//! Declarative configuration schemas
//!
//! A [`Schema`] validates a YAML value and returns its normalized form
//! (coerced scalars, filled-in defaults, single values wrapped into lists).
//! Failures are reported as an [`Invalid`] carrying the kind of violation and
//! the path of the offending node, which the error reporter turns into a
//! human-readable message.

use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::path::{key_to_string, subscript_path, value_at, PathSegment};

/// Longest rendering of an offending value in humanized messages
const MAX_VALUE_LENGTH: usize = 500;

/// Kind of schema violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidKind {
    /// The value has the right type but is not acceptable
    Value,
    /// A mapping contains a key the schema does not know
    UnknownKey,
    /// A required mapping key is absent
    MissingKey,
    /// The value has the wrong type or shape
    UnsupportedType,
}

/// A schema violation at a path inside the validated value
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}{}", .message, path_suffix(.path))]
pub struct Invalid {
    pub kind: InvalidKind,
    pub message: String,
    pub path: Vec<PathSegment>,
}

fn path_suffix(path: &[PathSegment]) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" @ data{}", subscript_path(path))
    }
}

impl Invalid {
    pub fn new(kind: InvalidKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: Vec::new(),
        }
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(InvalidKind::Value, message)
    }

    pub fn unsupported_type(message: impl Into<String>) -> Self {
        Self::new(InvalidKind::UnsupportedType, message)
    }

    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::new(InvalidKind::UnknownKey, "extra keys not allowed").prefixed(key.into())
    }

    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::new(InvalidKind::MissingKey, "required key not provided").prefixed(key.into())
    }

    /// Prepend one segment to the error path
    pub fn prefixed(mut self, segment: impl Into<PathSegment>) -> Self {
        self.path.insert(0, segment.into());
        self
    }

    /// Prepend a whole path to the error path
    pub fn with_prefix(mut self, prefix: &[PathSegment]) -> Self {
        let mut path = prefix.to_vec();
        path.append(&mut self.path);
        self.path = path;
        self
    }

    /// Describe the error against the data that was validated
    ///
    /// `expected int @ data['http']['port']. Got "abc"`
    pub fn humanize(&self, data: &Value) -> String {
        match value_at(data, &self.path) {
            Some(offending) => format!("{}. Got {}", self, render_value(offending)),
            None => self.to_string(),
        }
    }
}

/// Compact single-line rendering of a value for messages
pub fn render_value(value: &Value) -> String {
    let rendered = serde_json::to_string(value).unwrap_or_else(|_| format!("{:?}", value));
    if rendered.chars().count() > MAX_VALUE_LENGTH {
        let truncated: String = rendered.chars().take(MAX_VALUE_LENGTH).collect();
        format!("{}...", truncated)
    } else {
        rendered
    }
}

/// Custom validation function
pub type ValidatorFn = dyn Fn(&Value) -> Result<Value, Invalid> + Send + Sync;

/// Policy for mapping keys a [`MapSchema`] does not declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extra {
    /// Unknown keys are an error
    #[default]
    Prevent,
    /// Unknown keys pass through unchanged
    Allow,
    /// Unknown keys are dropped from the output
    Remove,
}

#[derive(Debug, Clone)]
struct Field {
    key: String,
    required: bool,
    default: Option<Value>,
    schema: Schema,
}

/// Schema for a mapping with a fixed set of known keys
#[derive(Debug, Clone, Default)]
pub struct MapSchema {
    fields: Vec<Field>,
    extra: Extra,
}

impl MapSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, key: impl Into<String>, schema: Schema) -> Self {
        self.field(Field {
            key: key.into(),
            required: true,
            default: None,
            schema,
        })
    }

    pub fn optional(self, key: impl Into<String>, schema: Schema) -> Self {
        self.field(Field {
            key: key.into(),
            required: false,
            default: None,
            schema,
        })
    }

    /// Optional key that is filled in (and validated) when absent
    pub fn optional_with_default(
        self,
        key: impl Into<String>,
        default: impl Into<Value>,
        schema: Schema,
    ) -> Self {
        self.field(Field {
            key: key.into(),
            required: false,
            default: Some(default.into()),
            schema,
        })
    }

    pub fn extra(mut self, extra: Extra) -> Self {
        self.extra = extra;
        self
    }

    pub fn allow_extra(self) -> Self {
        self.extra(Extra::Allow)
    }

    /// Add every field of `other`, replacing fields with the same key
    pub fn extend(self, other: MapSchema) -> Self {
        other.fields.into_iter().fold(self, MapSchema::field)
    }

    fn field(mut self, field: Field) -> Self {
        match self.fields.iter_mut().find(|f| f.key == field.key) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    fn validate(&self, value: &Value) -> Result<Value, Invalid> {
        let Value::Mapping(map) = value else {
            return Err(Invalid::unsupported_type("expected a dictionary"));
        };

        let mut out = Mapping::new();
        let mut seen = HashSet::new();

        for (key, item) in map {
            let name = key_to_string(key);
            match self.fields.iter().find(|f| f.key == name) {
                Some(field) => {
                    let validated = field
                        .schema
                        .validate(item)
                        .map_err(|e| e.prefixed(name.clone()))?;
                    out.insert(key.clone(), validated);
                }
                None => match self.extra {
                    Extra::Prevent => return Err(Invalid::unknown_key(name)),
                    Extra::Allow => {
                        out.insert(key.clone(), item.clone());
                    }
                    Extra::Remove => {}
                },
            }
            seen.insert(name);
        }

        for field in &self.fields {
            if seen.contains(&field.key) {
                continue;
            }
            if let Some(default) = &field.default {
                let validated = field
                    .schema
                    .validate(default)
                    .map_err(|e| e.prefixed(field.key.clone()))?;
                out.insert(Value::String(field.key.clone()), validated);
            } else if field.required {
                return Err(Invalid::missing_key(field.key.clone()));
            }
        }

        Ok(Value::Mapping(out))
    }
}

/// A validator for one configuration value
#[derive(Clone)]
pub enum Schema {
    /// Accept anything unchanged
    Any,
    /// Coerce scalars to a string
    String,
    /// Coerce `yes`/`on`/`true`/`1` style values to a boolean
    Boolean,
    /// Coerce to an integer
    Integer,
    /// Coerce to a float
    Float,
    /// Mapping with known keys
    Map(Arc<MapSchema>),
    /// Mapping whose keys and values are validated by schema
    KeyedMap { keys: Box<Schema>, values: Box<Schema> },
    /// Sequence whose items all validate
    List(Box<Schema>),
    /// Like `List`, but `null` becomes `[]` and a single value `[value]`
    EnsureList(Box<Schema>),
    /// Apply schemas in order, each seeing the previous output
    All(Vec<Schema>),
    /// First schema that accepts the value wins
    AnyOf(Vec<Schema>),
    /// String that must be one of the options
    In(Vec<String>),
    /// String that must not be one of the values
    NotIn { values: Vec<String>, message: String },
    Custom(Arc<ValidatorFn>),
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::Any => write!(f, "Any"),
            Schema::String => write!(f, "String"),
            Schema::Boolean => write!(f, "Boolean"),
            Schema::Integer => write!(f, "Integer"),
            Schema::Float => write!(f, "Float"),
            Schema::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Schema::KeyedMap { keys, values } => f
                .debug_struct("KeyedMap")
                .field("keys", keys)
                .field("values", values)
                .finish(),
            Schema::List(item) => f.debug_tuple("List").field(item).finish(),
            Schema::EnsureList(item) => f.debug_tuple("EnsureList").field(item).finish(),
            Schema::All(schemas) => f.debug_tuple("All").field(schemas).finish(),
            Schema::AnyOf(schemas) => f.debug_tuple("AnyOf").field(schemas).finish(),
            Schema::In(options) => f.debug_tuple("In").field(options).finish(),
            Schema::NotIn { values, .. } => f.debug_tuple("NotIn").field(values).finish(),
            Schema::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl From<MapSchema> for Schema {
    fn from(map: MapSchema) -> Self {
        Schema::Map(Arc::new(map))
    }
}

impl Schema {
    pub fn map(map: MapSchema) -> Self {
        map.into()
    }

    pub fn keyed(keys: Schema, values: Schema) -> Self {
        Schema::KeyedMap {
            keys: Box::new(keys),
            values: Box::new(values),
        }
    }

    pub fn list(item: Schema) -> Self {
        Schema::List(Box::new(item))
    }

    pub fn ensure_list(item: Schema) -> Self {
        Schema::EnsureList(Box::new(item))
    }

    pub fn one_of(options: &[&str]) -> Self {
        Schema::In(options.iter().map(|o| o.to_string()).collect())
    }

    pub fn not_in(values: &[&str], message: impl Into<String>) -> Self {
        Schema::NotIn {
            values: values.iter().map(|v| v.to_string()).collect(),
            message: message.into(),
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, Invalid> + Send + Sync + 'static,
    {
        Schema::Custom(Arc::new(f))
    }

    /// Validate a value, returning its normalized form
    pub fn validate(&self, value: &Value) -> Result<Value, Invalid> {
        match self {
            Schema::Any => Ok(value.clone()),
            Schema::String => coerce_string(value).map(Value::String),
            Schema::Boolean => coerce_bool(value).map(Value::Bool),
            Schema::Integer => coerce_int(value).map(Value::from),
            Schema::Float => coerce_float(value).map(Value::from),
            Schema::Map(map) => map.validate(value),
            Schema::KeyedMap { keys, values } => validate_keyed(keys, values, value),
            Schema::List(item) => validate_list(item, value),
            Schema::EnsureList(item) => validate_list(item, &Value::Sequence(ensure_list(value))),
            Schema::All(schemas) => schemas
                .iter()
                .try_fold(value.clone(), |current, schema| schema.validate(&current)),
            Schema::AnyOf(schemas) => {
                let mut first_error = None;
                for schema in schemas {
                    match schema.validate(value) {
                        Ok(validated) => return Ok(validated),
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                Err(first_error.unwrap_or_else(|| Invalid::value("no schema accepted the value")))
            }
            Schema::In(options) => match value.as_str() {
                Some(s) if options.iter().any(|o| o == s) => Ok(value.clone()),
                _ => Err(Invalid::value(format!(
                    "value must be one of [{}]",
                    options.join(", ")
                ))),
            },
            Schema::NotIn { values, message } => match value.as_str() {
                Some(s) if values.iter().any(|v| v == s) => Err(Invalid::value(message.clone())),
                _ => Ok(value.clone()),
            },
            Schema::Custom(f) => f(value),
        }
    }
}

/// Coerce a value to a list: `null` → `[]`, a sequence stays, anything else
/// becomes a one-element list
pub fn ensure_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Sequence(seq) => seq.clone(),
        other => vec![other.clone()],
    }
}

/// Python-style truthiness: null, false, zero and empty containers are falsy
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Sequence(seq) => seq.is_empty(),
        Value::Mapping(map) => map.is_empty(),
        Value::Tagged(_) => false,
    }
}

fn coerce_string(value: &Value) -> Result<String, Invalid> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err(Invalid::value("string value is None")),
        _ => Err(Invalid::unsupported_type("value should be a string")),
    }
}

fn coerce_bool(value: &Value) -> Result<bool, Invalid> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64() != Some(0.0)),
        Value::String(s) => match s.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" | "enable" => Ok(true),
            "0" | "false" | "no" | "off" | "disable" => Ok(false),
            _ => Err(Invalid::value(format!("invalid boolean value {}", s))),
        },
        _ => Err(Invalid::unsupported_type("expected boolean")),
    }
}

fn coerce_int(value: &Value) -> Result<i64, Invalid> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| Invalid::value("expected int")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| Invalid::value("expected int")),
        Value::Bool(b) => Ok(i64::from(*b)),
        _ => Err(Invalid::unsupported_type("expected int")),
    }
}

fn coerce_float(value: &Value) -> Result<f64, Invalid> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| Invalid::value("expected float")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| Invalid::value("expected float")),
        _ => Err(Invalid::unsupported_type("expected float")),
    }
}

fn validate_keyed(keys: &Schema, values: &Schema, value: &Value) -> Result<Value, Invalid> {
    let Value::Mapping(map) = value else {
        return Err(Invalid::unsupported_type("expected a dictionary"));
    };

    let mut out = Mapping::new();
    for (key, item) in map {
        let name = key_to_string(key);
        let validated_key = keys
            .validate(&Value::String(name.clone()))
            .map_err(|e| e.prefixed(name.clone()))?;
        let validated = values.validate(item).map_err(|e| e.prefixed(name))?;
        out.insert(validated_key, validated);
    }
    Ok(Value::Mapping(out))
}

fn validate_list(item: &Schema, value: &Value) -> Result<Value, Invalid> {
    let Value::Sequence(seq) = value else {
        return Err(Invalid::unsupported_type("expected a list"));
    };

    seq.iter()
        .enumerate()
        .map(|(index, entry)| item.validate(entry).map_err(|e| e.prefixed(index)))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Sequence)
}
