//! Paths into a configuration tree
//!
//! A path is the sequence of mapping keys and sequence indices leading from
//! the root of a tree to one node. Validation errors and provenance records
//! are both keyed by paths.

use serde_yaml::Value;
use std::fmt;

/// One step of a path into a configuration tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    /// Build a key segment from a YAML mapping key
    pub fn from_key(key: &Value) -> Self {
        PathSegment::Key(key_to_string(key))
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{}", key),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

/// Render a mapping key the way it appears in paths and messages
pub fn key_to_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Join path segments with a separator (`light->0->platform`)
pub fn join_path(path: &[PathSegment], separator: &str) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}

/// Render a path in subscript form (`['light'][0]['platform']`)
pub fn subscript_path(path: &[PathSegment]) -> String {
    path.iter()
        .map(|segment| match segment {
            PathSegment::Key(key) => format!("['{}']", key),
            PathSegment::Index(index) => format!("[{}]", index),
        })
        .collect()
}

/// Look up the node at `path`, if every step exists
pub fn value_at<'a>(root: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, segment| match (node, segment) {
        (Value::Mapping(map), PathSegment::Key(key)) => map
            .iter()
            .find(|(k, _)| key_to_string(k) == *key)
            .map(|(_, v)| v),
        (Value::Sequence(seq), PathSegment::Index(index)) => seq.get(*index),
        _ => None,
    })
}
