//! File/line provenance for configuration nodes
//!
//! `serde_yaml` values carry no position information, so the loader builds a
//! parallel map from node path to source location while it reads each file.
//! The map is filled by a line scanner that understands block-style YAML
//! (mapping keys and `- ` sequence items). Merged package content carries
//! the location it was written at inside the package. Nodes written in flow
//! style have no entry of their own and render as `?` unless a recorded
//! ancestor below the top-level key covers them.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::path::PathSegment;

/// Where a configuration node was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: PathBuf,
    /// 1-based line number
    pub line: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// Map from node path to source location
#[derive(Debug, Clone, Default)]
pub struct ProvenanceMap {
    /// `None` marks a node whose origin is unknown; lookups stop there
    entries: HashMap<Vec<PathSegment>, Option<Location>>,
}

impl ProvenanceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the provenance of a single file's content, rooted at `[]`
    pub fn scan(file: &Path, content: &str) -> Self {
        let mut scanner = Scanner::new(file);
        scanner.scan(content);
        scanner.map
    }

    pub fn record(&mut self, path: Vec<PathSegment>, location: Location) {
        self.entries.insert(path, Some(location));
    }

    /// Exact lookup
    pub fn get(&self, path: &[PathSegment]) -> Option<&Location> {
        self.entries.get(path).and_then(Option::as_ref)
    }

    /// Lookup that falls back to the nearest recorded ancestor
    ///
    /// The search never climbs above the top-level key of `path`.
    pub fn locate(&self, path: &[PathSegment]) -> Option<&Location> {
        self.locate_below(path, 1)
    }

    /// Nearest entry among `path` and its ancestors at least `floor`
    /// segments deep
    fn locate_below(&self, path: &[PathSegment], floor: usize) -> Option<&Location> {
        (floor.min(path.len())..=path.len())
            .rev()
            .find_map(|len| self.entries.get(&path[..len]))
            .and_then(Option::as_ref)
    }

    /// Copy the node at `from` and every record below it to `to`
    ///
    /// The node itself takes its nearest location no higher than `floor`
    /// segments, or is marked unknown.
    pub fn copy_subtree(&mut self, from: &[PathSegment], to: &[PathSegment], floor: usize) {
        let node = self.locate_below(from, floor).cloned();
        let below: Vec<(Vec<PathSegment>, Option<Location>)> = self
            .entries
            .iter()
            .filter_map(|(path, location)| {
                let rest = path.strip_prefix(from)?;
                if rest.is_empty() {
                    return None;
                }
                let mut dest = to.to_vec();
                dest.extend_from_slice(rest);
                Some((dest, location.clone()))
            })
            .collect();

        self.entries.insert(to.to_vec(), node);
        self.entries.extend(below);
    }

    /// Give `to` the location of `from` unless `to` already has an entry
    pub fn copy_if_absent(&mut self, from: &[PathSegment], to: &[PathSegment], floor: usize) {
        if !self.entries.contains_key(to) {
            let node = self.locate_below(from, floor).cloned();
            self.entries.insert(to.to_vec(), node);
        }
    }

    /// Render `(file, line)` for a node, with `?` for unknown parts
    pub fn describe(&self, path: &[PathSegment]) -> (String, String) {
        describe_location(self.locate(path))
    }

    /// Re-root every entry of `other` under `prefix`
    pub fn graft(&mut self, prefix: &[PathSegment], other: ProvenanceMap) {
        self.graft_with_offset(prefix, other, 0);
    }

    /// Re-root `other` under `prefix`, shifting its top-level sequence
    /// indices by `offset`
    ///
    /// Used when the items of an included list are appended after items
    /// that came from earlier files.
    pub fn graft_with_offset(&mut self, prefix: &[PathSegment], other: ProvenanceMap, offset: usize) {
        for (path, location) in other.entries {
            let mut full = prefix.to_vec();
            let mut rest = path.into_iter();
            match rest.next() {
                Some(PathSegment::Index(index)) => full.push(PathSegment::Index(index + offset)),
                Some(segment) => full.push(segment),
                None => {}
            }
            full.extend(rest);
            self.entries.insert(full, location);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Render an optional location as `(file, line)` strings
pub fn describe_location(location: Option<&Location>) -> (String, String) {
    match location {
        Some(location) => (
            location.file.display().to_string(),
            location.line.to_string(),
        ),
        None => ("?".to_string(), "?".to_string()),
    }
}

/// Open node while scanning: a mapping key or a sequence item
struct Frame {
    indent: usize,
    path: Vec<PathSegment>,
    is_item: bool,
    next_index: usize,
}

struct Scanner {
    file: PathBuf,
    map: ProvenanceMap,
    stack: Vec<Frame>,
    root_next_index: usize,
    /// Indent of the key owning a `|`/`>` block scalar being skipped
    block_scalar: Option<usize>,
}

impl Scanner {
    fn new(file: &Path) -> Self {
        Self {
            file: file.to_path_buf(),
            map: ProvenanceMap::new(),
            stack: Vec::new(),
            root_next_index: 0,
            block_scalar: None,
        }
    }

    fn scan(&mut self, content: &str) {
        let mut root_recorded = false;

        for (number, raw) in content.lines().enumerate() {
            let line = raw.trim_end();
            let text = line.trim_start();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            let indent = line.len() - text.len();

            if let Some(owner) = self.block_scalar {
                if indent > owner {
                    continue;
                }
                self.block_scalar = None;
            }
            if text == "---" || text == "..." || text.starts_with('%') {
                continue;
            }

            if !root_recorded {
                self.record(Vec::new(), number + 1);
                root_recorded = true;
            }
            self.scan_node(indent, text, number + 1);
        }
    }

    fn scan_node(&mut self, indent: usize, text: &str, line: usize) {
        if text == "-" || text.starts_with("- ") {
            self.scan_item(indent, text, line);
        } else if let Some((key, value)) = split_key(text) {
            while self.stack.last().is_some_and(|top| top.indent >= indent) {
                self.stack.pop();
            }
            let mut path = self.parent_path();
            path.push(PathSegment::Key(key));
            self.record(path.clone(), line);
            self.stack.push(Frame {
                indent,
                path,
                is_item: false,
                next_index: 0,
            });
            if value.starts_with('|') || value.starts_with('>') {
                self.block_scalar = Some(indent);
            }
        }
    }

    fn scan_item(&mut self, indent: usize, text: &str, line: usize) {
        // Items may sit at the same indent as their parent key
        while self
            .stack
            .last()
            .is_some_and(|top| top.indent > indent || (top.is_item && top.indent == indent))
        {
            self.stack.pop();
        }

        let index = match self.stack.last_mut() {
            Some(parent) => {
                parent.next_index += 1;
                parent.next_index - 1
            }
            None => {
                self.root_next_index += 1;
                self.root_next_index - 1
            }
        };
        let mut path = self.parent_path();
        path.push(PathSegment::Index(index));
        self.record(path.clone(), line);
        self.stack.push(Frame {
            indent,
            path,
            is_item: true,
            next_index: 0,
        });

        let rest = text[1..].trim_start();
        if !rest.is_empty() && !rest.starts_with('#') {
            let nested_indent = indent + (text.len() - rest.len());
            self.scan_node(nested_indent, rest, line);
        }
    }

    fn parent_path(&self) -> Vec<PathSegment> {
        self.stack
            .last()
            .map(|frame| frame.path.clone())
            .unwrap_or_default()
    }

    fn record(&mut self, path: Vec<PathSegment>, line: usize) {
        self.map.record(
            path,
            Location {
                file: self.file.clone(),
                line,
            },
        );
    }
}

/// Split a block mapping line into its key and the text after the colon
fn split_key(text: &str) -> Option<(String, &str)> {
    if text.starts_with(|c: char| matches!(c, '[' | '{' | '?' | '&' | '*')) {
        return None;
    }

    let (key, rest) = match text.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let end = text[1..].find(quote)? + 1;
            let rest = text[end + 1..].trim_start().strip_prefix(':')?;
            (text[1..end].to_string(), rest)
        }
        _ => {
            let colon = text
                .find(": ")
                .or_else(|| text.strip_suffix(':').map(str::len))?;
            (text[..colon].trim_end().to_string(), &text[colon + 1..])
        }
    };

    if key.is_empty() {
        return None;
    }
    Some((key, rest.trim_start()))
}
