//! Hierarchical parameter store
//!
//! Parameters live in a namespace tree keyed by `/a/b/c` paths. The store is
//! mutated only during the strictly sequential load phase and read-only
//! afterward; a later load into the same path overwrites the earlier value
//! key by key (last-write-wins per key, never per whole document).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ParamValue>),
    Map(IndexMap<String, ParamValue>),
}

impl ParamValue {
    /// Parse a resolved literal string into a typed value
    pub fn parse_literal(s: &str) -> Self {
        if s.eq_ignore_ascii_case("true") {
            return ParamValue::Bool(true);
        }
        if s.eq_ignore_ascii_case("false") {
            return ParamValue::Bool(false);
        }
        if let Ok(i) = s.parse::<i64>() {
            return ParamValue::Int(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return ParamValue::Float(f);
        }
        ParamValue::String(s.to_string())
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::String(s) => write!(f, "{}", s),
            ParamValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            ParamValue::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Join a relative name onto a namespace prefix
///
/// Names starting with `/` are already rooted and pass through unchanged.
pub fn ns_join(base: &str, name: &str) -> String {
    if name.starts_with('/') {
        return name.to_string();
    }
    if name.is_empty() {
        return base.to_string();
    }
    if base == "/" || base.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}

/// The parameter store: a namespace tree of typed values
#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    root: IndexMap<String, ParamValue>,
}

impl ParamStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one value at an absolute path, overwriting whatever was there
    pub fn set(&mut self, path: &str, value: ParamValue) -> Result<(), ParamError> {
        let segments = split_path(path)?;
        let Some((leaf, dirs)) = segments.split_last() else {
            return Err(ParamError::InvalidPath(path.to_string()));
        };

        let mut current = &mut self.root;
        for dir in dirs {
            let entry = current
                .entry((*dir).to_string())
                .or_insert_with(|| ParamValue::Map(IndexMap::new()));
            // A scalar in the way of a deeper write loses (last-write-wins)
            if !matches!(entry, ParamValue::Map(_)) {
                *entry = ParamValue::Map(IndexMap::new());
            }
            let ParamValue::Map(map) = entry else {
                unreachable!();
            };
            current = map;
        }

        current.insert((*leaf).to_string(), value);
        Ok(())
    }

    /// Get the value at an absolute path
    pub fn get(&self, path: &str) -> Result<&ParamValue, ParamError> {
        let segments = split_path(path)?;
        let mut current = &self.root;

        for (i, segment) in segments.iter().enumerate() {
            let value = current
                .get(*segment)
                .ok_or_else(|| ParamError::ParameterNotFound(path.to_string()))?;

            if i + 1 == segments.len() {
                return Ok(value);
            }

            match value {
                ParamValue::Map(map) => current = map,
                _ => return Err(ParamError::ParameterNotFound(path.to_string())),
            }
        }

        Err(ParamError::ParameterNotFound(path.to_string()))
    }

    /// Load a structured parameter file and merge its top-level mapping
    /// under `ns` (an absolute namespace path)
    pub fn load_file(&mut self, ns: &str, file: &Path) -> Result<(), ParamError> {
        let content = std::fs::read_to_string(file).map_err(|e| ParamError::Io {
            path: file.display().to_string(),
            source: e,
        })?;

        let map: IndexMap<String, ParamValue> =
            serde_yaml::from_str(&content).map_err(|e| ParamError::Parse {
                path: file.display().to_string(),
                source: e,
            })?;

        log::debug!(
            "Loading {} top-level parameter(s) from {} into {}",
            map.len(),
            file.display(),
            ns
        );
        self.merge(ns, map)
    }

    /// Merge a mapping under `ns`, key by key
    ///
    /// Nested mappings merge recursively; scalars and lists overwrite.
    pub fn merge(&mut self, ns: &str, map: IndexMap<String, ParamValue>) -> Result<(), ParamError> {
        let target = if ns == "/" || ns.is_empty() {
            &mut self.root
        } else {
            let segments = split_path(ns)?;
            let mut current = &mut self.root;
            for segment in segments {
                let entry = current
                    .entry(segment.to_string())
                    .or_insert_with(|| ParamValue::Map(IndexMap::new()));
                if !matches!(entry, ParamValue::Map(_)) {
                    *entry = ParamValue::Map(IndexMap::new());
                }
                let ParamValue::Map(inner) = entry else {
                    unreachable!();
                };
                current = inner;
            }
            current
        };

        merge_maps(target, map);
        Ok(())
    }

    /// Number of top-level namespaces
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Flatten the store into (path, value) leaf pairs, depth-first
    pub fn leaves(&self) -> Vec<(String, &ParamValue)> {
        let mut out = Vec::new();
        collect_leaves("", &self.root, &mut out);
        out
    }
}

fn collect_leaves<'a>(
    prefix: &str,
    map: &'a IndexMap<String, ParamValue>,
    out: &mut Vec<(String, &'a ParamValue)>,
) {
    for (key, value) in map {
        let path = format!("{}/{}", prefix, key);
        match value {
            ParamValue::Map(inner) => collect_leaves(&path, inner, out),
            other => out.push((path, other)),
        }
    }
}

fn merge_maps(dst: &mut IndexMap<String, ParamValue>, src: IndexMap<String, ParamValue>) {
    for (key, value) in src {
        match (dst.get_mut(&key), value) {
            (Some(ParamValue::Map(existing)), ParamValue::Map(incoming)) => {
                merge_maps(existing, incoming);
            }
            (_, incoming) => {
                dst.insert(key, incoming);
            }
        }
    }
}

fn split_path(path: &str) -> Result<Vec<&str>, ParamError> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Err(ParamError::InvalidPath(path.to_string()));
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ParamError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// Errors from the parameter store
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    #[error("Failed to read parameter file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse parameter file '{path}' as a top-level mapping: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid parameter path: '{0}'")]
    InvalidPath(String),
}
