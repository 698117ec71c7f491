//! Path notation handling
//!
//! Callers address fields three ways: dotted data paths (`insured.age`),
//! JSON pointers (`/insured/age`) and schema pointers
//! (`#/properties/insured/properties/age`). Internally the engine keys
//! everything by schema pointer and reads data through data pointers, which
//! are schema pointers with the `properties` segments removed.

use serde_json::{Map, Value};
use tracing::warn;

/// Output shape for multi-path getters
///
/// Values are part of the C ABI and must not change.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnFormat {
    /// Rebuild the nested object structure (`{"a": {"b": 1}}`)
    #[default]
    Nested = 0,
    /// Dotted keys to values (`{"a.b": 1}`)
    Flat = 1,
    /// Values in request order (`[1]`)
    Array = 2,
}

impl ReturnFormat {
    /// Map the integer selector used across the C boundary
    pub fn from_selector(selector: u8) -> Option<Self> {
        match selector {
            0 => Some(ReturnFormat::Nested),
            1 => Some(ReturnFormat::Flat),
            2 => Some(ReturnFormat::Array),
            _ => None,
        }
    }
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

pub(crate) fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Split any path notation into raw segments
pub fn segments(path: &str) -> Vec<String> {
    let trimmed = path.trim_start_matches('#');
    if trimmed.starts_with('/') {
        trimmed
            .split('/')
            .filter(|s| !s.is_empty())
            .map(unescape)
            .collect()
    } else {
        trimmed
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Normalize a path to a JSON pointer without interpreting `properties`
///
/// `#/a/b` and `a.b` both become `/a/b`; the root is the empty string.
pub fn to_json_pointer(path: &str) -> String {
    join_pointer(&segments(path))
}

fn join_pointer<S: AsRef<str>>(parts: &[S]) -> String {
    let mut out = String::new();
    for part in parts {
        out.push('/');
        out.push_str(&escape(part.as_ref()));
    }
    out
}

/// Resolve a caller-supplied path to a schema pointer (`#/...`)
///
/// Pointer inputs are taken as written. Dotted inputs are walked against
/// `schema` so that both `{"properties": {"a": ..}}` and bare top-level
/// field layouts resolve correctly.
pub fn resolve_schema_pointer(schema: &Value, path: &str) -> String {
    if path.starts_with('#') || path.starts_with('/') {
        return format!("#{}", to_json_pointer(path));
    }

    let mut parts: Vec<String> = Vec::new();
    let mut node = Some(schema);
    for seg in path.split('.').filter(|s| !s.is_empty() && *s != "properties") {
        let via_properties = node
            .and_then(|n| n.get("properties"))
            .and_then(|p| p.get(seg));
        if let Some(child) = via_properties {
            parts.push("properties".to_string());
            parts.push(seg.to_string());
            node = Some(child);
            continue;
        }
        let direct = node.and_then(|n| n.get(seg));
        if direct.is_none() && node.is_some_and(|n| n.get("properties").is_some()) {
            parts.push("properties".to_string());
        }
        parts.push(seg.to_string());
        node = direct;
    }
    format!("#{}", join_pointer(&parts))
}

/// Data pointer for a schema pointer (`#/properties/a/properties/b` -> `/a/b`)
pub fn data_pointer(schema_pointer: &str) -> String {
    let parts: Vec<String> = segments(schema_pointer)
        .into_iter()
        .filter(|s| s != "properties")
        .collect();
    join_pointer(&parts)
}

/// Dotted form of a pointer (`/a/b` -> `a.b`)
pub fn dotted(pointer: &str) -> String {
    segments(pointer).join(".")
}

/// Schema pointer of the field owning `pointer` (`.../properties/b` -> `...`)
pub fn parent_field_pointer(schema_pointer: &str) -> String {
    let mut parts = segments(schema_pointer);
    parts.pop();
    if parts.last().map(String::as_str) == Some("properties") {
        parts.pop();
    }
    format!("#{}", join_pointer(&parts))
}

/// True if one pointer equals the other or contains it on a segment boundary
///
/// `/a` overlaps `/a/b` but not `/ab`.
pub fn overlaps(a: &str, b: &str) -> bool {
    a == b
        || (a.starts_with(b) && a.as_bytes().get(b.len()) == Some(&b'/'))
        || (b.starts_with(a) && b.as_bytes().get(a.len()) == Some(&b'/'))
}

/// Read a value through a pointer in any notation
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    root.pointer(&to_json_pointer(path))
}

/// Write a value, creating intermediate objects as needed
///
/// Returns false when an intermediate segment is a non-container scalar.
#[must_use]
pub fn set(root: &mut Value, path: &str, value: Value) -> bool {
    let parts = segments(path);
    let Some((last, parents)) = parts.split_last() else {
        *root = value;
        return true;
    };

    let mut node = root;
    for part in parents {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map
                .entry(part.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => match part.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(item) => item,
                None => return false,
            },
            _ => return false,
        };
    }

    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            true
        }
        Value::Array(items) => match last.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        },
        _ => false,
    }
}

/// [`set`] for engine writes, where a blocked path is logged and skipped
pub fn set_or_warn(root: &mut Value, path: &str, value: Value) {
    if !set(root, path, value) {
        warn!(path, "write skipped, a scalar sits on the path");
    }
}

/// Remove a value, returning it if it was present
pub fn remove(root: &mut Value, path: &str) -> Option<Value> {
    let parts = segments(path);
    let (last, parents) = parts.split_last()?;
    let parent = root.pointer_mut(&join_pointer(parents))?;
    parent.as_object_mut()?.remove(last)
}

/// Insert `value` at `path` inside `root`, building nested objects
pub fn insert_nested(root: &mut Map<String, Value>, path: &str, value: Value) {
    let parts = segments(path);
    let Some((last, parents)) = parts.split_last() else {
        return;
    };
    let mut node = root;
    for part in parents {
        let entry = node
            .entry(part.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        node = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    node.insert(last.clone(), value);
}
