//! Parsed schema cache
//!
//! Parsing a large schema is the expensive step of building an engine, so
//! parsed schemas can be stored under a caller-chosen key and shared by any
//! number of instances. Clones of a [`ParsedSchemaCache`] share storage.
//!
//! A process-wide instance is available through [`ParsedSchemaCache::global`];
//! it lives until process exit.
//!
//! # Example
//!
//! ```rust
//! use json_eval::ParsedSchemaCache;
//!
//! let cache = ParsedSchemaCache::new();
//! cache.insert_json("quote", r#"{"type": "object"}"#).unwrap();
//! assert!(cache.contains("quote"));
//! assert!(cache.remove("quote"));
//! assert!(!cache.remove("quote"));
//! ```

use crate::error::{EvalError, Result};
use crate::schema::ParsedSchema;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::debug;

static GLOBAL_CACHE: Lazy<ParsedSchemaCache> = Lazy::new(ParsedSchemaCache::new);

/// Snapshot of cache contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of entries
    pub entry_count: usize,
    /// Keys in insertion order
    pub keys: Vec<String>,
}

/// Thread-safe key to parsed-schema map
#[derive(Debug, Clone, Default)]
pub struct ParsedSchemaCache {
    entries: Arc<RwLock<IndexMap<String, Arc<ParsedSchema>>>>,
}

impl ParsedSchemaCache {
    /// Create an empty local cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache
    pub fn global() -> &'static ParsedSchemaCache {
        &GLOBAL_CACHE
    }

    /// True if `self` and `other` share storage
    pub fn ptr_eq(&self, other: &ParsedSchemaCache) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Store a parsed schema, replacing any previous entry
    pub fn insert(&self, key: impl Into<String>, schema: Arc<ParsedSchema>) -> Option<Arc<ParsedSchema>> {
        let key = key.into();
        debug!(key = %key, "caching parsed schema");
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, schema)
    }

    /// Parse JSON text and store the result
    pub fn insert_json(&self, key: impl Into<String>, json: &str) -> Result<()> {
        let parsed = ParsedSchema::parse(json)?;
        self.insert(key, Arc::new(parsed));
        Ok(())
    }

    /// Parse MessagePack bytes and store the result
    pub fn insert_msgpack(&self, key: impl Into<String>, bytes: &[u8]) -> Result<()> {
        let parsed = ParsedSchema::parse_msgpack(bytes)?;
        self.insert(key, Arc::new(parsed));
        Ok(())
    }

    /// Fetch an entry
    pub fn get(&self, key: &str) -> Option<Arc<ParsedSchema>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Fetch an entry or fail with a cache-miss error
    pub fn require(&self, key: &str) -> Result<Arc<ParsedSchema>> {
        self.get(key).ok_or_else(|| EvalError::CacheMiss(key.to_string()))
    }

    /// Fetch an entry, building and storing it on a miss
    ///
    /// `factory` runs outside the lock; if two callers race, the first
    /// insert wins and both receive that entry.
    pub fn get_or_insert_with<F>(&self, key: &str, factory: F) -> Result<Arc<ParsedSchema>>
    where
        F: FnOnce() -> Result<ParsedSchema>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let built = Arc::new(factory()?);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Ok(entries.entry(key.to_string()).or_insert(built).clone())
    }

    /// True if `key` is present
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    /// Remove an entry, returning whether it existed
    pub fn remove(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .shift_remove(key)
            .is_some()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True if there are no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Entry count and keys taken under a single lock
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            entry_count: entries.len(),
            keys: entries.keys().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{"type": "object", "properties": {"a": {"type": "string"}}}"#;

    #[test]
    fn test_insert_overwrites_silently() {
        let cache = ParsedSchemaCache::new();
        cache.insert_json("k", SCHEMA).unwrap();
        cache.insert_json("k", r#"{"type": "object"}"#).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.get("k").unwrap().schema().get("properties").is_none());
    }

    #[test]
    fn test_stats_report_insertion_order() {
        let cache = ParsedSchemaCache::new();
        cache.insert_json("b", SCHEMA).unwrap();
        cache.insert_json("a", SCHEMA).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.keys, vec!["b".to_string(), "a".to_string()]);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["entryCount"], 2);
    }

    #[test]
    fn test_clones_share_storage() {
        let cache = ParsedSchemaCache::new();
        let other = cache.clone();
        other.insert_json("k", SCHEMA).unwrap();
        assert!(cache.contains("k"));
        assert!(cache.ptr_eq(&other));
        assert!(!cache.ptr_eq(&ParsedSchemaCache::new()));
    }

    #[test]
    fn test_require_reports_missing_key() {
        let cache = ParsedSchemaCache::new();
        let err = cache.require("missing").unwrap_err();
        assert_eq!(err.to_string(), "Schema 'missing' not found in cache");
    }

    #[test]
    fn test_get_or_insert_with_builds_once() {
        let cache = ParsedSchemaCache::new();
        let mut calls = 0;
        cache
            .get_or_insert_with("k", || {
                calls += 1;
                ParsedSchema::parse(SCHEMA)
            })
            .unwrap();
        cache
            .get_or_insert_with("k", || {
                calls += 1;
                ParsedSchema::parse(SCHEMA)
            })
            .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_invalid_schema_is_not_stored() {
        let cache = ParsedSchemaCache::new();
        assert!(cache.insert_json("bad", "{not json").is_err());
        assert!(cache.is_empty());
    }
}
