//! Process-wide table of compiled logic
//!
//! Ids are handed across the C boundary as plain `u64`s. Id `0` is never
//! issued so hosts can use it as the compile-failure sentinel. Compiling an
//! expression that is already stored returns the existing id, so hosts that
//! compile the same rule on every call do not grow the table.

use super::{compile, CompiledLogic};
use crate::error::{EvalError, Result};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use xxhash_rust::xxh64::xxh64;

static GLOBAL_STORE: Lazy<CompiledLogicStore> = Lazy::new(CompiledLogicStore::new);

/// Store counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledLogicStats {
    /// Distinct expressions held
    pub compiled_count: usize,
    /// Id the next new expression will receive
    pub next_id: u64,
}

#[derive(Debug, Default)]
struct Entries {
    by_id: HashMap<u64, Arc<CompiledLogic>>,
    by_hash: HashMap<u64, u64>,
}

/// Thread-safe map from logic id to compiled expression
#[derive(Debug)]
pub struct CompiledLogicStore {
    entries: RwLock<Entries>,
    next_id: AtomicU64,
}

impl Default for CompiledLogicStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CompiledLogicStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The store shared by every engine instance in the process
    pub fn global() -> &'static CompiledLogicStore {
        &GLOBAL_STORE
    }

    /// Compile `expr` and return its id, reusing the id of an identical expression
    pub fn compile(&self, expr: &Value) -> Result<u64> {
        let hash = xxh64(serde_json::to_string(expr)?.as_bytes(), 0);
        if let Some(id) = self.entries.read().unwrap_or_else(|e| e.into_inner()).by_hash.get(&hash) {
            return Ok(*id);
        }

        let logic = compile(expr)?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        // Another thread may have stored it between the two locks
        if let Some(id) = entries.by_hash.get(&hash) {
            return Ok(*id);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.by_id.insert(id, Arc::new(logic));
        entries.by_hash.insert(hash, id);
        Ok(id)
    }

    /// Look up a compiled expression
    pub fn get(&self, id: u64) -> Result<Arc<CompiledLogic>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| EvalError::Logic(format!("Compiled logic id {} not found", id)))
    }

    /// Number of stored expressions
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).by_id.len()
    }

    /// True if nothing has been compiled
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters
    pub fn stats(&self) -> CompiledLogicStats {
        CompiledLogicStats {
            compiled_count: self.len(),
            next_id: self.next_id.load(Ordering::Relaxed),
        }
    }

    /// Drop every stored expression and restart ids at 1
    ///
    /// Ids issued before the call become invalid.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.by_id.clear();
        entries.by_hash.clear();
        self.next_id.store(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_start_at_one() {
        let store = CompiledLogicStore::new();
        assert_eq!(store.compile(&json!({"var": "a"})).unwrap(), 1);
        assert_eq!(store.compile(&json!({"var": "b"})).unwrap(), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_failed_compile_consumes_no_id() {
        let store = CompiledLogicStore::new();
        assert!(store.compile(&json!({"nope": []})).is_err());
        assert!(store.is_empty());
        assert!(store.get(1).is_err());
    }

    #[test]
    fn test_identical_expressions_share_an_id() {
        let store = CompiledLogicStore::new();
        let first = store.compile(&json!({"+": [{"var": "a"}, 1]})).unwrap();
        let again = store.compile(&json!({"+": [{"var": "a"}, 1]})).unwrap();
        assert_eq!(first, again);
        assert_eq!(
            store.stats(),
            CompiledLogicStats {
                compiled_count: 1,
                next_id: 2
            }
        );
        assert_ne!(store.compile(&json!({"+": [{"var": "a"}, 2]})).unwrap(), first);
    }

    #[test]
    fn test_clear_restarts_ids() {
        let store = CompiledLogicStore::new();
        store.compile(&json!({"var": "a"})).unwrap();
        store.compile(&json!({"var": "b"})).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.stats().next_id, 1);
        assert_eq!(store.compile(&json!({"var": "b"})).unwrap(), 1);
    }
}
