//! Parsed-schema cache handles
//!
//! Local caches are created with [`parsed_cache_new`] and must be freed
//! exactly once with [`parsed_cache_free`]. [`parsed_cache_global`] always
//! returns the same process-wide cache; freeing it is a no-op, so wrappers
//! in any binding may dispose it freely.

use super::{json_bytes, req_bytes, req_str, FFIResult};
use crate::cache::ParsedSchemaCache;
use crate::error::{EvalError, Result};
use once_cell::sync::Lazy;
use std::os::raw::c_char;

/// Opaque parsed-schema cache handle
#[repr(C)]
pub struct parsed_schema_cache_t {
    _private: [u8; 0],
}

struct CacheInternal {
    cache: ParsedSchemaCache,
}

struct GlobalHandle(*mut parsed_schema_cache_t);

// SAFETY: the pointer targets a leaked CacheInternal whose cache is Sync
unsafe impl Send for GlobalHandle {}
unsafe impl Sync for GlobalHandle {}

static GLOBAL_HANDLE: Lazy<GlobalHandle> = Lazy::new(|| {
    GlobalHandle(parsed_schema_cache_t::from_internal(Box::new(CacheInternal {
        cache: ParsedSchemaCache::global().clone(),
    })))
});

impl parsed_schema_cache_t {
    fn from_internal(internal: Box<CacheInternal>) -> *mut Self {
        Box::into_raw(internal) as *mut Self
    }

    unsafe fn into_internal(ptr: *mut Self) -> Box<CacheInternal> {
        Box::from_raw(ptr as *mut CacheInternal)
    }

    unsafe fn as_cache<'a>(ptr: *const Self) -> Result<&'a ParsedSchemaCache> {
        if ptr.is_null() {
            return Err(EvalError::InvalidHandle);
        }
        Ok(&(*(ptr as *const CacheInternal)).cache)
    }
}

/// Create a local cache
#[no_mangle]
pub extern "C" fn parsed_cache_new() -> *mut parsed_schema_cache_t {
    parsed_schema_cache_t::from_internal(Box::new(CacheInternal {
        cache: ParsedSchemaCache::new(),
    }))
}

/// The process-wide cache used by `json_eval_new_from_cache`
///
/// Every call returns the same pointer.
#[no_mangle]
pub extern "C" fn parsed_cache_global() -> *mut parsed_schema_cache_t {
    GLOBAL_HANDLE.0
}

/// Parse `schema_json` and store it under `key`, replacing any entry
///
/// # Safety
/// `cache` must come from this module; strings must be NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn parsed_cache_insert(
    cache: *mut parsed_schema_cache_t,
    key: *const c_char,
    schema_json: *const c_char,
) -> FFIResult {
    let result = (|| -> Result<Vec<u8>> {
        let cache = parsed_schema_cache_t::as_cache(cache)?;
        cache.insert_json(req_str(key, "key")?, req_str(schema_json, "schema")?)?;
        Ok(Vec::new())
    })();
    FFIResult::from_result(result)
}

/// Parse a MessagePack schema and store it under `key`
///
/// # Safety
/// `schema` must be valid for `schema_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn parsed_cache_insert_msgpack(
    cache: *mut parsed_schema_cache_t,
    key: *const c_char,
    schema: *const u8,
    schema_len: usize,
) -> FFIResult {
    let result = (|| -> Result<Vec<u8>> {
        let cache = parsed_schema_cache_t::as_cache(cache)?;
        cache.insert_msgpack(req_str(key, "key")?, req_bytes(schema, schema_len, "schema")?)?;
        Ok(Vec::new())
    })();
    FFIResult::from_result(result)
}

/// True if `key` is cached; false for NULL arguments
///
/// # Safety
/// `cache` must come from this module; `key` must be NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn parsed_cache_contains(cache: *const parsed_schema_cache_t, key: *const c_char) -> bool {
    match (parsed_schema_cache_t::as_cache(cache), req_str(key, "key")) {
        (Ok(cache), Ok(key)) => cache.contains(key),
        _ => false,
    }
}

/// Remove `key`; true if it was present
///
/// # Safety
/// `cache` must come from this module; `key` must be NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn parsed_cache_remove(cache: *mut parsed_schema_cache_t, key: *const c_char) -> bool {
    match (parsed_schema_cache_t::as_cache(cache), req_str(key, "key")) {
        (Ok(cache), Ok(key)) => cache.remove(key),
        _ => false,
    }
}

/// Remove every entry
///
/// # Safety
/// `cache` must be NULL or come from this module.
#[no_mangle]
pub unsafe extern "C" fn parsed_cache_clear(cache: *mut parsed_schema_cache_t) {
    if let Ok(cache) = parsed_schema_cache_t::as_cache(cache) {
        cache.clear();
    }
}

/// Number of entries; 0 for NULL
///
/// # Safety
/// `cache` must be NULL or come from this module.
#[no_mangle]
pub unsafe extern "C" fn parsed_cache_len(cache: *const parsed_schema_cache_t) -> usize {
    parsed_schema_cache_t::as_cache(cache).map_or(0, ParsedSchemaCache::len)
}

/// True if the cache has no entries
///
/// # Safety
/// `cache` must be NULL or come from this module.
#[no_mangle]
pub unsafe extern "C" fn parsed_cache_is_empty(cache: *const parsed_schema_cache_t) -> bool {
    parsed_schema_cache_t::as_cache(cache).map_or(true, ParsedSchemaCache::is_empty)
}

/// `{"entryCount": n, "keys": [...]}`
///
/// # Safety
/// `cache` must come from this module.
#[no_mangle]
pub unsafe extern "C" fn parsed_cache_stats(cache: *const parsed_schema_cache_t) -> FFIResult {
    FFIResult::from_result(parsed_schema_cache_t::as_cache(cache).and_then(|c| json_bytes(&c.stats())))
}

/// JSON array of keys in insertion order
///
/// # Safety
/// `cache` must come from this module.
#[no_mangle]
pub unsafe extern "C" fn parsed_cache_keys(cache: *const parsed_schema_cache_t) -> FFIResult {
    FFIResult::from_result(parsed_schema_cache_t::as_cache(cache).and_then(|c| json_bytes(&c.keys())))
}

/// Free a local cache; no-op for NULL and for the global cache
///
/// # Safety
/// `cache` must be NULL, the global cache, or a local cache freed once.
#[no_mangle]
pub unsafe extern "C" fn parsed_cache_free(cache: *mut parsed_schema_cache_t) {
    if cache.is_null() || cache == GLOBAL_HANDLE.0 {
        return;
    }
    drop(parsed_schema_cache_t::into_internal(cache));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_pointer_is_stable_and_survives_free() {
        let a = parsed_cache_global();
        let b = parsed_cache_global();
        assert_eq!(a, b);
        unsafe {
            parsed_cache_free(a);
            let cache = parsed_schema_cache_t::as_cache(b).unwrap();
            assert!(cache.ptr_eq(ParsedSchemaCache::global()));
        }
    }
}
