//! Instance construction, reload and release

use super::{json_bytes, opt_str, req_bytes, req_str, with_instance, write_error_out, FFIResult};
use crate::bridge::Registry;
use crate::engine::JsonEval;
use crate::error::Result;
use crate::logic::CompiledLogicStore;
use std::os::raw::c_char;
use std::ptr;

fn register(result: Result<JsonEval>, error_out: *mut *mut c_char) -> u64 {
    match result {
        Ok(eval) => Registry::global().insert(eval),
        Err(e) => {
            // SAFETY: forwarded from the caller's out-parameter contract
            unsafe { write_error_out(error_out, &e) };
            0
        }
    }
}

unsafe fn build_json(schema: *const c_char, context: *const c_char, data: *const c_char) -> Result<JsonEval> {
    let schema = req_str(schema, "schema")?;
    JsonEval::new(schema, opt_str(context, "context")?, opt_str(data, "data")?)
}

unsafe fn build_msgpack(
    schema: *const u8,
    schema_len: usize,
    context: *const c_char,
    data: *const c_char,
) -> Result<JsonEval> {
    let bytes = req_bytes(schema, schema_len, "schema")?;
    JsonEval::new_from_msgpack(bytes, opt_str(context, "context")?, opt_str(data, "data")?)
}

unsafe fn build_cached(key: *const c_char, context: *const c_char, data: *const c_char) -> Result<JsonEval> {
    let key = req_str(key, "cache key")?;
    JsonEval::new_from_cache(key, opt_str(context, "context")?, opt_str(data, "data")?)
}

/// Create an instance from a JSON schema
///
/// # Returns
/// * Non-zero handle on success
/// * 0 on failure; see [`json_eval_last_error`](super::json_eval_last_error)
///
/// # Safety
/// `schema` must be a valid NUL-terminated string; `context` and `data`
/// may be NULL.
#[no_mangle]
pub unsafe extern "C" fn json_eval_new(schema: *const c_char, context: *const c_char, data: *const c_char) -> u64 {
    register(build_json(schema, context, data), ptr::null_mut())
}

/// Like [`json_eval_new`], reporting failure through `error_out`
///
/// On failure `*error_out` receives a message to release with
/// `json_eval_free_string`.
///
/// # Safety
/// As [`json_eval_new`]; `error_out` must be NULL or writable.
#[no_mangle]
pub unsafe extern "C" fn json_eval_new_with_error(
    schema: *const c_char,
    context: *const c_char,
    data: *const c_char,
    error_out: *mut *mut c_char,
) -> u64 {
    register(build_json(schema, context, data), error_out)
}

/// Create an instance from a MessagePack schema
///
/// # Safety
/// `schema` must be valid for `schema_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn json_eval_new_from_msgpack(
    schema: *const u8,
    schema_len: usize,
    context: *const c_char,
    data: *const c_char,
) -> u64 {
    register(build_msgpack(schema, schema_len, context, data), ptr::null_mut())
}

/// Like [`json_eval_new_from_msgpack`], reporting failure through `error_out`
///
/// # Safety
/// As [`json_eval_new_from_msgpack`]; `error_out` must be NULL or writable.
#[no_mangle]
pub unsafe extern "C" fn json_eval_new_from_msgpack_with_error(
    schema: *const u8,
    schema_len: usize,
    context: *const c_char,
    data: *const c_char,
    error_out: *mut *mut c_char,
) -> u64 {
    register(build_msgpack(schema, schema_len, context, data), error_out)
}

/// Create an instance from a schema in the global parsed-schema cache
///
/// Fails if `cache_key` is not cached.
///
/// # Safety
/// `cache_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn json_eval_new_from_cache(
    cache_key: *const c_char,
    context: *const c_char,
    data: *const c_char,
) -> u64 {
    register(build_cached(cache_key, context, data), ptr::null_mut())
}

/// Like [`json_eval_new_from_cache`], reporting failure through `error_out`
///
/// # Safety
/// As [`json_eval_new_from_cache`]; `error_out` must be NULL or writable.
#[no_mangle]
pub unsafe extern "C" fn json_eval_new_from_cache_with_error(
    cache_key: *const c_char,
    context: *const c_char,
    data: *const c_char,
    error_out: *mut *mut c_char,
) -> u64 {
    register(build_cached(cache_key, context, data), error_out)
}

/// Release an instance
///
/// Later calls with `handle` fail with "Invalid handle". Freeing 0 or an
/// already-freed handle is a no-op.
#[no_mangle]
pub extern "C" fn json_eval_free(handle: u64) {
    Registry::global().remove(handle);
}

/// Ask the instance's running call to stop
///
/// Best-effort: the call may still complete normally.
#[no_mangle]
pub extern "C" fn json_eval_cancel(handle: u64) -> FFIResult {
    FFIResult::from_result(Registry::global().cancel(handle).map(|_| Vec::new()))
}

/// Replace the schema, keeping cache and timezone settings
///
/// # Safety
/// `schema` must be a valid NUL-terminated string; `context` and `data`
/// may be NULL.
#[no_mangle]
pub unsafe extern "C" fn json_eval_reload_schema(
    handle: u64,
    schema: *const c_char,
    context: *const c_char,
    data: *const c_char,
) -> FFIResult {
    with_instance(handle, |eval, _| {
        let schema = req_str(schema, "schema")?;
        eval.reload_schema(schema, opt_str(context, "context")?, opt_str(data, "data")?)?;
        Ok(Vec::new())
    })
}

/// Replace the schema from MessagePack bytes
///
/// # Safety
/// `schema` must be valid for `schema_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn json_eval_reload_schema_msgpack(
    handle: u64,
    schema: *const u8,
    schema_len: usize,
    context: *const c_char,
    data: *const c_char,
) -> FFIResult {
    with_instance(handle, |eval, _| {
        let bytes = req_bytes(schema, schema_len, "schema")?;
        eval.reload_schema_msgpack(bytes, opt_str(context, "context")?, opt_str(data, "data")?)?;
        Ok(Vec::new())
    })
}

/// Replace the schema with one from the global parsed-schema cache
///
/// # Safety
/// `cache_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn json_eval_reload_schema_from_cache(
    handle: u64,
    cache_key: *const c_char,
    context: *const c_char,
    data: *const c_char,
) -> FFIResult {
    with_instance(handle, |eval, _| {
        let key = req_str(cache_key, "cache key")?;
        eval.reload_schema_from_cache(key, opt_str(context, "context")?, opt_str(data, "data")?)?;
        Ok(Vec::new())
    })
}

/// Set the offset in minutes east of UTC used by `today` and `now`
///
/// `INT32_MIN` resets to UTC. Unknown handles are ignored.
#[no_mangle]
pub extern "C" fn json_eval_set_timezone_offset(handle: u64, offset_minutes: i32) {
    let offset = (offset_minutes != i32::MIN).then_some(offset_minutes);
    if let Ok(instance) = Registry::global().get(handle) {
        instance.lock().set_timezone_offset(offset);
    }
}

/// Compile a JSON Logic expression into the process-wide store
///
/// # Returns
/// * Non-zero logic id on success
/// * 0 on failure; see [`json_eval_last_error`](super::json_eval_last_error)
///
/// # Safety
/// `logic` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn json_eval_compile_logic(handle: u64, logic: *const c_char) -> u64 {
    let compiled = Registry::global().get(handle).and_then(|instance| {
        let logic = req_str(logic, "logic")?;
        instance.lock().compile_logic(logic)
    });
    match compiled {
        Ok(id) => id,
        Err(e) => {
            super::set_last_error(&e.to_string());
            0
        }
    }
}

/// Run previously compiled logic
///
/// Omitted `data` or `context` default to the instance's current ones.
///
/// # Safety
/// `data` and `context` must be NULL or valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn json_eval_run_logic(
    handle: u64,
    logic_id: u64,
    data: *const c_char,
    context: *const c_char,
) -> FFIResult {
    with_instance(handle, |eval, _| {
        let value = eval.run_logic(logic_id, opt_str(data, "data")?, opt_str(context, "context")?)?;
        json_bytes(&value)
    })
}

/// Compile and run an expression without storing it
///
/// # Safety
/// `logic` must be a valid NUL-terminated string; `data` and `context` may
/// be NULL.
#[no_mangle]
pub unsafe extern "C" fn json_eval_compile_and_run_logic(
    handle: u64,
    logic: *const c_char,
    data: *const c_char,
    context: *const c_char,
) -> FFIResult {
    with_instance(handle, |eval, _| {
        let logic = req_str(logic, "logic")?;
        let value = eval.compile_and_run_logic(logic, opt_str(data, "data")?, opt_str(context, "context")?)?;
        json_bytes(&value)
    })
}

/// Compiled-logic store counters: `{"compiledCount", "nextId"}`
#[no_mangle]
pub extern "C" fn json_eval_compiled_logic_stats() -> FFIResult {
    FFIResult::from_result(json_bytes(&CompiledLogicStore::global().stats()))
}

/// Drop every stored expression; ids issued earlier stop resolving
#[no_mangle]
pub extern "C" fn json_eval_clear_compiled_logic() -> FFIResult {
    CompiledLogicStore::global().clear();
    FFIResult::ok(Vec::new())
}
