//! C API for json-eval
//!
//! Engine instances are addressed by `u64` handles; `0` is never a valid
//! handle. Every operation returns an [`FFIResult`] that the caller must
//! release with [`json_eval_free_result`] exactly once, on success and on
//! failure alike. Strings returned as `char *` are released with
//! [`json_eval_free_string`], except [`json_eval_version`] which is static.
//!
//! Payloads are UTF-8 JSON unless the function name ends in `_msgpack`, in
//! which case `data_ptr`/`data_len` carry raw MessagePack bytes that may
//! contain zeros.
//!
//! # Example
//! ```c
//! uint64_t h = json_eval_new(schema_json, NULL, NULL);
//! FFIResult r = json_eval_evaluate(h, "{\"name\": \"x\"}", NULL);
//! json_eval_free_result(r);
//!
//! r = json_eval_get_evaluated_schema(h, true);
//! if (r.success) {
//!     fwrite(r.data_ptr, 1, r.data_len, stdout);
//! }
//! json_eval_free_result(r);
//! json_eval_free(h);
//! ```

pub mod async_api;
pub mod cache;
pub mod evaluation;
pub mod lifecycle;
pub mod parsed_cache;
pub mod schema;
pub mod subforms;

use crate::bridge::Registry;
use crate::cancel::CancellationToken;
use crate::engine::JsonEval;
use crate::error::{EvalError, Result};
use crate::path::ReturnFormat;
use serde::Serialize;
use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::slice;
use tracing::warn;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Result of every fallible C API call
///
/// `success == true` implies `error == NULL`; `success == false` implies
/// `data_ptr == NULL` and `error` set. Release with [`json_eval_free_result`].
#[repr(C)]
#[derive(Debug)]
pub struct FFIResult {
    /// Whether the call succeeded
    pub success: bool,
    /// Payload bytes; valid until the result is freed
    pub data_ptr: *const u8,
    /// Payload length in bytes
    pub data_len: usize,
    /// NUL-terminated error message on failure
    pub error: *mut c_char,
    /// Allocation backing `data_ptr`; opaque to the caller
    pub owned_data: *mut c_void,
}

impl FFIResult {
    pub(crate) fn ok(data: Vec<u8>) -> Self {
        let boxed = Box::new(data);
        let data_ptr = boxed.as_ptr();
        let data_len = boxed.len();
        FFIResult {
            success: true,
            data_ptr,
            data_len,
            error: ptr::null_mut(),
            owned_data: Box::into_raw(boxed) as *mut c_void,
        }
    }

    pub(crate) fn error(err: &EvalError) -> Self {
        let message = err.to_string();
        set_last_error(&message);
        FFIResult {
            success: false,
            data_ptr: ptr::null(),
            data_len: 0,
            error: to_c_string(message).into_raw(),
            owned_data: ptr::null_mut(),
        }
    }

    pub(crate) fn from_result(result: Result<Vec<u8>>) -> Self {
        match result {
            Ok(data) => FFIResult::ok(data),
            Err(e) => FFIResult::error(&e),
        }
    }
}

fn to_c_string(message: String) -> CString {
    CString::new(message.replace('\0', " ")).unwrap_or_default()
}

pub(crate) fn set_last_error(message: &str) {
    warn!(error = %message, "C API call failed");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(to_c_string(message.to_string())));
}

/// Write `err` through an optional `char **` out-parameter
///
/// # Safety
/// `out` must be NULL or point to writable storage for one pointer.
pub(crate) unsafe fn write_error_out(out: *mut *mut c_char, err: &EvalError) {
    let message = err.to_string();
    set_last_error(&message);
    if !out.is_null() {
        *out = to_c_string(message).into_raw();
    }
}

pub(crate) fn json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| EvalError::Serialization(e.to_string()))
}

/// Borrow an optional C string
///
/// # Safety
/// `p` must be NULL or a valid NUL-terminated string outliving `'a`.
pub(crate) unsafe fn opt_str<'a>(p: *const c_char, name: &str) -> Result<Option<&'a str>> {
    if p.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(p)
        .to_str()
        .map(Some)
        .map_err(|_| EvalError::InvalidArgument(format!("{} is not valid UTF-8", name)))
}

/// Borrow a required C string
///
/// # Safety
/// Same as [`opt_str`].
pub(crate) unsafe fn req_str<'a>(p: *const c_char, name: &str) -> Result<&'a str> {
    opt_str(p, name)?.ok_or_else(|| EvalError::InvalidArgument(format!("{} is NULL", name)))
}

/// Borrow a byte buffer
///
/// # Safety
/// `p` must be NULL or valid for `len` bytes outliving `'a`.
pub(crate) unsafe fn req_bytes<'a>(p: *const u8, len: usize, name: &str) -> Result<&'a [u8]> {
    if p.is_null() || len == 0 {
        return Err(EvalError::InvalidArgument(format!("{} is empty", name)));
    }
    Ok(slice::from_raw_parts(p, len))
}

/// Parse a JSON array of path strings
///
/// # Safety
/// Same as [`opt_str`].
pub(crate) unsafe fn req_paths(p: *const c_char, name: &str) -> Result<Vec<String>> {
    let text = req_str(p, name)?;
    serde_json::from_str(text).map_err(|e| EvalError::InvalidArgument(format!("{} must be a JSON array of strings: {}", name, e)))
}

/// Parse an optional JSON array of path strings
///
/// # Safety
/// Same as [`opt_str`].
pub(crate) unsafe fn opt_paths(p: *const c_char, name: &str) -> Result<Option<Vec<String>>> {
    if p.is_null() {
        return Ok(None);
    }
    req_paths(p, name).map(Some)
}

pub(crate) fn return_format(selector: u8) -> Result<ReturnFormat> {
    ReturnFormat::from_selector(selector)
        .ok_or_else(|| EvalError::InvalidArgument(format!("unknown return format {}", selector)))
}

/// Run `f` against the instance behind `handle`
pub(crate) fn with_instance<F>(handle: u64, f: F) -> FFIResult
where
    F: FnOnce(&mut JsonEval, &CancellationToken) -> Result<Vec<u8>>,
{
    let result = Registry::global().get(handle).and_then(|instance| instance.with(f));
    FFIResult::from_result(result)
}

/// Null-tolerant JSON encoding for single-path lookups that may miss
pub(crate) fn optional_json(value: Option<serde_json::Value>) -> Result<Vec<u8>> {
    json_bytes(&value.unwrap_or(serde_json::Value::Null))
}

// ============================================================================
// LIFETIME
// ============================================================================

/// Release everything a result owns
///
/// # Safety
/// `result` must come from this library and must not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn json_eval_free_result(result: FFIResult) {
    if !result.owned_data.is_null() {
        drop(Box::from_raw(result.owned_data as *mut Vec<u8>));
    }
    if !result.error.is_null() {
        drop(CString::from_raw(result.error));
    }
}

/// Free a string returned by this library
///
/// # Safety
/// `s` must be NULL or a string returned by this library, freed once.
#[no_mangle]
pub unsafe extern "C" fn json_eval_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Library version
///
/// Statically allocated; do NOT free.
#[no_mangle]
pub extern "C" fn json_eval_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

/// Last error recorded on the calling thread
///
/// Returns NULL if no call on this thread has failed. The returned copy must
/// be released with [`json_eval_free_string`].
#[no_mangle]
pub extern "C" fn json_eval_last_error() -> *mut c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(ptr::null_mut(), |msg| msg.clone().into_raw())
    })
}
