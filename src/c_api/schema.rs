//! Schema getters

use super::{json_bytes, optional_json, req_paths, req_str, return_format, with_instance, FFIResult};
use std::os::raw::c_char;

/// Evaluated schema as JSON
#[no_mangle]
pub extern "C" fn json_eval_get_evaluated_schema(handle: u64, skip_layout: bool) -> FFIResult {
    with_instance(handle, |eval, _| json_bytes(&eval.get_evaluated_schema(skip_layout)))
}

/// Evaluated schema as MessagePack
///
/// The payload is binary; read exactly `data_len` bytes.
#[no_mangle]
pub extern "C" fn json_eval_get_evaluated_schema_msgpack(handle: u64, skip_layout: bool) -> FFIResult {
    with_instance(handle, |eval, _| eval.get_evaluated_schema_msgpack(skip_layout))
}

/// Evaluated schema without `$params`
#[no_mangle]
pub extern "C" fn json_eval_get_evaluated_schema_without_params(handle: u64, skip_layout: bool) -> FFIResult {
    with_instance(handle, |eval, _| {
        json_bytes(&eval.get_evaluated_schema_without_params(skip_layout))
    })
}

/// One node of the evaluated schema
///
/// A missing path succeeds with `null`.
///
/// # Safety
/// `path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn json_eval_get_evaluated_schema_by_path(
    handle: u64,
    path: *const c_char,
    skip_layout: bool,
) -> FFIResult {
    with_instance(handle, |eval, _| {
        let path = req_str(path, "path")?;
        optional_json(eval.get_evaluated_schema_by_path(path, skip_layout))
    })
}

/// Several nodes of the evaluated schema
///
/// `format`: 0 nested, 1 flat, 2 array.
///
/// # Safety
/// `paths_json` must be a valid NUL-terminated JSON array of strings.
#[no_mangle]
pub unsafe extern "C" fn json_eval_get_evaluated_schema_by_paths(
    handle: u64,
    paths_json: *const c_char,
    skip_layout: bool,
    format: u8,
) -> FFIResult {
    with_instance(handle, |eval, _| {
        let paths = req_paths(paths_json, "paths")?;
        let format = return_format(format)?;
        json_bytes(&eval.get_evaluated_schema_by_paths(&paths, skip_layout, format))
    })
}

/// Every field `value`, nested by data path
#[no_mangle]
pub extern "C" fn json_eval_get_schema_value(handle: u64) -> FFIResult {
    with_instance(handle, |eval, _| json_bytes(&eval.get_schema_value()))
}

/// One node of the schema as supplied
///
/// A missing path succeeds with `null`.
///
/// # Safety
/// `path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn json_eval_get_schema_by_path(handle: u64, path: *const c_char) -> FFIResult {
    with_instance(handle, |eval, _| {
        let path = req_str(path, "path")?;
        optional_json(eval.get_schema_by_path(path))
    })
}

/// Several nodes of the schema as supplied
///
/// # Safety
/// `paths_json` must be a valid NUL-terminated JSON array of strings.
#[no_mangle]
pub unsafe extern "C" fn json_eval_get_schema_by_paths(handle: u64, paths_json: *const c_char, format: u8) -> FFIResult {
    with_instance(handle, |eval, _| {
        let paths = req_paths(paths_json, "paths")?;
        let format = return_format(format)?;
        json_bytes(&eval.get_schema_by_paths(&paths, format))
    })
}
