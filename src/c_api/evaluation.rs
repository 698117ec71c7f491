//! Evaluation, validation and dependents

use super::{json_bytes, opt_paths, opt_str, req_paths, req_str, with_instance, FFIResult};
use crate::engine::ValidationResult;
use crate::error::Result;
use serde_json::{json, Value};
use std::os::raw::c_char;

/// Wire shape of a validation result: errors as an ordered list with `path`
pub(crate) fn validation_bytes(result: &ValidationResult) -> Result<Vec<u8>> {
    let errors: Vec<Value> = result
        .errors
        .iter()
        .map(|(path, err)| {
            let mut entry = serde_json::to_value(err).unwrap_or_else(|_| json!({}));
            if let Value::Object(map) = &mut entry {
                map.insert("path".to_string(), Value::String(path.clone()));
            }
            entry
        })
        .collect();
    json_bytes(&json!({"hasError": result.has_error, "errors": errors}))
}

/// Replace data and context, then evaluate the schema
///
/// Returns an empty payload; fetch the schema with
/// `json_eval_get_evaluated_schema`.
///
/// # Safety
/// `data` must be a valid NUL-terminated string; `context` may be NULL.
#[no_mangle]
pub unsafe extern "C" fn json_eval_evaluate(handle: u64, data: *const c_char, context: *const c_char) -> FFIResult {
    with_instance(handle, |eval, token| {
        let data = req_str(data, "data")?;
        eval.evaluate(data, opt_str(context, "context")?, None, Some(token))?;
        Ok(Vec::new())
    })
}

/// Validate data against every field's rules
///
/// Payload: `{"hasError": bool, "errors": [{"path", "type", "message", ...}]}`
///
/// # Safety
/// `data` must be a valid NUL-terminated string; `context` may be NULL.
#[no_mangle]
pub unsafe extern "C" fn json_eval_validate(handle: u64, data: *const c_char, context: *const c_char) -> FFIResult {
    with_instance(handle, |eval, token| {
        let data = req_str(data, "data")?;
        let result = eval.validate(data, opt_str(context, "context")?, None, Some(token))?;
        validation_bytes(&result)
    })
}

/// Validate only the fields under `paths_json`
///
/// `paths_json` is a JSON array of paths; NULL validates everything.
///
/// # Safety
/// `data` must be a valid NUL-terminated string; `context` and `paths_json`
/// may be NULL.
#[no_mangle]
pub unsafe extern "C" fn json_eval_validate_paths(
    handle: u64,
    data: *const c_char,
    context: *const c_char,
    paths_json: *const c_char,
) -> FFIResult {
    with_instance(handle, |eval, token| {
        let data = req_str(data, "data")?;
        let paths = opt_paths(paths_json, "paths")?;
        let result = eval.validate(data, opt_str(context, "context")?, paths.as_deref(), Some(token))?;
        validation_bytes(&result)
    })
}

/// Propagate changes through declared dependents
///
/// `changed_paths_json` is a JSON array of paths. `data` may be NULL to keep
/// the current data. `re_evaluate` is a boolean (0 = false). Payload is the
/// ordered JSON array of changes.
///
/// # Safety
/// `changed_paths_json` must be a valid NUL-terminated string; `data` and
/// `context` may be NULL.
#[no_mangle]
pub unsafe extern "C" fn json_eval_evaluate_dependents(
    handle: u64,
    changed_paths_json: *const c_char,
    data: *const c_char,
    context: *const c_char,
    re_evaluate: i32,
) -> FFIResult {
    with_instance(handle, |eval, token| {
        let changed = req_paths(changed_paths_json, "changed paths")?;
        let changes = eval.evaluate_dependents(
            &changed,
            opt_str(data, "data")?,
            opt_str(context, "context")?,
            re_evaluate != 0,
            Some(token),
        )?;
        json_bytes(&changes)
    })
}

/// Resolve `$layout` references, optionally evaluating first
#[no_mangle]
pub extern "C" fn json_eval_resolve_layout(handle: u64, evaluate: bool) -> FFIResult {
    with_instance(handle, |eval, token| {
        eval.resolve_layout(evaluate, Some(token))?;
        Ok(Vec::new())
    })
}
