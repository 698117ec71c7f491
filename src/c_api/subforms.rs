//! Subform mirrors
//!
//! Each function takes the subform path (`#/riders`, `riders` or
//! `#/properties/riders`) right after the handle and otherwise behaves like
//! its root counterpart on the subform's own instance.

use super::evaluation::validation_bytes;
use super::{
    json_bytes, opt_paths, opt_str, optional_json, req_paths, req_str, return_format, with_instance, FFIResult,
};
use std::os::raw::c_char;

/// JSON array of subform paths
#[no_mangle]
pub extern "C" fn json_eval_get_subform_paths(handle: u64) -> FFIResult {
    with_instance(handle, |eval, _| json_bytes(&eval.get_subform_paths()))
}

/// `true` or `false` as JSON
///
/// # Safety
/// `subform_path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn json_eval_has_subform(handle: u64, subform_path: *const c_char) -> FFIResult {
    with_instance(handle, |eval, _| {
        json_bytes(&eval.has_subform(req_str(subform_path, "subform path")?))
    })
}

/// Evaluate one subform
///
/// # Safety
/// `subform_path` and `data` must be valid NUL-terminated strings;
/// `context` may be NULL.
#[no_mangle]
pub unsafe extern "C" fn json_eval_evaluate_subform(
    handle: u64,
    subform_path: *const c_char,
    data: *const c_char,
    context: *const c_char,
) -> FFIResult {
    with_instance(handle, |eval, token| {
        let subform = req_str(subform_path, "subform path")?;
        let data = req_str(data, "data")?;
        eval.evaluate_subform(subform, data, opt_str(context, "context")?, None, Some(token))?;
        Ok(Vec::new())
    })
}

/// Validate one subform, optionally limited to `paths_json`
///
/// # Safety
/// `subform_path` and `data` must be valid NUL-terminated strings;
/// `context` and `paths_json` may be NULL.
#[no_mangle]
pub unsafe extern "C" fn json_eval_validate_subform(
    handle: u64,
    subform_path: *const c_char,
    data: *const c_char,
    context: *const c_char,
    paths_json: *const c_char,
) -> FFIResult {
    with_instance(handle, |eval, token| {
        let subform = req_str(subform_path, "subform path")?;
        let data = req_str(data, "data")?;
        let paths = opt_paths(paths_json, "paths")?;
        let result = eval.validate_subform(subform, data, opt_str(context, "context")?, paths.as_deref(), Some(token))?;
        validation_bytes(&result)
    })
}

/// Propagate changes through one subform's dependents
///
/// # Safety
/// `subform_path` and `changed_paths_json` must be valid NUL-terminated
/// strings; `data` and `context` may be NULL.
#[no_mangle]
pub unsafe extern "C" fn json_eval_evaluate_dependents_subform(
    handle: u64,
    subform_path: *const c_char,
    changed_paths_json: *const c_char,
    data: *const c_char,
    context: *const c_char,
    re_evaluate: i32,
) -> FFIResult {
    with_instance(handle, |eval, token| {
        let subform = req_str(subform_path, "subform path")?;
        let changed = req_paths(changed_paths_json, "changed paths")?;
        let changes = eval.evaluate_dependents_subform(
            subform,
            &changed,
            opt_str(data, "data")?,
            opt_str(context, "context")?,
            re_evaluate != 0,
            Some(token),
        )?;
        json_bytes(&changes)
    })
}

/// Resolve one subform's layout
///
/// # Safety
/// `subform_path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn json_eval_resolve_layout_subform(
    handle: u64,
    subform_path: *const c_char,
    evaluate: bool,
) -> FFIResult {
    with_instance(handle, |eval, token| {
        eval.resolve_layout_subform(req_str(subform_path, "subform path")?, evaluate, Some(token))?;
        Ok(Vec::new())
    })
}

/// One subform's evaluated schema
///
/// # Safety
/// `subform_path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn json_eval_get_evaluated_schema_subform(
    handle: u64,
    subform_path: *const c_char,
    skip_layout: bool,
) -> FFIResult {
    with_instance(handle, |eval, _| {
        json_bytes(&eval.get_evaluated_schema_subform(req_str(subform_path, "subform path")?, skip_layout)?)
    })
}

/// One subform's evaluated schema without `$params`
///
/// # Safety
/// `subform_path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn json_eval_get_evaluated_schema_without_params_subform(
    handle: u64,
    subform_path: *const c_char,
    skip_layout: bool,
) -> FFIResult {
    with_instance(handle, |eval, _| {
        let subform = req_str(subform_path, "subform path")?;
        json_bytes(&eval.get_evaluated_schema_without_params_subform(subform, skip_layout)?)
    })
}

/// One node of a subform's evaluated schema; missing paths give `null`
///
/// # Safety
/// `subform_path` and `path` must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn json_eval_get_evaluated_schema_by_path_subform(
    handle: u64,
    subform_path: *const c_char,
    path: *const c_char,
    skip_layout: bool,
) -> FFIResult {
    with_instance(handle, |eval, _| {
        let subform = req_str(subform_path, "subform path")?;
        let path = req_str(path, "path")?;
        optional_json(eval.get_evaluated_schema_by_path_subform(subform, path, skip_layout)?)
    })
}

/// Several nodes of a subform's evaluated schema
///
/// # Safety
/// `subform_path` and `paths_json` must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn json_eval_get_evaluated_schema_by_paths_subform(
    handle: u64,
    subform_path: *const c_char,
    paths_json: *const c_char,
    skip_layout: bool,
    format: u8,
) -> FFIResult {
    with_instance(handle, |eval, _| {
        let subform = req_str(subform_path, "subform path")?;
        let paths = req_paths(paths_json, "paths")?;
        let format = return_format(format)?;
        json_bytes(&eval.get_evaluated_schema_by_paths_subform(subform, &paths, skip_layout, format)?)
    })
}

/// One subform's field values
///
/// # Safety
/// `subform_path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn json_eval_get_schema_value_subform(handle: u64, subform_path: *const c_char) -> FFIResult {
    with_instance(handle, |eval, _| {
        json_bytes(&eval.get_schema_value_subform(req_str(subform_path, "subform path")?)?)
    })
}

/// One node of a subform's schema as supplied; missing paths give `null`
///
/// # Safety
/// `subform_path` and `path` must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn json_eval_get_schema_by_path_subform(
    handle: u64,
    subform_path: *const c_char,
    path: *const c_char,
) -> FFIResult {
    with_instance(handle, |eval, _| {
        let subform = req_str(subform_path, "subform path")?;
        optional_json(eval.get_schema_by_path_subform(subform, req_str(path, "path")?)?)
    })
}

/// Several nodes of a subform's schema as supplied
///
/// # Safety
/// `subform_path` and `paths_json` must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn json_eval_get_schema_by_paths_subform(
    handle: u64,
    subform_path: *const c_char,
    paths_json: *const c_char,
    format: u8,
) -> FFIResult {
    with_instance(handle, |eval, _| {
        let subform = req_str(subform_path, "subform path")?;
        let paths = req_paths(paths_json, "paths")?;
        let format = return_format(format)?;
        json_bytes(&eval.get_schema_by_paths_subform(subform, &paths, format)?)
    })
}
