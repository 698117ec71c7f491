//! Callback-based async variants
//!
//! Inputs are copied before the call returns, so the caller may release its
//! buffers immediately. The work runs on the rayon pool and the callback is
//! invoked exactly once, on a worker thread, with a result the callback owns
//! and must free with `json_eval_free_result`. An unknown handle or bad
//! argument invokes the callback synchronously with the error.
//!
//! Cancellation is cooperative: `json_eval_cancel` makes the running call
//! fail with "Operation cancelled" at its next checkpoint.

use super::evaluation::validation_bytes;
use super::{json_bytes, opt_str, req_paths, req_str, set_last_error, FFIResult};
use crate::bridge::{dispatch, Registry};
use crate::cancel::CancellationToken;
use crate::engine::JsonEval;
use crate::error::{EvalError, Result};
use std::ffi::c_void;
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};

/// Completion callback: receives the caller's `user_data` and the result
pub type JsonEvalCallback = Option<unsafe extern "C" fn(user_data: *mut c_void, result: FFIResult)>;

struct Completion {
    callback: unsafe extern "C" fn(*mut c_void, FFIResult),
    user_data: *mut c_void,
}

// SAFETY: user_data is opaque to us and only handed back to the caller's
// callback, which the caller has declared safe to run on any thread
unsafe impl Send for Completion {}

impl Completion {
    fn complete(self, result: FFIResult) {
        // SAFETY: the callback was supplied by the caller for this purpose
        unsafe { (self.callback)(self.user_data, result) }
    }
}

fn submit<F>(handle: u64, callback: JsonEvalCallback, user_data: *mut c_void, prepared: Result<F>)
where
    F: FnOnce(&mut JsonEval, &CancellationToken) -> Result<Vec<u8>> + Send + 'static,
{
    let Some(callback) = callback else {
        set_last_error("callback is NULL");
        return;
    };
    let completion = Completion { callback, user_data };

    let instance = match prepared.and_then(|work| Ok((Registry::global().get(handle)?, work))) {
        Ok(found) => found,
        Err(e) => return completion.complete(FFIResult::error(&e)),
    };

    let (instance, work) = instance;
    drop(dispatch::spawn(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(|| instance.with(work)))
            .unwrap_or_else(|_| Err(EvalError::Logic("evaluation panicked".to_string())));
        completion.complete(FFIResult::from_result(result));
    }));
}

unsafe fn owned(p: *const c_char, name: &str) -> Result<Option<String>> {
    Ok(opt_str(p, name)?.map(str::to_string))
}

unsafe fn owned_req(p: *const c_char, name: &str) -> Result<String> {
    Ok(req_str(p, name)?.to_string())
}

/// Async [`json_eval_evaluate`](super::evaluation::json_eval_evaluate)
///
/// # Safety
/// `data` must be a valid NUL-terminated string; `context` may be NULL.
/// `callback` must be callable from any thread.
#[no_mangle]
pub unsafe extern "C" fn json_eval_evaluate_async(
    handle: u64,
    data: *const c_char,
    context: *const c_char,
    callback: JsonEvalCallback,
    user_data: *mut c_void,
) {
    let prepared = (|| -> Result<_> {
        let data = owned_req(data, "data")?;
        let context = owned(context, "context")?;
        Ok(move |eval: &mut JsonEval, token: &CancellationToken| -> Result<Vec<u8>> {
            eval.evaluate(&data, context.as_deref(), None, Some(token))?;
            Ok(Vec::new())
        })
    })();
    submit(handle, callback, user_data, prepared);
}

/// Async [`json_eval_validate`](super::evaluation::json_eval_validate)
///
/// # Safety
/// As [`json_eval_evaluate_async`].
#[no_mangle]
pub unsafe extern "C" fn json_eval_validate_async(
    handle: u64,
    data: *const c_char,
    context: *const c_char,
    callback: JsonEvalCallback,
    user_data: *mut c_void,
) {
    let prepared = (|| -> Result<_> {
        let data = owned_req(data, "data")?;
        let context = owned(context, "context")?;
        Ok(move |eval: &mut JsonEval, token: &CancellationToken| -> Result<Vec<u8>> {
            let result = eval.validate(&data, context.as_deref(), None, Some(token))?;
            validation_bytes(&result)
        })
    })();
    submit(handle, callback, user_data, prepared);
}

/// Async [`json_eval_evaluate_dependents`](super::evaluation::json_eval_evaluate_dependents)
///
/// # Safety
/// `changed_paths_json` must be a valid NUL-terminated string; `data` and
/// `context` may be NULL. `callback` must be callable from any thread.
#[no_mangle]
pub unsafe extern "C" fn json_eval_evaluate_dependents_async(
    handle: u64,
    changed_paths_json: *const c_char,
    data: *const c_char,
    context: *const c_char,
    re_evaluate: i32,
    callback: JsonEvalCallback,
    user_data: *mut c_void,
) {
    let prepared = (|| -> Result<_> {
        let changed = req_paths(changed_paths_json, "changed paths")?;
        let data = owned(data, "data")?;
        let context = owned(context, "context")?;
        Ok(move |eval: &mut JsonEval, token: &CancellationToken| -> Result<Vec<u8>> {
            let changes = eval.evaluate_dependents(
                &changed,
                data.as_deref(),
                context.as_deref(),
                re_evaluate != 0,
                Some(token),
            )?;
            json_bytes(&changes)
        })
    })();
    submit(handle, callback, user_data, prepared);
}

/// Async [`json_eval_evaluate_subform`](super::subforms::json_eval_evaluate_subform)
///
/// # Safety
/// `subform_path` and `data` must be valid NUL-terminated strings;
/// `context` may be NULL. `callback` must be callable from any thread.
#[no_mangle]
pub unsafe extern "C" fn json_eval_evaluate_subform_async(
    handle: u64,
    subform_path: *const c_char,
    data: *const c_char,
    context: *const c_char,
    callback: JsonEvalCallback,
    user_data: *mut c_void,
) {
    let prepared = (|| -> Result<_> {
        let subform = owned_req(subform_path, "subform path")?;
        let data = owned_req(data, "data")?;
        let context = owned(context, "context")?;
        Ok(move |eval: &mut JsonEval, token: &CancellationToken| -> Result<Vec<u8>> {
            eval.evaluate_subform(&subform, &data, context.as_deref(), None, Some(token))?;
            Ok(Vec::new())
        })
    })();
    submit(handle, callback, user_data, prepared);
}

/// Async [`json_eval_evaluate_dependents_subform`](super::subforms::json_eval_evaluate_dependents_subform)
///
/// # Safety
/// `subform_path` and `changed_paths_json` must be valid NUL-terminated
/// strings; `data` and `context` may be NULL. `callback` must be callable
/// from any thread.
#[no_mangle]
pub unsafe extern "C" fn json_eval_evaluate_dependents_subform_async(
    handle: u64,
    subform_path: *const c_char,
    changed_paths_json: *const c_char,
    data: *const c_char,
    context: *const c_char,
    re_evaluate: i32,
    callback: JsonEvalCallback,
    user_data: *mut c_void,
) {
    let prepared = (|| -> Result<_> {
        let subform = owned_req(subform_path, "subform path")?;
        let changed = req_paths(changed_paths_json, "changed paths")?;
        let data = owned(data, "data")?;
        let context = owned(context, "context")?;
        Ok(move |eval: &mut JsonEval, token: &CancellationToken| -> Result<Vec<u8>> {
            let changes = eval.evaluate_dependents_subform(
                &subform,
                &changed,
                data.as_deref(),
                context.as_deref(),
                re_evaluate != 0,
                Some(token),
            )?;
            json_bytes(&changes)
        })
    })();
    submit(handle, callback, user_data, prepared);
}
