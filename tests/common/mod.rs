//! Helpers for driving the C API from Rust tests
#![allow(dead_code)]

use json_eval::c_api::{json_eval_free_result, json_eval_free_string, json_eval_last_error, FFIResult};
use serde_json::Value;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

pub const SCHEMA: &str = r#"{
    "type": "object",
    "$params": {"rate": 2},
    "properties": {
        "name": {"type": "string", "rules": {"required": {"value": true, "message": "Name is required"}}},
        "qty": {"type": "number", "dependents": [
            {"$ref": "discount", "value": {"$evaluation": {"if": [{">=": [{"var": "$value"}, 10]}, 5, 0]}}}
        ]},
        "discount": {"type": "number"},
        "total": {"type": "number", "value": {"$evaluation": {"-": [{"*": [{"var": "qty"}, {"var": "$params.rate"}]}, {"var": "discount"}]}}},
        "riders": {
            "type": "array",
            "items": {"type": "object", "properties": {
                "sa": {"type": "number"},
                "premium": {"type": "number", "value": {"$evaluation": {"*": [{"var": "riders.sa"}, {"var": "$params.rate"}]}}}
            }}
        }
    }
}"#;

pub fn cstr(s: &str) -> CString {
    CString::new(s).unwrap()
}

/// Consume a result, returning its payload or its error message
pub fn take(result: FFIResult) -> Result<Vec<u8>, String> {
    let out = if result.success {
        assert!(result.error.is_null());
        let bytes = if result.data_len == 0 {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(result.data_ptr, result.data_len) }.to_vec()
        };
        Ok(bytes)
    } else {
        assert!(result.data_ptr.is_null());
        assert!(!result.error.is_null());
        Err(unsafe { CStr::from_ptr(result.error) }.to_string_lossy().into_owned())
    };
    unsafe { json_eval_free_result(result) };
    out
}

/// Consume a result and parse its JSON payload
pub fn take_json(result: FFIResult) -> Value {
    let bytes = take(result).expect("call failed");
    serde_json::from_slice(&bytes).expect("payload is not JSON")
}

/// Consume a result that must fail and return its message
pub fn take_err(result: FFIResult) -> String {
    take(result).expect_err("call unexpectedly succeeded")
}

/// The calling thread's last error, if any
pub fn last_error() -> Option<String> {
    let p = json_eval_last_error();
    if p.is_null() {
        return None;
    }
    let msg = unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned();
    unsafe { json_eval_free_string(p) };
    Some(msg)
}

pub fn new_handle(schema: &str) -> u64 {
    let schema = cstr(schema);
    let handle = unsafe { json_eval::c_api::lifecycle::json_eval_new(schema.as_ptr(), ptr::null(), ptr::null()) };
    assert_ne!(handle, 0, "construction failed: {:?}", last_error());
    handle
}

pub fn null() -> *const c_char {
    ptr::null()
}
