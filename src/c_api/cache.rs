//! Per-instance evaluation cache controls

use super::{json_bytes, with_instance, FFIResult};

/// Cache counters: `{"hits", "misses", "entries"}`
#[no_mangle]
pub extern "C" fn json_eval_cache_stats(handle: u64) -> FFIResult {
    with_instance(handle, |eval, _| json_bytes(&eval.cache_stats()))
}

/// Drop cached results for the instance and its subforms
#[no_mangle]
pub extern "C" fn json_eval_clear_cache(handle: u64) -> FFIResult {
    with_instance(handle, |eval, _| {
        eval.clear_cache();
        Ok(Vec::new())
    })
}

/// Number of cached results, as a decimal string
#[no_mangle]
pub extern "C" fn json_eval_cache_len(handle: u64) -> FFIResult {
    with_instance(handle, |eval, _| Ok(eval.cache_len().to_string().into_bytes()))
}

/// Turn the evaluation cache on
#[no_mangle]
pub extern "C" fn json_eval_enable_cache(handle: u64) -> FFIResult {
    with_instance(handle, |eval, _| {
        eval.enable_cache();
        Ok(Vec::new())
    })
}

/// Turn the evaluation cache off and drop its entries
#[no_mangle]
pub extern "C" fn json_eval_disable_cache(handle: u64) -> FFIResult {
    with_instance(handle, |eval, _| {
        eval.disable_cache();
        Ok(Vec::new())
    })
}

/// `true` or `false` as JSON
#[no_mangle]
pub extern "C" fn json_eval_is_cache_enabled(handle: u64) -> FFIResult {
    with_instance(handle, |eval, _| json_bytes(&eval.is_cache_enabled()))
}
