//! Parsed-schema cache behaviour

use json_eval::{EvalError, JsonEval, ParsedSchemaCache};
use serde_json::json;
use std::sync::Arc;
use std::thread;

const SCHEMA: &str = r#"{
    "type": "object",
    "properties": {
        "a": {"type": "number"},
        "double": {"type": "number", "value": {"$evaluation": {"*": [{"var": "a"}, 2]}}}
    }
}"#;

#[test]
fn test_insert_contains_remove() {
    let cache = ParsedSchemaCache::new();
    assert!(cache.is_empty());
    cache.insert_json("quote", SCHEMA).unwrap();
    assert!(cache.contains("quote"));
    assert_eq!(cache.len(), 1);

    assert!(cache.remove("quote"));
    assert!(!cache.remove("quote"));
    assert!(!cache.contains("quote"));
}

#[test]
fn test_invalid_schema_is_not_stored() {
    let cache = ParsedSchemaCache::new();
    assert!(cache.insert_json("bad", "{").is_err());
    assert!(!cache.contains("bad"));
}

#[test]
fn test_instances_share_parsed_schema() {
    let cache = ParsedSchemaCache::new();
    cache.insert_json("quote", SCHEMA).unwrap();

    let mut first = JsonEval::new_from_cache_in(&cache, "quote", None, None).unwrap();
    let mut second = JsonEval::new_from_cache_in(&cache, "quote", None, None).unwrap();
    assert!(Arc::ptr_eq(first.parsed_schema(), second.parsed_schema()));

    first.evaluate(r#"{"a": 1}"#, None, None, None).unwrap();
    second.evaluate(r#"{"a": 5}"#, None, None, None).unwrap();
    assert_eq!(first.data()["double"], json!(2));
    assert_eq!(second.data()["double"], json!(10));
}

#[test]
fn test_removing_entry_keeps_live_instances() {
    let cache = ParsedSchemaCache::new();
    cache.insert_json("quote", SCHEMA).unwrap();
    let mut eval = JsonEval::new_from_cache_in(&cache, "quote", None, None).unwrap();
    cache.clear();

    eval.evaluate(r#"{"a": 4}"#, None, None, None).unwrap();
    assert_eq!(eval.data()["double"], json!(8));
    assert_eq!(
        JsonEval::new_from_cache_in(&cache, "quote", None, None).unwrap_err(),
        EvalError::CacheMiss("quote".into())
    );
}

#[test]
fn test_global_cache_identity() {
    let a = ParsedSchemaCache::global();
    let b = ParsedSchemaCache::global();
    assert!(a.ptr_eq(b));
    assert!(!a.ptr_eq(&ParsedSchemaCache::new()));

    a.insert_json("cache_tests.global", SCHEMA).unwrap();
    let eval = JsonEval::new_from_cache("cache_tests.global", None, None).unwrap();
    assert_eq!(eval.get_schema_by_path("a"), Some(json!({"type": "number"})));
    assert!(a.remove("cache_tests.global"));
}

#[test]
fn test_stats_and_keys_follow_insertion_order() {
    let cache = ParsedSchemaCache::new();
    cache.insert_json("b", SCHEMA).unwrap();
    cache.insert_json("a", SCHEMA).unwrap();
    assert_eq!(cache.keys(), vec!["b".to_string(), "a".to_string()]);
    let stats = serde_json::to_value(cache.stats()).unwrap();
    assert_eq!(stats, json!({"entryCount": 2, "keys": ["b", "a"]}));
}

#[test]
fn test_concurrent_inserts() {
    let cache = ParsedSchemaCache::new();
    let workers: Vec<_> = (0..8)
        .map(|i| {
            let cache = cache.clone();
            thread::spawn(move || cache.insert_json(format!("k{}", i), SCHEMA).unwrap())
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(cache.len(), 8);
}
