//! End-to-end engine behaviour through the public Rust API

use json_eval::{EvalConfig, EvalError, JsonEval, ReturnFormat};
use serde_json::{json, Value};

const QUOTE_SCHEMA: &str = r#"{
    "type": "object",
    "$params": {
        "baseRate": 0.02,
        "loading": {"$evaluation": {"if": [{"==": [{"var": "$context.channel"}, "agent"]}, 1.1, 1]}}
    },
    "properties": {
        "insured": {
            "type": "object",
            "properties": {
                "name": {"type": "string", "rules": {"required": {"value": true, "message": "Name is required"}}},
                "age": {"type": "number", "rules": {"minValue": {"value": 18, "message": "Too young"}}}
            }
        },
        "sumAssured": {"type": "number"},
        "premium": {
            "type": "number",
            "value": {"$evaluation": {"*": [{"var": "sumAssured"}, {"var": "$params.baseRate"}, {"var": "$params.loading"}]}}
        },
        "summary": {
            "type": "string",
            "value": {"$evaluation": {"cat": [{"var": "insured.name"}, ": ", {"var": "premium"}]}}
        }
    }
}"#;

fn quote() -> JsonEval {
    JsonEval::new(QUOTE_SCHEMA, None, None).unwrap()
}

fn contains_evaluation(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.contains_key("$evaluation") || map.values().any(contains_evaluation),
        Value::Array(items) => items.iter().any(contains_evaluation),
        _ => false,
    }
}

#[test]
fn test_plain_schema_evaluates_to_itself() {
    let schema = r#"{"type": "object", "properties": {"name": {"type": "string"}}}"#;
    let mut eval = JsonEval::new(schema, None, None).unwrap();
    eval.evaluate(r#"{"name": "x"}"#, None, None, None).unwrap();

    let evaluated = eval.get_evaluated_schema(false);
    assert!(!contains_evaluation(&evaluated));
    assert_eq!(evaluated, serde_json::from_str::<Value>(schema).unwrap());
    assert_eq!(eval.data(), json!({"name": "x"}));
}

#[test]
fn test_evaluated_schema_has_no_evaluation_nodes() {
    let mut eval = quote();
    eval.evaluate(
        r#"{"insured": {"name": "Ann", "age": 30}, "sumAssured": 1000}"#,
        Some(r#"{"channel": "agent"}"#),
        None,
        None,
    )
    .unwrap();

    let evaluated = eval.get_evaluated_schema(true);
    assert!(!contains_evaluation(&evaluated));
    assert_eq!(evaluated["$params"]["loading"], json!(1.1));
    assert_eq!(evaluated["properties"]["premium"]["value"], json!(22));
    assert_eq!(evaluated["properties"]["summary"]["value"], json!("Ann: 22"));

    // the schema as supplied is untouched
    let raw = eval.get_schema_by_path("premium").unwrap();
    assert!(raw["value"].get("$evaluation").is_some());
}

#[test]
fn test_context_changes_params() {
    let mut eval = quote();
    eval.evaluate(r#"{"sumAssured": 1000}"#, Some(r#"{"channel": "direct"}"#), None, None)
        .unwrap();
    assert_eq!(eval.data()["premium"], json!(20));
    assert_eq!(eval.context(), &json!({"channel": "direct"}));
}

#[test]
fn test_without_params_and_schema_value() {
    let mut eval = quote();
    eval.evaluate(r#"{"insured": {"name": "Bo"}, "sumAssured": 500}"#, None, None, None)
        .unwrap();
    let without = eval.get_evaluated_schema_without_params(true);
    assert!(without.get("$params").is_none());
    assert_eq!(
        eval.get_schema_value(),
        json!({"premium": 10, "summary": "Bo: 10"})
    );
}

#[test]
fn test_by_paths_formats() {
    let mut eval = quote();
    eval.evaluate(r#"{"sumAssured": 100}"#, None, None, None).unwrap();
    let paths = vec!["premium.value".to_string(), "missing".to_string()];
    assert_eq!(
        eval.get_evaluated_schema_by_paths(&paths, true, ReturnFormat::Array),
        json!([2, null])
    );
    assert_eq!(
        eval.get_evaluated_schema_by_paths(&paths, true, ReturnFormat::Flat),
        json!({"premium.value": 2})
    );
    assert_eq!(eval.get_evaluated_schema_by_path("missing", true), None);
}

#[test]
fn test_validation_messages() {
    let mut eval = quote();
    let result = eval
        .validate(r#"{"insured": {"age": 12}, "sumAssured": 100}"#, None, None, None)
        .unwrap();
    assert!(result.has_error);
    assert_eq!(result.errors["insured.name"].message, "Name is required");
    assert_eq!(result.errors["insured.age"].rule_type, "minValue");

    let only_age = eval
        .validate(
            r#"{"insured": {"age": 40}, "sumAssured": 100}"#,
            None,
            Some(&["insured.age".to_string()]),
            None,
        )
        .unwrap();
    assert!(!only_age.has_error);
}

#[test]
fn test_msgpack_schema_matches_json() {
    let value: Value = serde_json::from_str(QUOTE_SCHEMA).unwrap();
    let bytes = rmp_serde::to_vec_named(&value).unwrap();
    let mut from_msgpack = JsonEval::new_from_msgpack(&bytes, None, None).unwrap();
    let mut from_json = quote();

    let data = r#"{"insured": {"name": "Cy"}, "sumAssured": 300}"#;
    from_msgpack.evaluate(data, None, None, None).unwrap();
    from_json.evaluate(data, None, None, None).unwrap();
    assert_eq!(from_msgpack.get_evaluated_schema(true), from_json.get_evaluated_schema(true));
}

#[test]
fn test_config_disables_cache() {
    let config = EvalConfig {
        cache_enabled: false,
        ..EvalConfig::default()
    };
    let mut eval = quote().with_config(&config);
    eval.evaluate(r#"{"sumAssured": 1}"#, None, None, None).unwrap();
    eval.evaluate(r#"{"sumAssured": 1}"#, None, None, None).unwrap();
    assert!(!eval.is_cache_enabled());
    assert_eq!(eval.cache_stats().hits, 0);
    assert_eq!(eval.cache_len(), 0);
}

#[test]
fn test_bad_inputs_are_errors() {
    assert!(matches!(JsonEval::new("{", None, None), Err(EvalError::Parse(_))));
    let mut eval = quote();
    assert!(matches!(eval.evaluate("not json", None, None, None), Err(EvalError::Parse(_))));
    assert!(eval.compile_logic(r#"{"no_such_op": [1]}"#).is_err());
}

#[test]
fn test_missing_tracks_its_keys() {
    let schema = r#"{"properties": {
        "a": {"type": "number"},
        "gaps": {"value": {"$evaluation": {"missing": ["a"]}}}
    }}"#;
    let mut eval = JsonEval::new(schema, None, None).unwrap();
    eval.evaluate(r#"{"a": 1}"#, None, None, None).unwrap();
    assert_eq!(eval.data()["gaps"], json!([]));
    eval.evaluate("{}", None, None, None).unwrap();
    assert_eq!(eval.data()["gaps"], json!(["a"]));
}

#[test]
fn test_computed_var_paths_are_not_served_stale() {
    let schema = r#"{"properties": {
        "tier": {"type": "string"},
        "prices": {"type": "object"},
        "price": {"value": {"$evaluation": {"var": {"cat": ["prices.", {"var": "tier"}]}}}}
    }}"#;
    let mut eval = JsonEval::new(schema, None, None).unwrap();
    eval.evaluate(r#"{"tier": "gold", "prices": {"gold": 10}}"#, None, None, None)
        .unwrap();
    assert_eq!(eval.data()["price"], json!(10));
    eval.evaluate(r#"{"tier": "gold", "prices": {"gold": 99}}"#, None, None, None)
        .unwrap();
    assert_eq!(eval.data()["price"], json!(99));
}

#[test]
fn test_path_filter_skips_sibling_prefixes() {
    let schema = r#"{"properties": {
        "a": {"value": {"$evaluation": {"+": [1, 1]}}},
        "ab": {"value": {"$evaluation": {"+": [2, 2]}}}
    }}"#;
    let mut eval = JsonEval::new(schema, None, None).unwrap();
    eval.evaluate("{}", None, Some(&["a".to_string()]), None).unwrap();
    let evaluated = eval.get_evaluated_schema(true);
    assert_eq!(evaluated["properties"]["a"]["value"], json!(2));
    assert!(evaluated["properties"]["ab"]["value"].get("$evaluation").is_some());
}

const SCHEDULE_SCHEMA: &str = r#"{
    "$params": {
        "schedule": {
            "$datas": [{"name": "annual", "data": {"$evaluation": {"*": [{"var": "premium"}, 12]}}}],
            "$skip": {"$evaluation": {"==": [{"var": "plan"}, "none"]}},
            "$table": [
                {"year": 0, "paid": 0},
                {"$repeat": [1, {"$evaluation": {"var": "term"}}, {
                    "year": {"$evaluation": {"var": "$iteration"}},
                    "paid": {"$evaluation": {"*": [{"var": "annual"}, {"var": "$year"}]}}
                }]}
            ]
        }
    },
    "properties": {
        "plan": {"type": "string"},
        "premium": {"type": "number"},
        "term": {"type": "number", "rules": {"required": true}},
        "totalPaid": {"value": {"$evaluation": {"MAXAT": [{"var": "$params.schedule"}, "paid"]}}}
    }
}"#;

#[test]
fn test_tables_feed_later_evaluations() {
    let mut eval = JsonEval::new(SCHEDULE_SCHEMA, None, None).unwrap();
    eval.evaluate(r#"{"plan": "basic", "premium": 10, "term": 2}"#, None, None, None)
        .unwrap();

    let evaluated = eval.get_evaluated_schema(true);
    assert_eq!(
        evaluated["$params"]["schedule"],
        json!([
            {"year": 0, "paid": 0},
            {"year": 1, "paid": 120},
            {"year": 2, "paid": 240}
        ])
    );
    assert_eq!(eval.data()["totalPaid"], json!(240));
    assert!(eval.data().get("annual").is_none(), "table bindings stay in the table");

    eval.evaluate(r#"{"plan": "none", "premium": 10, "term": 2}"#, None, None, None)
        .unwrap();
    assert_eq!(eval.get_evaluated_schema(true)["$params"]["schedule"], json!([]));

    eval.evaluate(r#"{"plan": "basic", "premium": 10}"#, None, None, None)
        .unwrap();
    assert_eq!(eval.get_evaluated_schema(true)["$params"]["schedule"], json!([]));
}

#[test]
fn test_unchanged_table_inputs_hit_the_cache() {
    let mut eval = JsonEval::new(SCHEDULE_SCHEMA, None, None).unwrap();
    let data = r#"{"plan": "basic", "premium": 10, "term": 3}"#;
    eval.evaluate(data, None, None, None).unwrap();
    eval.evaluate(data, None, None, None).unwrap();
    assert_eq!(eval.cache_stats().hits, 2);
    assert_eq!(eval.data()["totalPaid"], json!(360));
}
