//! Subform isolation and mirrors of the root operations

use json_eval::{EvalError, JsonEval, ReturnFormat};
use serde_json::json;

fn policy() -> JsonEval {
    let schema = json!({
        "type": "object",
        "$params": {"factor": 3},
        "properties": {
            "holder": {"type": "string"},
            "riders": {
                "type": "array",
                "title": "Riders",
                "items": {
                    "type": "object",
                    "properties": {
                        "code": {"type": "string", "rules": {"required": {"value": true, "message": "Code is required"}}},
                        "sa": {"type": "number", "dependents": [
                            {"$ref": "riders.band", "value": {"$evaluation": {"if": [{">": [{"var": "$value"}, 100]}, "high", "low"]}}}
                        ]},
                        "band": {"type": "string"},
                        "premium": {"type": "number", "value": {"$evaluation": {"*": [{"var": "riders.sa"}, {"var": "$params.factor"}]}}}
                    }
                }
            }
        }
    });
    JsonEval::new(&schema.to_string(), None, None).unwrap()
}

#[test]
fn test_subform_addressing() {
    let eval = policy();
    assert_eq!(eval.get_subform_paths(), vec!["#/properties/riders".to_string()]);
    for p in ["riders", "#/riders", "#/properties/riders"] {
        assert!(eval.has_subform(p), "{}", p);
    }
    assert!(!eval.has_subform("holder"));
}

#[test]
fn test_subform_evaluation_is_isolated_from_root() {
    let mut eval = policy();
    eval.evaluate(r#"{"holder": "Ann"}"#, None, None, None).unwrap();
    eval.evaluate_subform("riders", r#"{"riders": {"code": "R1", "sa": 10}}"#, None, None, None)
        .unwrap();

    assert_eq!(eval.data(), json!({"holder": "Ann"}));
    assert_eq!(
        eval.get_schema_value_subform("riders").unwrap(),
        json!({"riders": {"premium": 30}})
    );

    let sub = eval.get_evaluated_schema_subform("riders", true).unwrap();
    assert_eq!(sub["riders"]["title"], json!("Riders"));
    assert_eq!(sub["$params"]["factor"], json!(3));
    assert!(eval.get_evaluated_schema_without_params_subform("riders", true).unwrap().get("$params").is_none());
}

#[test]
fn test_subform_validation() {
    let mut eval = policy();
    let result = eval
        .validate_subform("riders", r#"{"riders": {"sa": 1}}"#, None, None, None)
        .unwrap();
    assert!(result.has_error);
    assert_eq!(result.errors["riders.code"].message, "Code is required");

    let ok = eval
        .validate_subform("riders", r#"{"riders": {"code": "X"}}"#, None, None, None)
        .unwrap();
    assert!(!ok.has_error);
}

#[test]
fn test_subform_dependents() {
    let mut eval = policy();
    let changes = eval
        .evaluate_dependents_subform(
            "#/riders",
            &["riders.sa".to_string()],
            Some(r#"{"riders": {"sa": 500}}"#),
            None,
            true,
            None,
        )
        .unwrap();
    assert_eq!(changes[0]["$ref"], json!("riders.band"));
    assert_eq!(changes[0]["value"], json!("high"));
    assert_eq!(
        eval.get_evaluated_schema_by_path_subform("riders", "riders.premium.value", true)
            .unwrap(),
        Some(json!(1500))
    );
}

#[test]
fn test_subform_getters() {
    let mut eval = policy();
    eval.evaluate_subform("riders", r#"{"riders": {"sa": 2}}"#, None, None, None)
        .unwrap();
    let paths = vec!["riders.premium.value".to_string(), "riders.nope".to_string()];
    assert_eq!(
        eval.get_evaluated_schema_by_paths_subform("riders", &paths, true, ReturnFormat::Array)
            .unwrap(),
        json!([6, null])
    );
    let raw = eval.get_schema_by_path_subform("riders", "riders.premium").unwrap().unwrap();
    assert!(raw["value"].get("$evaluation").is_some());
    assert_eq!(
        eval.get_schema_by_paths_subform("riders", &["riders.sa.type".to_string()], ReturnFormat::Flat)
            .unwrap(),
        json!({"riders.sa.type": "number"})
    );
}

#[test]
fn test_unknown_subform_errors() {
    let mut eval = policy();
    let err = eval
        .evaluate_subform("pets", "{}", None, None, None)
        .unwrap_err();
    assert_eq!(err, EvalError::SubformNotFound("pets".into()));
    assert!(eval.get_evaluated_schema_subform("pets", true).is_err());
    assert!(eval.resolve_layout_subform("pets", false, None).is_err());
}

#[test]
fn test_cache_controls_reach_subforms() {
    let mut eval = policy();
    eval.disable_cache();
    assert!(!eval.subform("riders").unwrap().is_cache_enabled());
    eval.enable_cache();
    assert!(eval.subform("riders").unwrap().is_cache_enabled());
    eval.set_timezone_offset(Some(-300));
    assert_eq!(eval.subform("riders").unwrap().timezone_offset(), Some(-300));
}
