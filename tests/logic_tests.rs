//! JSON Logic operators and the compiled-logic store

use json_eval::logic::{compile, CompiledLogicStore, EvalEnv};
use json_eval::JsonEval;
use proptest::prelude::*;
use serde_json::{json, Value};

fn eval(expr: Value, data: Value) -> Value {
    compile(&expr).unwrap().evaluate(&data, &EvalEnv::default()).unwrap()
}

#[test]
fn test_arithmetic_and_float_cleanup() {
    assert_eq!(eval(json!({"+": [0.1, 0.2]}), json!({})), json!(0.3));
    assert_eq!(eval(json!({"*": [3, "4"]}), json!({})), json!(12));
    assert_eq!(eval(json!({"-": [5]}), json!({})), json!(-5));
    assert_eq!(eval(json!({"/": [1, 0]}), json!({})), Value::Null);
    assert_eq!(eval(json!({"%": [7, 3]}), json!({})), json!(1));
    assert_eq!(eval(json!({"max": [1, 9, 3]}), json!({})), json!(9));
}

#[test]
fn test_var_defaults_and_missing() {
    let data = json!({"a": {"b": 2}, "list": [10, 20]});
    assert_eq!(eval(json!({"var": "a.b"}), data.clone()), json!(2));
    assert_eq!(eval(json!({"var": "list.1"}), data.clone()), json!(20));
    assert_eq!(eval(json!({"var": ["nope", 7]}), data.clone()), json!(7));
    assert_eq!(eval(json!({"missing": ["a.b", "c"]}), data), json!(["c"]));
}

#[test]
fn test_control_flow_and_strings() {
    let data = json!({"age": 30, "name": "ann"});
    assert_eq!(
        eval(json!({"if": [{"<": [{"var": "age"}, 18]}, "minor", "adult"]}), data.clone()),
        json!("adult")
    );
    assert_eq!(eval(json!({"and": [true, "x", 0]}), data.clone()), json!(0));
    assert_eq!(eval(json!({"or": [false, "", "y"]}), data.clone()), json!("y"));
    assert_eq!(eval(json!({"cat": ["Hi ", {"upper": {"var": "name"}}]}), data.clone()), json!("Hi ANN"));
    assert_eq!(eval(json!({"in": ["nn", {"var": "name"}]}), data), json!(true));
}

#[test]
fn test_array_operators() {
    let data = json!({"xs": [1, 2, 3, 4]});
    assert_eq!(
        eval(json!({"map": [{"var": "xs"}, {"*": [{"var": ""}, 10]}]}), data.clone()),
        json!([10, 20, 30, 40])
    );
    assert_eq!(
        eval(json!({"filter": [{"var": "xs"}, {">": [{"var": ""}, 2]}]}), data.clone()),
        json!([3, 4])
    );
    assert_eq!(
        eval(
            json!({"reduce": [{"var": "xs"}, {"+": [{"var": "current"}, {"var": "accumulator"}]}, 0]}),
            data.clone()
        ),
        json!(10)
    );
    assert_eq!(eval(json!({"some": [{"var": "xs"}, {"==": [{"var": ""}, 3]}]}), data), json!(true));
}

#[test]
fn test_store_ids_are_never_zero() {
    let store = CompiledLogicStore::new();
    let ids: Vec<u64> = (0..5).map(|i| store.compile(&json!({"+": [i, 1]})).unwrap()).collect();
    assert!(ids.iter().all(|&id| id != 0));
    let mut unique = ids.clone();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());
}

#[test]
fn test_today_respects_timezone_offset() {
    let logic = compile(&json!({"today": []})).unwrap();
    let utc = logic.evaluate(&json!({}), &EvalEnv::default()).unwrap();
    let shifted = logic
        .evaluate(&json!({}), &EvalEnv { timezone_offset: Some(14 * 60) })
        .unwrap();
    assert!(utc.is_string());
    assert!(shifted.is_string());
}

proptest! {
    #[test]
    fn prop_stored_logic_matches_one_shot(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
        let engine = JsonEval::new(r#"{"type": "object", "properties": {}}"#, None, None).unwrap();
        let expr = r#"{"+": [{"var": "a"}, {"*": [{"var": "b"}, 3]}]}"#;
        let data = json!({"a": a, "b": b}).to_string();

        let id = engine.compile_logic(expr).unwrap();
        prop_assert_ne!(id, 0);
        let stored = engine.run_logic(id, Some(&data), None).unwrap();
        let once = engine.compile_and_run_logic(expr, Some(&data), None).unwrap();
        prop_assert_eq!(&stored, &once);
        prop_assert_eq!(stored, json!(a + b * 3));
    }

    #[test]
    fn prop_comparison_agrees_with_integers(a in any::<i32>(), b in any::<i32>()) {
        let out = eval(json!({"<": [a, b]}), json!({}));
        prop_assert_eq!(out, json!(a < b));
    }
}
