//! Dependency-tracked re-evaluation
//!
//! When a field changes, its declared dependents are recomputed and any
//! dependent that actually changes is fed back into the queue. The queue is
//! processed breadth-first, so changes are reported level by level in schema
//! declaration order.

use super::{parse_json, parse_optional, JsonEval};
use crate::cancel::CancellationToken;
use crate::error::{EvalError, Result};
use crate::logic::number_value;
use crate::path;
use crate::schema::{DependentAction, ParsedSchema};
use indexmap::IndexSet;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

const VALUE_KEY: &str = "$value";
const REF_VALUE_KEY: &str = "$refValue";

/// Queue entry: schema pointer and whether it was reached through another dependent
type Pending = (String, bool);

fn clean_number(value: Value) -> Value {
    match &value {
        Value::Number(n) => n.as_f64().map_or(value.clone(), number_value),
        _ => value,
    }
}

fn is_blank(v: &Value) -> bool {
    v.is_null() || v.as_str() == Some("")
}

impl JsonEval {
    /// Propagate changes from `changed_paths` through declared dependents
    ///
    /// `data` replaces the current document first, together with `context`
    /// (an empty object when omitted). `context` alone replaces only the
    /// context.
    /// Returns the ordered list of changes applied. With `re_evaluate`, the
    /// whole schema is re-evaluated afterwards and read-only and hidden
    /// fields are reconciled, which may queue further dependents.
    pub fn evaluate_dependents(
        &mut self,
        changed_paths: &[String],
        data: Option<&str>,
        context: Option<&str>,
        re_evaluate: bool,
        token: Option<&CancellationToken>,
    ) -> Result<Value> {
        if let Some(t) = token {
            t.check()?;
        }
        if let Some(data) = data {
            let data = parse_json(data)?;
            self.replace_data(data, parse_optional(context)?);
        } else if let Some(ctx) = parse_optional(context)? {
            if let Value::Object(scope) = &mut self.scope {
                scope.insert(super::CONTEXT_KEY.to_string(), ctx);
            }
        }

        let parsed = Arc::clone(&self.parsed);
        let mut queue: VecDeque<Pending> = changed_paths
            .iter()
            .map(|p| (path::resolve_schema_pointer(&parsed.schema, p), false))
            .collect();
        let mut processed = IndexSet::new();
        let mut changes = Vec::new();

        self.drain_queue(&parsed, &mut queue, &mut processed, &mut changes, token)?;

        if re_evaluate {
            // values written above bypassed the cache's input tracking
            self.eval_cache.clear();
            self.evaluate_internal(None, token)?;

            self.reconcile_readonly(&parsed, &mut queue, &mut changes);
            self.drain_queue(&parsed, &mut queue, &mut processed, &mut changes, token)?;

            self.reconcile_hidden(&parsed, &mut queue, &mut changes);
            self.drain_queue(&parsed, &mut queue, &mut processed, &mut changes, token)?;
        }

        debug!(changed = changed_paths.len(), emitted = changes.len(), "evaluated dependents");
        Ok(Value::Array(changes))
    }

    /// Single-path convenience form
    pub fn evaluate_dependent(
        &mut self,
        changed_path: &str,
        data: Option<&str>,
        context: Option<&str>,
    ) -> Result<Value> {
        self.evaluate_dependents(&[changed_path.to_string()], data, context, false, None)
    }

    fn drain_queue(
        &mut self,
        parsed: &ParsedSchema,
        queue: &mut VecDeque<Pending>,
        processed: &mut IndexSet<String>,
        changes: &mut Vec<Value>,
        token: Option<&CancellationToken>,
    ) -> Result<()> {
        while let Some((current, transitive)) = queue.pop_front() {
            if let Some(t) = token {
                if t.is_cancelled() {
                    return Err(EvalError::Cancelled);
                }
            }
            if !processed.insert(current.clone()) {
                continue;
            }
            let Some(items) = parsed.dependents_of(&current) else {
                continue;
            };

            let current_data = path::data_pointer(&current);
            let mut current_value = self.scope.pointer(&current_data).cloned().unwrap_or(Value::Null);

            for item in items {
                let data_ptr = path::data_pointer(&item.ref_path);
                let ref_value = self.scope.pointer(&data_ptr).cloned().unwrap_or(Value::Null);

                let mut change = Map::new();
                change.insert("$ref".to_string(), Value::String(path::dotted(&data_ptr)));
                if let Some(field) = self.evaluated_schema.pointer(&path::to_json_pointer(&item.ref_path)) {
                    change.insert("$field".to_string(), field.clone());
                }
                change.insert("$parentField".to_string(), self.parent_field(&item.ref_path));
                change.insert("transitive".to_string(), Value::Bool(transitive));

                let mut changed = false;

                if let Some(action) = &item.clear {
                    let should_clear = self.run_action(action, &current_value, &ref_value)?;
                    // Only a literal `true` clears; truthy strings and numbers do not
                    if should_clear == Value::Bool(true) {
                        if data_ptr == current_data {
                            current_value = Value::Null;
                        }
                        path::set_or_warn(&mut self.scope, &data_ptr, Value::Null);
                        change.insert("clear".to_string(), Value::Bool(true));
                        changed = true;
                    }
                }

                if let Some(action) = &item.value {
                    let computed = clean_number(self.run_action(action, &current_value, &ref_value)?);
                    if !computed.is_null() && computed != ref_value {
                        if data_ptr == current_data {
                            current_value = computed.clone();
                        }
                        path::set_or_warn(&mut self.scope, &data_ptr, computed.clone());
                        change.insert("value".to_string(), computed);
                        changed = true;
                    }
                }

                if changed {
                    changes.push(Value::Object(change));
                    queue.push_back((item.ref_path.clone(), true));
                }
            }
        }
        Ok(())
    }

    fn run_action(&mut self, action: &DependentAction, value: &Value, ref_value: &Value) -> Result<Value> {
        let logic = match action {
            DependentAction::Static(v) => return Ok(v.clone()),
            DependentAction::Logic(logic) => logic,
        };
        let Value::Object(scope) = &mut self.scope else {
            return logic.evaluate(&self.scope, &self.env);
        };
        scope.insert(VALUE_KEY.to_string(), value.clone());
        scope.insert(REF_VALUE_KEY.to_string(), ref_value.clone());
        let result = logic.evaluate(&self.scope, &self.env);
        if let Value::Object(scope) = &mut self.scope {
            scope.remove(VALUE_KEY);
            scope.remove(REF_VALUE_KEY);
        }
        result
    }

    /// Owning object of a field, without its `properties` and `$layout`
    fn parent_field(&self, schema_pointer: &str) -> Value {
        let parent = path::parent_field_pointer(schema_pointer);
        let mut node = self
            .evaluated_schema
            .pointer(&path::to_json_pointer(&parent))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        if let Value::Object(map) = &mut node {
            map.remove("properties");
            map.remove("$layout");
        }
        node
    }

    /// Force disabled fields back to their schema value
    fn reconcile_readonly(&mut self, parsed: &ParsedSchema, queue: &mut VecDeque<Pending>, changes: &mut Vec<Value>) {
        for field_path in &parsed.readonly_fields {
            let Some(Value::Object(field)) = self.evaluated_schema.pointer(&path::to_json_pointer(field_path)) else {
                continue;
            };
            let disabled = field.get("condition").and_then(|c| c.get("disabled")) == Some(&Value::Bool(true));
            let skip = field
                .get("config")
                .and_then(|c| c.get("all"))
                .and_then(|a| a.get("skipReadOnlyValue"))
                == Some(&Value::Bool(true));
            if !disabled || skip {
                continue;
            }
            let Some(schema_value) = field.get("value").cloned() else {
                continue;
            };

            let data_ptr = path::data_pointer(field_path);
            let current = self.scope.pointer(&data_ptr).cloned().unwrap_or(Value::Null);
            if current != schema_value {
                path::set_or_warn(&mut self.scope, &data_ptr, schema_value.clone());
                queue.push_back((field_path.clone(), true));
            }

            let mut change = Map::new();
            change.insert("$ref".to_string(), Value::String(path::dotted(&data_ptr)));
            change.insert("$readonly".to_string(), Value::Bool(true));
            change.insert("value".to_string(), schema_value);
            changes.push(Value::Object(change));
        }
    }

    /// Clear fields that are hidden but still hold a value
    ///
    /// Clearing a field re-checks the hidden condition of every field whose
    /// condition reads it, so hiding cascades through chains of conditions.
    fn reconcile_hidden(&mut self, parsed: &ParsedSchema, queue: &mut VecDeque<Pending>, changes: &mut Vec<Value>) {
        let mut pending: VecDeque<String> = parsed
            .hidden_fields
            .iter()
            .filter(|field_path| self.is_hidden_with_value(field_path))
            .cloned()
            .collect();
        let mut cleared = IndexSet::new();

        while let Some(field_path) = pending.pop_front() {
            if !cleared.insert(field_path.clone()) {
                continue;
            }
            let data_ptr = path::data_pointer(&field_path);
            path::set_or_warn(&mut self.scope, &data_ptr, Value::Null);

            let mut change = Map::new();
            change.insert("$ref".to_string(), Value::String(path::dotted(&data_ptr)));
            change.insert("$hidden".to_string(), Value::Bool(true));
            change.insert("clear".to_string(), Value::Bool(true));
            changes.push(Value::Object(change));
            queue.push_back((field_path.clone(), true));

            for referencing in parsed.fields_hidden_by(&data_ptr) {
                if cleared.contains(referencing) || pending.contains(referencing) {
                    continue;
                }
                if !self.has_value(referencing) {
                    continue;
                }
                let Some(logic) = parsed
                    .evaluations
                    .get(&format!("{}/condition/hidden", referencing))
                    .and_then(|ev| ev.logic())
                else {
                    continue;
                };
                match logic.evaluate(&self.scope, &self.env) {
                    Ok(Value::Bool(true)) => {
                        debug!(field = %referencing, cleared_by = %field_path, "cascading hide");
                        pending.push_back(referencing.clone());
                    }
                    Ok(_) => {}
                    Err(e) => debug!(field = %referencing, error = %e, "hidden condition failed"),
                }
            }
        }
    }

    fn has_value(&self, field_path: &str) -> bool {
        self.scope
            .pointer(&path::data_pointer(field_path))
            .is_some_and(|v| !is_blank(v))
    }

    fn is_hidden_with_value(&self, field_path: &str) -> bool {
        let Some(Value::Object(field)) = self.evaluated_schema.pointer(&path::to_json_pointer(field_path)) else {
            return false;
        };
        let hidden = field.get("condition").and_then(|c| c.get("hidden")) == Some(&Value::Bool(true));
        let keep = field
            .get("config")
            .and_then(|c| c.get("all"))
            .and_then(|a| a.get("keepHiddenValue"))
            == Some(&Value::Bool(true));
        hidden && !keep && self.has_value(field_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dependent_sees_changed_value() {
        let schema = json!({
            "properties": {
                "first": {"type": "string", "dependents": [
                    {"$ref": "greeting", "value": {"$evaluation": {"cat": ["Hi ", {"var": "$value"}]}}}
                ]},
                "greeting": {"type": "string"}
            }
        });
        let mut eval = JsonEval::new(&schema.to_string(), None, None).unwrap();
        let out = eval
            .evaluate_dependents(&["first".to_string()], Some(r#"{"first": "Ann"}"#), None, false, None)
            .unwrap();
        assert_eq!(out[0]["$ref"], json!("greeting"));
        assert_eq!(out[0]["value"], json!("Hi Ann"));
        assert_eq!(out[0]["transitive"], json!(false));
        assert_eq!(eval.data()["greeting"], json!("Hi Ann"));
        assert!(eval.data().get("$value").is_none());
    }

    #[test]
    fn test_unchanged_value_is_not_reported() {
        let schema = json!({
            "properties": {
                "a": {"dependents": [{"$ref": "b", "value": 1}]},
                "b": {}
            }
        });
        let mut eval = JsonEval::new(&schema.to_string(), None, None).unwrap();
        let out = eval
            .evaluate_dependents(&["a".to_string()], Some(r#"{"a": 1, "b": 1}"#), None, false, None)
            .unwrap();
        assert_eq!(out, json!([]));
    }

    #[test]
    fn test_clear_action() {
        let schema = json!({
            "properties": {
                "country": {"dependents": [{"$ref": "state", "clear": {"$evaluation": {"!=": [{"var": "$value"}, "US"]}}}]},
                "state": {"type": "string"}
            }
        });
        let mut eval = JsonEval::new(&schema.to_string(), None, None).unwrap();
        let out = eval
            .evaluate_dependents(&["country".to_string()], Some(r#"{"country": "CA", "state": "NY"}"#), None, false, None)
            .unwrap();
        assert_eq!(out[0]["clear"], json!(true));
        assert!(out[0].get("value").is_none());
        assert_eq!(eval.data()["state"], Value::Null);
    }

    #[test]
    fn test_re_evaluate_reconciles_hidden_and_readonly() {
        let schema = json!({
            "properties": {
                "plan": {"type": "string"},
                "addon": {"type": "string", "condition": {"hidden": {"$evaluation": {"!=": [{"var": "plan"}, "pro"]}}}},
                "fee": {"type": "number", "value": 5, "condition": {"disabled": true}}
            }
        });
        let mut eval = JsonEval::new(&schema.to_string(), None, None).unwrap();
        let out = eval
            .evaluate_dependents(&["plan".to_string()], Some(r#"{"plan": "basic", "addon": "x", "fee": 1}"#), None, true, None)
            .unwrap();
        let out = out.as_array().unwrap();
        assert_eq!(out[0], json!({"$ref": "fee", "$readonly": true, "value": 5}));
        assert_eq!(out[1], json!({"$ref": "addon", "$hidden": true, "clear": true}));
        assert_eq!(eval.data()["fee"], json!(5));
        assert_eq!(eval.data()["addon"], Value::Null);
    }

    #[test]
    fn test_truthy_non_boolean_clear_keeps_value() {
        let schema = json!({
            "properties": {
                "a": {"dependents": [
                    {"$ref": "b", "clear": {"$evaluation": {"if": [{"var": "$value"}, "yes", "no"]}}},
                    {"$ref": "c", "clear": {"$evaluation": {"+": [{"var": "$value"}, 0]}}}
                ]},
                "b": {"type": "string"},
                "c": {"type": "string"}
            }
        });
        let mut eval = JsonEval::new(&schema.to_string(), None, None).unwrap();
        let out = eval
            .evaluate_dependents(&["a".to_string()], Some(r#"{"a": 1, "b": "keep", "c": "keep"}"#), None, false, None)
            .unwrap();
        assert_eq!(out, json!([]));
        assert_eq!(eval.data()["b"], json!("keep"));
        assert_eq!(eval.data()["c"], json!("keep"));
    }

    #[test]
    fn test_data_without_context_resets_context() {
        let schema = json!({"properties": {"a": {}}});
        let mut eval = JsonEval::new(&schema.to_string(), Some(r#"{"user": "ann"}"#), None).unwrap();
        eval.evaluate_dependents(&["a".to_string()], Some(r#"{"a": 1}"#), None, false, None)
            .unwrap();
        assert_eq!(eval.context(), &json!({}));

        eval.evaluate_dependents(&["a".to_string()], None, Some(r#"{"user": "bo"}"#), false, None)
            .unwrap();
        assert_eq!(eval.context(), &json!({"user": "bo"}));
        assert_eq!(eval.data()["a"], json!(1));
    }

    #[test]
    fn test_hiding_cascades_through_conditions() {
        let schema = json!({
            "properties": {
                "plan": {"type": "string"},
                "a": {"type": "string", "condition": {"hidden": {"$evaluation": {"!=": [{"var": "plan"}, "pro"]}}}},
                "b": {"type": "string", "condition": {"hidden": {"$evaluation": {"!": {"var": "a"}}}}}
            }
        });
        let mut eval = JsonEval::new(&schema.to_string(), None, None).unwrap();
        let out = eval
            .evaluate_dependents(&["plan".to_string()], Some(r#"{"plan": "basic", "a": "x", "b": "y"}"#), None, true, None)
            .unwrap();
        assert_eq!(
            out,
            json!([
                {"$ref": "a", "$hidden": true, "clear": true},
                {"$ref": "b", "$hidden": true, "clear": true}
            ])
        );
        assert_eq!(eval.data()["a"], Value::Null);
        assert_eq!(eval.data()["b"], Value::Null);
    }

    #[test]
    fn test_cancelled_before_start() {
        let mut eval = JsonEval::new(r#"{"properties": {}}"#, None, None).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = eval
            .evaluate_dependents(&["a".to_string()], None, None, false, Some(&token))
            .unwrap_err();
        assert_eq!(err, EvalError::Cancelled);
    }
}
