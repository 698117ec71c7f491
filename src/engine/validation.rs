use super::{parse_json, parse_optional, JsonEval};
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::logic::is_truthy;
use crate::path;
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

const DEFAULT_MESSAGE: &str = "Validation failed";

/// One failed rule
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    /// Rule name (`required`, `pattern`, ..., or `evaluation` for custom rules)
    #[serde(rename = "type")]
    pub rule_type: String,
    /// Message from the schema or a generic fallback
    pub message: String,
    /// Schema-provided code, defaulting to `<field>.<rule>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Pattern that failed to match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Field value checked against `pattern`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_value: Option<String>,
    /// Extra rule data from the schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Validation outcome keyed by dotted field path
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// True if any rule failed
    pub has_error: bool,
    /// First failure per field
    pub errors: IndexMap<String, ValidationError>,
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn message_of(rule: &Map<String, Value>) -> String {
    match rule.get("message") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(m)) => m
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MESSAGE)
            .to_string(),
        _ => DEFAULT_MESSAGE.to_string(),
    }
}

/// Unwrap `{"value": x}` entries of a rule's `data` object
fn data_of(rule: &Map<String, Value>) -> Option<Value> {
    let data = rule.get("data")?;
    let Value::Object(entries) = data else {
        return Some(data.clone());
    };
    let cleaned = entries
        .iter()
        .map(|(k, v)| match v {
            Value::Object(inner) if inner.len() == 1 && inner.contains_key("value") => {
                (k.clone(), inner["value"].clone())
            }
            other => (k.clone(), other.clone()),
        })
        .collect();
    Some(Value::Object(cleaned))
}

fn length_of(v: &Value) -> usize {
    match v {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        _ => 0,
    }
}

struct RuleCheck<'a> {
    field: &'a str,
    name: &'a str,
    active: Value,
    message: String,
    code: String,
    data: Option<Value>,
}

impl RuleCheck<'_> {
    fn error(self, rule_type: &str) -> ValidationError {
        ValidationError {
            rule_type: rule_type.to_string(),
            message: self.message,
            code: Some(self.code),
            pattern: None,
            field_value: None,
            data: None,
        }
    }
}

impl JsonEval {
    /// Replace data and context, re-evaluate, and check every field's rules
    ///
    /// With `paths`, only fields under those paths are checked.
    pub fn validate(
        &mut self,
        data: &str,
        context: Option<&str>,
        paths: Option<&[String]>,
        token: Option<&CancellationToken>,
    ) -> Result<ValidationResult> {
        let data = parse_json(data)?;
        let context = parse_optional(context)?;
        self.replace_data(data, context);
        self.evaluate_internal(None, token)?;
        self.validate_current(paths, token)
    }

    pub(crate) fn validate_current(
        &self,
        paths: Option<&[String]>,
        token: Option<&CancellationToken>,
    ) -> Result<ValidationResult> {
        let filters: Option<Vec<String>> = paths.filter(|ps| !ps.is_empty()).map(|ps| {
            ps.iter()
                .map(|p| path::dotted(&path::data_pointer(&path::resolve_schema_pointer(&self.parsed.schema, p))))
                .collect()
        });

        let mut errors = IndexMap::new();
        for field_pointer in &self.parsed.rule_fields {
            if let Some(t) = token {
                t.check()?;
            }
            let field = path::dotted(&path::data_pointer(field_pointer));
            if let Some(fs) = &filters {
                let wanted = fs.iter().any(|f| {
                    field == *f || field.starts_with(&format!("{}.", f)) || f.starts_with(&format!("{}.", field))
                });
                if !wanted {
                    continue;
                }
            }
            if let Some(err) = self.validate_field(field_pointer, &field) {
                errors.insert(field, err);
            }
        }

        Ok(ValidationResult {
            has_error: !errors.is_empty(),
            errors,
        })
    }

    fn validate_field(&self, field_pointer: &str, field: &str) -> Option<ValidationError> {
        let schema_field = self
            .evaluated_schema
            .pointer(&path::to_json_pointer(field_pointer))?
            .as_object()?;

        let condition = schema_field.get("condition");
        if condition.and_then(|c| c.get("hidden")) == Some(&Value::Bool(true)) {
            return None;
        }
        let disabled = condition.and_then(|c| c.get("disabled")) == Some(&Value::Bool(true));

        let rules = schema_field.get("rules")?.as_object()?;
        let value = self
            .scope
            .pointer(&path::data_pointer(field_pointer))
            .cloned()
            .unwrap_or(Value::Null);

        for (name, rule) in rules {
            let check = match rule {
                Value::Object(obj) => RuleCheck {
                    field,
                    name,
                    active: obj.get("value").cloned().unwrap_or(Value::Bool(false)),
                    message: message_of(obj),
                    code: obj
                        .get("code")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("{}.{}", field, name)),
                    data: data_of(obj),
                },
                other => RuleCheck {
                    field,
                    name,
                    active: other.clone(),
                    message: DEFAULT_MESSAGE.to_string(),
                    code: format!("{}.{}", field, name),
                    data: None,
                },
            };
            if let Some(err) = self.check_rule(field_pointer, check, &value, disabled) {
                return Some(err);
            }
        }
        None
    }

    fn check_rule(&self, field_pointer: &str, check: RuleCheck<'_>, value: &Value, disabled: bool) -> Option<ValidationError> {
        let empty = is_empty_value(value);
        match check.name {
            "required" => {
                if !disabled && check.active == Value::Bool(true) && empty {
                    return Some(check.error("required"));
                }
            }
            "minLength" | "maxLength" => {
                let limit = check.active.as_u64()? as usize;
                let len = length_of(value);
                let failed = if check.name == "minLength" { len < limit } else { len > limit };
                if !empty && failed {
                    let rule_type = check.name.to_string();
                    return Some(check.error(&rule_type));
                }
            }
            "minValue" | "maxValue" => {
                let limit = check.active.as_f64()?;
                let v = value.as_f64()?;
                let failed = if check.name == "minValue" { v < limit } else { v > limit };
                if !empty && failed {
                    let rule_type = check.name.to_string();
                    return Some(check.error(&rule_type));
                }
            }
            "pattern" => {
                let pattern = check.active.as_str()?.to_string();
                let text = value.as_str()?.to_string();
                let computed;
                let regex = match self.parsed.pattern(&pattern) {
                    Some(regex) => regex,
                    None => match Regex::new(&pattern) {
                        Ok(regex) => {
                            computed = regex;
                            &computed
                        }
                        Err(e) => {
                            warn!(field = field_pointer, error = %e, "computed pattern does not compile");
                            return None;
                        }
                    },
                };
                if !empty && !regex.is_match(&text) {
                    let mut err = check.error("pattern");
                    err.pattern = Some(pattern);
                    err.field_value = Some(text);
                    return Some(err);
                }
            }
            "evaluation" => return self.check_evaluation_list(field_pointer, check.field),
            _ => {
                if !empty && !is_truthy(&check.active) {
                    let data = check.data.clone();
                    let mut err = check.error("evaluation");
                    err.data = data;
                    return Some(err);
                }
            }
        }
        None
    }

    /// `rules.evaluation` is an array of `{code, message, $evaluation}`; the
    /// first falsy result fails the field
    fn check_evaluation_list(&self, field_pointer: &str, field: &str) -> Option<ValidationError> {
        let list_pointer = format!("{}/rules/evaluation", path::to_json_pointer(field_pointer));
        let evaluated = self.evaluated_schema.pointer(&list_pointer)?.as_array()?;
        let declared = self.parsed.schema.pointer(&list_pointer).and_then(Value::as_array);

        for (idx, item) in evaluated.iter().enumerate() {
            let result = match item {
                Value::Object(obj) => obj.get("value").cloned().unwrap_or(Value::Bool(true)),
                other => other.clone(),
            };
            if is_truthy(&result) {
                continue;
            }
            let meta = declared.and_then(|d| d.get(idx)).and_then(Value::as_object);
            let code = meta
                .and_then(|m| m.get("code"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}.evaluation.{}", field, idx));
            return Some(ValidationError {
                rule_type: "evaluation".to_string(),
                message: meta.map(message_of).unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
                code: Some(code),
                pattern: None,
                field_value: None,
                data: meta.and_then(|m| m.get("data").cloned()),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> JsonEval {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "rules": {
                    "required": {"value": true, "message": "Name is required"},
                    "minLength": {"value": 3, "message": "Too short"}
                }},
                "email": {"type": "string", "rules": {
                    "pattern": {"value": "^[^@]+@[^@]+$", "message": "Bad email", "code": "EMAIL"}
                }},
                "age": {"type": "number", "rules": {
                    "minValue": {"value": 18},
                    "adult": {"value": {"$evaluation": {">=": [{"var": "age"}, 21]}}, "message": "Must be 21"}
                }},
                "secret": {"type": "string", "condition": {"hidden": true}, "rules": {"required": {"value": true}}},
                "terms": {"type": "boolean", "rules": {"evaluation": [
                    {"code": "TERMS", "message": "Accept the terms", "$evaluation": {"==": [{"var": "terms"}, true]}}
                ]}}
            }
        });
        JsonEval::new(&schema.to_string(), None, None).unwrap()
    }

    #[test]
    fn test_required_and_hidden() {
        let mut eval = engine();
        let result = eval.validate(r#"{"terms": true}"#, None, None, None).unwrap();
        assert!(result.has_error);
        let name = &result.errors["name"];
        assert_eq!(name.rule_type, "required");
        assert_eq!(name.message, "Name is required");
        assert_eq!(name.code.as_deref(), Some("name.required"));
        assert!(!result.errors.contains_key("secret"), "hidden fields are skipped");
    }

    #[test]
    fn test_length_pattern_and_value_rules() {
        let mut eval = engine();
        let result = eval
            .validate(r#"{"name": "Al", "email": "nope", "age": 16, "terms": true}"#, None, None, None)
            .unwrap();
        assert_eq!(result.errors["name"].rule_type, "minLength");
        let email = &result.errors["email"];
        assert_eq!(email.code.as_deref(), Some("EMAIL"));
        assert_eq!(email.pattern.as_deref(), Some("^[^@]+@[^@]+$"));
        assert_eq!(email.field_value.as_deref(), Some("nope"));
        assert_eq!(result.errors["age"].rule_type, "minValue");
    }

    #[test]
    fn test_custom_and_evaluation_list_rules() {
        let mut eval = engine();
        let result = eval
            .validate(r#"{"name": "Alice", "email": "a@b", "age": 19, "terms": false}"#, None, None, None)
            .unwrap();
        assert_eq!(result.errors["age"].rule_type, "evaluation");
        assert_eq!(result.errors["age"].message, "Must be 21");
        let terms = &result.errors["terms"];
        assert_eq!(terms.code.as_deref(), Some("TERMS"));
        assert_eq!(terms.message, "Accept the terms");
    }

    #[test]
    fn test_path_filter_and_clean_pass() {
        let mut eval = engine();
        let result = eval
            .validate(r#"{"name": "", "age": 30, "terms": true}"#, None, Some(&["age".to_string()]), None)
            .unwrap();
        assert!(!result.has_error);

        let result = eval
            .validate(r#"{"name": "Alice", "email": "a@b", "age": 30, "terms": true}"#, None, None, None)
            .unwrap();
        assert!(!result.has_error);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, json!({"hasError": false, "errors": {}}));
    }

    #[test]
    fn test_invalid_literal_pattern_fails_at_parse() {
        let schema = json!({"properties": {"code": {"type": "string", "rules": {"pattern": {"value": "[unclosed"}}}}});
        let err = JsonEval::new(&schema.to_string(), None, None).unwrap_err();
        assert!(matches!(err, crate::error::EvalError::Schema(_)), "{}", err);
    }

    #[test]
    fn test_computed_pattern_is_applied() {
        let schema = json!({
            "$params": {"zip": "^[0-9]{5}$"},
            "properties": {
                "zip": {"type": "string", "rules": {"pattern": {"value": {"$evaluation": {"var": "$params.zip"}}}}},
                "code": {"type": "string", "rules": {"pattern": {"value": {"$evaluation": {"cat": ["[", {"var": "open"}]}}}}}
            }
        });
        let mut eval = JsonEval::new(&schema.to_string(), None, None).unwrap();
        let result = eval.validate(r#"{"zip": "12a45", "code": "x"}"#, None, None, None).unwrap();
        assert_eq!(result.errors["zip"].rule_type, "pattern");
        assert!(!result.errors.contains_key("code"), "a computed pattern that does not compile is skipped");

        let result = eval.validate(r#"{"zip": "12345", "code": "x"}"#, None, None, None).unwrap();
        assert!(!result.has_error);
    }
}
