use super::{JsonEval, PARAMS_KEY};
use crate::error::Result;
use crate::path::{self, ReturnFormat};
use serde_json::{Map, Value};

/// Keywords that never name a field when they appear at the schema root
const ROOT_KEYWORDS: &[&str] = &[
    "type",
    "properties",
    "title",
    "description",
    "required",
    "definitions",
    "items",
    "rules",
    "condition",
    "config",
    "dependents",
    "value",
];

/// Visit every field schema with its data pointer, parents before children
pub(crate) fn visit_fields<F>(schema: &Value, f: &mut F)
where
    F: FnMut(&str, &Map<String, Value>),
{
    let Value::Object(root) = schema else {
        return;
    };
    for (key, child) in root {
        if key.starts_with('$') || ROOT_KEYWORDS.contains(&key.as_str()) {
            continue;
        }
        if let Value::Object(field) = child {
            if field.contains_key("type") || field.contains_key("properties") {
                visit_field(&format!("/{}", path::escape(key)), field, f);
            }
        }
    }
    if let Some(Value::Object(props)) = root.get("properties") {
        for (key, child) in props {
            if let Value::Object(field) = child {
                visit_field(&format!("/{}", path::escape(key)), field, f);
            }
        }
    }
}

fn visit_field<F>(data_pointer: &str, field: &Map<String, Value>, f: &mut F)
where
    F: FnMut(&str, &Map<String, Value>),
{
    f(data_pointer, field);
    if let Some(Value::Object(props)) = field.get("properties") {
        for (key, child) in props {
            if let Value::Object(grandchild) = child {
                visit_field(&format!("{}/{}", data_pointer, path::escape(key)), grandchild, f);
            }
        }
    }
}

fn select(source: &Value, paths: &[String], format: ReturnFormat, lookup: impl Fn(&Value, &str) -> Option<Value>) -> Value {
    match format {
        ReturnFormat::Array => Value::Array(
            paths
                .iter()
                .map(|p| lookup(source, p).unwrap_or(Value::Null))
                .collect(),
        ),
        ReturnFormat::Flat => {
            let mut out = Map::new();
            for p in paths {
                if let Some(v) = lookup(source, p) {
                    out.insert(p.clone(), v);
                }
            }
            Value::Object(out)
        }
        ReturnFormat::Nested => {
            let mut out = Map::new();
            for p in paths {
                if let Some(v) = lookup(source, p) {
                    path::insert_nested(&mut out, &path::dotted(&path::to_json_pointer(p)), v);
                }
            }
            Value::Object(out)
        }
    }
}

fn schema_lookup(schema: &Value, p: &str) -> Option<Value> {
    let pointer = path::resolve_schema_pointer(schema, p);
    schema.pointer(&path::to_json_pointer(&pointer)).cloned()
}

impl JsonEval {
    /// Evaluated schema, with layouts resolved unless `skip_layout`
    pub fn get_evaluated_schema(&mut self, skip_layout: bool) -> Value {
        if !skip_layout {
            self.resolve_layout_internal();
        }
        self.evaluated_schema.clone()
    }

    /// Evaluated schema encoded as MessagePack
    pub fn get_evaluated_schema_msgpack(&mut self, skip_layout: bool) -> Result<Vec<u8>> {
        let schema = self.get_evaluated_schema(skip_layout);
        Ok(rmp_serde::to_vec_named(&schema)?)
    }

    /// Evaluated schema without the `$params` section
    pub fn get_evaluated_schema_without_params(&mut self, skip_layout: bool) -> Value {
        let mut schema = self.get_evaluated_schema(skip_layout);
        if let Value::Object(map) = &mut schema {
            map.remove(PARAMS_KEY);
        }
        schema
    }

    /// One node of the evaluated schema; `None` if the path does not exist
    pub fn get_evaluated_schema_by_path(&mut self, path: &str, skip_layout: bool) -> Option<Value> {
        if !skip_layout {
            self.resolve_layout_internal();
        }
        schema_lookup(&self.evaluated_schema, path)
    }

    /// Several nodes of the evaluated schema shaped by `format`
    pub fn get_evaluated_schema_by_paths(&mut self, paths: &[String], skip_layout: bool, format: ReturnFormat) -> Value {
        if !skip_layout {
            self.resolve_layout_internal();
        }
        select(&self.evaluated_schema, paths, format, schema_lookup)
    }

    /// Every field `value` from the evaluated schema, nested by data path
    pub fn get_schema_value(&self) -> Value {
        let mut out = Map::new();
        visit_fields(&self.evaluated_schema, &mut |pointer, field| {
            if let Some(v) = field.get("value") {
                let unevaluated = v.get("$evaluation").is_some();
                if !unevaluated {
                    path::insert_nested(&mut out, pointer, v.clone());
                }
            }
        });
        Value::Object(out)
    }

    /// One node of the schema as supplied
    pub fn get_schema_by_path(&self, path: &str) -> Option<Value> {
        schema_lookup(&self.parsed.schema, path)
    }

    /// Several nodes of the schema as supplied
    pub fn get_schema_by_paths(&self, paths: &[String], format: ReturnFormat) -> Value {
        select(&self.parsed.schema, paths, format, schema_lookup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> JsonEval {
        let schema = json!({
            "type": "object",
            "$params": {"k": 1},
            "properties": {
                "a": {"type": "number", "value": 5},
                "group": {"type": "object", "properties": {"b": {"type": "string", "value": {"$evaluation": {"cat": ["x", "y"]}}}}}
            }
        });
        let mut eval = JsonEval::new(&schema.to_string(), None, None).unwrap();
        eval.evaluate("{}", None, None, None).unwrap();
        eval
    }

    #[test]
    fn test_by_path_accepts_all_notations() {
        let mut eval = engine();
        let dotted = eval.get_evaluated_schema_by_path("group.b", true);
        let pointer = eval.get_evaluated_schema_by_path("#/properties/group/properties/b", true);
        assert_eq!(dotted, pointer);
        assert_eq!(dotted.unwrap()["value"], json!("xy"));
        assert_eq!(eval.get_evaluated_schema_by_path("nope", true), None);
    }

    #[test]
    fn test_by_paths_formats() {
        let mut eval = engine();
        let paths = vec!["a.value".to_string(), "group.b.value".to_string(), "zzz".to_string()];
        assert_eq!(
            eval.get_evaluated_schema_by_paths(&paths, true, ReturnFormat::Array),
            json!([5, "xy", null])
        );
        assert_eq!(
            eval.get_evaluated_schema_by_paths(&paths, true, ReturnFormat::Flat),
            json!({"a.value": 5, "group.b.value": "xy"})
        );
        assert_eq!(
            eval.get_evaluated_schema_by_paths(&paths, true, ReturnFormat::Nested),
            json!({"a": {"value": 5}, "group": {"b": {"value": "xy"}}})
        );
    }

    #[test]
    fn test_schema_value_and_without_params() {
        let mut eval = engine();
        assert_eq!(eval.get_schema_value(), json!({"a": 5, "group": {"b": "xy"}}));
        assert!(eval.get_evaluated_schema_without_params(true).get("$params").is_none());
        assert!(eval.get_evaluated_schema(true).get("$params").is_some());
    }

    #[test]
    fn test_original_schema_keeps_evaluations() {
        let eval = engine();
        let raw = eval.get_schema_by_path("group.b").unwrap();
        assert!(raw["value"].get("$evaluation").is_some());
    }

    #[test]
    fn test_msgpack_matches_json() {
        let mut eval = engine();
        let bytes = eval.get_evaluated_schema_msgpack(true).unwrap();
        let decoded: Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, eval.get_evaluated_schema(true));
    }
}
