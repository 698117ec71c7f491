use super::JsonEval;
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::path;
use serde_json::{Map, Value};

fn set_default(map: &mut Map<String, Value>, key: &str, value: Value) {
    if !map.contains_key(key) {
        map.insert(key.to_string(), value);
    }
}

fn flag(map: &Map<String, Value>, section: &str, key: &str) -> bool {
    map.get(section).and_then(|s| s.get(key)) == Some(&Value::Bool(true))
}

impl JsonEval {
    /// Resolve `$layout.elements` references into full field schemas
    ///
    /// With `evaluate`, the schema is first re-evaluated against current data.
    pub fn resolve_layout(&mut self, evaluate: bool, token: Option<&CancellationToken>) -> Result<()> {
        if evaluate {
            self.evaluate_internal(None, token)?;
        }
        self.resolve_layout_internal();
        Ok(())
    }

    pub(crate) fn resolve_layout_internal(&mut self) {
        let parsed = std::sync::Arc::clone(&self.parsed);
        for elements_path in &parsed.layout_paths {
            let pointer = path::to_json_pointer(elements_path);
            let Some(Value::Array(elements)) = parsed.schema.pointer(&pointer) else {
                continue;
            };

            // "#/properties/a/$layout/elements" -> "properties.a.$layout"
            let mut prefix = path::dotted(&pointer);
            if let Some(stripped) = prefix.strip_suffix(".elements") {
                prefix = stripped.to_string();
            } else if prefix == "elements" {
                prefix.clear();
            }

            let resolved: Vec<Value> = elements
                .iter()
                .enumerate()
                .map(|(i, el)| {
                    let element_path = if prefix.is_empty() {
                        format!("elements.{}", i)
                    } else {
                        format!("{}.elements.{}", prefix, i)
                    };
                    let el = self.resolve_element(el.clone(), &element_path);
                    apply_parent_conditions(el, false, false)
                })
                .collect();

            path::set_or_warn(&mut self.evaluated_schema, &pointer, Value::Array(resolved));
        }
    }

    fn resolve_element(&self, element: Value, element_path: &str) -> Value {
        let Value::Object(mut map) = element else {
            return element;
        };

        if let Some(ref_path) = map.get("$ref").and_then(Value::as_str).map(str::to_string) {
            let schema_pointer = path::resolve_schema_pointer(&self.evaluated_schema, &ref_path);
            let full_path = path::dotted(&path::data_pointer(&schema_pointer));
            let last = full_path.rsplit('.').next().unwrap_or_default().to_string();

            if let Some(Value::Object(target)) = self.evaluated_schema.pointer(&path::to_json_pointer(&schema_pointer)) {
                map.remove("$ref");
                let mut merged = target.clone();
                // the field's own layout wins over its schema keys
                if let Some(Value::Object(own_layout)) = merged.remove("$layout") {
                    let mut base = own_layout;
                    for (k, v) in merged {
                        if k != "type" || !base.contains_key("type") {
                            base.insert(k, v);
                        }
                    }
                    merged = base;
                }
                for (k, v) in map {
                    merged.insert(k, v);
                }
                map = merged;
            }
            map.insert("$fullpath".to_string(), Value::String(full_path));
            map.insert("$path".to_string(), Value::String(last));
        }

        set_default(&mut map, "$parentHide", Value::Bool(false));
        set_default(&mut map, "$fullpath", Value::String(element_path.to_string()));
        let tail = element_path.rsplit('.').next().unwrap_or(element_path).to_string();
        set_default(&mut map, "$path", Value::String(tail));

        if let Some(Value::Array(children)) = map.remove("elements") {
            let nested = children
                .into_iter()
                .enumerate()
                .map(|(i, child)| self.resolve_element(child, &format!("{}.elements.{}", element_path, i)))
                .collect();
            map.insert("elements".to_string(), Value::Array(nested));
        }

        Value::Object(map)
    }
}

/// Push hidden/disabled state down the element tree and record `$parentHide`
fn apply_parent_conditions(element: Value, parent_hidden: bool, parent_disabled: bool) -> Value {
    let Value::Object(mut map) = element else {
        return element;
    };

    let mut hidden = parent_hidden || flag(&map, "condition", "hidden") || flag(&map, "hideLayout", "all");
    let mut disabled = parent_disabled || flag(&map, "condition", "disabled");

    if parent_hidden || parent_disabled {
        let mut condition = map
            .get("condition")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        if parent_hidden {
            condition.insert("hidden".to_string(), Value::Bool(true));
            hidden = true;
        }
        if parent_disabled {
            condition.insert("disabled".to_string(), Value::Bool(true));
            disabled = true;
        }
        map.insert("condition".to_string(), Value::Object(condition));
    }

    map.insert("$parentHide".to_string(), Value::Bool(parent_hidden));

    if let Some(Value::Array(children)) = map.remove("elements") {
        let updated = children
            .into_iter()
            .map(|child| apply_parent_conditions(child, hidden, disabled))
            .collect();
        map.insert("elements".to_string(), Value::Array(updated));
    }
    Value::Object(map)
}
