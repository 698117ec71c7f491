//! Schema parsing
//!
//! A [`ParsedSchema`] is the immutable, shareable result of walking a schema
//! once: every `$evaluation` compiled and ordered, dependents collected,
//! validation and conditional fields indexed, and array fields with `items`
//! split out into their own parsed subforms. Engine instances hold an
//! `Arc<ParsedSchema>`, which is what makes the parsed-schema cache cheap.

mod table;

pub use table::{Cell, Column, RowPlan, TablePlan};
pub(crate) use table::{ITERATION, THRESHOLD};

use crate::error::{EvalError, Result};
use crate::logic::{self, CompiledLogic};
use crate::path;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// What an evaluation computes
#[derive(Debug, Clone)]
pub enum EvaluationKind {
    /// A single `$evaluation` expression
    Logic(Arc<CompiledLogic>),
    /// A `$table` node
    Table(Arc<TablePlan>),
}

/// A compiled `$evaluation` or `$table`
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Schema pointer of the node the result replaces
    pub key: String,
    /// Compiled expression or table plan
    pub kind: EvaluationKind,
    /// Data pointers the expression reads
    pub deps: Vec<String>,
    /// Data pointer the result is written to, for value, table and `$params` evaluations
    pub produces: Option<String>,
}

impl Evaluation {
    /// The compiled expression, for plain evaluations
    pub fn logic(&self) -> Option<&Arc<CompiledLogic>> {
        match &self.kind {
            EvaluationKind::Logic(logic) => Some(logic),
            EvaluationKind::Table(_) => None,
        }
    }

    /// True if the result may be served from the evaluation cache
    pub fn is_cacheable(&self) -> bool {
        match &self.kind {
            EvaluationKind::Logic(logic) => logic.is_cacheable(),
            EvaluationKind::Table(plan) => plan.is_cacheable(),
        }
    }
}

/// Clear or value action of a dependent
#[derive(Debug, Clone)]
pub enum DependentAction {
    /// Constant from the schema
    Static(Value),
    /// Evaluated with `$value` and `$refValue` in scope
    Logic(Arc<CompiledLogic>),
}

/// One entry of a field's `dependents` array
#[derive(Debug, Clone)]
pub struct DependentItem {
    /// Schema pointer of the dependent field
    pub ref_path: String,
    /// Optional clear action
    pub clear: Option<DependentAction>,
    /// Optional value action
    pub value: Option<DependentAction>,
}

/// Pre-compiled schema
#[derive(Debug, Clone)]
pub struct ParsedSchema {
    pub(crate) schema: Value,
    pub(crate) evaluations: IndexMap<String, Evaluation>,
    pub(crate) sorted_evaluations: Vec<String>,
    pub(crate) dependents: IndexMap<String, Vec<DependentItem>>,
    pub(crate) rule_fields: Vec<String>,
    pub(crate) hidden_fields: Vec<String>,
    pub(crate) readonly_fields: Vec<String>,
    pub(crate) layout_paths: Vec<String>,
    pub(crate) subforms: IndexMap<String, Arc<ParsedSchema>>,
    /// Data pointer to the fields whose `condition.hidden` reads it
    pub(crate) reffed_by: IndexMap<String, Vec<String>>,
    /// Literal `rules.pattern` values, compiled
    pub(crate) patterns: IndexMap<String, Regex>,
}

#[derive(Default)]
struct Collector {
    evaluations: IndexMap<String, Evaluation>,
    dependents: IndexMap<String, Vec<DependentItem>>,
    rule_fields: Vec<String>,
    hidden_fields: Vec<String>,
    readonly_fields: Vec<String>,
    layout_paths: Vec<String>,
    subforms: Vec<(String, Map<String, Value>, Value)>,
    patterns: IndexMap<String, Regex>,
}

impl ParsedSchema {
    /// Parse a schema from JSON text
    pub fn parse(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a schema from MessagePack bytes
    pub fn parse_msgpack(bytes: &[u8]) -> Result<Self> {
        let value: Value = rmp_serde::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Parse an already-decoded schema
    pub fn from_value(schema: Value) -> Result<Self> {
        if !schema.is_object() {
            return Err(EvalError::Schema("schema root must be an object".to_string()));
        }

        let mut collector = Collector::default();
        walk(&schema, &schema, "#", &mut collector)?;

        let sorted_evaluations = topo_sort(&collector.evaluations)?;
        let reffed_by = index_hidden_refs(&collector.evaluations);

        let mut layout_paths = collector.layout_paths;
        layout_paths.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count()));

        let mut subforms = IndexMap::new();
        for (field_path, field, items) in collector.subforms {
            let sub = build_subform(&schema, &field_path, &field, &items)?;
            subforms.insert(field_path, Arc::new(sub));
        }

        debug!(
            evaluations = collector.evaluations.len(),
            dependents = collector.dependents.len(),
            subforms = subforms.len(),
            "parsed schema"
        );

        Ok(ParsedSchema {
            schema,
            evaluations: collector.evaluations,
            sorted_evaluations,
            dependents: collector.dependents,
            rule_fields: collector.rule_fields,
            hidden_fields: collector.hidden_fields,
            readonly_fields: collector.readonly_fields,
            layout_paths,
            subforms,
            reffed_by,
            patterns: collector.patterns,
        })
    }

    /// The schema as supplied
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Evaluation keys in execution order
    pub fn sorted_evaluations(&self) -> &[String] {
        &self.sorted_evaluations
    }

    /// Dependents declared on the field at `schema_pointer`
    pub fn dependents_of(&self, schema_pointer: &str) -> Option<&[DependentItem]> {
        self.dependents.get(schema_pointer).map(Vec::as_slice)
    }

    /// Schema pointers of every subform
    pub fn subform_paths(&self) -> Vec<String> {
        self.subforms.keys().cloned().collect()
    }

    /// Find a subform by `#/riders`, `riders` or `#/properties/riders`
    pub fn find_subform(&self, subform_path: &str) -> Option<(&str, &Arc<ParsedSchema>)> {
        if let Some((k, v)) = self.subforms.get_key_value(subform_path) {
            return Some((k.as_str(), v));
        }
        let wanted = path::data_pointer(&path::resolve_schema_pointer(&self.schema, subform_path));
        self.subforms
            .iter()
            .find(|(k, _)| path::data_pointer(k) == wanted)
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Fields whose `condition.hidden` reads `data_ptr` or a pointer nested with it
    pub(crate) fn fields_hidden_by(&self, data_ptr: &str) -> Vec<&String> {
        let mut out: Vec<&String> = Vec::new();
        for (dep, fields) in &self.reffed_by {
            if path::overlaps(dep, data_ptr) {
                for field in fields {
                    if !out.contains(&field) {
                        out.push(field);
                    }
                }
            }
        }
        out
    }

    /// Compiled regex for a literal `rules.pattern`
    pub(crate) fn pattern(&self, source: &str) -> Option<&Regex> {
        self.patterns.get(source)
    }
}

fn index_hidden_refs(evaluations: &IndexMap<String, Evaluation>) -> IndexMap<String, Vec<String>> {
    let mut reffed_by: IndexMap<String, Vec<String>> = IndexMap::new();
    for (key, ev) in evaluations {
        let Some(field) = key.strip_suffix("/condition/hidden") else {
            continue;
        };
        for dep in &ev.deps {
            let fields = reffed_by.entry(dep.clone()).or_default();
            if !fields.iter().any(|f| f == field) {
                fields.push(field.to_string());
            }
        }
    }
    reffed_by
}

fn child_path(path: &str, key: &str) -> String {
    format!("{}/{}", path, path::escape(key))
}

/// True for `#/name` and any `.../properties/name` pointer outside `$params`
fn is_field_path(path: &str) -> bool {
    if path.starts_with("#/$") {
        return false;
    }
    let segs = path::segments(path);
    match segs.len() {
        0 => false,
        1 => true,
        n => segs[n - 2] == "properties",
    }
}

fn walk(root: &Value, node: &Value, path: &str, out: &mut Collector) -> Result<()> {
    let Value::Object(map) = node else {
        if let Value::Array(items) = node {
            for (i, item) in items.iter().enumerate() {
                walk(root, item, &child_path(path, &i.to_string()), out)?;
            }
        }
        return Ok(());
    };

    if let Some(evaluation) = map.get("$evaluation") {
        collect_evaluation(path, evaluation, out)?;
        return Ok(());
    }

    if map.contains_key("$table") {
        collect_table(path, map, out)?;
        return Ok(());
    }

    if !is_field_path(path) && path != "#" {
        for (key, child) in map {
            walk(root, child, &child_path(path, key), out)?;
        }
        return Ok(());
    }

    if map
        .get("$layout")
        .and_then(|l| l.get("elements"))
        .is_some_and(Value::is_array)
    {
        out.layout_paths.push(format!("{}/$layout/elements", path));
    }

    if map.contains_key("rules") && path != "#" {
        out.rule_fields.push(path.to_string());
        collect_pattern(path, map.get("rules"), out)?;
    }

    if let Some(Value::Object(condition)) = map.get("condition") {
        if condition.contains_key("hidden") {
            out.hidden_fields.push(path.to_string());
        }
        if condition.contains_key("disabled") && map.contains_key("value") {
            out.readonly_fields.push(path.to_string());
        }
    }

    let is_subform = map.get("type").and_then(Value::as_str) == Some("array") && map.contains_key("items");
    if is_subform {
        if let Some(items) = map.get("items") {
            out.subforms.push((path.to_string(), map.clone(), items.clone()));
        }
    }

    if let Some(Value::Array(entries)) = map.get("dependents") {
        collect_dependents(root, path, entries, out)?;
    }

    for (key, child) in map {
        if key == "dependents" || key == "$layout" || (is_subform && key == "items") {
            continue;
        }
        walk(root, child, &child_path(path, key), out)?;
    }
    Ok(())
}

/// Compile the body of an `$evaluation` node (bare logic or `{"logic": ...}`)
pub(crate) fn compile_evaluation(evaluation: &Value, at: &str) -> Result<CompiledLogic> {
    let logic_value = match evaluation.get("logic") {
        Some(l) if evaluation.is_object() => l,
        _ => evaluation,
    };
    logic::compile(logic_value).map_err(|e| EvalError::Schema(format!("failed to compile evaluation at {}: {}", at, e)))
}

fn collect_evaluation(path: &str, evaluation: &Value, out: &mut Collector) -> Result<()> {
    let logic = compile_evaluation(evaluation, path)?;

    let produces = if path.starts_with("#/$params/") {
        Some(path::data_pointer(path))
    } else {
        path.strip_suffix("/value")
            .filter(|field| is_field_path(field))
            .map(path::data_pointer)
    };

    out.evaluations.insert(
        path.to_string(),
        Evaluation {
            key: path.to_string(),
            deps: logic.referenced_vars(),
            kind: EvaluationKind::Logic(Arc::new(logic)),
            produces,
        },
    );
    Ok(())
}

fn collect_table(path: &str, map: &Map<String, Value>, out: &mut Collector) -> Result<()> {
    let plan = TablePlan::parse(map, path)?;
    let own = path::data_pointer(path);
    out.evaluations.insert(
        path.to_string(),
        Evaluation {
            key: path.to_string(),
            deps: plan.referenced_vars(&own),
            kind: EvaluationKind::Table(Arc::new(plan)),
            produces: Some(own),
        },
    );
    Ok(())
}

fn collect_pattern(path: &str, rules: Option<&Value>, out: &mut Collector) -> Result<()> {
    let Some(rule) = rules.and_then(|r| r.get("pattern")) else {
        return Ok(());
    };
    let source = match rule {
        Value::String(s) => s,
        Value::Object(m) => match m.get("value") {
            Some(Value::String(s)) => s,
            _ => return Ok(()),
        },
        _ => return Ok(()),
    };
    if out.patterns.contains_key(source) {
        return Ok(());
    }
    let regex = Regex::new(source).map_err(|e| EvalError::Schema(format!("invalid pattern at {}: {}", path, e)))?;
    out.patterns.insert(source.clone(), regex);
    Ok(())
}

fn dependent_action(value: &Value, key: &str) -> Result<DependentAction> {
    match value.get("$evaluation") {
        Some(expr) if value.is_object() => Ok(DependentAction::Logic(Arc::new(compile_evaluation(expr, key)?))),
        _ => Ok(DependentAction::Static(value.clone())),
    }
}

fn collect_dependents(root: &Value, path: &str, entries: &[Value], out: &mut Collector) -> Result<()> {
    let mut items = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        let Some(ref_path) = entry.get("$ref").and_then(Value::as_str) else {
            continue;
        };
        let key = format!("{}/dependents/{}", path, idx);
        let clear = match entry.get("clear") {
            Some(c) => Some(dependent_action(c, &format!("{}/clear", key))?),
            None => None,
        };
        let value = match entry.get("value") {
            Some(v) => Some(dependent_action(v, &format!("{}/value", key))?),
            None => None,
        };
        items.push(DependentItem {
            ref_path: path::resolve_schema_pointer(root, ref_path),
            clear,
            value,
        });
    }
    if !items.is_empty() {
        out.dependents.insert(path.to_string(), items);
    }
    Ok(())
}

/// Order evaluations so producers run before consumers
///
/// Ties keep declaration order. A cycle is a schema error.
fn topo_sort(evaluations: &IndexMap<String, Evaluation>) -> Result<Vec<String>> {
    let keys: Vec<&String> = evaluations.keys().collect();
    let mut prerequisites: Vec<Vec<usize>> = vec![Vec::new(); keys.len()];

    for (i, consumer) in evaluations.values().enumerate() {
        for (j, producer) in evaluations.values().enumerate() {
            if i == j {
                continue;
            }
            let Some(target) = &producer.produces else {
                continue;
            };
            if consumer.deps.iter().any(|dep| path::overlaps(dep, target)) {
                prerequisites[i].push(j);
            }
        }
    }

    let mut done = vec![false; keys.len()];
    let mut order = Vec::with_capacity(keys.len());
    while order.len() < keys.len() {
        let next = (0..keys.len()).find(|&i| !done[i] && prerequisites[i].iter().all(|&p| done[p]));
        match next {
            Some(i) => {
                done[i] = true;
                order.push(keys[i].clone());
            }
            None => {
                let stuck: Vec<&str> = (0..keys.len())
                    .filter(|&i| !done[i])
                    .map(|i| keys[i].as_str())
                    .collect();
                return Err(EvalError::Schema(format!(
                    "Circular dependency between evaluations: {}",
                    stuck.join(", ")
                )));
            }
        }
    }
    Ok(order)
}

fn build_subform(root: &Value, field_path: &str, field: &Map<String, Value>, items: &Value) -> Result<ParsedSchema> {
    let field_key = path::segments(field_path).pop().unwrap_or_default();

    let mut field_obj = Map::new();
    if let Value::Object(items_map) = items {
        for (k, v) in items_map {
            field_obj.insert(k.clone(), v.clone());
        }
    }
    for (k, v) in field {
        if k != "items" && k != "type" {
            field_obj.insert(k.clone(), v.clone());
        }
    }
    field_obj.insert("type".to_string(), Value::String("object".to_string()));

    let mut sub_schema = Map::new();
    if let Some(params) = root.get("$params") {
        sub_schema.insert("$params".to_string(), params.clone());
    }
    sub_schema.insert(field_key.clone(), Value::Object(field_obj));

    ParsedSchema::from_value(Value::Object(sub_schema))
        .map_err(|e| EvalError::Schema(format!("failed to parse subform {}: {}", field_key, e)))
}
