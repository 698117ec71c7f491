//! `$table` evaluation
//!
//! Tables are computed in a sandbox copied from the scope, so `$datas`
//! bindings, row bindings and the partially built table never leak into the
//! document. Rows are built in place inside the sandbox at the table's own
//! pointer, which lets cells look up earlier (and, for forward columns,
//! later) rows with `VALUEAT`.

use crate::error::{EvalError, Result};
use crate::logic::EvalEnv;
use crate::path;
use crate::schema::{Cell, Column, RowPlan, TablePlan, ITERATION, THRESHOLD};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, trace};

/// Upper bound on convergence sweeps over forward columns
const MAX_SWEEPS: usize = 100;

/// Evaluate `plan` against `scope`, returning the array of rows
///
/// `own` is the data pointer the table is written to, `deps` the document
/// pointers it reads.
pub(super) fn evaluate_table(
    plan: &TablePlan,
    own: &str,
    deps: &[String],
    scope: &Value,
    evaluated_schema: &Value,
    env: &EvalEnv,
) -> Result<Value> {
    let mut sandbox = scope.clone();

    for (name, cell) in &plan.datas {
        let value = cell.evaluate(&sandbox, env).unwrap_or(Value::Null);
        path::set_or_warn(&mut sandbox, name, value);
    }

    let skip = is_set(&plan.skip, &sandbox, env);
    let missing = deps
        .iter()
        .find(|dep| !dep.contains("$params") && is_required_and_empty(dep, &sandbox, evaluated_schema));
    let clear = is_set(&plan.clear, &sandbox, env);

    if !path::set(&mut sandbox, own, Value::Array(Vec::new())) {
        return Err(EvalError::Logic(format!("table target {} is not writable", own)));
    }
    if skip || clear || missing.is_some() {
        debug!(table = own, skip, clear, missing = ?missing, "table left empty");
        return Ok(Value::Array(Vec::new()));
    }

    let mut table = Table { sandbox, own };
    for row in &plan.rows {
        match row {
            RowPlan::Static(columns) => table.static_row(columns, env)?,
            RowPlan::Repeat {
                start,
                end,
                columns,
                forward,
                normal,
            } => {
                let start = whole_number(&start.evaluate(&table.sandbox, env)?);
                let end = whole_number(&end.evaluate(&table.sandbox, env)?);
                if start > end {
                    continue;
                }
                table.repeat_rows(start, end, columns, forward, normal, env)?;
            }
        }
    }
    Ok(table.into_rows())
}

fn is_set(cell: &Cell, scope: &Value, env: &EvalEnv) -> bool {
    matches!(cell.evaluate(scope, env), Ok(Value::Bool(true)))
}

fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

/// True if `dep` has no value but its field is marked required
fn is_required_and_empty(dep: &str, sandbox: &Value, evaluated_schema: &Value) -> bool {
    if !is_empty_value(sandbox.pointer(dep)) {
        return false;
    }
    let field = path::resolve_schema_pointer(evaluated_schema, &path::dotted(dep));
    let required = field
        .strip_prefix('#')
        .and_then(|p| evaluated_schema.pointer(&format!("{}/rules/required", p)));
    match required {
        Some(Value::Bool(b)) => *b,
        Some(Value::Object(rule)) => rule.get("value") == Some(&Value::Bool(true)),
        _ => false,
    }
}

fn whole_number(value: &Value) -> i64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => 0.0,
    };
    n as i64
}

struct Table<'a> {
    sandbox: Value,
    own: &'a str,
}

impl Table<'_> {
    fn bindings(&mut self) -> Option<&mut Map<String, Value>> {
        self.sandbox.as_object_mut()
    }

    fn rows_mut(&mut self) -> Result<&mut Vec<Value>> {
        self.sandbox
            .pointer_mut(self.own)
            .and_then(Value::as_array_mut)
            .ok_or_else(|| EvalError::Logic(format!("table target {} is not an array", self.own)))
    }

    fn bind(&mut self, key: &str, value: Value) {
        if let Some(map) = self.bindings() {
            map.insert(key.to_string(), value);
        }
    }

    fn unbind(&mut self, columns: &[Column]) {
        if let Some(map) = self.bindings() {
            for col in columns {
                map.remove(&col.binding);
            }
        }
    }

    fn cell(&self, row: usize, col: &str) -> Value {
        self.sandbox
            .pointer(self.own)
            .and_then(|rows| rows.get(row))
            .and_then(|r| r.get(col))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn set_cell(&mut self, row: usize, col: &str, value: Value) -> Result<()> {
        if let Some(Value::Object(cells)) = self.rows_mut()?.get_mut(row) {
            cells.insert(col.to_string(), value);
        }
        Ok(())
    }

    fn into_rows(mut self) -> Value {
        self.sandbox
            .pointer_mut(self.own)
            .map(Value::take)
            .unwrap_or_else(|| Value::Array(Vec::new()))
    }

    fn static_row(&mut self, columns: &[Column], env: &EvalEnv) -> Result<()> {
        let mut row = Map::new();
        for col in columns {
            let value = col.cell.evaluate(&self.sandbox, env)?;
            self.bind(&col.binding, value.clone());
            row.insert(col.name.clone(), value);
        }
        self.unbind(columns);
        self.rows_mut()?.push(Value::Object(row));
        Ok(())
    }

    fn repeat_rows(
        &mut self,
        start: i64,
        end: i64,
        columns: &[Column],
        forward: &[usize],
        normal: &[usize],
        env: &EvalEnv,
    ) -> Result<()> {
        let first = self.rows_mut()?.len();
        let blank: Map<String, Value> = columns.iter().map(|c| (c.name.clone(), Value::Null)).collect();
        let count = (end - start + 1) as usize;
        self.rows_mut()?
            .extend(std::iter::repeat(Value::Object(blank)).take(count));
        self.bind(THRESHOLD, Value::from(end));

        for (offset, iteration) in (start..=end).enumerate() {
            self.unbind(columns);
            self.bind(ITERATION, Value::from(iteration));
            for &i in normal {
                let col = &columns[i];
                let value = col.cell.evaluate(&self.sandbox, env)?;
                self.bind(&col.binding, value.clone());
                self.set_cell(first + offset, &col.name, value)?;
            }
        }

        if !forward.is_empty() {
            self.converge(first, start, count, columns, forward, env)?;
        }

        self.unbind(columns);
        if let Some(map) = self.bindings() {
            map.remove(ITERATION);
            map.remove(THRESHOLD);
        }
        Ok(())
    }

    /// Re-evaluate forward columns until a sweep leaves every cell unchanged
    fn converge(
        &mut self,
        first: usize,
        start: i64,
        count: usize,
        columns: &[Column],
        forward: &[usize],
        env: &EvalEnv,
    ) -> Result<()> {
        let forward_names: HashSet<&str> = forward.iter().map(|&i| columns[i].name.as_str()).collect();
        let known: HashSet<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let mut previous: HashSet<(usize, usize)> = HashSet::new();

        for sweep in 1..=MAX_SWEEPS {
            let mut changed: HashSet<(usize, usize)> = HashSet::new();
            let backward = sweep % 2 == 1;
            let offsets: Box<dyn Iterator<Item = usize>> = if backward {
                Box::new((0..count).rev())
            } else {
                Box::new(0..count)
            };

            for offset in offsets {
                let row = first + offset;
                self.bind(ITERATION, Value::from(start + offset as i64));
                for col in columns {
                    let value = self.cell(row, &col.name);
                    self.bind(&col.binding, value);
                }

                for &i in forward {
                    let col = &columns[i];
                    let stale = sweep == 1
                        || col.reads_ahead
                        || col.refs.iter().any(|r| {
                            if !known.contains(r.as_str()) {
                                return true;
                            }
                            forward_names.contains(r.as_str())
                                && columns
                                    .iter()
                                    .position(|c| &c.name == r)
                                    .is_some_and(|j| previous.contains(&(row, j)))
                        });
                    if !stale {
                        continue;
                    }
                    let value = col.cell.evaluate(&self.sandbox, env)?;
                    if value != self.cell(row, &col.name) {
                        changed.insert((row, i));
                        self.set_cell(row, &col.name, value.clone())?;
                    }
                    self.bind(&col.binding, value);
                }
            }

            trace!(table = self.own, sweep, changed = changed.len(), "forward sweep");
            if changed.is_empty() {
                return Ok(());
            }
            previous = changed;
        }
        debug!(table = self.own, "forward columns did not settle");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ParsedSchema;
    use serde_json::json;

    fn run(schema: Value, data: Value) -> Value {
        let parsed = ParsedSchema::from_value(schema.clone()).unwrap();
        let key = parsed
            .sorted_evaluations()
            .iter()
            .find(|k| k.ends_with("/table"))
            .cloned()
            .unwrap();
        let ev = &parsed.evaluations[&key];
        let crate::schema::EvaluationKind::Table(plan) = &ev.kind else {
            panic!("table expected");
        };
        let mut scope = data;
        scope["$params"] = schema.get("$params").cloned().unwrap_or(json!({}));
        scope["$context"] = json!({});
        let own = ev.produces.clone().unwrap();
        evaluate_table(plan, &own, &ev.deps, &scope, &schema, &EvalEnv::default()).unwrap()
    }

    #[test]
    fn test_static_columns_see_earlier_columns() {
        let schema = json!({"$params": {"table": {"$table": [
            {"a": {"$evaluation": {"var": "x"}}, "b": {"$evaluation": {"*": [{"var": "$a"}, 2]}}},
            {"a": 1, "b": {"$evaluation": {"var": "$a"}}}
        ]}}});
        let rows = run(schema, json!({"x": 5}));
        assert_eq!(rows, json!([{"a": 5, "b": 10}, {"a": 1, "b": 1}]));
    }

    #[test]
    fn test_repeat_rows_bind_iteration_and_threshold() {
        let schema = json!({"$params": {"table": {"$table": [{"$repeat": [
            1,
            {"$evaluation": {"var": "term"}},
            {
                "year": {"$evaluation": {"var": "$iteration"}},
                "left": {"$evaluation": {"-": [{"var": "$threshold"}, {"var": "$year"}]}}
            }
        ]}]}}});
        let rows = run(schema, json!({"term": "3"}));
        assert_eq!(
            rows,
            json!([{"year": 1, "left": 2}, {"year": 2, "left": 1}, {"year": 3, "left": 0}])
        );
    }

    #[test]
    fn test_forward_columns_read_later_rows() {
        // remaining = this year's amount plus everything after it
        let schema = json!({"$params": {"table": {"$table": [{"$repeat": [0, 2, {
            "amount": {"$evaluation": {"*": [{"+": [{"var": "$iteration"}, 1]}, 10]}},
            "remaining": {"$evaluation": {"+": [
                {"var": "$amount"},
                {"if": [
                    {"<": [{"var": "$iteration"}, {"var": "$threshold"}]},
                    {"VALUEAT": [{"var": "$params.table"}, {"+": [{"var": "$iteration"}, 1]}, "remaining"]},
                    0
                ]}
            ]}}
        }]}]}}});
        let rows = run(schema, json!({}));
        assert_eq!(
            rows,
            json!([
                {"amount": 10, "remaining": 60},
                {"amount": 20, "remaining": 50},
                {"amount": 30, "remaining": 30}
            ])
        );
    }

    #[test]
    fn test_skip_clear_and_required_inputs_empty_the_table() {
        let table = |extra: Value| {
            let mut node = json!({"$table": [{"v": {"$evaluation": {"var": "age"}}}]});
            if let (Value::Object(n), Value::Object(e)) = (&mut node, extra) {
                n.extend(e);
            }
            json!({
                "$params": {"table": node},
                "properties": {"age": {"type": "number", "rules": {"required": {"value": true}}}}
            })
        };
        assert_eq!(run(table(json!({})), json!({"age": 30})), json!([{"v": 30}]));
        assert_eq!(run(table(json!({})), json!({})), json!([]));
        assert_eq!(run(table(json!({"$skip": true})), json!({"age": 30})), json!([]));
        assert_eq!(
            run(table(json!({"$clear": {"$evaluation": {">": [{"var": "age"}, 60]}}})), json!({"age": 70})),
            json!([])
        );
        // truthy but not `true`
        assert_eq!(run(table(json!({"$skip": 1})), json!({"age": 30})), json!([{"v": 30}]));
    }

    #[test]
    fn test_datas_are_bound_before_rows() {
        let schema = json!({"$params": {"table": {
            "$datas": [{"name": "rate", "data": {"$evaluation": {"*": [{"var": "base"}, 2]}}}],
            "$table": [{"$repeat": [1, 2, {"v": {"$evaluation": {"*": [{"var": "rate"}, {"var": "$iteration"}]}}}]}]
        }}});
        assert_eq!(run(schema, json!({"base": 3})), json!([{"v": 6}, {"v": 12}]));
    }

    #[test]
    fn test_inverted_range_produces_no_rows() {
        let schema = json!({"$params": {"table": {"$table": [{"$repeat": [5, 1, {"v": 1}]}]}}});
        assert_eq!(run(schema, json!({})), json!([]));
    }
}
