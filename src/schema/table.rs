//! `$table` plans
//!
//! A node carrying `$table` is computed as a whole: its value becomes an
//! array of row objects. The node may also carry
//!
//! - `$datas`: `[{"name": ..., "data": ...}]`, values bound before anything else
//! - `$skip` / `$clear`: when `true`, the table evaluates to `[]`
//!
//! Each entry of `$table` is either a static row (column name to cell) or a
//! repeat row `{"$repeat": [start, end, {column: cell}]}` producing one row per
//! iteration from `start` to `end` inclusive. Cells see `$iteration`,
//! `$threshold` (the end bound) and every earlier column of the same row as
//! `$<column>`. Columns whose cells read later rows of the table are
//! re-evaluated in alternating sweeps until the table stops changing.

use super::compile_evaluation;
use crate::error::{EvalError, Result};
use crate::logic::{CompiledLogic, EvalEnv, Operator};
use crate::path;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

pub(crate) const ITERATION: &str = "$iteration";
pub(crate) const THRESHOLD: &str = "$threshold";

/// A table cell: constant or compiled expression
#[derive(Debug, Clone)]
pub enum Cell {
    /// Constant
    Literal(Value),
    /// `$evaluation` node
    Logic(Arc<CompiledLogic>),
}

impl Cell {
    fn parse(node: &Value, at: &str) -> Result<Self> {
        match node.get("$evaluation") {
            Some(expr) if node.is_object() => Ok(Cell::Logic(Arc::new(compile_evaluation(expr, at)?))),
            _ => Ok(Cell::Literal(node.clone())),
        }
    }

    fn parse_optional(node: Option<&Value>, at: &str) -> Result<Self> {
        match node {
            Some(n) => Self::parse(n, at),
            None => Ok(Cell::Literal(Value::Bool(false))),
        }
    }

    /// Value of the cell against `scope`
    pub fn evaluate(&self, scope: &Value, env: &EvalEnv) -> Result<Value> {
        match self {
            Cell::Literal(v) => Ok(v.clone()),
            Cell::Logic(logic) => logic.evaluate(scope, env),
        }
    }

    fn logic(&self) -> Option<&CompiledLogic> {
        match self {
            Cell::Literal(_) => None,
            Cell::Logic(logic) => Some(logic),
        }
    }

    fn referenced_vars(&self) -> Vec<String> {
        self.logic().map(CompiledLogic::referenced_vars).unwrap_or_default()
    }

    fn is_cacheable(&self) -> bool {
        self.logic().map_or(true, CompiledLogic::is_cacheable)
    }
}

/// One column of a row plan
#[derive(Debug, Clone)]
pub struct Column {
    /// Key in the produced row
    pub name: String,
    /// Scope key the value is bound to for later columns (`$<name>`)
    pub binding: String,
    /// Cell producing the value
    pub cell: Cell,
    /// Other columns this cell reads, by name
    pub(crate) refs: Vec<String>,
    /// True if the cell reads a later row of the table
    pub(crate) reads_ahead: bool,
}

impl Column {
    fn parse(name: &str, node: &Value, at: &str) -> Result<Self> {
        let cell = Cell::parse(node, at)?;
        let iteration = format!("/{}", ITERATION);
        let threshold = format!("/{}", THRESHOLD);
        let refs = cell
            .referenced_vars()
            .into_iter()
            .filter(|v| v != &iteration && v != &threshold)
            .filter_map(|v| v.strip_prefix("/$").map(str::to_string))
            .collect();
        let ahead = cell.logic().is_some_and(reads_ahead);
        Ok(Column {
            name: name.to_string(),
            binding: format!("${}", name),
            cell,
            refs,
            reads_ahead: ahead,
        })
    }
}

/// One entry of `$table`
#[derive(Debug, Clone)]
pub enum RowPlan {
    /// A single row
    Static(Vec<Column>),
    /// One row per iteration
    Repeat {
        /// First iteration
        start: Cell,
        /// Last iteration, inclusive
        end: Cell,
        /// Row template
        columns: Vec<Column>,
        /// Columns reading later rows, and those depending on them
        forward: Vec<usize>,
        /// Every other column, in template order
        normal: Vec<usize>,
    },
}

impl RowPlan {
    fn cells(&self) -> Vec<&Cell> {
        match self {
            RowPlan::Static(columns) => columns.iter().map(|c| &c.cell).collect(),
            RowPlan::Repeat { start, end, columns, .. } => {
                [start, end].into_iter().chain(columns.iter().map(|c| &c.cell)).collect()
            }
        }
    }
}

/// Compiled `$table` node
#[derive(Debug, Clone)]
pub struct TablePlan {
    /// `$datas` bindings as (data pointer, cell)
    pub datas: Vec<(String, Cell)>,
    /// `$skip`
    pub skip: Cell,
    /// `$clear`
    pub clear: Cell,
    /// Row plans in declaration order
    pub rows: Vec<RowPlan>,
}

impl TablePlan {
    /// Compile the `$table` node at schema pointer `at`
    pub fn parse(node: &Map<String, Value>, at: &str) -> Result<Self> {
        let Some(Value::Array(rows)) = node.get("$table") else {
            return Err(EvalError::Schema(format!("$table at {} must be an array of rows", at)));
        };

        let mut datas = Vec::new();
        if let Some(Value::Array(entries)) = node.get("$datas") {
            for (idx, entry) in entries.iter().enumerate() {
                let Some(name) = entry.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let cell_at = format!("{}/$datas/{}/data", at, idx);
                let cell = Cell::parse(entry.get("data").unwrap_or(&Value::Null), &cell_at)?;
                datas.push((path::to_json_pointer(name), cell));
            }
        }

        let mut plans = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let Value::Object(row) = row else {
                continue;
            };
            let row_at = format!("{}/$table/{}", at, idx);
            match row.get("$repeat") {
                Some(Value::Array(repeat)) if repeat.len() == 3 => {
                    let Value::Object(template) = &repeat[2] else {
                        return Err(EvalError::Schema(format!("$repeat template at {} must be an object", row_at)));
                    };
                    let columns = template
                        .iter()
                        .map(|(name, cell)| Column::parse(name, cell, &format!("{}/$repeat/2/{}", row_at, name)))
                        .collect::<Result<Vec<_>>>()?;
                    let (forward, normal) = partition_columns(&columns);
                    plans.push(RowPlan::Repeat {
                        start: Cell::parse(&repeat[0], &format!("{}/$repeat/0", row_at))?,
                        end: Cell::parse(&repeat[1], &format!("{}/$repeat/1", row_at))?,
                        columns,
                        forward,
                        normal,
                    });
                }
                _ => {
                    let columns = row
                        .iter()
                        .filter(|(name, _)| name.as_str() != "$repeat")
                        .map(|(name, cell)| Column::parse(name, cell, &format!("{}/{}", row_at, name)))
                        .collect::<Result<Vec<_>>>()?;
                    plans.push(RowPlan::Static(columns));
                }
            }
        }

        Ok(TablePlan {
            datas,
            skip: Cell::parse_optional(node.get("$skip"), &format!("{}/$skip", at))?,
            clear: Cell::parse_optional(node.get("$clear"), &format!("{}/$clear", at))?,
            rows: plans,
        })
    }

    fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.datas
            .iter()
            .map(|(_, cell)| cell)
            .chain([&self.skip, &self.clear])
            .chain(self.rows.iter().flat_map(RowPlan::cells))
    }

    /// Document pointers read by the table, excluding its own bindings
    pub fn referenced_vars(&self, own_pointer: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for cell in self.cells() {
            for var in cell.referenced_vars() {
                let internal = var.starts_with("/$") && !var.starts_with("/$params") && !var.starts_with("/$context");
                let bound = path::overlaps(&var, own_pointer) || self.datas.iter().any(|(p, _)| path::overlaps(&var, p));
                if !internal && !bound && !out.contains(&var) {
                    out.push(var);
                }
            }
        }
        out
    }

    /// True if every cell may be served from the evaluation cache
    pub fn is_cacheable(&self) -> bool {
        self.cells().all(Cell::is_cacheable)
    }
}

/// True for `VALUEAT(table, $iteration + n, ...)` with a positive literal `n`
fn reads_ahead(logic: &CompiledLogic) -> bool {
    match logic {
        CompiledLogic::Literal(_) => false,
        CompiledLogic::Array(items) => items.iter().any(reads_ahead),
        CompiledLogic::Var { default, .. } | CompiledLogic::DynamicVar { default, .. } => {
            default.as_deref().is_some_and(reads_ahead)
        }
        CompiledLogic::Op { op, args } => {
            let ahead = *op == Operator::ValueAt && args.get(1).is_some_and(is_iteration_plus_positive);
            ahead || args.iter().any(reads_ahead)
        }
    }
}

fn is_iteration_plus_positive(logic: &CompiledLogic) -> bool {
    let CompiledLogic::Op { op: Operator::Add, args } = logic else {
        return false;
    };
    let iteration = format!("/{}", ITERATION);
    let has_iteration = args.iter().any(|a| a.referenced_vars().contains(&iteration));
    let has_positive = args
        .iter()
        .any(|a| matches!(a, CompiledLogic::Literal(Value::Number(n)) if n.as_f64().is_some_and(|f| f > 0.0)));
    has_iteration && has_positive
}

/// Split columns into forward-reading ones (with everything depending on them) and the rest
fn partition_columns(columns: &[Column]) -> (Vec<usize>, Vec<usize>) {
    let mut forward: HashSet<&str> = columns
        .iter()
        .filter(|c| c.reads_ahead)
        .map(|c| c.name.as_str())
        .collect();
    loop {
        let before = forward.len();
        for col in columns {
            if !forward.contains(col.name.as_str()) && col.refs.iter().any(|r| forward.contains(r.as_str())) {
                forward.insert(col.name.as_str());
            }
        }
        if forward.len() == before {
            break;
        }
    }
    (0..columns.len()).partition(|&i| forward.contains(columns[i].name.as_str()))
}
