//! JSON Logic compilation
//!
//! Expressions are compiled once into a [`CompiledLogic`] tree and evaluated
//! many times against different scopes. Compilation resolves operator names,
//! normalizes variable paths to JSON pointers and records which data paths an
//! expression reads, which the schema parser uses for dependency ordering and
//! the evaluation cache uses for invalidation.
//!
//! # Example
//!
//! ```rust
//! use json_eval::logic::{compile, EvalEnv};
//! use serde_json::json;
//!
//! let logic = compile(&json!({"+": [{"var": "a"}, 2]})).unwrap();
//! let out = logic.evaluate(&json!({"a": 40}), &EvalEnv::default()).unwrap();
//! assert_eq!(out, json!(42));
//! ```

mod custom_ops;
mod evaluator;
pub mod store;

pub use evaluator::{is_truthy, number_value, EvalEnv};
pub use store::{CompiledLogicStats, CompiledLogicStore};

use crate::error::{EvalError, Result};
use crate::path;
use serde_json::Value;

/// Built-in operators
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Missing,
    MissingSome,
    If,
    Eq,
    StrictEq,
    Ne,
    StrictNe,
    Not,
    Truthy,
    And,
    Or,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
    Round,
    Abs,
    Cat,
    Substr,
    Upper,
    Lower,
    Length,
    In,
    Merge,
    Map,
    Filter,
    Reduce,
    All,
    Some,
    None,
    Today,
    Now,
    Pow,
    RoundUp,
    RoundDown,
    Sum,
    Multiplies,
    Divides,
    For,
    Len,
    Search,
    Left,
    Right,
    Mid,
    Concat,
    SplitText,
    SplitValue,
    Xor,
    IfNull,
    IsEmpty,
    Empty,
    Days,
    Year,
    Month,
    Day,
    Date,
    DateDif,
    YearFrac,
    ValueAt,
    MaxAt,
    IndexAt,
    Match,
    MatchRange,
    Choose,
    FindIndex,
}

impl Operator {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "missing" => Operator::Missing,
            "missing_some" => Operator::MissingSome,
            "if" | "?:" => Operator::If,
            "==" => Operator::Eq,
            "===" => Operator::StrictEq,
            "!=" => Operator::Ne,
            "!==" => Operator::StrictNe,
            "!" | "not" => Operator::Not,
            "!!" => Operator::Truthy,
            "and" => Operator::And,
            "or" => Operator::Or,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "+" => Operator::Add,
            "-" => Operator::Sub,
            "*" => Operator::Mul,
            "/" => Operator::Div,
            "%" => Operator::Mod,
            "min" => Operator::Min,
            "max" => Operator::Max,
            "round" | "ROUND" => Operator::Round,
            "abs" => Operator::Abs,
            "cat" => Operator::Cat,
            "substr" => Operator::Substr,
            "upper" => Operator::Upper,
            "lower" => Operator::Lower,
            "length" => Operator::Length,
            "in" => Operator::In,
            "merge" => Operator::Merge,
            "map" => Operator::Map,
            "filter" => Operator::Filter,
            "reduce" => Operator::Reduce,
            "all" => Operator::All,
            "some" => Operator::Some,
            "none" => Operator::None,
            "today" | "TODAY" => Operator::Today,
            "now" | "NOW" => Operator::Now,
            "pow" | "**" => Operator::Pow,
            "roundup" | "ROUNDUP" => Operator::RoundUp,
            "rounddown" | "ROUNDDOWN" => Operator::RoundDown,
            "sum" | "SUM" => Operator::Sum,
            "MULTIPLIES" => Operator::Multiplies,
            "DIVIDES" => Operator::Divides,
            "FOR" => Operator::For,
            "len" | "LEN" => Operator::Len,
            "search" | "SEARCH" => Operator::Search,
            "left" | "LEFT" => Operator::Left,
            "right" | "RIGHT" => Operator::Right,
            "mid" | "MID" => Operator::Mid,
            "concat" | "CONCAT" => Operator::Concat,
            "splittext" | "SPLITTEXT" => Operator::SplitText,
            "splitvalue" | "SPLITVALUE" => Operator::SplitValue,
            "xor" => Operator::Xor,
            "ifnull" | "IFNULL" => Operator::IfNull,
            "isempty" | "ISEMPTY" => Operator::IsEmpty,
            "empty" | "EMPTY" => Operator::Empty,
            "days" | "DAYS" => Operator::Days,
            "year" | "YEAR" => Operator::Year,
            "month" | "MONTH" => Operator::Month,
            "day" | "DAY" => Operator::Day,
            "date" | "DATE" => Operator::Date,
            "DATEDIF" => Operator::DateDif,
            "YEARFRAC" => Operator::YearFrac,
            "VALUEAT" => Operator::ValueAt,
            "MAXAT" => Operator::MaxAt,
            "INDEXAT" => Operator::IndexAt,
            "MATCH" => Operator::Match,
            "MATCHRANGE" => Operator::MatchRange,
            "CHOOSE" => Operator::Choose,
            "FINDINDEX" => Operator::FindIndex,
            _ => return None,
        })
    }

    /// Operators whose second argument runs once per array item
    fn iterates(self) -> bool {
        matches!(
            self,
            Operator::Map
                | Operator::Filter
                | Operator::Reduce
                | Operator::All
                | Operator::Some
                | Operator::None
        )
    }
}

/// A compiled expression tree
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledLogic {
    /// Constant value
    Literal(Value),
    /// Array whose elements are evaluated
    Array(Vec<CompiledLogic>),
    /// Data lookup by JSON pointer
    Var {
        path: String,
        default: Option<Box<CompiledLogic>>,
    },
    /// Data lookup whose path is computed at run time
    DynamicVar {
        path: Box<CompiledLogic>,
        default: Option<Box<CompiledLogic>>,
    },
    /// Operator application
    Op { op: Operator, args: Vec<CompiledLogic> },
}

/// Compile a JSON Logic expression
pub fn compile(expr: &Value) -> Result<CompiledLogic> {
    match expr {
        Value::Array(items) => Ok(CompiledLogic::Array(
            items.iter().map(compile).collect::<Result<_>>()?,
        )),
        Value::Object(map) if map.is_empty() => Ok(CompiledLogic::Literal(expr.clone())),
        Value::Object(map) => {
            if map.len() != 1 {
                return Err(EvalError::Logic(format!(
                    "Logic object must have exactly one operator, found {} keys",
                    map.len()
                )));
            }
            let Some((name, raw_args)) = map.iter().next() else {
                return Ok(CompiledLogic::Literal(expr.clone()));
            };
            compile_operation(name, raw_args)
        }
        _ => Ok(CompiledLogic::Literal(expr.clone())),
    }
}

fn arg_list(raw_args: &Value) -> Vec<&Value> {
    match raw_args {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn compile_operation(name: &str, raw_args: &Value) -> Result<CompiledLogic> {
    match name {
        "var" => compile_var(raw_args, false),
        "$ref" | "ref" => compile_var(raw_args, true),
        _ => {
            let op = Operator::from_name(name)
                .ok_or_else(|| EvalError::Logic(format!("Unknown operator: {}", name)))?;
            let args = arg_list(raw_args)
                .into_iter()
                .map(compile)
                .collect::<Result<Vec<_>>>()?;
            Ok(CompiledLogic::Op { op, args })
        }
    }
}

fn compile_var(raw_args: &Value, schema_ref: bool) -> Result<CompiledLogic> {
    let args = arg_list(raw_args);
    let default = match args.get(1) {
        Some(d) => Some(Box::new(compile(d)?)),
        None => None,
    };
    match args.first() {
        None | Some(Value::Null) => Ok(CompiledLogic::Var {
            path: String::new(),
            default,
        }),
        Some(Value::String(p)) => {
            let pointer = if schema_ref {
                path::data_pointer(p)
            } else {
                path::to_json_pointer(p)
            };
            Ok(CompiledLogic::Var {
                path: pointer,
                default,
            })
        }
        Some(Value::Number(n)) => Ok(CompiledLogic::Var {
            path: format!("/{}", n),
            default,
        }),
        Some(other) => Ok(CompiledLogic::DynamicVar {
            path: Box::new(compile(other)?),
            default,
        }),
    }
}

impl CompiledLogic {
    /// Data pointers read by this expression, in first-use order
    ///
    /// Variables inside per-item callbacks of `map`/`filter`/`reduce` refer
    /// to the item, not the document, and are not reported.
    pub fn referenced_vars(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut Vec<String>) {
        match self {
            CompiledLogic::Literal(_) => {}
            CompiledLogic::Array(items) => items.iter().for_each(|i| i.collect_vars(out)),
            CompiledLogic::Var { path, default } => {
                push_unique(out, path);
                if let Some(d) = default {
                    d.collect_vars(out);
                }
            }
            CompiledLogic::DynamicVar { path, default } => {
                path.collect_vars(out);
                if let Some(d) = default {
                    d.collect_vars(out);
                }
            }
            CompiledLogic::Op { op, args } => {
                if op.iterates() {
                    if let Some(source) = args.first() {
                        source.collect_vars(out);
                    }
                    if *op == Operator::Reduce {
                        if let Some(init) = args.get(2) {
                            init.collect_vars(out);
                        }
                    }
                    return;
                }
                if *op == Operator::FindIndex {
                    if let Some(table) = args.first() {
                        table.collect_vars(out);
                    }
                    return;
                }
                let key_args = match op {
                    Operator::Missing => args.as_slice(),
                    Operator::MissingSome => args.get(1..).unwrap_or_default(),
                    _ => &[],
                };
                for key in literal_keys(key_args) {
                    push_unique(out, &path::to_json_pointer(key));
                }
                args.iter().for_each(|a| a.collect_vars(out));
            }
        }
    }

    /// True if every document read is reported by [`referenced_vars`]
    ///
    /// Computed variable paths, whole-scope reads (`{"var": ""}` outside a
    /// callback), `missing` keys that are not literals and `FINDINDEX`
    /// conditions (which fall back to document data) are not, so their
    /// results must not be reused on a dependency-hash match.
    ///
    /// [`referenced_vars`]: CompiledLogic::referenced_vars
    pub fn reads_are_tracked(&self) -> bool {
        match self {
            CompiledLogic::Literal(_) => true,
            CompiledLogic::Array(items) => items.iter().all(CompiledLogic::reads_are_tracked),
            CompiledLogic::Var { path, default } => {
                !path.is_empty() && default.as_ref().map_or(true, |d| d.reads_are_tracked())
            }
            CompiledLogic::DynamicVar { .. } => false,
            CompiledLogic::Op { op, args } => {
                if op.iterates() {
                    let source = args.first().map_or(true, |a| a.reads_are_tracked());
                    let init = *op != Operator::Reduce || args.get(2).map_or(true, |a| a.reads_are_tracked());
                    return source && init;
                }
                if *op == Operator::FindIndex && args.len() > 1 {
                    return false;
                }
                let keys_are_literal = match op {
                    Operator::Missing => keys_are_literal(args),
                    Operator::MissingSome => keys_are_literal(args.get(1..).unwrap_or_default()),
                    _ => true,
                };
                keys_are_literal && args.iter().all(CompiledLogic::reads_are_tracked)
            }
        }
    }

    /// True if the result may be reused while its referenced data is unchanged
    pub fn is_cacheable(&self) -> bool {
        !self.is_volatile() && self.reads_are_tracked()
    }

    /// True if the result depends on the wall clock
    pub fn is_volatile(&self) -> bool {
        match self {
            CompiledLogic::Literal(_) => false,
            CompiledLogic::Array(items) => items.iter().any(CompiledLogic::is_volatile),
            CompiledLogic::Var { default, .. } => default.as_ref().is_some_and(|d| d.is_volatile()),
            CompiledLogic::DynamicVar { path, default } => {
                path.is_volatile() || default.as_ref().is_some_and(|d| d.is_volatile())
            }
            CompiledLogic::Op { op, args } => {
                matches!(op, Operator::Today | Operator::Now)
                    || args.iter().any(CompiledLogic::is_volatile)
            }
        }
    }
}

fn push_unique(out: &mut Vec<String>, pointer: &str) {
    if !pointer.is_empty() && !out.iter().any(|p| p == pointer) {
        out.push(pointer.to_string());
    }
}

/// String keys named by `missing`-style arguments, flattening literal arrays
fn literal_keys(args: &[CompiledLogic]) -> Vec<&str> {
    let mut keys = Vec::new();
    for a in args {
        match a {
            CompiledLogic::Literal(Value::String(k)) => keys.push(k.as_str()),
            CompiledLogic::Literal(Value::Array(items)) => {
                keys.extend(items.iter().filter_map(Value::as_str));
            }
            CompiledLogic::Array(items) => {
                for item in items {
                    if let CompiledLogic::Literal(Value::String(k)) = item {
                        keys.push(k.as_str());
                    }
                }
            }
            _ => {}
        }
    }
    keys
}

fn keys_are_literal(args: &[CompiledLogic]) -> bool {
    args.iter().all(|a| match a {
        CompiledLogic::Literal(Value::String(_)) => true,
        CompiledLogic::Array(items) => items
            .iter()
            .all(|i| matches!(i, CompiledLogic::Literal(Value::String(_)))),
        _ => false,
    })
}
