use super::{custom_ops, CompiledLogic, Operator};
use crate::error::{EvalError, Result};
use chrono::{FixedOffset, Utc};
use serde_json::{Map, Number, Value};

/// Per-call evaluation settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalEnv {
    /// Minutes east of UTC used by `today`/`now`; `None` means UTC
    pub timezone_offset: Option<i32>,
}

/// JSON Logic truthiness
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// Convert an f64 result back to JSON, removing float noise
///
/// Results within 1e-9 of an integer are emitted as integers; other results
/// are rounded to ten decimal places. Non-finite results become null.
pub fn number_value(x: f64) -> Value {
    if !x.is_finite() {
        return Value::Null;
    }
    let rounded = x.round();
    if (x - rounded).abs() < 1e-9 && rounded.abs() < 9_007_199_254_740_992.0 {
        return Value::Number(Number::from(rounded as i64));
    }
    let cleaned = if x.abs() < 1e8 {
        (x * 1e10).round() / 1e10
    } else {
        x
    };
    Number::from_f64(cleaned).map_or(Value::Null, Value::Number)
}

pub(super) fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                Some(0.0)
            } else {
                t.parse().ok()
            }
        }
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        _ => None,
    }
}

pub(super) fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

pub(super) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(_), _) | (_, Value::Number(_)) | (Value::Bool(_), _) | (_, Value::Bool(_)) => {
            match (to_number(a), to_number(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        _ => a == b,
    }
}

pub(super) fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn less_than(a: &Value, b: &Value, or_equal: bool) -> bool {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        if x.parse::<f64>().is_err() || y.parse::<f64>().is_err() {
            return if or_equal { x <= y } else { x < y };
        }
    }
    match (to_number(a), to_number(b)) {
        (Some(x), Some(y)) => {
            if or_equal {
                x <= y
            } else {
                x < y
            }
        }
        _ => false,
    }
}

fn lookup<'a>(scope: &'a Value, pointer: &str) -> Option<&'a Value> {
    if pointer.is_empty() {
        Some(scope)
    } else {
        scope.pointer(pointer)
    }
}

fn is_missing(scope: &Value, pointer: &str) -> bool {
    matches!(lookup(scope, pointer), None | Some(Value::Null))
        || matches!(lookup(scope, pointer), Some(Value::String(s)) if s.is_empty())
}

impl CompiledLogic {
    /// Evaluate against `scope`
    pub fn evaluate(&self, scope: &Value, env: &EvalEnv) -> Result<Value> {
        match self {
            CompiledLogic::Literal(v) => Ok(v.clone()),
            CompiledLogic::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|i| i.evaluate(scope, env))
                    .collect::<Result<_>>()?,
            )),
            CompiledLogic::Var { path, default } => match lookup(scope, path) {
                Some(v) if !v.is_null() => Ok(v.clone()),
                _ => match default {
                    Some(d) => d.evaluate(scope, env),
                    None => Ok(Value::Null),
                },
            },
            CompiledLogic::DynamicVar { path, default } => {
                let key = path.evaluate(scope, env)?;
                let pointer = crate::path::to_json_pointer(&to_text(&key));
                match lookup(scope, &pointer) {
                    Some(v) if !v.is_null() => Ok(v.clone()),
                    _ => match default {
                        Some(d) => d.evaluate(scope, env),
                        None => Ok(Value::Null),
                    },
                }
            }
            CompiledLogic::Op { op, args } => apply(*op, args, scope, env),
        }
    }
}

pub(super) fn eval_all(args: &[CompiledLogic], scope: &Value, env: &EvalEnv) -> Result<Vec<Value>> {
    args.iter().map(|a| a.evaluate(scope, env)).collect()
}

pub(super) fn arg(args: &[CompiledLogic], i: usize, scope: &Value, env: &EvalEnv) -> Result<Value> {
    match args.get(i) {
        Some(a) => a.evaluate(scope, env),
        None => Ok(Value::Null),
    }
}

pub(super) fn numbers(values: &[Value]) -> Option<Vec<f64>> {
    values.iter().map(to_number).collect()
}

fn apply(op: Operator, args: &[CompiledLogic], scope: &Value, env: &EvalEnv) -> Result<Value> {
    match op {
        Operator::If => {
            let mut i = 0;
            while i + 1 < args.len() {
                if is_truthy(&args[i].evaluate(scope, env)?) {
                    return args[i + 1].evaluate(scope, env);
                }
                i += 2;
            }
            if i < args.len() {
                args[i].evaluate(scope, env)
            } else {
                Ok(Value::Null)
            }
        }
        Operator::And => {
            let mut last = Value::Bool(true);
            for a in args {
                last = a.evaluate(scope, env)?;
                if !is_truthy(&last) {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        Operator::Or => {
            let mut last = Value::Bool(false);
            for a in args {
                last = a.evaluate(scope, env)?;
                if is_truthy(&last) {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        Operator::Not => Ok(Value::Bool(!is_truthy(&arg(args, 0, scope, env)?))),
        Operator::Truthy => Ok(Value::Bool(is_truthy(&arg(args, 0, scope, env)?))),
        Operator::Eq => Ok(Value::Bool(loose_eq(&arg(args, 0, scope, env)?, &arg(args, 1, scope, env)?))),
        Operator::Ne => Ok(Value::Bool(!loose_eq(&arg(args, 0, scope, env)?, &arg(args, 1, scope, env)?))),
        Operator::StrictEq => Ok(Value::Bool(strict_eq(&arg(args, 0, scope, env)?, &arg(args, 1, scope, env)?))),
        Operator::StrictNe => Ok(Value::Bool(!strict_eq(&arg(args, 0, scope, env)?, &arg(args, 1, scope, env)?))),
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            let v = eval_all(args, scope, env)?;
            if v.len() < 2 {
                return Ok(Value::Bool(false));
            }
            let result = match op {
                Operator::Lt => {
                    less_than(&v[0], &v[1], false) && (v.len() < 3 || less_than(&v[1], &v[2], false))
                }
                Operator::Le => {
                    less_than(&v[0], &v[1], true) && (v.len() < 3 || less_than(&v[1], &v[2], true))
                }
                Operator::Gt => less_than(&v[1], &v[0], false),
                _ => less_than(&v[1], &v[0], true),
            };
            Ok(Value::Bool(result))
        }
        Operator::Add => {
            let v = eval_all(args, scope, env)?;
            Ok(numbers(&v).map_or(Value::Null, |n| number_value(n.iter().sum())))
        }
        Operator::Mul => {
            let v = eval_all(args, scope, env)?;
            Ok(numbers(&v).map_or(Value::Null, |n| number_value(n.iter().product())))
        }
        Operator::Sub => {
            let v = eval_all(args, scope, env)?;
            match numbers(&v).as_deref() {
                Some([x]) => Ok(number_value(-x)),
                Some([x, y, ..]) => Ok(number_value(x - y)),
                _ => Ok(Value::Null),
            }
        }
        Operator::Div | Operator::Mod => {
            let v = eval_all(args, scope, env)?;
            match numbers(&v).as_deref() {
                Some([_, y, ..]) if *y == 0.0 => Ok(Value::Null),
                Some([x, y, ..]) if op == Operator::Div => Ok(number_value(x / y)),
                Some([x, y, ..]) => Ok(number_value(x % y)),
                _ => Ok(Value::Null),
            }
        }
        Operator::Min | Operator::Max => {
            let v = eval_all(args, scope, env)?;
            let flat: Vec<Value> = v
                .into_iter()
                .flat_map(|x| match x {
                    Value::Array(items) => items,
                    other => vec![other],
                })
                .collect();
            let Some(n) = numbers(&flat).filter(|n| !n.is_empty()) else {
                return Ok(Value::Null);
            };
            let pick = if op == Operator::Min {
                n.iter().cloned().fold(f64::INFINITY, f64::min)
            } else {
                n.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
            };
            Ok(number_value(pick))
        }
        Operator::Round => {
            let v = arg(args, 0, scope, env)?;
            let digits = to_number(&arg(args, 1, scope, env)?).unwrap_or(0.0) as i32;
            match to_number(&v) {
                Some(x) => {
                    let factor = 10f64.powi(digits);
                    Ok(number_value((x * factor).round() / factor))
                }
                None => Ok(Value::Null),
            }
        }
        Operator::Abs => Ok(to_number(&arg(args, 0, scope, env)?).map_or(Value::Null, |x| number_value(x.abs()))),
        Operator::Cat => {
            let v = eval_all(args, scope, env)?;
            Ok(Value::String(v.iter().map(to_text).collect()))
        }
        Operator::Substr => {
            let text: Vec<char> = to_text(&arg(args, 0, scope, env)?).chars().collect();
            let len = text.len() as i64;
            let start = to_number(&arg(args, 1, scope, env)?).unwrap_or(0.0) as i64;
            let start = if start < 0 { (len + start).max(0) } else { start.min(len) };
            let end = match args.get(2) {
                Some(a) => {
                    let n = to_number(&a.evaluate(scope, env)?).unwrap_or(0.0) as i64;
                    if n < 0 {
                        (len + n).max(start)
                    } else {
                        (start + n).min(len)
                    }
                }
                None => len,
            };
            Ok(Value::String(text[start as usize..end as usize].iter().collect()))
        }
        Operator::Upper => Ok(Value::String(to_text(&arg(args, 0, scope, env)?).to_uppercase())),
        Operator::Lower => Ok(Value::String(to_text(&arg(args, 0, scope, env)?).to_lowercase())),
        Operator::Length => Ok(match arg(args, 0, scope, env)? {
            Value::String(s) => Value::from(s.chars().count()),
            Value::Array(items) => Value::from(items.len()),
            _ => Value::from(0),
        }),
        Operator::In => {
            let needle = arg(args, 0, scope, env)?;
            Ok(Value::Bool(match arg(args, 1, scope, env)? {
                Value::String(hay) => hay.contains(&to_text(&needle)),
                Value::Array(items) => items.iter().any(|i| strict_eq(i, &needle)),
                _ => false,
            }))
        }
        Operator::Merge => {
            let mut out = Vec::new();
            for v in eval_all(args, scope, env)? {
                match v {
                    Value::Array(items) => out.extend(items),
                    other => out.push(other),
                }
            }
            Ok(Value::Array(out))
        }
        Operator::Missing => {
            let mut keys = eval_all(args, scope, env)?;
            if let Some(Value::Array(inner)) = keys.first() {
                keys = inner.clone();
            }
            let missing: Vec<Value> = keys
                .into_iter()
                .filter(|k| is_missing(scope, &crate::path::to_json_pointer(&to_text(k))))
                .collect();
            Ok(Value::Array(missing))
        }
        Operator::MissingSome => {
            let need = to_number(&arg(args, 0, scope, env)?).unwrap_or(0.0) as usize;
            let keys = match arg(args, 1, scope, env)? {
                Value::Array(items) => items,
                other => vec![other],
            };
            let missing: Vec<Value> = keys
                .iter()
                .filter(|k| is_missing(scope, &crate::path::to_json_pointer(&to_text(k))))
                .cloned()
                .collect();
            if keys.len() - missing.len() >= need {
                Ok(Value::Array(Vec::new()))
            } else {
                Ok(Value::Array(missing))
            }
        }
        Operator::Map | Operator::Filter | Operator::All | Operator::Some | Operator::None => {
            let items = match arg(args, 0, scope, env)? {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            let Some(callback) = args.get(1) else {
                return Ok(Value::Null);
            };
            match op {
                Operator::Map => Ok(Value::Array(
                    items
                        .iter()
                        .map(|i| callback.evaluate(i, env))
                        .collect::<Result<_>>()?,
                )),
                Operator::Filter => {
                    let mut kept = Vec::new();
                    for item in items {
                        if is_truthy(&callback.evaluate(&item, env)?) {
                            kept.push(item);
                        }
                    }
                    Ok(Value::Array(kept))
                }
                Operator::All => {
                    if items.is_empty() {
                        return Ok(Value::Bool(false));
                    }
                    for item in &items {
                        if !is_truthy(&callback.evaluate(item, env)?) {
                            return Ok(Value::Bool(false));
                        }
                    }
                    Ok(Value::Bool(true))
                }
                _ => {
                    let mut any = false;
                    for item in &items {
                        if is_truthy(&callback.evaluate(item, env)?) {
                            any = true;
                            break;
                        }
                    }
                    Ok(Value::Bool(if op == Operator::Some { any } else { !any }))
                }
            }
        }
        Operator::Reduce => {
            let items = match arg(args, 0, scope, env)? {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            let mut acc = arg(args, 2, scope, env)?;
            let Some(callback) = args.get(1) else {
                return Ok(acc);
            };
            for item in items {
                let mut frame = Map::new();
                frame.insert("current".to_string(), item);
                frame.insert("accumulator".to_string(), acc);
                acc = callback.evaluate(&Value::Object(frame), env)?;
            }
            Ok(acc)
        }
        Operator::Today | Operator::Now => {
            let offset = FixedOffset::east_opt(env.timezone_offset.unwrap_or(0) * 60)
                .ok_or_else(|| EvalError::Logic("timezone offset out of range".to_string()))?;
            let now = Utc::now().with_timezone(&offset);
            if op == Operator::Today {
                Ok(Value::String(now.format("%Y-%m-%d").to_string()))
            } else {
                Ok(Value::String(now.to_rfc3339()))
            }
        }
        _ => custom_ops::apply(op, args, scope, env),
    }
}
