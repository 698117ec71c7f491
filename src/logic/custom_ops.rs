//! Spreadsheet-style operators
//!
//! Product schemas are usually ported from workbooks, so besides the JSON
//! Logic core the evaluator understands the workbook functions those
//! schemas lean on. Tables passed to the lookup family are arrays of row
//! objects; a missing or non-array table yields `null` (or `-1` for the
//! index lookups that promise a number).

use super::evaluator::{arg, eval_all, is_truthy, loose_eq, number_value, to_number, to_text, EvalEnv};
use super::{CompiledLogic, Operator};
use crate::error::Result;
use crate::path;
use chrono::{DateTime, Datelike, Duration, NaiveDate};
use serde_json::{Map, Value};

/// Name bound to the current index inside a `FOR` body
pub const LOOP_ITERATION: &str = "$loopIteration";

fn num(value: &Value) -> f64 {
    to_number(value).unwrap_or(0.0)
}

fn flatten(values: Vec<Value>) -> Vec<Value> {
    values
        .into_iter()
        .flat_map(|v| match v {
            Value::Array(items) => items,
            other => vec![other],
        })
        .collect()
}

/// `[x]` unwraps to `x`, as in `{"YEAR": [{"TODAY": []}]}`
fn unwrap_single(value: Value) -> Value {
    match value {
        Value::Array(mut items) if items.len() == 1 => items.swap_remove(0),
        other => other,
    }
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    let text = value.as_str()?;
    NaiveDate::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.fZ")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|d| d.date_naive()))
}

fn iso_date(date: NaiveDate) -> Value {
    Value::String(format!("{}T00:00:00.000Z", date.format("%Y-%m-%d")))
}

fn date_arg(args: &[CompiledLogic], i: usize, scope: &Value, env: &EvalEnv) -> Result<Option<NaiveDate>> {
    Ok(parse_date(&unwrap_single(arg(args, i, scope, env)?)))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn step_round(x: f64, decimals: i32, up: bool) -> f64 {
    let step = |v: f64| if up { v.ceil() } else { v.floor() };
    match decimals {
        0 => step(x),
        d if d > 0 => {
            let m = 10f64.powi(d);
            step(x * m) / m
        }
        d => {
            let m = 10f64.powi(-d);
            step(x / m) * m
        }
    }
}

fn chars_of(args: &[CompiledLogic], scope: &Value, env: &EvalEnv) -> Result<Vec<char>> {
    Ok(to_text(&arg(args, 0, scope, env)?).chars().collect())
}

fn count_arg(args: &[CompiledLogic], i: usize, default: usize, scope: &Value, env: &EvalEnv) -> Result<usize> {
    match args.get(i) {
        Some(a) => Ok(num(&a.evaluate(scope, env)?).max(0.0) as usize),
        None => Ok(default),
    }
}

fn index_value(idx: Option<usize>) -> Value {
    idx.map_or(Value::from(-1), Value::from)
}

pub(super) fn apply(op: Operator, args: &[CompiledLogic], scope: &Value, env: &EvalEnv) -> Result<Value> {
    match op {
        // --- math -----------------------------------------------------------
        Operator::Pow => {
            let base = num(&arg(args, 0, scope, env)?);
            let exp = num(&arg(args, 1, scope, env)?);
            Ok(number_value(base.powf(exp)))
        }
        Operator::RoundUp | Operator::RoundDown => {
            let x = num(&arg(args, 0, scope, env)?);
            let decimals = num(&arg(args, 1, scope, env)?) as i32;
            Ok(number_value(step_round(x, decimals, op == Operator::RoundUp)))
        }
        Operator::Sum => {
            let total = match arg(args, 0, scope, env)? {
                Value::Array(items) => match args.get(1) {
                    Some(field) => match field.evaluate(scope, env)? {
                        Value::String(name) => items.iter().filter_map(|row| row.get(name.as_str())).map(num).sum(),
                        _ => 0.0,
                    },
                    None => items.iter().map(num).sum(),
                },
                other => num(&other),
            };
            Ok(number_value(total))
        }
        Operator::Multiplies | Operator::Divides => {
            let values: Vec<f64> = flatten(eval_all(args, scope, env)?).iter().map(num).collect();
            let Some((first, rest)) = values.split_first() else {
                return Ok(Value::Null);
            };
            let out = rest.iter().fold(*first, |acc, n| match op {
                Operator::Multiplies => acc * n,
                _ if *n == 0.0 => acc,
                _ => acc / n,
            });
            Ok(number_value(out))
        }
        Operator::For => {
            let start = num(&arg(args, 0, scope, env)?) as i64;
            let end = num(&arg(args, 1, scope, env)?) as i64;
            let Some(body) = args.get(2) else {
                return Ok(Value::Array(Vec::new()));
            };
            let mut frame = match scope {
                Value::Object(_) => scope.clone(),
                _ => Value::Object(Map::new()),
            };
            let mut out = Vec::new();
            for i in start..end {
                if let Some(map) = frame.as_object_mut() {
                    map.insert(LOOP_ITERATION.to_string(), Value::from(i));
                }
                out.push(body.evaluate(&frame, env)?);
            }
            Ok(Value::Array(out))
        }

        // --- text -----------------------------------------------------------
        Operator::Len => Ok(Value::from(to_text(&arg(args, 0, scope, env)?).chars().count())),
        Operator::Search => {
            let (Value::String(find), Value::String(within)) = (arg(args, 0, scope, env)?, arg(args, 1, scope, env)?)
            else {
                return Ok(Value::Null);
            };
            let start = count_arg(args, 2, 1, scope, env)?.saturating_sub(1);
            let hay: String = within.to_lowercase().chars().skip(start).collect();
            Ok(match hay.find(&find.to_lowercase()) {
                Some(pos) => Value::from(start + hay[..pos].chars().count() + 1),
                None => Value::Null,
            })
        }
        Operator::Left => {
            let text = chars_of(args, scope, env)?;
            let n = count_arg(args, 1, 1, scope, env)?.min(text.len());
            Ok(Value::String(text[..n].iter().collect()))
        }
        Operator::Right => {
            let text = chars_of(args, scope, env)?;
            let n = count_arg(args, 1, 1, scope, env)?.min(text.len());
            Ok(Value::String(text[text.len() - n..].iter().collect()))
        }
        Operator::Mid => {
            let text = chars_of(args, scope, env)?;
            let start = count_arg(args, 1, 1, scope, env)?.saturating_sub(1).min(text.len());
            let end = start.saturating_add(count_arg(args, 2, 0, scope, env)?).min(text.len());
            Ok(Value::String(text[start..end].iter().collect()))
        }
        Operator::Concat => {
            let values = flatten(eval_all(args, scope, env)?);
            Ok(Value::String(values.iter().map(to_text).collect()))
        }
        Operator::SplitText => {
            let text = to_text(&arg(args, 0, scope, env)?);
            let sep = to_text(&arg(args, 1, scope, env)?);
            let idx = count_arg(args, 2, 0, scope, env)?;
            let part = text.split(sep.as_str()).nth(idx).unwrap_or_default();
            Ok(Value::String(part.to_string()))
        }
        Operator::SplitValue => {
            let text = to_text(&arg(args, 0, scope, env)?);
            let sep = to_text(&arg(args, 1, scope, env)?);
            Ok(Value::Array(
                text.split(sep.as_str()).map(|s| Value::String(s.to_string())).collect(),
            ))
        }

        // --- logical --------------------------------------------------------
        Operator::Xor => {
            let a = is_truthy(&arg(args, 0, scope, env)?);
            let b = is_truthy(&arg(args, 1, scope, env)?);
            Ok(Value::Bool(a != b))
        }
        Operator::IfNull => {
            let value = arg(args, 0, scope, env)?;
            if is_blank(&value) {
                arg(args, 1, scope, env)
            } else {
                Ok(value)
            }
        }
        Operator::IsEmpty => Ok(Value::Bool(is_blank(&arg(args, 0, scope, env)?))),
        Operator::Empty => Ok(Value::String(String::new())),

        // --- dates ----------------------------------------------------------
        Operator::Days => match (date_arg(args, 0, scope, env)?, date_arg(args, 1, scope, env)?) {
            (Some(end), Some(start)) => Ok(Value::from((end - start).num_days())),
            _ => Ok(Value::Null),
        },
        Operator::Year | Operator::Month | Operator::Day => Ok(match date_arg(args, 0, scope, env)? {
            Some(d) => Value::from(match op {
                Operator::Year => d.year(),
                Operator::Month => d.month() as i32,
                _ => d.day() as i32,
            }),
            None => Value::Null,
        }),
        Operator::Date => {
            let year = num(&arg(args, 0, scope, env)?) as i32;
            let month = num(&arg(args, 1, scope, env)?) as i32;
            let day = num(&arg(args, 2, scope, env)?) as i64;
            // Month and day may overflow in either direction and roll the date
            let months = year as i64 * 12 + (month as i64 - 1);
            let (y, m) = (months.div_euclid(12) as i32, months.rem_euclid(12) as u32 + 1);
            Ok(NaiveDate::from_ymd_opt(y, m, 1)
                .and_then(|first| first.checked_add_signed(Duration::days(day - 1)))
                .map_or(Value::Null, iso_date))
        }
        Operator::DateDif => {
            let (Some(start), Some(end)) = (date_arg(args, 0, scope, env)?, date_arg(args, 1, scope, env)?) else {
                return Ok(Value::Null);
            };
            let unit = to_text(&unwrap_single(arg(args, 2, scope, env)?)).to_uppercase();
            Ok(date_dif(start, end, &unit).map_or(Value::Null, Value::from))
        }
        Operator::YearFrac => {
            let (Some(start), Some(end)) = (date_arg(args, 0, scope, env)?, date_arg(args, 1, scope, env)?) else {
                return Ok(Value::Null);
            };
            let basis = num(&arg(args, 2, scope, env)?) as i32;
            let days = (end - start).num_days() as f64;
            let divisor = match basis {
                0 | 2 | 4 => 360.0,
                1 => 365.25,
                _ => 365.0,
            };
            Ok(number_value(days / divisor))
        }

        // --- table lookups --------------------------------------------------
        Operator::ValueAt => {
            let table = arg(args, 0, scope, env)?;
            let row_idx = num(&arg(args, 1, scope, env)?);
            if row_idx < 0.0 {
                return Ok(Value::Null);
            }
            let Some(row) = table.as_array().and_then(|rows| rows.get(row_idx as usize)) else {
                return Ok(Value::Null);
            };
            match args.get(2) {
                Some(col) => match col.evaluate(scope, env)? {
                    Value::String(name) => Ok(row.get(name.as_str()).cloned().unwrap_or(Value::Null)),
                    _ => Ok(Value::Null),
                },
                None => Ok(row.clone()),
            }
        }
        Operator::MaxAt => {
            let table = arg(args, 0, scope, env)?;
            let Value::String(col) = arg(args, 1, scope, env)? else {
                return Ok(Value::Null);
            };
            Ok(table
                .as_array()
                .and_then(|rows| rows.last())
                .and_then(|row| row.get(col.as_str()))
                .cloned()
                .unwrap_or(Value::Null))
        }
        Operator::IndexAt => {
            let lookup = arg(args, 0, scope, env)?;
            let table = arg(args, 1, scope, env)?;
            let Value::String(field) = arg(args, 2, scope, env)? else {
                return Ok(Value::from(-1));
            };
            let in_range = is_truthy(&arg(args, 3, scope, env)?);
            let Some(rows) = table.as_array() else {
                return Ok(Value::from(-1));
            };
            let target = num(&lookup);
            let found = rows.iter().position(|row| match row.get(field.as_str()) {
                Some(cell) if in_range => num(cell) <= target,
                Some(cell) => loose_eq(&lookup, cell),
                None => false,
            });
            Ok(index_value(found))
        }
        Operator::Match | Operator::Choose => {
            let table = arg(args, 0, scope, env)?;
            let mut pairs = Vec::new();
            for pair in args.get(1..).unwrap_or_default().chunks_exact(2) {
                let wanted = pair[0].evaluate(scope, env)?;
                if let Value::String(field) = pair[1].evaluate(scope, env)? {
                    pairs.push((wanted, field));
                }
            }
            let Some(rows) = table.as_array() else {
                return Ok(Value::Null);
            };
            let cell_matches = |row: &Value, (wanted, field): &(Value, String)| {
                row.get(field.as_str()).is_some_and(|cell| loose_eq(wanted, cell))
            };
            let found = rows.iter().position(|row| {
                row.is_object()
                    && if op == Operator::Match {
                        pairs.iter().all(|p| cell_matches(row, p))
                    } else {
                        pairs.iter().any(|p| cell_matches(row, p))
                    }
            });
            Ok(index_value(found))
        }
        Operator::MatchRange => {
            let table = arg(args, 0, scope, env)?;
            let mut bounds = Vec::new();
            for triple in args.get(1..).unwrap_or_default().chunks_exact(3) {
                let min_col = triple[0].evaluate(scope, env)?;
                let max_col = triple[1].evaluate(scope, env)?;
                let check = num(&triple[2].evaluate(scope, env)?);
                if let (Value::String(min_col), Value::String(max_col)) = (min_col, max_col) {
                    bounds.push((min_col, max_col, check));
                }
            }
            let Some(rows) = table.as_array() else {
                return Ok(Value::Null);
            };
            let found = rows.iter().position(|row| {
                row.is_object()
                    && bounds.iter().all(|(min_col, max_col, check)| {
                        let lo = row.get(min_col.as_str()).map_or(0.0, num);
                        let hi = row.get(max_col.as_str()).map_or(0.0, num);
                        *check >= lo && *check <= hi
                    })
            });
            Ok(index_value(found))
        }
        Operator::FindIndex => find_index(args, scope, env),

        _ => Err(crate::error::EvalError::Logic(format!("operator {:?} is not a workbook function", op))),
    }
}

fn date_dif(start: NaiveDate, end: NaiveDate, unit: &str) -> Option<i64> {
    let (sy, sm, sd) = (start.year() as i64, start.month() as i64, start.day() as i64);
    let (ey, em, ed) = (end.year() as i64, end.month() as i64, end.day() as i64);
    Some(match unit {
        "D" => (end - start).num_days(),
        "M" => (ey - sy) * 12 + (em - sm) - i64::from(ed < sd),
        "Y" => (ey - sy) - i64::from(em < sm || (em == sm && ed < sd)),
        "MD" if sd <= ed => ed - sd,
        "MD" => 30 - (sd - ed),
        "YM" => {
            let mut months = (em - sm).rem_euclid(12);
            if ed < sd {
                months = (months - 1).rem_euclid(12);
            }
            months
        }
        "YD" => {
            let mut anchor = start.with_year(end.year()).unwrap_or(start);
            if anchor > end {
                anchor = start.with_year(end.year() - 1).unwrap_or(start);
            }
            (end - anchor).num_days()
        }
        _ => return None,
    })
}

/// Index of the first row for which every condition holds
///
/// Conditions see the row's cells on top of the document; a bare string
/// condition tests the named cell.
fn find_index(args: &[CompiledLogic], scope: &Value, env: &EvalEnv) -> Result<Value> {
    let rows = match arg(args, 0, scope, env)? {
        Value::Array(rows) if !rows.is_empty() => rows,
        _ => return Ok(Value::from(-1)),
    };
    let conditions = args.get(1..).unwrap_or_default();
    if conditions.is_empty() {
        return Ok(Value::from(0));
    }

    let mut frame = match scope {
        Value::Object(_) => scope.clone(),
        _ => Value::Object(Map::new()),
    };
    for (idx, row) in rows.iter().enumerate() {
        let Value::Object(cells) = row else {
            continue;
        };
        let mut shadowed = Vec::with_capacity(cells.len());
        if let Some(map) = frame.as_object_mut() {
            for (k, v) in cells {
                shadowed.push((k.clone(), map.insert(k.clone(), v.clone())));
            }
        }

        let mut all = true;
        for condition in conditions {
            let holds = match condition {
                CompiledLogic::Literal(Value::String(name)) => frame
                    .pointer(&path::to_json_pointer(name))
                    .is_some_and(is_truthy),
                other => is_truthy(&other.evaluate(&frame, env)?),
            };
            if !holds {
                all = false;
                break;
            }
        }
        if all {
            return Ok(Value::from(idx));
        }

        if let Some(map) = frame.as_object_mut() {
            for (k, previous) in shadowed {
                match previous {
                    Some(v) => map.insert(k, v),
                    None => map.remove(&k),
                };
            }
        }
    }
    Ok(Value::from(-1))
}
