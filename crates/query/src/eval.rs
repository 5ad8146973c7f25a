//! Scalar expression evaluator.
//!
//! Evaluates IR expressions against (namespaced) row values. Evaluation is
//! total: missing fields and type mismatches yield `Null`, and predicates
//! treat `Null` as false. Validation of function names and ref paths
//! happens once at compile time via `validate_expr`.

use crate::ir::Expr;
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;
use rivulet_core::{pattern_match, Error, Result, Value};

/// Function names known to the evaluator.
const KNOWN_FUNCTIONS: &[&str] = &[
    "eq", "gt", "gte", "lt", "lte", "and", "or", "not", "in", "length", "concat", "upper",
    "lower", "like", "ilike", "add", "sub", "mul", "div", "mod",
];

/// Validates an expression tree: function names must be known, ref paths
/// non-empty, aggregate names supported.
pub fn validate_expr(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Ref(r) => {
            if r.path.is_empty() {
                return Err(Error::EmptyRefPath);
            }
            Ok(())
        }
        Expr::Value(_) => Ok(()),
        Expr::Func { name, args } => {
            if !KNOWN_FUNCTIONS.contains(&name.as_str()) {
                return Err(Error::unknown_function(name.clone()));
            }
            for arg in args {
                validate_expr(arg)?;
            }
            Ok(())
        }
        Expr::Agg { func, arg } => {
            if rivulet_incremental::AggFunc::parse(func).is_none() {
                return Err(Error::unsupported_aggregate(func.clone()));
            }
            if let Some(arg) = arg {
                validate_expr(arg)?;
            }
            Ok(())
        }
    }
}

/// Evaluates an expression against a row.
///
/// Aggregate nodes evaluate to `Null` here; the group stage computes them
/// before rows reach any scalar context.
pub fn eval(expr: &Expr, row: &Value) -> Value {
    match expr {
        Expr::Ref(r) => row
            .get_path(r.path.segments())
            .cloned()
            .unwrap_or(Value::Null),
        Expr::Value(v) => v.clone(),
        Expr::Func { name, args } => eval_func(name, args, row),
        Expr::Agg { .. } => Value::Null,
    }
}

/// Evaluates a predicate expression: `Null` and non-truthy values are
/// false.
pub fn eval_predicate(expr: &Expr, row: &Value) -> bool {
    eval(expr, row).is_truthy()
}

fn eval_func(name: &str, args: &[Expr], row: &Value) -> Value {
    match name {
        "eq" => compare(args, row, |o| o == Ordering::Equal),
        "gt" => compare(args, row, |o| o == Ordering::Greater),
        "gte" => compare(args, row, |o| o != Ordering::Less),
        "lt" => compare(args, row, |o| o == Ordering::Less),
        "lte" => compare(args, row, |o| o != Ordering::Greater),
        "and" => Value::Bool(args.iter().all(|a| eval_predicate(a, row))),
        "or" => Value::Bool(args.iter().any(|a| eval_predicate(a, row))),
        "not" => Value::Bool(!args.first().map(|a| eval_predicate(a, row)).unwrap_or(false)),
        "in" => eval_in(args, row),
        "length" => match arg(args, 0, row) {
            Value::Str(s) => Value::Int(s.chars().count() as i64),
            Value::Array(items) => Value::Int(items.len() as i64),
            _ => Value::Null,
        },
        "concat" => {
            let mut out = String::new();
            for a in args {
                let v = eval(a, row);
                if !v.is_null() {
                    out.push_str(&v.to_display_string());
                }
            }
            Value::Str(out)
        }
        "upper" => match arg(args, 0, row) {
            Value::Str(s) => Value::Str(s.to_uppercase()),
            _ => Value::Null,
        },
        "lower" => match arg(args, 0, row) {
            Value::Str(s) => Value::Str(s.to_lowercase()),
            _ => Value::Null,
        },
        "like" => eval_like(args, row, false),
        "ilike" => eval_like(args, row, true),
        "add" => arithmetic(args, row, |a, b| a + b),
        "sub" => arithmetic(args, row, |a, b| a - b),
        "mul" => arithmetic(args, row, |a, b| a * b),
        "div" => {
            let (a, b) = match numeric_pair(args, row) {
                Some(pair) => pair,
                None => return Value::Null,
            };
            if b == 0.0 {
                Value::Null
            } else {
                Value::Float(a / b)
            }
        }
        "mod" => {
            let (a, b) = match numeric_pair(args, row) {
                Some(pair) => pair,
                None => return Value::Null,
            };
            if b == 0.0 {
                Value::Null
            } else if a % 1.0 == 0.0 && b % 1.0 == 0.0 {
                Value::Int(a as i64 % b as i64)
            } else {
                Value::Float(a % b)
            }
        }
        _ => Value::Null,
    }
}

fn arg(args: &[Expr], index: usize, row: &Value) -> Value {
    args.get(index).map(|a| eval(a, row)).unwrap_or(Value::Null)
}

fn compare(args: &[Expr], row: &Value, check: impl Fn(Ordering) -> bool) -> Value {
    let left = arg(args, 0, row);
    let right = arg(args, 1, row);
    match compare_values(&left, &right) {
        Some(ordering) => Value::Bool(check(ordering)),
        None => Value::Bool(false),
    }
}

/// Type-checked comparison: numbers, strings, booleans and dates compare
/// within their type (with int/float interchangeable); a string compared
/// to a number coerces through the string representation. `Null` and
/// other type mixes do not compare.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            Some(left.cmp(right))
        }
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Int(_) | Value::Float(_)) => {
            Some(a.cmp(&right.to_display_string()))
        }
        (Value::Int(_) | Value::Float(_), Value::Str(b)) => {
            Some(left.to_display_string().cmp(b))
        }
        _ => None,
    }
}

fn eval_in(args: &[Expr], row: &Value) -> Value {
    let needle = arg(args, 0, row);
    if needle.is_null() {
        return Value::Bool(false);
    }
    let haystack = arg(args, 1, row);
    match haystack {
        Value::Array(items) => Value::Bool(items.iter().any(|item| {
            compare_values(&needle, item) == Some(Ordering::Equal)
        })),
        _ => Value::Bool(false),
    }
}

fn eval_like(args: &[Expr], row: &Value, case_insensitive: bool) -> Value {
    let value = arg(args, 0, row);
    let pattern = arg(args, 1, row);
    match (value.as_str(), pattern.as_str()) {
        (Some(v), Some(p)) => Value::Bool(if case_insensitive {
            pattern_match::ilike(v, p)
        } else {
            pattern_match::like(v, p)
        }),
        _ => Value::Bool(false),
    }
}

fn numeric_pair(args: &[Expr], row: &Value) -> Option<(f64, f64)> {
    let a = arg(args, 0, row).as_number()?;
    let b = arg(args, 1, row).as_number()?;
    Some((a, b))
}

fn arithmetic(args: &[Expr], row: &Value, op: impl Fn(f64, f64) -> f64) -> Value {
    let left = arg(args, 0, row);
    let right = arg(args, 1, row);
    let (a, b) = match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Value::Null,
    };
    let result = op(a, b);
    // Integer inputs with an integral result stay integers
    if matches!(left, Value::Int(_)) && matches!(right, Value::Int(_)) && result % 1.0 == 0.0 {
        Value::Int(result as i64)
    } else {
        Value::Float(result)
    }
}

/// Collects every ref path appearing in an expression.
pub fn collect_ref_paths(expr: &Expr, out: &mut Vec<rivulet_core::PropPath>) {
    match expr {
        Expr::Ref(r) => out.push(r.path.clone()),
        Expr::Func { args, .. } => {
            for a in args {
                collect_ref_paths(a, out);
            }
        }
        Expr::Agg { arg: Some(a), .. } => collect_ref_paths(a, out),
        _ => {}
    }
}
