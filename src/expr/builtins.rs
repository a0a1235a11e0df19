//! The closed set of functions reachable from expressions.
use serde_json::Value;

use crate::error::EvalError;

use super::Ident;
use super::eval::{number, strict_eq, to_display, to_number, truthy};

pub fn math(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let nums: Vec<Option<f64>> = args.iter().map(to_number).collect();
    let unary = |f: fn(f64) -> f64| -> Result<Value, EvalError> {
        arity(&format!("Math.{name}"), args, 1)?;
        Ok(nums[0].map(f).map(number).unwrap_or(Value::Null))
    };
    match name {
        "abs" => unary(f64::abs),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "round" => unary(|x| (x + 0.5).floor()),
        "trunc" => unary(f64::trunc),
        "sqrt" => unary(f64::sqrt),
        "sign" => unary(|x| if x == 0.0 { 0.0 } else { x.signum() }),
        "min" | "max" => {
            let mut acc: Option<f64> = None;
            for n in nums.iter().copied() {
                let Some(n) = n else { return Ok(Value::Null) };
                acc = Some(match acc {
                    None => n,
                    Some(a) if name == "min" => a.min(n),
                    Some(a) => a.max(n),
                });
            }
            // empty min/max are ±Infinity, which JSON cannot hold
            Ok(acc.map(number).unwrap_or(Value::Null))
        }
        "pow" => {
            arity("Math.pow", args, 2)?;
            Ok(match (nums[0], nums[1]) {
                (Some(b), Some(e)) => number(b.powf(e)),
                _ => Value::Null,
            })
        }
        _ => Err(EvalError::NotCallable(format!("Math.{name}"))),
    }
}

pub fn json(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    match name {
        "stringify" => {
            arity("JSON.stringify", args, 1)?;
            Ok(Value::String(args[0].to_string()))
        }
        "parse" => {
            arity("JSON.parse", args, 1)?;
            let text = args[0]
                .as_str()
                .ok_or_else(|| EvalError::Type("JSON.parse expects a string".into()))?;
            serde_json::from_str(text).map_err(|e| EvalError::Type(format!("JSON.parse: {e}")))
        }
        _ => Err(EvalError::NotCallable(format!("JSON.{name}"))),
    }
}

pub fn global(ident: Ident, args: &[Value]) -> Result<Value, EvalError> {
    let first = args.first().cloned().unwrap_or(Value::Null);
    match ident {
        Ident::String => Ok(Value::String(to_display(&first))),
        Ident::Number => Ok(to_number(&first).map(number).unwrap_or(Value::Null)),
        Ident::Boolean => Ok(Value::Bool(truthy(&first))),
        Ident::IsNaN => Ok(Value::Bool(to_number(&first).is_none())),
        Ident::ParseFloat => Ok(leading_number(&to_display(&first), true).map(number).unwrap_or(Value::Null)),
        Ident::ParseInt => Ok(leading_number(&to_display(&first), false).map(number).unwrap_or(Value::Null)),
        other => Err(EvalError::NotCallable(format!("{other:?}"))),
    }
}

/// String and array methods.
pub fn method(receiver: &Value, name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);
    match (receiver, name) {
        (Value::String(s), "toUpperCase") => Ok(Value::String(s.to_uppercase())),
        (Value::String(s), "toLowerCase") => Ok(Value::String(s.to_lowercase())),
        (Value::String(s), "trim") => Ok(Value::String(s.trim().to_string())),
        (Value::String(s), "includes") => Ok(Value::Bool(s.contains(&to_display(&arg(0))))),
        (Value::String(s), "startsWith") => Ok(Value::Bool(s.starts_with(&to_display(&arg(0))))),
        (Value::String(s), "endsWith") => Ok(Value::Bool(s.ends_with(&to_display(&arg(0))))),
        (Value::String(s), "indexOf") => Ok(s
            .find(&to_display(&arg(0)))
            .map(|byte| Value::from(s[..byte].chars().count() as i64))
            .unwrap_or(Value::from(-1))),
        (Value::Array(items), "includes") => Ok(Value::Bool(items.iter().any(|x| strict_eq(x, &arg(0))))),
        (Value::Array(items), "indexOf") => Ok(items
            .iter()
            .position(|x| strict_eq(x, &arg(0)))
            .map(|i| Value::from(i as i64))
            .unwrap_or(Value::from(-1))),
        (Value::Array(items), "join") => {
            let sep = match arg(0) {
                Value::Null => ",".to_string(),
                other => to_display(&other),
            };
            Ok(Value::String(
                items
                    .iter()
                    .map(|x| if x.is_null() { String::new() } else { to_display(x) })
                    .collect::<Vec<_>>()
                    .join(&sep),
            ))
        }
        (Value::Null, _) => Err(EvalError::Type(format!("cannot call `{name}` on null"))),
        _ => Err(EvalError::NotCallable(name.to_string())),
    }
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), EvalError> {
    if args.len() < expected {
        return Err(EvalError::Arity { name: name.to_string(), expected, found: args.len() });
    }
    Ok(())
}

/// Longest numeric prefix, the way `parseInt` / `parseFloat` read it.
fn leading_number(text: &str, fractional: bool) -> Option<f64> {
    let text = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in text.char_indices() {
        let ok = c.is_ascii_digit()
            || (i == 0 && (c == '-' || c == '+'))
            || (fractional && c == '.' && !seen_dot);
        if !ok {
            break;
        }
        seen_dot |= c == '.';
        end = i + c.len_utf8();
    }
    text[..end].parse::<f64>().ok()
}
