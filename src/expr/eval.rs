//! Tree-walking evaluation with JavaScript-flavored coercions.
use serde_json::Value;

use crate::error::EvalError;

use super::builtins;
use super::{BinaryOp, Expr, Ident, Scope, UnaryOp};

pub fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(ident) => ident_value(*ident, scope),
        Expr::Deref(pointer) => Ok((scope.deref)(pointer)?.unwrap_or(Value::Null)),
        Expr::Array(items) => Ok(Value::Array(
            items.iter().map(|item| eval(item, scope)).collect::<Result<_, _>>()?,
        )),
        Expr::Member(object, name) => {
            let object = eval(object, scope)?;
            member(&object, name)
        }
        Expr::Index(object, index) => {
            let object = eval(object, scope)?;
            let index = eval(index, scope)?;
            match (&object, &index) {
                (Value::Array(_) | Value::String(_), Value::Number(_)) => member(&object, &to_display(&index)),
                (_, Value::String(name)) => member(&object, name),
                _ => member(&object, &to_display(&index)),
            }
        }
        Expr::Call(callee, args) => {
            let args = args.iter().map(|arg| eval(arg, scope)).collect::<Result<Vec<_>, _>>()?;
            call(callee, args, scope)
        }
        Expr::Unary(op, operand) => {
            let operand = eval(operand, scope)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!truthy(&operand)),
                UnaryOp::Neg => to_number(&operand).map(|n| number(-n)).unwrap_or(Value::Null),
                UnaryOp::Plus => to_number(&operand).map(number).unwrap_or(Value::Null),
            })
        }
        Expr::Binary(op, lhs, rhs) => binary(*op, lhs, rhs, scope),
        Expr::Conditional(test, then, otherwise) => {
            if truthy(&eval(test, scope)?) {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
    }
}

fn ident_value(ident: Ident, scope: &Scope<'_>) -> Result<Value, EvalError> {
    Ok(match ident {
        Ident::Schema => scope.schema.clone(),
        Ident::Value => scope.value.clone(),
        Ident::Parent => scope.parent.clone(),
        Ident::Key => scope.key.clone(),
        Ident::UserData => scope.user_data.clone(),
        other => return Err(EvalError::Type(format!("`{other:?}` is only usable as a function or namespace"))),
    })
}

fn member(object: &Value, name: &str) -> Result<Value, EvalError> {
    match object {
        Value::Null => Err(EvalError::Type(format!("cannot read `{name}` of null"))),
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if name == "length" => Ok(Value::from(items.len())),
        Value::Array(items) => Ok(name
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i).cloned())
            .unwrap_or(Value::Null)),
        Value::String(s) if name == "length" => Ok(Value::from(s.chars().count())),
        Value::String(s) => Ok(name
            .parse::<usize>()
            .ok()
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null)),
        Value::Bool(_) | Value::Number(_) => Ok(Value::Null),
    }
}

fn call(callee: &Expr, args: Vec<Value>, scope: &Scope<'_>) -> Result<Value, EvalError> {
    match callee {
        Expr::Member(target, name) => match target.as_ref() {
            Expr::Ident(Ident::Math) => builtins::math(name, &args),
            Expr::Ident(Ident::Json) => builtins::json(name, &args),
            receiver => {
                let receiver = eval(receiver, scope)?;
                builtins::method(&receiver, name, &args)
            }
        },
        Expr::Ident(ident) => builtins::global(*ident, &args),
        _ => Err(EvalError::NotCallable("expression".into())),
    }
}

fn binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, scope: &Scope<'_>) -> Result<Value, EvalError> {
    // short-circuiting operators evaluate the right side lazily
    match op {
        BinaryOp::And => {
            let left = eval(lhs, scope)?;
            return if truthy(&left) { eval(rhs, scope) } else { Ok(left) };
        }
        BinaryOp::Or => {
            let left = eval(lhs, scope)?;
            return if truthy(&left) { Ok(left) } else { eval(rhs, scope) };
        }
        BinaryOp::Coalesce => {
            let left = eval(lhs, scope)?;
            return if left.is_null() { eval(rhs, scope) } else { Ok(left) };
        }
        _ => {}
    }
    let left = eval(lhs, scope)?;
    let right = eval(rhs, scope)?;
    let arith = |f: fn(f64, f64) -> f64| match (to_number(&left), to_number(&right)) {
        (Some(a), Some(b)) => number(f(a, b)),
        _ => Value::Null,
    };
    Ok(match op {
        BinaryOp::Add if left.is_string() || right.is_string() => {
            Value::String(format!("{}{}", to_display(&left), to_display(&right)))
        }
        BinaryOp::Add => arith(|a, b| a + b),
        BinaryOp::Sub => arith(|a, b| a - b),
        BinaryOp::Mul => arith(|a, b| a * b),
        BinaryOp::Div => arith(|a, b| a / b),
        BinaryOp::Rem => arith(|a, b| a % b),
        BinaryOp::StrictEq => Value::Bool(strict_eq(&left, &right)),
        BinaryOp::StrictNe => Value::Bool(!strict_eq(&left, &right)),
        BinaryOp::LooseEq => Value::Bool(loose_eq(&left, &right)),
        BinaryOp::LooseNe => Value::Bool(!loose_eq(&left, &right)),
        BinaryOp::Lt => Value::Bool(compare(&left, &right).is_some_and(|o| o.is_lt())),
        BinaryOp::Le => Value::Bool(compare(&left, &right).is_some_and(|o| o.is_le())),
        BinaryOp::Gt => Value::Bool(compare(&left, &right).is_some_and(|o| o.is_gt())),
        BinaryOp::Ge => Value::Bool(compare(&left, &right).is_some_and(|o| o.is_ge())),
        BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce => unreachable!("handled above"),
    })
}

// ————————————————————————————————————————————————————————————————————————————
// COERCIONS
// ————————————————————————————————————————————————————————————————————————————

/// Prefer integers when exact; non-finite results become null.
pub fn number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `None` stands for NaN.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(0.0),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() { Some(0.0) } else { trimmed.parse::<f64>().ok() }
        }
        Value::Array(items) if items.is_empty() => Some(0.0),
        Value::Array(items) if items.len() == 1 => to_number(&items[0]),
        Value::Array(_) | Value::Object(_) => None,
    }
}

pub fn to_display(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| if item.is_null() { String::new() } else { to_display(item) })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    }
}

pub fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(_), Value::String(_)) => a == b,
        (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => a == b,
        (Value::Array(_) | Value::Object(_), _) => to_display(a) == to_display(b),
        (_, Value::Array(_) | Value::Object(_)) => loose_eq(b, a),
        _ => match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => to_number(a)?.partial_cmp(&to_number(b)?),
    }
}
