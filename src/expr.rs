//! Embedded expressions: a small safe grammar compiled to an AST and evaluated
//! against an explicit [`Scope`]. Nothing outside the scope is reachable.
//!
//! Three flavors share the grammar:
//! - template (`abstract`): text with `` $`pointer` `` and `${expr}` holes;
//! - boolean (`visible`, `readonly`, …): coerced to bool, `null` propagates;
//! - generic (`orderBy`, `expression`, `change`): raw result.
pub mod builtins;
pub mod eval;
mod lexer;
mod parser;

use serde_json::Value;
use tracing::warn;

use crate::error::{EvalError, PointerError, SyntaxError};

// ————————————————————————————————————————————————————————————————————————————
// AST
// ————————————————————————————————————————————————————————————————————————————

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(Ident),
    /// `` $`pointer` ``
    Deref(String),
    Array(Vec<Expr>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// The only names an expression can mention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ident {
    Schema,
    Value,
    Parent,
    Key,
    UserData,
    Math,
    Json,
    String,
    Number,
    Boolean,
    IsNaN,
    ParseInt,
    ParseFloat,
}

impl Ident {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "schema" => Ident::Schema,
            "value" => Ident::Value,
            "parent" => Ident::Parent,
            "key" => Ident::Key,
            "userdata" => Ident::UserData,
            "Math" => Ident::Math,
            "JSON" => Ident::Json,
            "String" => Ident::String,
            "Number" => Ident::Number,
            "Boolean" => Ident::Boolean,
            "isNaN" => Ident::IsNaN,
            "parseInt" => Ident::ParseInt,
            "parseFloat" => Ident::ParseFloat,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Coalesce,
    Or,
    And,
    LooseEq,
    LooseNe,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn parse(punct: &str) -> Option<Self> {
        Some(match punct {
            "??" => BinaryOp::Coalesce,
            "||" => BinaryOp::Or,
            "&&" => BinaryOp::And,
            "==" => BinaryOp::LooseEq,
            "!=" => BinaryOp::LooseNe,
            "===" => BinaryOp::StrictEq,
            "!==" => BinaryOp::StrictNe,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            _ => return None,
        })
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Coalesce => 1,
            BinaryOp::Or => 2,
            BinaryOp::And => 3,
            BinaryOp::LooseEq | BinaryOp::LooseNe | BinaryOp::StrictEq | BinaryOp::StrictNe => 4,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 5,
            BinaryOp::Add | BinaryOp::Sub => 6,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 7,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Part {
    Text(String),
    Hole(Expr),
}

// ————————————————————————————————————————————————————————————————————————————
// SCOPE
// ————————————————————————————————————————————————————————————————————————————

/// Pointer dereference callback handed to evaluators.
pub type DerefFn<'a> = dyn Fn(&str) -> Result<Option<Value>, PointerError> + 'a;

/// Everything an evaluator may see.
pub struct Scope<'a> {
    pub schema: &'a Value,
    pub value: &'a Value,
    pub parent: &'a Value,
    pub key: &'a Value,
    pub user_data: &'a Value,
    pub deref: &'a DerefFn<'a>,
}

// ————————————————————————————————————————————————————————————————————————————
// EVALUATORS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    Template,
    Boolean,
    Generic,
}

impl Flavor {
    /// Substitute for a failed evaluation.
    pub fn failure_default(self) -> Value {
        match self {
            Flavor::Template => Value::String(String::new()),
            Flavor::Boolean => Value::Bool(false),
            Flavor::Generic => Value::Null,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Body {
    Constant(Value),
    Expression(Expr),
    Template(Vec<Part>),
}

/// A compiled, always-callable expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluator {
    flavor: Flavor,
    source: Option<String>,
    body: Body,
}

impl Evaluator {
    pub fn constant(flavor: Flavor, value: Value) -> Self {
        Self { flavor, source: None, body: Body::Constant(value) }
    }

    pub fn compile_template(raw: &Value) -> Result<Self, SyntaxError> {
        let source = expect_string(raw, "a template string")?;
        let parts = parser::parse_template(source)?;
        Ok(Self { flavor: Flavor::Template, source: Some(source.to_string()), body: Body::Template(parts) })
    }

    /// Boolean and null literals bypass compilation.
    pub fn compile_boolean(raw: &Value) -> Result<Self, SyntaxError> {
        match raw {
            Value::Bool(_) | Value::Null => Ok(Self::constant(Flavor::Boolean, raw.clone())),
            _ => {
                let source = expect_string(raw, "a boolean, null or an expression string")?;
                Self::compile_source(Flavor::Boolean, source.to_string())
            }
        }
    }

    /// A string, a boolean, or a sequence of fragments joined in order.
    pub fn compile_generic(raw: &Value) -> Result<Self, SyntaxError> {
        match raw {
            Value::Bool(_) | Value::Null | Value::Number(_) => Ok(Self::constant(Flavor::Generic, raw.clone())),
            Value::String(source) => Self::compile_source(Flavor::Generic, source.clone()),
            Value::Array(fragments) => {
                let mut source = String::new();
                for fragment in fragments {
                    source.push_str(expect_string(fragment, "string fragments")?);
                }
                Self::compile_source(Flavor::Generic, source)
            }
            Value::Object(_) => Err(SyntaxError {
                message: "expected an expression string, a boolean or string fragments".into(),
                offset: 0,
            }),
        }
    }

    fn compile_source(flavor: Flavor, source: String) -> Result<Self, SyntaxError> {
        let expr = parser::parse_expression(&source)?;
        Ok(Self { flavor, source: Some(source), body: Body::Expression(expr) })
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// Original text, `None` for constants.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.body, Body::Constant(_))
    }

    /// Evaluate, propagating runtime failures.
    pub fn try_eval(&self, scope: &Scope<'_>) -> Result<Value, EvalError> {
        match &self.body {
            Body::Constant(value) => Ok(value.clone()),
            Body::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        Part::Text(text) => out.push_str(text),
                        Part::Hole(expr) => match eval::eval(expr, scope)? {
                            Value::Null => {}
                            value => out.push_str(&eval::to_display(&value)),
                        },
                    }
                }
                Ok(Value::String(out))
            }
            Body::Expression(expr) => {
                let raw = eval::eval(expr, scope)?;
                Ok(match self.flavor {
                    Flavor::Boolean if raw.is_null() => Value::Null,
                    Flavor::Boolean => Value::Bool(eval::truthy(&raw)),
                    Flavor::Template => Value::String(eval::to_display(&raw)),
                    Flavor::Generic => raw,
                })
            }
        }
    }

    /// Evaluate; failures are logged and replaced by the flavor's default.
    pub fn eval(&self, scope: &Scope<'_>) -> Value {
        self.try_eval(scope).unwrap_or_else(|error| {
            warn!(source = self.source().unwrap_or_default(), %error, "expression evaluation failed");
            self.flavor.failure_default()
        })
    }

    /// Boolean view: `None` means "indeterminate, use the default".
    pub fn eval_bool(&self, scope: &Scope<'_>) -> Option<bool> {
        match self.eval(scope) {
            Value::Null => None,
            other => Some(eval::truthy(&other)),
        }
    }
}

fn expect_string<'v>(raw: &'v Value, what: &str) -> Result<&'v str, SyntaxError> {
    raw.as_str().ok_or_else(|| SyntaxError { message: format!("expected {what}, found {raw}"), offset: 0 })
}

// ------------------------------- Tests ------------------------------------ //
