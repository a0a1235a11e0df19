//! Error types shared across the compiler, the data linker and the evaluator.
use thiserror::Error;

use crate::inference::TypeSet;

// ————————————————————————————————————————————————————————————————————————————
// POINTERS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PointerError {
    #[error("malformed pointer `{pointer}`: {reason}")]
    Malformed { pointer: String, reason: String },
    #[error("pointer `{pointer}` climbs {requested} ancestors but only {available} exist")]
    AncestorOverflow { pointer: String, requested: usize, available: usize },
    #[error("pointer `{0}` must be absolute")]
    NotAbsolute(String),
}

// ————————————————————————————————————————————————————————————————————————————
// FATAL
// ————————————————————————————————————————————————————————————————————————————

/// Conditions that are never recoverable and are reported at the call site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("the data root cannot be replaced or detached")]
    RootMutation,
    #[error("pointer `{0}` must be absolute")]
    NotAbsolute(String),
    #[error("reference `{reference}` needs a `{namespace}` section but the schema has none")]
    MissingDefinitions { reference: String, namespace: String },
    #[error("no data node with id {0}")]
    UnknownNode(usize),
    #[error("data node `{0}` is not an array")]
    NotAnArray(String),
}

// ————————————————————————————————————————————————————————————————————————————
// COMPILE
// ————————————————————————————————————————————————————————————————————————————

/// One failed step at one schema node.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("[{step}] at `{pointer}`: {kind}")]
pub struct CompileError {
    pub step: &'static str,
    pub pointer: String,
    pub kind: CompileErrorKind,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileErrorKind {
    #[error("unsupported reference `{0}` (only local definitions are allowed)")]
    UnsupportedReference(String),
    #[error("unknown definition `{0}`")]
    UnknownDefinition(String),
    #[error("reference cycle through `{0}`")]
    ReferenceCycle(String),
    #[error("no type satisfies the schema keywords")]
    EmptyType,
    #[error("ambiguous type set {0}")]
    AmbiguousType(TypeSet),
    #[error("type set {0} is a union whose second type is not null")]
    SecondTypeNotNull(TypeSet),
    #[error("keyword `{keyword}` has an invalid value: {reason}")]
    InvalidKeyword { keyword: String, reason: String },
    #[error("expression in `{keyword}` does not compile: {error}")]
    Expression { keyword: String, error: SyntaxError },
    #[error("pointer `{pointer}` in `{keyword}` resolves to nothing")]
    DanglingPointer { keyword: String, pointer: String },
    #[error(transparent)]
    Pointer(#[from] PointerError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// Expression syntax error with the byte offset it was detected at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at offset {offset})")]
pub struct SyntaxError {
    pub message: String,
    pub offset: usize,
}

// ————————————————————————————————————————————————————————————————————————————
// RUNTIME
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Pointer(#[from] PointerError),
    #[error("cannot call `{0}`")]
    NotCallable(String),
    #[error("`{name}` expects {expected} argument(s), got {found}")]
    Arity { name: String, expected: usize, found: usize },
    #[error("{0}")]
    Type(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("at `{pointer}`: {kind}")]
pub struct LinkError {
    pub pointer: String,
    pub kind: LinkErrorKind,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkErrorKind {
    #[error("expected {expected}, found {found}")]
    KindMismatch { expected: String, found: &'static str },
    #[error("schema node is missing")]
    MissingSchema,
}
