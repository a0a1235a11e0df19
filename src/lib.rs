//! Form compiler for JSON-Schema-like documents.
//!
//! A raw schema goes through [`compiler::SchemaCompiler`] and comes out as an
//! annotated [`schema::SchemaTree`]: inferred types, widgets, display order,
//! compiled expressions and the observer graph between nodes. A live document
//! is then loaded into a [`data::DataTree`] and linked to that tree, after
//! which expressions can be evaluated against it and value changes can be
//! mapped to the nodes that must re-evaluate.
pub mod cli;
pub mod compiler;
pub mod config;
pub mod data;
pub mod enums;
pub mod error;
pub mod expr;
pub mod inference;
pub mod observers;
pub mod path_de;
pub mod pointer;
pub mod schema;
pub mod validate;

pub use compiler::{CompiledSchema, SchemaCompiler, compile};
pub use config::{CompilerConfig, Dialect};
pub use data::DataTree;
pub use error::{CompileError, FatalError};
pub use schema::{Keyword, SchemaId, SchemaTree};
