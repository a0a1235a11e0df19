//! Schema compiler: raw schema document in, annotated [`SchemaTree`] out.
//!
//! Order of work:
//! 1. inline local `$ref`s;
//! 2. structural annotation (arena, parents, pointers);
//! 3. the step passes from [`crate::schema::steps::passes`].
//!
//! Per-node failures are collected in [`CompiledSchema::errors`] and never
//! stop the unaffected part of the tree. Fatal conditions abort compilation.
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileErrorKind, FatalError};
use crate::schema::steps::{self, StepContext};
use crate::schema::{Keyword, SchemaId, SchemaTree, refs};

#[derive(Debug)]
pub struct SchemaCompiler {
    config: CompilerConfig,
}

#[derive(Clone, Debug)]
pub struct CompiledSchema {
    pub tree: SchemaTree,
    pub errors: Vec<CompileError>,
    /// Application data exposed to expressions as `userdata`.
    pub user_data: Value,
}

impl SchemaCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut CompilerConfig {
        &mut self.config
    }

    pub fn compile(&mut self, raw: &Value) -> Result<CompiledSchema, FatalError> {
        self.compile_with_data(raw, None)
    }

    /// Compile against a live document; `reference` keywords read their candidates from it.
    pub fn compile_with_data(&mut self, raw: &Value, data: Option<&Value>) -> Result<CompiledSchema, FatalError> {
        let (inlined, mut errors) = refs::inline(raw, self.config.dialect)?;
        let (mut tree, annotation_errors) = SchemaTree::build(&inlined);
        errors.extend(annotation_errors);
        debug!(nodes = tree.len(), "schema annotated");

        let mut cx = StepContext { config: &mut self.config, data };
        for pass in steps::passes() {
            let before = errors.len();
            for id in tree.ids() {
                for step in &pass.steps {
                    if !step.appliable(&tree, id) {
                        continue;
                    }
                    if let Err(kind) = step.apply(&mut tree, id, &mut cx) {
                        if let CompileErrorKind::Fatal(fatal) = kind {
                            return Err(fatal);
                        }
                        errors.push(CompileError {
                            step: step.description(),
                            pointer: tree.node(id).pointer.clone(),
                            kind,
                        });
                        break;
                    }
                }
            }
            debug!(pass = pass.name, errors = errors.len() - before, "pass complete");
        }

        for error in &errors {
            warn!(%error, "schema compile error");
        }
        info!(nodes = tree.len(), errors = errors.len(), "schema compiled");
        Ok(CompiledSchema { tree, errors, user_data: cx.config.user_data.clone() })
    }
}

impl Default for SchemaCompiler {
    fn default() -> Self {
        Self::new(CompilerConfig::default())
    }
}

/// One-shot compile with a default configuration.
pub fn compile(raw: &Value) -> Result<CompiledSchema, FatalError> {
    SchemaCompiler::default().compile(raw)
}

impl CompiledSchema {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn root(&self) -> SchemaId {
        self.tree.root()
    }

    pub fn normalized(&self) -> Value {
        self.tree.normalized()
    }

    /// Errors reported against one schema pointer.
    pub fn errors_at<'a>(&'a self, pointer: &'a str) -> impl Iterator<Item = &'a CompileError> + 'a {
        self.errors.iter().filter(move |e| e.pointer == pointer)
    }

    /// Per-node summary: pointer, widget, types and compiled expression sources.
    pub fn summary(&self) -> Value {
        let nodes: Vec<Value> = self
            .tree
            .nodes()
            .map(|(_, node)| {
                let expressions: serde_json::Map<String, Value> = Keyword::ALL
                    .into_iter()
                    .filter_map(|k| node.evaluator(k).source().map(|s| (k.name().to_string(), Value::from(s))))
                    .collect();
                serde_json::json!({
                    "pointer": node.pointer,
                    "field": node.field,
                    "target": node.target.to_string(),
                    "basetype": node.basetype.map(|t| t.as_str()),
                    "nullable": node.null_allowed,
                    "enum": node.enum_items,
                    "order": node.order,
                    "observers": node.observers,
                    "expressions": expressions,
                })
            })
            .collect();
        Value::Array(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Dialect;
    use crate::enums::{EnumItem, EnumState};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn invoice() -> Value {
        json!({
            "type": "object",
            "definitions": {"money": {"type": "number", "minimum": 0}},
            "required": ["customer"],
            "properties": {
                "customer": {"type": "string", "tab": "Main"},
                "notes": {"type": "string", "maxLength": 2000, "tab": "Extra"},
                "items": {
                    "type": "array",
                    "tab": "Main",
                    "items": {"type": "object", "properties": {
                        "amount": {"$ref": "#/definitions/money"},
                        "flag": {"type": "boolean", "visible": "$`0/amount` > 10"}
                    }}
                },
                "total": {"$ref": "#/definitions/money", "expression": "$`/items`.length"}
            }
        })
    }

    #[test]
    fn compiles_a_whole_document() {
        let compiled = compile(&invoice()).unwrap();
        assert!(compiled.is_valid(), "{:?}", compiled.errors);
        let tree = &compiled.tree;
        let root = tree.node(compiled.root());
        let order: Vec<&str> = root.order.iter().map(|f| f.fieldname.as_str()).collect();
        assert_eq!(order, ["customer", "items", "notes", "total"]);
        let notes = tree.node(tree.by_pointer("/notes").unwrap());
        assert_eq!(notes.field, "textarea");
        let items = tree.node(tree.by_pointer("/items").unwrap());
        assert!(items.observers.contains("/total"));
    }

    #[test]
    fn normalized_schema_carries_inferred_types() {
        let compiled = compile(&invoice()).unwrap();
        let normalized = compiled.normalized();
        assert_eq!(normalized["properties"]["items"]["items"]["properties"]["amount"]["type"], json!("number"));
        assert!(normalized.get("definitions").is_none());
        assert_eq!(normalized["properties"]["total"]["type"], json!("number"));
    }

    #[test]
    fn recompiling_yields_identical_observers() {
        let first = compile(&invoice()).unwrap();
        let second = compile(&invoice()).unwrap();
        for ((_, a), (_, b)) in first.tree.nodes().zip(second.tree.nodes()) {
            assert_eq!(a.observers, b.observers);
            assert_eq!(a.order, b.order);
        }
    }

    #[test]
    fn errors_are_collected_not_raised() {
        let compiled = compile(&json!({
            "type": "object",
            "properties": {
                "a": {"type": ["string", "integer"]},
                "b": {"$ref": "#/definitions/nope"},
                "c": {"type": "string"}
            },
            "definitions": {}
        }))
        .unwrap();
        assert!(!compiled.is_valid());
        assert_eq!(compiled.errors_at("/a").count(), 1);
        assert_eq!(compiled.errors_at("/b").count(), 2, "{:?}", compiled.errors);
        assert_eq!(compiled.tree.node(compiled.tree.by_pointer("/c").unwrap()).field, "string");
    }

    #[test]
    fn runaway_expressions_are_collected() {
        let deep = format!("{}true{}", "(".repeat(100_000), ")".repeat(100_000));
        let compiled = compile(&json!({
            "type": "object",
            "properties": {"a": {"type": "string", "visible": deep}, "b": {"type": "string", "visible": "true"}}
        }))
        .unwrap();
        assert_eq!(compiled.errors_at("/a").count(), 1);
        assert!(matches!(compiled.errors[0].kind, CompileErrorKind::Expression { .. }));
        assert_eq!(compiled.errors_at("/b").count(), 0);
    }

    #[test]
    fn fatal_conditions_abort() {
        let missing = compile(&json!({"properties": {"a": {"$ref": "#/definitions/x"}}}));
        assert!(matches!(missing, Err(FatalError::MissingDefinitions { .. })));
        let relative = compile(&json!({"type": "string", "reference": "1/x"}));
        assert!(matches!(relative, Err(FatalError::NotAbsolute(_))));
        let malformed = compile(&json!({"type": "string", "reference": "people"})).unwrap();
        assert_eq!(malformed.errors.len(), 1, "{:?}", malformed.errors);
        assert!(matches!(malformed.errors[0].kind, CompileErrorKind::Pointer(_)));
    }

    #[test]
    fn enum_sources_go_through_provider_then_hook() {
        let raised = Rc::new(RefCell::new(Vec::new()));
        let seen = raised.clone();
        let config = CompilerConfig::new()
            .with_dialect(Dialect::Draft2019)
            .with_enum_provider(|name: &str| (name == "sizes").then(|| vec![EnumItem::from_value(json!("S"))]))
            .on_enum_request(move |request| {
                seen.borrow_mut().push(request.name().to_string());
                if request.name() == "fast" {
                    request.succeed(vec![EnumItem::from_value(json!(1))]);
                }
            });
        let mut compiler = SchemaCompiler::new(config);
        let schema = json!({"type": "object", "properties": {
            "size": {"type": "string", "enumSource": "sizes"},
            "speed": {"type": "integer", "enumSource": "fast"},
            "color": {"type": "string", "enumSource": "colors"}
        }});
        let compiled = compiler.compile(&schema).unwrap();
        let node = |p: &str| compiled.tree.node(compiled.tree.by_pointer(p).unwrap());
        assert_eq!(node("/size").enum_items.len(), 1);
        assert_eq!(node("/speed").enum_items.len(), 1);
        assert!(node("/color").enum_items.is_empty());
        assert_eq!(*raised.borrow(), ["fast", "colors"]);
        assert_eq!(node("/size").field, "check");
        // unresolved enumerations keep their basetype widget
        assert!(node("/color").isenum);
        assert_eq!(node("/color").field, "string");

        // the host dropped `colors` unanswered; it stays timed out until retried
        assert_eq!(compiler.config_mut().enum_cache.state("colors"), Some(EnumState::TimedOut));
        compiler.compile(&schema).unwrap();
        assert_eq!(raised.borrow().len(), 2);
    }
}
