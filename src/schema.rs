//! Compiled schema tree.
//!
//! Nodes live in an arena ([`SchemaTree`]) and refer to each other through
//! [`SchemaId`] handles, so `parent` is a plain back-reference and the root is
//! shared by construction (`SchemaId(0)`). Node ids follow depth-first
//! preorder, which is also the order every compile pass visits them in.
//!
//! Pointers are data-shaped: properties by name, the item schema of a
//! homogeneous array as `*`, variant `i` of a heterogeneous array as `*i`.
pub mod field;
pub mod order;
pub mod refs;
pub mod steps;

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value, json};

use crate::enums::EnumItem;
use crate::error::{CompileError, CompileErrorKind, PointerError};
use crate::expr::{Evaluator, Flavor};
use crate::inference::{JsonType, TypeSet};
use crate::pointer::{self, Tree};

pub use order::FieldOrder;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(usize);

impl SchemaId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Items {
    Homogeneous(SchemaId),
    /// `oneOf` alternatives, each selected by its `case` predicate.
    Variants(Vec<SchemaId>),
}

// ————————————————————————————————————————————————————————————————————————————
// EXPRESSION KEYWORDS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Keyword {
    Abstract,
    Visible,
    Readonly,
    RequiredWhen,
    Collapsed,
    Filter,
    Case,
    OrderBy,
    Expression,
    Change,
}

impl Keyword {
    pub const ALL: [Keyword; 10] = [
        Keyword::Abstract,
        Keyword::Visible,
        Keyword::Readonly,
        Keyword::RequiredWhen,
        Keyword::Collapsed,
        Keyword::Filter,
        Keyword::Case,
        Keyword::OrderBy,
        Keyword::Expression,
        Keyword::Change,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Keyword::Abstract => "abstract",
            Keyword::Visible => "visible",
            Keyword::Readonly => "readonly",
            Keyword::RequiredWhen => "requiredWhen",
            Keyword::Collapsed => "collapsed",
            Keyword::Filter => "filter",
            Keyword::Case => "case",
            Keyword::OrderBy => "orderBy",
            Keyword::Expression => "expression",
            Keyword::Change => "change",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn flavor(self) -> Flavor {
        match self {
            Keyword::Abstract => Flavor::Template,
            Keyword::OrderBy | Keyword::Expression | Keyword::Change => Flavor::Generic,
            _ => Flavor::Boolean,
        }
    }

    /// Constant used when the schema does not carry the keyword.
    pub fn fallback(self) -> Evaluator {
        let value = match self {
            Keyword::Abstract => json!(""),
            Keyword::Visible | Keyword::Filter | Keyword::Case => json!(true),
            Keyword::Readonly | Keyword::RequiredWhen | Keyword::Collapsed => json!(false),
            Keyword::OrderBy | Keyword::Expression | Keyword::Change => Value::Null,
        };
        Evaluator::constant(self.flavor(), value)
    }

    pub fn compile(self, raw: &Value) -> Result<Evaluator, crate::error::SyntaxError> {
        match self.flavor() {
            Flavor::Template => Evaluator::compile_template(raw),
            Flavor::Boolean => Evaluator::compile_boolean(raw),
            Flavor::Generic => Evaluator::compile_generic(raw),
        }
    }
}

/// One evaluator per [`Keyword`], never absent.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluators(Vec<Evaluator>);

impl Default for Evaluators {
    fn default() -> Self {
        Evaluators(Keyword::ALL.into_iter().map(Keyword::fallback).collect())
    }
}

impl Evaluators {
    pub fn get(&self, keyword: Keyword) -> &Evaluator {
        &self.0[keyword as usize]
    }

    pub fn set(&mut self, keyword: Keyword, evaluator: Evaluator) {
        self.0[keyword as usize] = evaluator;
    }
}

// ————————————————————————————————————————————————————————————————————————————
// NODES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Clone, Debug)]
pub struct SchemaNode {
    /// Keywords after reference inlining, children included.
    pub raw: Value,
    pub pointer: String,
    /// Token under the parent (`name`, `*` or `*i`).
    pub name: Option<String>,
    pub parent: Option<SchemaId>,
    pub properties: IndexMap<String, SchemaId>,
    pub items: Option<Items>,

    pub target: TypeSet,
    /// Always a member of `target` once inference succeeded.
    pub basetype: Option<JsonType>,
    pub null_allowed: bool,

    pub isenum: bool,
    pub isenumarray: bool,
    pub enum_items: Vec<EnumItem>,
    pub enum_source: Option<String>,

    pub reference: Option<String>,
    pub reference_items: Vec<Value>,

    pub homogeneous: bool,
    pub order: Vec<FieldOrder>,
    pub evaluators: Evaluators,
    pub observers: IndexSet<String>,
    pub field: String,
}

impl SchemaNode {
    fn new(raw: Value, pointer: String, name: Option<String>, parent: Option<SchemaId>) -> Self {
        Self {
            raw,
            pointer,
            name,
            parent,
            properties: IndexMap::new(),
            items: None,
            target: TypeSet::empty(),
            basetype: None,
            null_allowed: false,
            isenum: false,
            isenumarray: false,
            enum_items: Vec::new(),
            enum_source: None,
            reference: None,
            reference_items: Vec::new(),
            homogeneous: true,
            order: Vec::new(),
            evaluators: Evaluators::default(),
            observers: IndexSet::new(),
            field: String::new(),
        }
    }

    pub fn keywords(&self) -> &Map<String, Value> {
        static EMPTY: once_cell::sync::Lazy<Map<String, Value>> = once_cell::sync::Lazy::new(Map::new);
        self.raw.as_object().unwrap_or(&*EMPTY)
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords().get(name)
    }

    pub fn evaluator(&self, keyword: Keyword) -> &Evaluator {
        self.evaluators.get(keyword)
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self.basetype, Some(JsonType::Object | JsonType::Array) | None)
    }

    /// Required sibling names listed on this (object) node.
    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.keyword("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TREE
// ————————————————————————————————————————————————————————————————————————————

#[derive(Clone, Debug)]
pub struct SchemaTree {
    nodes: Vec<SchemaNode>,
}

impl SchemaTree {
    /// Structural annotation: split `raw` into nodes with parent, pointer and root.
    ///
    /// Malformed children are reported and skipped; the rest of the tree is built.
    pub fn build(raw: &Value) -> (Self, Vec<CompileError>) {
        let mut tree = SchemaTree { nodes: Vec::new() };
        let mut errors = Vec::new();
        tree.insert(raw, String::new(), None, None, &mut errors);
        (tree, errors)
    }

    fn insert(
        &mut self,
        raw: &Value,
        pointer: String,
        name: Option<String>,
        parent: Option<SchemaId>,
        errors: &mut Vec<CompileError>,
    ) -> SchemaId {
        let id = SchemaId(self.nodes.len());
        let raw = match raw {
            Value::Bool(true) => Value::Object(Map::new()),
            other => other.clone(),
        };
        let fail = |kind: CompileErrorKind| CompileError { step: ANNOTATE, pointer: pointer.clone(), kind };
        if !raw.is_object() {
            errors.push(fail(invalid("schema", format!("expected an object, found {raw}"))));
        }
        self.nodes.push(SchemaNode::new(raw.clone(), pointer.clone(), name, parent));

        match raw.get("properties") {
            None => {}
            Some(Value::Object(props)) => {
                for (prop, sub) in props {
                    let child_ptr = format!("{pointer}/{}", pointer::escape(prop));
                    let child = self.insert(sub, child_ptr, Some(prop.clone()), Some(id), errors);
                    self.nodes[id.0].properties.insert(prop.clone(), child);
                }
            }
            Some(other) => errors.push(fail(invalid("properties", format!("expected an object, found {other}")))),
        }

        match raw.get("items") {
            None => {}
            Some(Value::Object(items)) => match items.get("oneOf") {
                Some(Value::Array(variants)) => {
                    let mut ids = Vec::with_capacity(variants.len());
                    for (i, variant) in variants.iter().enumerate() {
                        let merged = merge_variant(items, variant);
                        let token = format!("*{i}");
                        let child_ptr = format!("{pointer}/{token}");
                        ids.push(self.insert(&merged, child_ptr, Some(token), Some(id), errors));
                    }
                    self.nodes[id.0].items = Some(Items::Variants(ids));
                    self.nodes[id.0].homogeneous = false;
                }
                _ => {
                    let item = Value::Object(items.clone());
                    let child = self.insert(&item, format!("{pointer}/*"), Some("*".into()), Some(id), errors);
                    self.nodes[id.0].items = Some(Items::Homogeneous(child));
                }
            },
            Some(Value::Bool(true)) => {
                let child = self.insert(&Value::Bool(true), format!("{pointer}/*"), Some("*".into()), Some(id), errors);
                self.nodes[id.0].items = Some(Items::Homogeneous(child));
            }
            Some(Value::Array(_)) => errors.push(fail(invalid("items", "positional items are not supported".into()))),
            Some(other) => errors.push(fail(invalid("items", format!("expected a schema, found {other}")))),
        }
        id
    }

    pub fn root(&self) -> SchemaId {
        SchemaId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: SchemaId) -> &SchemaNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: SchemaId) -> &mut SchemaNode {
        &mut self.nodes[id.0]
    }

    /// All ids in depth-first preorder.
    pub fn ids(&self) -> impl Iterator<Item = SchemaId> + use<> {
        (0..self.nodes.len()).map(SchemaId)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (SchemaId, &SchemaNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (SchemaId(i), n))
    }

    /// Children in declaration order: properties, then item schemas.
    pub fn children(&self, id: SchemaId) -> Vec<SchemaId> {
        let node = self.node(id);
        let mut out: Vec<SchemaId> = node.properties.values().copied().collect();
        match &node.items {
            Some(Items::Homogeneous(item)) => out.push(*item),
            Some(Items::Variants(variants)) => out.extend(variants.iter().copied()),
            None => {}
        }
        out
    }

    pub fn by_pointer(&self, pointer: &str) -> Option<SchemaId> {
        self.resolve(self.root(), pointer).ok().flatten()
    }

    pub fn resolve(&self, from: SchemaId, pointer: &str) -> Result<Option<SchemaId>, PointerError> {
        pointer::resolve(self, from, pointer)
    }

    /// Schema the raw JSON validator should see: refs inlined, `type` inferred.
    pub fn normalized(&self) -> Value {
        self.normalized_from(self.root())
    }

    fn normalized_from(&self, id: SchemaId) -> Value {
        let node = self.node(id);
        let mut out = node.keywords().clone();
        if !node.target.is_empty() {
            let mut types: Vec<Value> = node.target.iter().map(|t| Value::from(t.as_str())).collect();
            out.insert("type".into(), if types.len() == 1 { types.remove(0) } else { Value::Array(types) });
        }
        if !node.properties.is_empty() {
            let props: Map<String, Value> = node
                .properties
                .iter()
                .map(|(name, child)| (name.clone(), self.normalized_from(*child)))
                .collect();
            out.insert("properties".into(), Value::Object(props));
        }
        match &node.items {
            Some(Items::Homogeneous(item)) => {
                out.insert("items".into(), self.normalized_from(*item));
            }
            Some(Items::Variants(variants)) => {
                let variants: Vec<Value> = variants.iter().map(|v| self.normalized_from(*v)).collect();
                out.insert("items".into(), json!({ "oneOf": variants }));
            }
            None => {}
        }
        Value::Object(out)
    }

    /// Initial value for a new instance of `id`.
    pub fn default_value(&self, id: SchemaId) -> Value {
        let node = self.node(id);
        if let Some(value) = node.keyword("default").or_else(|| node.keyword("const")) {
            return value.clone();
        }
        if node.null_allowed {
            return Value::Null;
        }
        match node.basetype {
            Some(JsonType::Object) => Value::Object(
                node.properties
                    .iter()
                    .map(|(name, child)| (name.clone(), self.default_value(*child)))
                    .collect(),
            ),
            Some(JsonType::Array) => Value::Array(Vec::new()),
            Some(JsonType::String) => Value::String(String::new()),
            Some(JsonType::Integer | JsonType::Number) => Value::from(0),
            Some(JsonType::Boolean) => Value::Bool(false),
            Some(JsonType::Null) | None => Value::Null,
        }
    }
}

impl Tree for SchemaTree {
    type Id = SchemaId;

    fn root(&self) -> SchemaId {
        SchemaId(0)
    }

    fn parent(&self, id: SchemaId) -> Option<SchemaId> {
        self.node(id).parent
    }

    fn child(&self, id: SchemaId, token: &str) -> Option<SchemaId> {
        let node = self.node(id);
        if let Some(child) = node.properties.get(token) {
            return Some(*child);
        }
        match &node.items {
            // indices are accepted as an alias of `*`
            Some(Items::Homogeneous(item)) if token == "*" || token.parse::<usize>().is_ok() => Some(*item),
            Some(Items::Variants(variants)) => {
                let i = token.strip_prefix('*')?.parse::<usize>().ok()?;
                variants.get(i).copied()
            }
            _ => None,
        }
    }
}

pub(crate) const ANNOTATE: &str = "structural annotation";

pub(crate) fn invalid(keyword: &str, reason: String) -> CompileErrorKind {
    CompileErrorKind::InvalidKeyword { keyword: keyword.to_string(), reason }
}

/// A variant inherits the keywords of the `items` object that lists it.
fn merge_variant(items: &Map<String, Value>, variant: &Value) -> Value {
    let Value::Object(variant) = variant else { return variant.clone() };
    let mut merged: Map<String, Value> = items
        .iter()
        .filter(|(k, _)| k.as_str() != "oneOf")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (k, v) in variant {
        merged.insert(k.clone(), v.clone());
    }
    Value::Object(merged)
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {"amount": {"type": "number"}, "flag": {"type": "boolean"}}
                    }
                },
                "mixed": {
                    "type": "array",
                    "items": {"type": "object", "oneOf": [
                        {"properties": {"a": {"type": "string"}}},
                        {"properties": {"b": {"type": "string"}}}
                    ]}
                }
            }
        })
    }

    #[test]
    fn annotation_links_parents_and_pointers() {
        let (tree, errors) = SchemaTree::build(&sample());
        assert!(errors.is_empty());
        let flag = tree.by_pointer("/items/*/flag").unwrap();
        assert_eq!(tree.node(flag).pointer, "/items/*/flag");
        // pointer is derivable from the parent chain
        let derived = pointer::path_of(&tree, flag, |id| tree.node(id).name.clone());
        assert_eq!(derived, "/items/*/flag");
        let root = tree.root();
        for id in tree.ids().skip(1) {
            assert!(tree.node(id).parent.is_some());
        }
        assert!(tree.node(root).parent.is_none());
    }

    #[test]
    fn pointers_are_unique() {
        let (tree, _) = SchemaTree::build(&sample());
        let pointers: IndexSet<&str> = tree.nodes().map(|(_, n)| n.pointer.as_str()).collect();
        assert_eq!(pointers.len(), tree.len());
    }

    #[test]
    fn variants_inherit_items_keywords() {
        let (tree, _) = SchemaTree::build(&sample());
        let mixed = tree.by_pointer("/mixed").unwrap();
        assert!(!tree.node(mixed).homogeneous);
        let second = tree.by_pointer("/mixed/*1").unwrap();
        assert_eq!(tree.node(second).keyword("type"), Some(&json!("object")));
        assert!(tree.by_pointer("/mixed/*1/b").is_some());
        assert!(tree.by_pointer("/mixed/*").is_none());
        // an index addresses the item schema of a homogeneous array
        assert_eq!(tree.by_pointer("/items/4/amount"), tree.by_pointer("/items/*/amount"));
    }

    #[test]
    fn malformed_children_are_reported() {
        let (tree, errors) = SchemaTree::build(&json!({"properties": {"a": 3}, "items": [{}]}));
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].pointer, "/a");
        assert!(tree.by_pointer("/a").is_some());
    }
}
