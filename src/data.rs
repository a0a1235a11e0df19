//! Live data tree.
//!
//! The document is split into an arena of [`DataId`] handles so every value
//! has a stable identity, a parent, and a position. Schema links are kept in a
//! side-table keyed by that identity and are never part of the serialized
//! value; [`DataTree::to_value`] gives back plain JSON.
pub mod link;

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};
use tracing::trace;

use crate::compiler::CompiledSchema;
use crate::error::{FatalError, PointerError};
use crate::expr::Scope;
use crate::inference::JsonType;
use crate::pointer::{self, Pointer, Tree};
use crate::schema::{Items, Keyword, SchemaId};

pub use link::VariantMatch;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataId(usize);

#[derive(Clone, Debug)]
enum Content {
    Scalar(Value),
    Array(Vec<DataId>),
    Object(IndexMap<String, DataId>),
}

#[derive(Clone, Debug)]
struct DataNode {
    content: Content,
    parent: Option<DataId>,
}

#[derive(Clone, Debug)]
pub struct DataTree {
    /// `None` marks a detached slot; ids are never reused.
    nodes: Vec<Option<DataNode>>,
    links: HashMap<DataId, SchemaId>,
}

impl DataTree {
    pub fn new(value: &Value) -> Self {
        let mut tree = DataTree { nodes: Vec::new(), links: HashMap::new() };
        tree.alloc(value, None);
        tree
    }

    fn alloc(&mut self, value: &Value, parent: Option<DataId>) -> DataId {
        let id = DataId(self.nodes.len());
        self.nodes.push(Some(DataNode { content: Content::Scalar(Value::Null), parent }));
        let content = self.content_of(value, id);
        if let Some(node) = self.nodes[id.0].as_mut() {
            node.content = content;
        }
        id
    }

    fn content_of(&mut self, value: &Value, id: DataId) -> Content {
        match value {
            Value::Array(items) => Content::Array(items.iter().map(|item| self.alloc(item, Some(id))).collect()),
            Value::Object(map) => Content::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), self.alloc(item, Some(id))))
                    .collect(),
            ),
            scalar => Content::Scalar(scalar.clone()),
        }
    }

    fn node(&self, id: DataId) -> Option<&DataNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn live(&self, id: DataId) -> Result<&DataNode, FatalError> {
        self.node(id).ok_or(FatalError::UnknownNode(id.0))
    }

    pub fn root(&self) -> DataId {
        DataId(0)
    }

    pub fn contains(&self, id: DataId) -> bool {
        self.node(id).is_some()
    }

    /// Live node count.
    pub fn len(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> impl Iterator<Item = DataId> + '_ {
        self.nodes.iter().enumerate().filter(|(_, n)| n.is_some()).map(|(i, _)| DataId(i))
    }

    pub fn to_value(&self) -> Value {
        self.value(self.root()).unwrap_or(Value::Null)
    }

    /// Plain JSON of the subtree at `id`.
    pub fn value(&self, id: DataId) -> Option<Value> {
        Some(match &self.node(id)?.content {
            Content::Scalar(value) => value.clone(),
            Content::Array(items) => Value::Array(items.iter().filter_map(|item| self.value(*item)).collect()),
            Content::Object(map) => Value::Object(
                map.iter()
                    .filter_map(|(key, item)| Some((key.clone(), self.value(*item)?)))
                    .collect::<Map<String, Value>>(),
            ),
        })
    }

    pub fn kind(&self, id: DataId) -> Option<JsonType> {
        Some(match &self.node(id)?.content {
            Content::Scalar(value) => JsonType::of_value(value),
            Content::Array(_) => JsonType::Array,
            Content::Object(_) => JsonType::Object,
        })
    }

    pub fn parent_of(&self, id: DataId) -> Option<DataId> {
        self.node(id)?.parent
    }

    /// Property name or index under the parent, as a pointer token.
    pub fn token_of(&self, id: DataId) -> Option<String> {
        match self.key_of(id)? {
            Value::String(name) => Some(name),
            index => Some(index.to_string()),
        }
    }

    /// Property name (string) or index (number) under the parent.
    pub fn key_of(&self, id: DataId) -> Option<Value> {
        let parent = self.node(self.parent_of(id)?)?;
        match &parent.content {
            Content::Array(items) => items.iter().position(|item| *item == id).map(Value::from),
            Content::Object(map) => map.iter().find(|(_, item)| **item == id).map(|(k, _)| Value::from(k.as_str())),
            Content::Scalar(_) => None,
        }
    }

    pub fn children(&self, id: DataId) -> Vec<DataId> {
        match self.node(id).map(|n| &n.content) {
            Some(Content::Array(items)) => items.clone(),
            Some(Content::Object(map)) => map.values().copied().collect(),
            _ => Vec::new(),
        }
    }

    fn array_items(&self, id: DataId) -> &[DataId] {
        match self.node(id).map(|n| &n.content) {
            Some(Content::Array(items)) => items,
            _ => &[],
        }
    }

    pub fn pointer_of(&self, id: DataId) -> String {
        pointer::path_of(self, id, |at| self.token_of(at))
    }

    fn tokens_of(&self, id: DataId) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut at = id;
        while let Some(parent) = self.parent_of(at) {
            tokens.extend(self.token_of(at));
            at = parent;
        }
        tokens.reverse();
        tokens
    }

    pub fn by_pointer(&self, pointer: &str) -> Option<DataId> {
        self.resolve(self.root(), pointer).ok().flatten()
    }

    pub fn resolve(&self, from: DataId, pointer: &str) -> Result<Option<DataId>, PointerError> {
        pointer::resolve(self, from, pointer)
    }

    /// Schema node this data node was linked to by the last walk.
    pub fn schema_of(&self, id: DataId) -> Option<SchemaId> {
        self.links.get(&id).copied()
    }

    // ————————————————————————————————————————————————————————————————————————
    // EVALUATION
    // ————————————————————————————————————————————————————————————————————————

    /// Evaluate `keyword` of the schema linked to `id`, with `id` as `value`.
    ///
    /// Unlinked nodes evaluate the keyword's fallback.
    pub fn evaluate(&self, compiled: &CompiledSchema, id: DataId, keyword: Keyword) -> Value {
        match self.schema_of(id) {
            Some(schema) => self.evaluate_with(compiled, schema, id, keyword),
            None => {
                let value = self.value(id).unwrap_or_default();
                let key = self.key_of(id).unwrap_or_default();
                keyword.fallback().eval(&self.empty_scope(compiled, &value, &key))
            }
        }
    }

    /// `keyword` of an arbitrary schema node, evaluated for the data node `id`.
    fn evaluate_with(&self, compiled: &CompiledSchema, schema: SchemaId, id: DataId, keyword: Keyword) -> Value {
        let value = self.value(id).unwrap_or_default();
        let key = self.key_of(id).unwrap_or_default();
        self.eval_in(compiled, schema, self.parent_of(id), key, value, keyword)
    }

    /// Evaluate for the property `key` of `parent`, whether or not it exists yet.
    pub fn evaluate_at(
        &self,
        compiled: &CompiledSchema,
        schema: SchemaId,
        parent: DataId,
        key: &str,
        keyword: Keyword,
    ) -> Value {
        let value = self
            .child(parent, key)
            .and_then(|child| self.value(child))
            .unwrap_or(Value::Null);
        self.eval_in(compiled, schema, Some(parent), Value::from(key), value, keyword)
    }

    fn eval_in(
        &self,
        compiled: &CompiledSchema,
        schema: SchemaId,
        container: Option<DataId>,
        key: Value,
        value: Value,
        keyword: Keyword,
    ) -> Value {
        let node = compiled.tree.node(schema);
        let parent = container.and_then(|c| self.value(c)).unwrap_or(Value::Null);
        let anchor = container.unwrap_or(self.root());
        let deref = |source: &str| -> Result<Option<Value>, PointerError> {
            Ok(self.resolve(anchor, source)?.and_then(|target| self.value(target)))
        };
        let scope = Scope {
            schema: &node.raw,
            value: &value,
            parent: &parent,
            key: &key,
            user_data: &compiled.user_data,
            deref: &deref,
        };
        let result = node.evaluator(keyword).eval(&scope);
        trace!(schema = %node.pointer, keyword = keyword.name(), %result, "evaluated");
        result
    }

    fn empty_scope<'a>(&self, compiled: &'a CompiledSchema, value: &'a Value, key: &'a Value) -> Scope<'a> {
        static NOTHING: Value = Value::Null;
        Scope {
            schema: &NOTHING,
            value,
            parent: &NOTHING,
            key,
            user_data: &compiled.user_data,
            deref: &no_deref,
        }
    }

    // ————————————————————————————————————————————————————————————————————————
    // REACTIVITY
    // ————————————————————————————————————————————————————————————————————————

    /// Data nodes whose expressions read `changed`.
    ///
    /// Observer pointers are schema pointers. Along the prefix they share with
    /// the changed node's own schema pointer, `*` segments are bound to the
    /// changed node's indices; past that prefix they fan out over every item.
    pub fn dependents(&self, compiled: &CompiledSchema, changed: DataId) -> Vec<DataId> {
        let Some(schema) = self.schema_of(changed) else { return Vec::new() };
        let node = compiled.tree.node(schema);
        let Ok(schema_tokens) = Pointer::parse_absolute(&node.pointer) else { return Vec::new() };
        let data_tokens = self.tokens_of(changed);

        let mut out: IndexSet<DataId> = IndexSet::new();
        for observer in &node.observers {
            let Ok(tokens) = Pointer::parse_absolute(observer) else { continue };
            let mut frontier = vec![self.root()];
            let mut bound = true;
            for (i, token) in tokens.iter().enumerate() {
                bound &= schema_tokens.get(i) == Some(token);
                let mut next = Vec::new();
                for at in frontier {
                    match (bound.then(|| data_tokens.get(i)).flatten(), token.strip_prefix('*')) {
                        (Some(data_token), _) => next.extend(self.child(at, data_token)),
                        (None, Some(variant)) => next.extend(self.array_items(at).iter().copied().filter(|item| {
                            variant.is_empty()
                                || self
                                    .schema_of(*item)
                                    .is_some_and(|s| compiled.tree.node(s).name.as_deref() == Some(token.as_str()))
                        })),
                        (None, None) => next.extend(self.child(at, token)),
                    }
                }
                frontier = next;
            }
            out.extend(frontier);
        }
        out.into_iter().collect()
    }

    // ————————————————————————————————————————————————————————————————————————
    // MUTATION
    // ————————————————————————————————————————————————————————————————————————

    /// Replace the subtree at `id`, relink it, and report who must re-evaluate.
    ///
    /// Observers of every node of the new subtree are reported, not only
    /// those of `id`.
    pub fn set_value(&mut self, compiled: &CompiledSchema, id: DataId, value: &Value) -> Result<Vec<DataId>, FatalError> {
        if id == self.root() {
            return Err(FatalError::RootMutation);
        }
        self.live(id)?;
        for child in self.children(id) {
            self.release(child);
        }
        let content = self.content_of(value, id);
        if let Some(node) = self.nodes[id.0].as_mut() {
            node.content = content;
        }
        for error in self.relink(compiled, id) {
            tracing::warn!(%error, "relink after update failed");
        }
        let mut affected: IndexSet<DataId> = IndexSet::new();
        for changed in self.subtree(id) {
            affected.extend(self.dependents(compiled, changed));
        }
        Ok(affected.into_iter().collect())
    }

    /// `id` and its descendants, breadth first.
    fn subtree(&self, id: DataId) -> Vec<DataId> {
        let mut out = vec![id];
        let mut at = 0;
        while let Some(next) = out.get(at).copied() {
            out.extend(self.children(next));
            at += 1;
        }
        out
    }

    /// Remove `id` from its container; its links are cleared.
    pub fn detach(&mut self, id: DataId) -> Result<Value, FatalError> {
        if id == self.root() {
            return Err(FatalError::RootMutation);
        }
        let parent = self.live(id)?.parent.ok_or(FatalError::RootMutation)?;
        let value = self.value(id).unwrap_or(Value::Null);
        if let Some(node) = self.nodes[parent.0].as_mut() {
            match &mut node.content {
                Content::Array(items) => items.retain(|item| *item != id),
                Content::Object(map) => map.retain(|_, item| *item != id),
                Content::Scalar(_) => {}
            }
        }
        self.release(id);
        Ok(value)
    }

    fn release(&mut self, id: DataId) {
        for child in self.children(id) {
            self.release(child);
        }
        self.links.remove(&id);
        if let Some(slot) = self.nodes.get_mut(id.0) {
            *slot = None;
        }
    }

    /// Append `value` to the array at `array` and link the new item.
    pub fn push(&mut self, compiled: &CompiledSchema, array: DataId, value: &Value) -> Result<DataId, FatalError> {
        if !matches!(self.live(array)?.content, Content::Array(_)) {
            return Err(FatalError::NotAnArray(self.pointer_of(array)));
        }
        let item = self.alloc(value, Some(array));
        if let Some(Content::Array(items)) = self.nodes[array.0].as_mut().map(|n| &mut n.content) {
            items.push(item);
        }
        if self.schema_of(array).is_some() {
            for error in self.relink(compiled, array) {
                tracing::warn!(%error, "relink after push failed");
            }
        }
        Ok(item)
    }

    /// Append an item synthesized from the array's item schema.
    pub fn push_default(&mut self, compiled: &CompiledSchema, array: DataId) -> Result<DataId, FatalError> {
        let item_schema = self.schema_of(array).and_then(|s| match &compiled.tree.node(s).items {
            Some(Items::Homogeneous(item)) => Some(*item),
            Some(Items::Variants(variants)) => variants.first().copied(),
            None => None,
        });
        let value = item_schema.map(|s| compiled.tree.default_value(s)).unwrap_or(Value::Null);
        self.push(compiled, array, &value)
    }
}

fn no_deref(_: &str) -> Result<Option<Value>, PointerError> {
    Ok(None)
}

impl Tree for DataTree {
    type Id = DataId;

    fn root(&self) -> DataId {
        DataId(0)
    }

    fn parent(&self, id: DataId) -> Option<DataId> {
        self.parent_of(id)
    }

    fn child(&self, id: DataId, token: &str) -> Option<DataId> {
        match &self.node(id)?.content {
            Content::Object(map) => map.get(token).copied(),
            Content::Array(items) => items.get(token.parse::<usize>().ok()?).copied(),
            Content::Scalar(_) => None,
        }
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use serde_json::json;

    fn order_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "total": {"type": "number"},
                "items": {"type": "array", "items": {"type": "object", "properties": {
                    "amount": {"type": "number", "default": 1},
                    "flag": {"type": "boolean", "visible": "$`0/amount` > 10", "readonly": "$`2/total` > 100"}
                }}}
            }
        })
    }

    fn order_data() -> Value {
        json!({"total": 5, "items": [
            {"amount": 1, "flag": true},
            {"amount": 2, "flag": false},
            {"amount": 30, "flag": true}
        ]})
    }

    #[test]
    fn round_trips_plain_json() {
        let tree = DataTree::new(&order_data());
        assert_eq!(tree.to_value(), order_data());
    }

    #[test]
    fn pointers_round_trip_for_every_node() {
        let tree = DataTree::new(&order_data());
        for id in tree.ids() {
            let pointer = tree.pointer_of(id);
            assert_eq!(tree.by_pointer(&pointer), Some(id), "{pointer}");
        }
        assert_eq!(tree.pointer_of(tree.by_pointer("/items/2/flag").unwrap()), "/items/2/flag");
    }

    #[test]
    fn dependents_bind_indices_of_the_changed_item() {
        let compiled = compile(&order_schema()).unwrap();
        let mut tree = DataTree::new(&order_data());
        assert!(tree.link(&compiled).is_empty());
        let amount = tree.by_pointer("/items/2/amount").unwrap();
        let pointers: Vec<String> = tree.dependents(&compiled, amount).into_iter().map(|d| tree.pointer_of(d)).collect();
        assert_eq!(pointers, ["/items/2/flag"]);
    }

    #[test]
    fn unbound_stars_fan_out() {
        let compiled = compile(&order_schema()).unwrap();
        let mut tree = DataTree::new(&order_data());
        tree.link(&compiled);
        let total = tree.by_pointer("/total").unwrap();
        let pointers: Vec<String> = tree.dependents(&compiled, total).into_iter().map(|d| tree.pointer_of(d)).collect();
        assert_eq!(pointers, ["/items/0/flag", "/items/1/flag", "/items/2/flag"]);
    }

    #[test]
    fn expressions_read_live_siblings() {
        let compiled = compile(&order_schema()).unwrap();
        let mut tree = DataTree::new(&order_data());
        tree.link(&compiled);
        let flag = |tree: &DataTree, i: usize| tree.by_pointer(&format!("/items/{i}/flag")).unwrap();
        assert_eq!(tree.evaluate(&compiled, flag(&tree, 0), Keyword::Visible), json!(false));
        assert_eq!(tree.evaluate(&compiled, flag(&tree, 2), Keyword::Visible), json!(true));

        let total = tree.by_pointer("/total").unwrap();
        let affected = tree.set_value(&compiled, total, &json!(500)).unwrap();
        assert_eq!(affected.len(), 3);
        assert_eq!(tree.evaluate(&compiled, flag(&tree, 1), Keyword::Readonly), json!(true));
    }

    #[test]
    fn replacing_a_container_reports_observers_of_its_descendants() {
        let compiled = compile(&order_schema()).unwrap();
        let mut tree = DataTree::new(&order_data());
        tree.link(&compiled);
        let first = tree.by_pointer("/items/0").unwrap();
        let affected = tree.set_value(&compiled, first, &json!({"amount": 50, "flag": true})).unwrap();
        let pointers: Vec<String> = affected.into_iter().map(|d| tree.pointer_of(d)).collect();
        assert_eq!(pointers, ["/items/0/flag"]);
        let flag = tree.by_pointer("/items/0/flag").unwrap();
        assert_eq!(tree.evaluate(&compiled, flag, Keyword::Visible), json!(true));
    }

    #[test]
    fn evaluate_at_covers_missing_properties() {
        let compiled = compile(&json!({
            "type": "object",
            "properties": {
                "kind": {"type": "string"},
                "extra": {"type": "string", "requiredWhen": "$`0/kind` === 'other'"}
            }
        }))
        .unwrap();
        let tree = DataTree::new(&json!({"kind": "other"}));
        let extra = compiled.tree.by_pointer("/extra").unwrap();
        let root = tree.root();
        assert_eq!(tree.evaluate_at(&compiled, extra, root, "extra", Keyword::RequiredWhen), json!(true));
    }

    #[test]
    fn root_cannot_be_replaced_or_detached() {
        let compiled = compile(&order_schema()).unwrap();
        let mut tree = DataTree::new(&order_data());
        let root = tree.root();
        assert_eq!(tree.set_value(&compiled, root, &json!({})), Err(FatalError::RootMutation));
        assert_eq!(tree.detach(root), Err(FatalError::RootMutation));
    }

    #[test]
    fn detach_clears_links_and_shifts_indices() {
        let compiled = compile(&order_schema()).unwrap();
        let mut tree = DataTree::new(&order_data());
        tree.link(&compiled);
        let first = tree.by_pointer("/items/0").unwrap();
        let first_amount = tree.by_pointer("/items/0/amount").unwrap();
        let removed = tree.detach(first).unwrap();
        assert_eq!(removed, json!({"amount": 1, "flag": true}));
        assert!(tree.schema_of(first_amount).is_none());
        assert!(!tree.contains(first_amount));
        assert_eq!(tree.value(tree.by_pointer("/items/0/amount").unwrap()), Some(json!(2)));
        assert_eq!(tree.detach(first), Err(FatalError::UnknownNode(first.0)));
    }

    #[test]
    fn push_default_synthesizes_from_item_schema() {
        let compiled = compile(&order_schema()).unwrap();
        let mut tree = DataTree::new(&order_data());
        tree.link(&compiled);
        let items = tree.by_pointer("/items").unwrap();
        let added = tree.push_default(&compiled, items).unwrap();
        assert_eq!(tree.value(added), Some(json!({"amount": 1, "flag": false})));
        assert_eq!(tree.pointer_of(added), "/items/3");
        assert!(tree.schema_of(tree.by_pointer("/items/3/flag").unwrap()).is_some());

        let total = tree.by_pointer("/total").unwrap();
        assert!(matches!(tree.push(&compiled, total, &json!(1)), Err(FatalError::NotAnArray(_))));
    }
}
