//! Data compiler: links every data node to the schema node describing it.
use tracing::{debug, warn};

use crate::compiler::CompiledSchema;
use crate::error::{LinkError, LinkErrorKind};
use crate::expr::eval::truthy;
use crate::inference::JsonType;
use crate::schema::{Items, Keyword, SchemaId};

use super::{Content, DataId, DataTree};

/// Outcome of matching one heterogeneous array item against its variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VariantMatch {
    None,
    Unique(SchemaId),
    /// Every matching variant, in declaration order.
    Ambiguous(Vec<SchemaId>),
}

impl VariantMatch {
    /// First satisfying variant.
    pub fn selected(&self) -> Option<SchemaId> {
        match self {
            VariantMatch::None => None,
            VariantMatch::Unique(id) => Some(*id),
            VariantMatch::Ambiguous(ids) => ids.first().copied(),
        }
    }
}

impl DataTree {
    /// Walk the whole document from the root, replacing all previous links.
    pub fn link(&mut self, compiled: &CompiledSchema) -> Vec<LinkError> {
        self.links.clear();
        let mut errors = Vec::new();
        let root = self.root();
        self.link_node(compiled, root, compiled.root(), &mut errors);
        debug!(linked = self.links.len(), errors = errors.len(), "data linked");
        errors
    }

    /// Relink the subtree at `id`.
    ///
    /// Items of variant arrays pick their variant again; every other node
    /// keeps the schema it is currently linked to.
    pub fn relink(&mut self, compiled: &CompiledSchema, id: DataId) -> Vec<LinkError> {
        let mut errors = Vec::new();
        if let Some(variants) = self.variant_slot(compiled, id) {
            self.unlink(id);
            self.link_item(compiled, id, variants, &mut errors);
            return errors;
        }
        let Some(schema) = self.schema_of(id) else {
            return vec![LinkError { pointer: self.pointer_of(id), kind: LinkErrorKind::MissingSchema }];
        };
        self.unlink(id);
        self.link_node(compiled, id, schema, &mut errors);
        errors
    }

    /// Variants of the linked array holding `id`, if it holds variant items.
    fn variant_slot<'c>(&self, compiled: &'c CompiledSchema, id: DataId) -> Option<&'c [SchemaId]> {
        let array = self.parent_of(id)?;
        if self.kind(array) != Some(JsonType::Array) {
            return None;
        }
        match &compiled.tree.node(self.schema_of(array)?).items {
            Some(Items::Variants(variants)) => Some(variants.as_slice()),
            _ => None,
        }
    }

    fn unlink(&mut self, id: DataId) {
        self.links.remove(&id);
        for child in self.children(id) {
            self.unlink(child);
        }
    }

    fn link_node(&mut self, compiled: &CompiledSchema, id: DataId, schema: SchemaId, errors: &mut Vec<LinkError>) {
        let Some(kind) = self.kind(id) else { return };
        self.links.insert(id, schema);
        let node = compiled.tree.node(schema);
        if let Some(basetype) = node.basetype {
            let compatible = kind.satisfies(basetype) || (kind == JsonType::Null && node.null_allowed);
            if !compatible {
                errors.push(LinkError {
                    pointer: self.pointer_of(id),
                    kind: LinkErrorKind::KindMismatch { expected: node.target.to_string(), found: kind.as_str() },
                });
                return;
            }
        }

        let content = self.node(id).map(|n| n.content.clone());
        match (content, &node.items) {
            (Some(Content::Object(map)), _) => {
                for (key, child) in map {
                    match node.properties.get(&key) {
                        Some(prop) => self.link_node(compiled, child, *prop, errors),
                        None => debug!(pointer = %self.pointer_of(child), "no schema for property"),
                    }
                }
            }
            (Some(Content::Array(items)), Some(Items::Homogeneous(item_schema))) => {
                for item in items {
                    self.link_node(compiled, item, *item_schema, errors);
                }
            }
            (Some(Content::Array(items)), Some(Items::Variants(variants))) => {
                for item in items {
                    self.link_item(compiled, item, variants, errors);
                }
            }
            _ => {}
        }
    }

    fn link_item(&mut self, compiled: &CompiledSchema, item: DataId, variants: &[SchemaId], errors: &mut Vec<LinkError>) {
        match self.select_variant(compiled, item, variants) {
            VariantMatch::None => {
                debug!(pointer = %self.pointer_of(item), "no variant matches, item left unlinked");
            }
            VariantMatch::Unique(variant) => self.link_node(compiled, item, variant, errors),
            VariantMatch::Ambiguous(matches) => {
                warn!(pointer = %self.pointer_of(item), candidates = matches.len(), "several variants match, using the first");
                self.link_node(compiled, item, matches[0], errors);
            }
        }
    }

    /// Evaluate each variant's `case` against `item`; an indeterminate result counts as a match.
    pub fn select_variant(&self, compiled: &CompiledSchema, item: DataId, variants: &[SchemaId]) -> VariantMatch {
        let mut matches: Vec<SchemaId> = variants
            .iter()
            .copied()
            .filter(|variant| {
                let verdict = self.evaluate_with(compiled, *variant, item, Keyword::Case);
                verdict.is_null() || truthy(&verdict)
            })
            .collect();
        match matches.len() {
            0 => VariantMatch::None,
            1 => VariantMatch::Unique(matches.remove(0)),
            _ => VariantMatch::Ambiguous(matches),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use serde_json::{Value, json};

    fn shapes() -> CompiledSchema {
        compile(&json!({
            "type": "object",
            "properties": {
                "shapes": {
                    "type": "array",
                    "items": {"type": "object", "oneOf": [
                        {"case": "value.kind === 'circle'", "properties": {"kind": {"type": "string"}, "r": {"type": "number"}}},
                        {"case": "value.kind === 'square'", "properties": {"kind": {"type": "string"}, "side": {"type": "number"}}},
                        {"case": "value.side > 100", "properties": {"kind": {"type": "string"}, "side": {"type": "number"}}}
                    ]}
                }
            }
        }))
        .unwrap()
    }

    fn linked(data: Value) -> (CompiledSchema, DataTree, Vec<LinkError>) {
        let compiled = shapes();
        let mut tree = DataTree::new(&data);
        let errors = tree.link(&compiled);
        (compiled, tree, errors)
    }

    #[test]
    fn variants_are_selected_by_case() {
        let (compiled, tree, errors) = linked(json!({"shapes": [{"kind": "square", "side": 2}, {"kind": "circle", "r": 1}]}));
        assert!(errors.is_empty());
        let schema_pointer = |p: &str| {
            let id = tree.by_pointer(p).unwrap();
            compiled.tree.node(tree.schema_of(id).unwrap()).pointer.clone()
        };
        assert_eq!(schema_pointer("/shapes/0"), "/shapes/*1");
        assert_eq!(schema_pointer("/shapes/1/r"), "/shapes/*0/r");
    }

    #[test]
    fn items_matching_no_variant_are_skipped() {
        let (_, tree, errors) = linked(json!({"shapes": [{"kind": "hexagon"}, {"kind": "circle"}]}));
        assert!(errors.is_empty());
        let skipped = tree.by_pointer("/shapes/0").unwrap();
        assert!(tree.schema_of(skipped).is_none());
        assert!(tree.schema_of(tree.by_pointer("/shapes/0/kind").unwrap()).is_none());
        // siblings are unaffected
        assert!(tree.schema_of(tree.by_pointer("/shapes/1").unwrap()).is_some());
    }

    #[test]
    fn ambiguous_items_use_the_first_match() {
        let (compiled, tree, _) = linked(json!({"shapes": [{"kind": "square", "side": 500}]}));
        let item = tree.by_pointer("/shapes/0").unwrap();
        let shapes = compiled.tree.by_pointer("/shapes").unwrap();
        let Some(Items::Variants(variants)) = &compiled.tree.node(shapes).items else { panic!("variants") };
        let matched = tree.select_variant(&compiled, item, variants);
        assert_eq!(matched, VariantMatch::Ambiguous(vec![variants[1], variants[2]]));
        assert_eq!(tree.schema_of(item), Some(variants[1]));
    }

    #[test]
    fn kind_mismatches_are_collected_per_subtree() {
        let compiled = compile(&json!({
            "type": "object",
            "properties": {
                "n": {"type": "integer"},
                "maybe": {"type": ["string", "null"]},
                "list": {"type": "array", "items": {"type": "string"}}
            }
        }))
        .unwrap();
        let mut tree = DataTree::new(&json!({"n": "seven", "maybe": null, "list": ["a", 3, "c"]}));
        let errors = tree.link(&compiled);
        let pointers: Vec<&str> = errors.iter().map(|e| e.pointer.as_str()).collect();
        assert_eq!(pointers, ["/n", "/list/1"]);
        assert!(matches!(errors[0].kind, LinkErrorKind::KindMismatch { found: "string", .. }));
        assert!(tree.schema_of(tree.by_pointer("/list/2").unwrap()).is_some());
    }

    #[test]
    fn updated_items_switch_variants() {
        let (compiled, mut tree, _) = linked(json!({"shapes": [{"kind": "circle", "r": 1}, {"kind": "hexagon"}]}));
        let schema_pointer = |tree: &DataTree, p: &str| {
            let id = tree.by_pointer(p).unwrap();
            tree.schema_of(id).map(|s| compiled.tree.node(s).pointer.clone())
        };

        let first = tree.by_pointer("/shapes/0").unwrap();
        tree.set_value(&compiled, first, &json!({"kind": "square", "side": 3})).unwrap();
        assert_eq!(schema_pointer(&tree, "/shapes/0").as_deref(), Some("/shapes/*1"));
        assert_eq!(schema_pointer(&tree, "/shapes/0/side").as_deref(), Some("/shapes/*1/side"));

        // an item skipped by the first walk links once it matches
        let second = tree.by_pointer("/shapes/1").unwrap();
        tree.set_value(&compiled, second, &json!({"kind": "circle", "r": 2})).unwrap();
        assert_eq!(schema_pointer(&tree, "/shapes/1").as_deref(), Some("/shapes/*0"));
        assert_eq!(schema_pointer(&tree, "/shapes/1/r").as_deref(), Some("/shapes/*0/r"));

        // and unlinks again once nothing matches
        tree.set_value(&compiled, first, &json!({"kind": "hexagon"})).unwrap();
        assert_eq!(schema_pointer(&tree, "/shapes/0"), None);
    }

    #[test]
    fn relink_requires_an_existing_link() {
        let compiled = shapes();
        let mut tree = DataTree::new(&json!({"shapes": []}));
        let shapes = tree.by_pointer("/shapes").unwrap();
        let errors = tree.relink(&compiled, shapes);
        assert_eq!(errors[0].kind, LinkErrorKind::MissingSchema);
    }
}
