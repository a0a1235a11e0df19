//! Observer graph between schema nodes.
//!
//! When an expression on node `A` dereferences node `B`, `A`'s pointer is
//! added to `B.observers`. Edges are set-valued so recompiling the same
//! expression never duplicates them.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::CompileErrorKind;
use crate::schema::{SchemaId, SchemaTree};

static POINTER_REFERENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$`([^`]*)`").expect("static regex"));

/// Every `` $`pointer` `` in `source`, in order of appearance.
pub fn referenced_pointers(source: &str) -> impl Iterator<Item = &str> {
    POINTER_REFERENCE
        .captures_iter(source)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Record `id` as an observer of every node its `keyword` expression reads.
///
/// Pointers are resolved from the node's container (its parent), so `0/amount`
/// written on `/items/*/flag` names the sibling `/items/*/amount`.
pub fn register(tree: &mut SchemaTree, id: SchemaId, keyword: &str, source: &str) -> Result<(), CompileErrorKind> {
    let anchor = tree.node(id).parent.unwrap_or(id);
    let observer = tree.node(id).pointer.clone();
    let mut targets = Vec::new();
    for pointer in referenced_pointers(source) {
        match tree.resolve(anchor, pointer)? {
            Some(target) => targets.push(target),
            None => {
                return Err(CompileErrorKind::DanglingPointer {
                    keyword: keyword.to_string(),
                    pointer: pointer.to_string(),
                });
            }
        }
    }
    for target in targets {
        tree.node_mut(target).observers.insert(observer.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> SchemaTree {
        let raw = json!({
            "type": "object",
            "properties": {
                "items": {"type": "array", "items": {"type": "object", "properties": {
                    "amount": {"type": "number"},
                    "flag": {"type": "boolean"}
                }}},
                "total": {"type": "number"}
            }
        });
        SchemaTree::build(&raw).0
    }

    #[test]
    fn scanner_finds_every_pointer() {
        let found: Vec<&str> = referenced_pointers("$`0/a` + $`/b/c` > `x`").collect();
        assert_eq!(found, ["0/a", "/b/c"]);
    }

    #[test]
    fn sibling_reference_adds_edge_once() {
        let mut tree = tree();
        let flag = tree.by_pointer("/items/*/flag").unwrap();
        let amount = tree.by_pointer("/items/*/amount").unwrap();
        register(&mut tree, flag, "visible", "$`0/amount` > 10").unwrap();
        register(&mut tree, flag, "visible", "$`0/amount` > 10").unwrap();
        let observers: Vec<&str> = tree.node(amount).observers.iter().map(String::as_str).collect();
        assert_eq!(observers, ["/items/*/flag"]);
    }

    #[test]
    fn absolute_and_ancestor_references() {
        let mut tree = tree();
        let flag = tree.by_pointer("/items/*/flag").unwrap();
        let total = tree.by_pointer("/total").unwrap();
        register(&mut tree, flag, "readonly", "$`2/total` > 0 || $`/total` < 0").unwrap();
        assert!(tree.node(total).observers.contains("/items/*/flag"));
    }

    #[test]
    fn dangling_pointer_is_reported() {
        let mut tree = tree();
        let flag = tree.by_pointer("/items/*/flag").unwrap();
        let err = register(&mut tree, flag, "visible", "$`0/nope`").unwrap_err();
        assert!(matches!(err, CompileErrorKind::DanglingPointer { ref pointer, .. } if pointer == "0/nope"));
        let err = register(&mut tree, flag, "visible", "$`9/x`").unwrap_err();
        assert!(matches!(err, CompileErrorKind::Pointer(_)));
    }
}
