//! Display ordering of object properties.
//!
//! Properties sharing a `tab` are pulled together at the position of the
//! first property of that tab; within a tab, properties sharing a `group`
//! are pulled together the same way. Declaration order breaks every tie, so
//! the result is deterministic.
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use super::{SchemaId, SchemaTree};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldOrder {
    pub fieldname: String,
    #[serde(skip)]
    pub schema: SchemaId,
    pub fieldnum: usize,
    /// Index of the first property of the same tab.
    pub tabnum: Option<usize>,
    /// Index of the first property of the same tab and group.
    pub groupnum: Option<usize>,
    pub tabname: Option<String>,
    pub groupname: Option<String>,
}

impl FieldOrder {
    fn key(&self) -> (usize, usize, usize) {
        (
            self.tabnum.unwrap_or(self.fieldnum),
            self.groupnum.unwrap_or(self.fieldnum),
            self.fieldnum,
        )
    }
}

pub fn field_order(tree: &SchemaTree, id: SchemaId) -> Vec<FieldOrder> {
    let mut first_tab: IndexMap<String, usize> = IndexMap::new();
    let mut first_group: IndexMap<(Option<String>, String), usize> = IndexMap::new();
    let mut fields: Vec<FieldOrder> = Vec::new();
    for (fieldnum, (name, child)) in tree.node(id).properties.iter().enumerate() {
        let node = tree.node(*child);
        let tab = node.keyword("tab").and_then(Value::as_str).map(str::to_string);
        let group = node.keyword("group").and_then(Value::as_str).map(str::to_string);
        let tabnum = tab.as_ref().map(|t| *first_tab.entry(t.clone()).or_insert(fieldnum));
        let groupnum = group
            .as_ref()
            .map(|g| *first_group.entry((tab.clone(), g.clone())).or_insert(fieldnum));
        fields.push(FieldOrder {
            fieldname: name.clone(),
            schema: *child,
            fieldnum,
            tabnum,
            groupnum,
            tabname: tab,
            groupname: group,
        });
    }
    fields.sort_by_key(FieldOrder::key);
    fields
}
