//! Widget selection: maps a typed node to the name of the field that edits it.
use serde_json::Value;

use crate::inference::JsonType;

use super::{Items, SchemaNode};

/// Largest enumeration rendered as check/radio buttons.
pub const CHECK_MAX: usize = 3;
/// Largest enumeration rendered as a drop-down; anything longer is a typeahead.
pub const SELECT_MAX: usize = 20;
/// Strings allowed to be longer than this get a multi-line editor.
pub const TEXTAREA_MIN_LENGTH: u64 = 256;

/// First matching rule wins.
///
/// `enum_len` is the length of the node's own enumeration, or of its item
/// schema's for enum arrays. An enumeration with no items yet (a pending
/// `enumSource`) gets its basetype widget.
pub fn select(node: &SchemaNode, enum_len: usize) -> String {
    if let Some(explicit) = node.keyword("field").and_then(Value::as_str) {
        return explicit.to_string();
    }
    if node.keyword("const").is_some() {
        return "const".into();
    }
    if node.reference.is_some() && node.is_primitive() {
        return "reference".into();
    }
    if (node.isenum || node.isenumarray) && enum_len > 0 {
        let widget = match enum_len {
            n if n <= CHECK_MAX => "check",
            n if n <= SELECT_MAX => "select",
            _ => "typeahead",
        };
        return if node.isenumarray { format!("multi-{widget}") } else { widget.to_string() };
    }
    if node.basetype == Some(JsonType::String) {
        if let Some(widget) = node.keyword("format").and_then(Value::as_str).and_then(format_widget) {
            return widget.into();
        }
        let long = node.keyword("maxLength").and_then(Value::as_u64).is_some_and(|n| n > TEXTAREA_MIN_LENGTH);
        return if long { "textarea".into() } else { "string".into() };
    }
    match (node.basetype, &node.items) {
        (Some(JsonType::Array), Some(Items::Variants(_))) => "variant-array".into(),
        (Some(basetype), _) => basetype.as_str().into(),
        (None, _) => "unknown".into(),
    }
}

fn format_widget(format: &str) -> Option<&'static str> {
    Some(match format {
        "date" => "date",
        "time" => "time",
        "date-time" => "datetime",
        "email" => "email",
        "uri" | "url" => "url",
        "color" => "color",
        "password" => "password",
        _ => return None,
    })
}
