//! The compile steps, grouped into the passes the compiler runs in order.
//!
//! Each pass is a full depth-first walk of the tree; at every node each step
//! whose `appliable` predicate holds is applied in turn. A failing step is
//! reported against the node and the remaining steps of that pass skip it.
use serde_json::Value;
use tracing::debug;

use crate::config::CompilerConfig;
use crate::enums;
use crate::error::{CompileErrorKind, FatalError, PointerError};
use crate::inference::{self, JsonType};
use crate::observers;
use crate::pointer::{self, Pointer};

use super::{Items, Keyword, SchemaId, SchemaTree, field, invalid, order};

pub struct StepContext<'c> {
    pub config: &'c mut CompilerConfig,
    /// Live document, when compiling against one.
    pub data: Option<&'c Value>,
}

pub trait CompileStep {
    fn description(&self) -> &'static str;

    fn appliable(&self, _tree: &SchemaTree, _id: SchemaId) -> bool {
        true
    }

    fn apply(&self, tree: &mut SchemaTree, id: SchemaId, cx: &mut StepContext<'_>) -> Result<(), CompileErrorKind>;
}

pub struct Pass {
    pub name: &'static str,
    pub steps: Vec<Box<dyn CompileStep>>,
}

/// Passes after structural annotation, in execution order.
pub fn passes() -> Vec<Pass> {
    vec![
        Pass { name: "types", steps: vec![Box::new(InferTypes), Box::new(ResolveEnums)] },
        Pass {
            name: "derive",
            steps: vec![
                Box::new(InitObservers),
                Box::new(DetectEnumArray),
                Box::new(SeedRequired),
                Box::new(ResolveReference),
                Box::new(SelectField),
                Box::new(OrderFields),
            ],
        },
        Pass { name: "expressions", steps: vec![Box::new(CompileExpressions)] },
    ]
}

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

struct InferTypes;

impl CompileStep for InferTypes {
    fn description(&self) -> &'static str {
        "type inference"
    }

    fn appliable(&self, tree: &SchemaTree, id: SchemaId) -> bool {
        tree.node(id).raw.is_object()
    }

    fn apply(&self, tree: &mut SchemaTree, id: SchemaId, _cx: &mut StepContext<'_>) -> Result<(), CompileErrorKind> {
        let node = tree.node_mut(id);
        let target = inference::infer_target(node.keywords())?;
        // keep the target even when no basetype can be picked
        node.target = target.clone();
        let (basetype, null_allowed) = inference::resolve_basetype(&target)?;
        node.basetype = Some(basetype);
        node.null_allowed = null_allowed;
        Ok(())
    }
}

struct ResolveEnums;

impl CompileStep for ResolveEnums {
    fn description(&self) -> &'static str {
        "enumeration"
    }

    fn appliable(&self, tree: &SchemaTree, id: SchemaId) -> bool {
        let node = tree.node(id);
        node.keyword("enum").is_some() || node.keyword("enumSource").is_some()
    }

    fn apply(&self, tree: &mut SchemaTree, id: SchemaId, cx: &mut StepContext<'_>) -> Result<(), CompileErrorKind> {
        let node = tree.node_mut(id);
        if let Some(items) = enums::literal_items(node.keywords()) {
            node.isenum = true;
            node.enum_items = items;
            return Ok(());
        }
        let name = match node.keyword("enumSource") {
            Some(Value::String(name)) => name.clone(),
            Some(other) => return Err(invalid("enumSource", format!("expected a name, found {other}"))),
            None => return Err(invalid("enum", "expected an array".into())),
        };
        node.isenum = true;
        match cx.config.lookup_enum(&name) {
            Some(items) => node.enum_items = items,
            None => debug!(pointer = %node.pointer, name = %name, "enumeration not available yet"),
        }
        node.enum_source = Some(name);
        Ok(())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// DERIVED ATTRIBUTES
// ————————————————————————————————————————————————————————————————————————————

struct InitObservers;

impl CompileStep for InitObservers {
    fn description(&self) -> &'static str {
        "observer initialization"
    }

    fn apply(&self, tree: &mut SchemaTree, id: SchemaId, _cx: &mut StepContext<'_>) -> Result<(), CompileErrorKind> {
        tree.node_mut(id).observers.clear();
        Ok(())
    }
}

struct DetectEnumArray;

impl CompileStep for DetectEnumArray {
    fn description(&self) -> &'static str {
        "enum array detection"
    }

    fn appliable(&self, tree: &SchemaTree, id: SchemaId) -> bool {
        tree.node(id).basetype == Some(JsonType::Array)
    }

    fn apply(&self, tree: &mut SchemaTree, id: SchemaId, _cx: &mut StepContext<'_>) -> Result<(), CompileErrorKind> {
        let isenumarray = match tree.node(id).items {
            Some(Items::Homogeneous(item)) => tree.node(item).isenum,
            _ => false,
        };
        tree.node_mut(id).isenumarray = isenumarray;
        Ok(())
    }
}

struct SeedRequired;

impl CompileStep for SeedRequired {
    fn description(&self) -> &'static str {
        "required seeding"
    }

    fn appliable(&self, tree: &SchemaTree, id: SchemaId) -> bool {
        let node = tree.node(id);
        match (node.parent, node.name.as_deref()) {
            (Some(parent), Some(name)) => tree.node(parent).required().any(|r| r == name),
            _ => false,
        }
    }

    fn apply(&self, tree: &mut SchemaTree, id: SchemaId, _cx: &mut StepContext<'_>) -> Result<(), CompileErrorKind> {
        let seeded = crate::expr::Evaluator::constant(Keyword::RequiredWhen.flavor(), Value::Bool(true));
        tree.node_mut(id).evaluators.set(Keyword::RequiredWhen, seeded);
        Ok(())
    }
}

/// `reference`: the node picks its value among items of another part of the data.
struct ResolveReference;

impl CompileStep for ResolveReference {
    fn description(&self) -> &'static str {
        "reference resolution"
    }

    fn appliable(&self, tree: &SchemaTree, id: SchemaId) -> bool {
        tree.node(id).keyword("reference").is_some()
    }

    fn apply(&self, tree: &mut SchemaTree, id: SchemaId, cx: &mut StepContext<'_>) -> Result<(), CompileErrorKind> {
        let node = tree.node_mut(id);
        let Some(source) = node.keyword("reference").and_then(Value::as_str).map(str::to_string) else {
            return Err(invalid("reference", "expected a pointer string".into()));
        };
        let tokens = Pointer::parse_absolute(&source).map_err(|error| match error {
            PointerError::NotAbsolute(pointer) => CompileErrorKind::Fatal(FatalError::NotAbsolute(pointer)),
            malformed => CompileErrorKind::Pointer(malformed),
        })?;
        let items = cx
            .data
            .and_then(|data| data.pointer(&pointer::join(&tokens)))
            .map(|target| match target {
                Value::Array(items) => items.clone(),
                Value::Object(map) => map.keys().cloned().map(Value::String).collect(),
                other => vec![other.clone()],
            })
            .unwrap_or_default();
        debug!(pointer = %node.pointer, reference = %source, candidates = items.len(), "reference resolved");
        node.reference = Some(source);
        node.reference_items = items;
        Ok(())
    }
}

struct SelectField;

impl CompileStep for SelectField {
    fn description(&self) -> &'static str {
        "field selection"
    }

    fn apply(&self, tree: &mut SchemaTree, id: SchemaId, _cx: &mut StepContext<'_>) -> Result<(), CompileErrorKind> {
        let node = tree.node(id);
        let enum_len = match (&node.items, node.isenumarray) {
            (Some(Items::Homogeneous(item)), true) => tree.node(*item).enum_items.len(),
            _ => node.enum_items.len(),
        };
        let widget = field::select(node, enum_len);
        tree.node_mut(id).field = widget;
        Ok(())
    }
}

struct OrderFields;

impl CompileStep for OrderFields {
    fn description(&self) -> &'static str {
        "display ordering"
    }

    fn appliable(&self, tree: &SchemaTree, id: SchemaId) -> bool {
        !tree.node(id).properties.is_empty()
    }

    fn apply(&self, tree: &mut SchemaTree, id: SchemaId, _cx: &mut StepContext<'_>) -> Result<(), CompileErrorKind> {
        let fields = order::field_order(tree, id);
        tree.node_mut(id).order = fields;
        Ok(())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// EXPRESSIONS
// ————————————————————————————————————————————————————————————————————————————

/// Compile every expression keyword present and record what it reads.
struct CompileExpressions;

impl CompileStep for CompileExpressions {
    fn description(&self) -> &'static str {
        "expression compilation"
    }

    fn appliable(&self, tree: &SchemaTree, id: SchemaId) -> bool {
        let node = tree.node(id);
        Keyword::ALL.iter().any(|k| node.keyword(k.name()).is_some())
    }

    fn apply(&self, tree: &mut SchemaTree, id: SchemaId, _cx: &mut StepContext<'_>) -> Result<(), CompileErrorKind> {
        for keyword in Keyword::ALL {
            let Some(raw) = tree.node(id).keyword(keyword.name()).cloned() else { continue };
            let evaluator = keyword.compile(&raw).map_err(|error| CompileErrorKind::Expression {
                keyword: keyword.name().to_string(),
                error,
            })?;
            if let Some(source) = evaluator.source() {
                observers::register(tree, id, keyword.name(), source)?;
            }
            tree.node_mut(id).evaluators.set(keyword, evaluator);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(raw: Value) -> (SchemaTree, Vec<(&'static str, String, CompileErrorKind)>) {
        let (mut tree, _) = SchemaTree::build(&raw);
        let mut config = CompilerConfig::new();
        let mut cx = StepContext { config: &mut config, data: None };
        let mut errors = Vec::new();
        for pass in passes() {
            for id in tree.ids() {
                for step in &pass.steps {
                    if !step.appliable(&tree, id) {
                        continue;
                    }
                    if let Err(kind) = step.apply(&mut tree, id, &mut cx) {
                        errors.push((step.description(), tree.node(id).pointer.clone(), kind));
                        break;
                    }
                }
            }
        }
        (tree, errors)
    }

    fn enum_of(n: usize) -> Value {
        Value::Array((0..n).map(|i| json!(format!("v{i}"))).collect())
    }

    #[test]
    fn enum_widgets_switch_at_boundaries() {
        for (n, widget) in [(3, "check"), (4, "select"), (20, "select"), (21, "typeahead")] {
            let (tree, errors) = run(json!({"type": "string", "enum": enum_of(n)}));
            assert!(errors.is_empty());
            assert_eq!(tree.node(tree.root()).field, widget, "{n} members");
        }
    }

    #[test]
    fn enum_arrays_get_multi_widgets() {
        let (tree, _) = run(json!({"type": "array", "items": {"type": "string", "enum": enum_of(5)}}));
        let root = tree.node(tree.root());
        assert!(root.isenumarray);
        assert_eq!(root.field, "multi-select");
    }

    #[test]
    fn string_formats_and_overrides() {
        let cases = [
            (json!({"type": "string", "format": "date-time"}), "datetime"),
            (json!({"type": "string", "format": "uri"}), "url"),
            (json!({"type": "string", "maxLength": 1000}), "textarea"),
            (json!({"type": "string", "maxLength": 10}), "string"),
            (json!({"type": "string", "field": "markdown"}), "markdown"),
            (json!({"const": 3}), "const"),
            (json!({"type": ["integer", "null"]}), "integer"),
        ];
        for (raw, widget) in cases {
            let (tree, _) = run(raw.clone());
            assert_eq!(tree.node(tree.root()).field, widget, "{raw}");
        }
        let (tree, _) = run(json!({"type": "array", "items": {"oneOf": [{"type": "string"}, {"type": "number"}]}}));
        assert_eq!(tree.node(tree.root()).field, "variant-array");
    }

    #[test]
    fn required_properties_are_seeded() {
        let (tree, errors) = run(json!({
            "type": "object",
            "required": ["a"],
            "properties": {"a": {"type": "string"}, "b": {"type": "string"}, "c": {"type": "string", "requiredWhen": false}}
        }));
        assert!(errors.is_empty(), "{errors:?}");
        let required = |p: &str| {
            let node = tree.node(tree.by_pointer(p).unwrap());
            node.evaluator(Keyword::RequiredWhen).clone()
        };
        assert_eq!(required("/a"), crate::expr::Evaluator::constant(crate::expr::Flavor::Boolean, json!(true)));
        assert_eq!(required("/b"), Keyword::RequiredWhen.fallback());
        assert_eq!(required("/c"), crate::expr::Evaluator::constant(crate::expr::Flavor::Boolean, json!(false)));
    }

    #[test]
    fn expressions_populate_observers() {
        let (tree, errors) = run(json!({
            "type": "object",
            "properties": {
                "items": {"type": "array", "items": {"type": "object", "properties": {
                    "amount": {"type": "number"},
                    "flag": {"type": "boolean", "visible": "$`0/amount` > 10"}
                }}}
            }
        }));
        assert!(errors.is_empty(), "{errors:?}");
        let amount = tree.node(tree.by_pointer("/items/*/amount").unwrap());
        assert_eq!(amount.observers.iter().collect::<Vec<_>>(), ["/items/*/flag"]);
    }

    #[test]
    fn failing_steps_are_reported_per_node() {
        let (tree, errors) = run(json!({
            "type": "object",
            "properties": {
                "bad": {"type": ["string", "number"]},
                "expr": {"type": "string", "visible": "value +"},
                "dangling": {"type": "string", "readonly": "$`0/ghost`"},
                "fine": {"type": "string"}
            }
        }));
        let steps: Vec<(&str, &str)> = errors.iter().map(|(s, p, _)| (*s, p.as_str())).collect();
        assert_eq!(
            steps,
            [("type inference", "/bad"), ("expression compilation", "/expr"), ("expression compilation", "/dangling")]
        );
        assert!(matches!(errors[0].2, CompileErrorKind::SecondTypeNotNull(_)));
        assert_eq!(tree.node(tree.by_pointer("/fine").unwrap()).field, "string");
        // a failed expression leaves the fallback in place
        let expr = tree.node(tree.by_pointer("/expr").unwrap());
        assert_eq!(expr.evaluator(Keyword::Visible), &Keyword::Visible.fallback());
    }

    #[test]
    fn relative_reference_is_fatal() {
        let (mut tree, _) = SchemaTree::build(&json!({"type": "string", "reference": "1/list"}));
        let mut config = CompilerConfig::new();
        let mut cx = StepContext { config: &mut config, data: None };
        let root = tree.root();
        let err = ResolveReference.apply(&mut tree, root, &mut cx).unwrap_err();
        assert!(matches!(err, CompileErrorKind::Fatal(FatalError::NotAbsolute(_))));
    }

    #[test]
    fn malformed_reference_is_collected() {
        let (mut tree, _) = SchemaTree::build(&json!({"type": "string", "reference": "people"}));
        let mut config = CompilerConfig::new();
        let mut cx = StepContext { config: &mut config, data: None };
        let root = tree.root();
        let err = ResolveReference.apply(&mut tree, root, &mut cx).unwrap_err();
        assert!(matches!(err, CompileErrorKind::Pointer(PointerError::Malformed { .. })), "{err}");
        assert!(err.to_string().contains("malformed pointer `people`"));
    }

    #[test]
    fn reference_candidates_come_from_data() {
        let data = json!({"people": ["ann", "bob"]});
        let (mut tree, _) = SchemaTree::build(&json!({"type": "string", "reference": "#/people"}));
        let mut config = CompilerConfig::new();
        let mut cx = StepContext { config: &mut config, data: Some(&data) };
        let root = tree.root();
        InferTypes.apply(&mut tree, root, &mut cx).unwrap();
        ResolveReference.apply(&mut tree, root, &mut cx).unwrap();
        SelectField.apply(&mut tree, root, &mut cx).unwrap();
        let node = tree.node(root);
        assert_eq!(node.reference_items, [json!("ann"), json!("bob")]);
        assert_eq!(node.field, "reference");
    }
}
