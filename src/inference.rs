//! Keyword-driven type inference for schema nodes.
//!
//! Every inference source yields either a type set or "no constraint"
//! (`None`). The node's target is the intersection of all constraining
//! sources with the universal set, so the result never depends on the order
//! keywords are declared in.
//!
//! - `type`: as given.
//! - `const`: kind of the literal.
//! - `enum`: union of member kinds.
//! - keyword families: `minLength` ⇒ string, `minimum` ⇒ number, …
//! - `not`: complement of the negated subschema.
//! - `allOf`: intersection of branches.
//! - `anyOf` / `oneOf`: union of branches.
pub mod type_set;

use serde_json::{Map, Value};

use crate::error::CompileErrorKind;

pub use type_set::{JsonType, TypeSet};

// ------------------------------- Policy ---------------------------------- //

const STRING_KEYWORDS: &[&str] = &["minLength", "maxLength", "pattern", "format"];
const NUMBER_KEYWORDS: &[&str] = &["minimum", "maximum", "exclusiveMinimum", "exclusiveMaximum", "multipleOf"];
const ARRAY_KEYWORDS: &[&str] = &["items", "additionalItems", "minItems", "maxItems", "uniqueItems"];
const OBJECT_KEYWORDS: &[&str] = &[
    "required",
    "properties",
    "additionalProperties",
    "patternProperties",
    "minProperties",
    "maxProperties",
    "dependencies",
];

// ------------------------------- Result ---------------------------------- //

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inferred {
    pub target: TypeSet,
    pub basetype: JsonType,
    pub null_allowed: bool,
}

/// Infer target and basetype, applying the "second type must be null" rule.
pub fn infer(schema: &Map<String, Value>) -> Result<Inferred, CompileErrorKind> {
    let target = infer_target(schema)?;
    let (basetype, null_allowed) = resolve_basetype(&target)?;
    Ok(Inferred { target, basetype, null_allowed })
}

/// Intersection of all constraining sources, clipped to the universal set.
pub fn infer_target(schema: &Map<String, Value>) -> Result<TypeSet, CompileErrorKind> {
    let sources = [
        from_type(schema)?,
        from_const(schema),
        from_enum(schema)?,
        from_family(schema, STRING_KEYWORDS, JsonType::String),
        from_family(schema, NUMBER_KEYWORDS, JsonType::Number),
        from_family(schema, ARRAY_KEYWORDS, JsonType::Array),
        from_family(schema, OBJECT_KEYWORDS, JsonType::Object),
        from_not(schema)?,
        from_all_of(schema)?,
        from_any_of(schema, "anyOf")?,
        from_any_of(schema, "oneOf")?,
    ];
    Ok(sources
        .into_iter()
        .flatten()
        .fold(TypeSet::universal(), |acc, set| acc.intersect(&set)))
}

/// One member ⇒ that member; two members ⇒ the non-null one, null allowed.
pub fn resolve_basetype(target: &TypeSet) -> Result<(JsonType, bool), CompileErrorKind> {
    let members: Vec<JsonType> = target.iter().collect();
    match members.as_slice() {
        [] => Err(CompileErrorKind::EmptyType),
        [only] => Ok((*only, *only == JsonType::Null)),
        [a, b] => {
            // BTreeSet order puts `null` first when present
            if *a == JsonType::Null {
                Ok((*b, true))
            } else if *b == JsonType::Null {
                Ok((*a, true))
            } else {
                Err(CompileErrorKind::SecondTypeNotNull(target.clone()))
            }
        }
        _ => Err(CompileErrorKind::AmbiguousType(target.clone())),
    }
}

// ------------------------------ Sources ---------------------------------- //

fn from_type(schema: &Map<String, Value>) -> Result<Option<TypeSet>, CompileErrorKind> {
    let invalid = |reason: String| CompileErrorKind::InvalidKeyword { keyword: "type".into(), reason };
    let parse = |name: &Value| match name.as_str().and_then(JsonType::parse) {
        Some(t) => Ok(t),
        None => Err(invalid(format!("unknown type {name}"))),
    };
    match schema.get("type") {
        None => Ok(None),
        Some(name @ Value::String(_)) => Ok(Some(TypeSet::single(parse(name)?))),
        Some(Value::Array(names)) => {
            let types = names.iter().map(parse).collect::<Result<Vec<_>, _>>()?;
            Ok(Some(types.into_iter().collect()))
        }
        Some(other) => Err(invalid(format!("expected a string or an array, found {other}"))),
    }
}

fn from_const(schema: &Map<String, Value>) -> Option<TypeSet> {
    schema.get("const").map(|value| TypeSet::single(JsonType::of_value(value)))
}

fn from_enum(schema: &Map<String, Value>) -> Result<Option<TypeSet>, CompileErrorKind> {
    match schema.get("enum") {
        None => Ok(None),
        Some(Value::Array(members)) => Ok(Some(members.iter().map(JsonType::of_value).collect())),
        Some(other) => Err(CompileErrorKind::InvalidKeyword {
            keyword: "enum".into(),
            reason: format!("expected an array, found {other}"),
        }),
    }
}

fn from_family(schema: &Map<String, Value>, keywords: &[&str], t: JsonType) -> Option<TypeSet> {
    keywords
        .iter()
        .any(|k| schema.contains_key(*k))
        .then(|| TypeSet::single(t))
}

fn from_not(schema: &Map<String, Value>) -> Result<Option<TypeSet>, CompileErrorKind> {
    match schema.get("not") {
        None => Ok(None),
        Some(sub) => Ok(Some(infer_subschema(sub)?.unwrap_or_else(TypeSet::universal).complement())),
    }
}

fn from_all_of(schema: &Map<String, Value>) -> Result<Option<TypeSet>, CompileErrorKind> {
    let Some(branches) = branches(schema, "allOf")? else { return Ok(None) };
    let mut out: Option<TypeSet> = None;
    for branch in branches {
        if let Some(set) = infer_subschema(branch)? {
            out = Some(match out {
                None => set,
                Some(acc) => acc.intersect(&set),
            });
        }
    }
    Ok(out)
}

fn from_any_of(schema: &Map<String, Value>, keyword: &str) -> Result<Option<TypeSet>, CompileErrorKind> {
    let Some(branches) = branches(schema, keyword)? else { return Ok(None) };
    let mut out = TypeSet::empty();
    for branch in branches {
        // an unconstrained branch admits everything
        let set = infer_subschema(branch)?.unwrap_or_else(TypeSet::universal);
        out = out.union(&set);
    }
    Ok(Some(out))
}

fn branches<'a>(schema: &'a Map<String, Value>, keyword: &str) -> Result<Option<&'a Vec<Value>>, CompileErrorKind> {
    match schema.get(keyword) {
        None => Ok(None),
        Some(Value::Array(xs)) => Ok(Some(xs)),
        Some(other) => Err(CompileErrorKind::InvalidKeyword {
            keyword: keyword.to_string(),
            reason: format!("expected an array of schemas, found {other}"),
        }),
    }
}

/// `None` when the subschema places no constraint on the type.
fn infer_subschema(sub: &Value) -> Result<Option<TypeSet>, CompileErrorKind> {
    match sub {
        Value::Bool(true) => Ok(None),
        Value::Bool(false) => Ok(Some(TypeSet::empty())),
        Value::Object(map) => {
            let set = infer_target(map)?;
            Ok((set != TypeSet::universal()).then_some(set))
        }
        other => Err(CompileErrorKind::InvalidKeyword {
            keyword: "subschema".into(),
            reason: format!("expected an object or a boolean, found {other}"),
        }),
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn nullable_string() {
        let inferred = infer(&obj(json!({"type": ["string", "null"]}))).unwrap();
        assert_eq!(inferred.basetype, JsonType::String);
        assert!(inferred.null_allowed);
    }

    #[test]
    fn second_type_must_be_null() {
        let err = infer(&obj(json!({"type": ["string", "number"]}))).unwrap_err();
        assert!(matches!(err, CompileErrorKind::SecondTypeNotNull(_)));
    }

    #[test]
    fn three_types_are_ambiguous_and_empty_is_flagged() {
        let err = infer(&obj(json!({"type": ["string", "number", "null"]}))).unwrap_err();
        assert!(matches!(err, CompileErrorKind::AmbiguousType(_)));
        let err = infer(&obj(json!({"type": "string", "minimum": 1}))).unwrap_err();
        assert_eq!(err, CompileErrorKind::EmptyType);
        // no constraint at all is the universal set
        assert!(matches!(infer(&obj(json!({"title": "x"}))), Err(CompileErrorKind::AmbiguousType(_))));
    }

    #[test]
    fn keyword_families_and_literals() {
        let cases = [
            (json!({"maxLength": 3}), JsonType::String),
            (json!({"multipleOf": 2}), JsonType::Number),
            (json!({"multipleOf": 2, "type": "integer"}), JsonType::Integer),
            (json!({"minItems": 1}), JsonType::Array),
            (json!({"properties": {}}), JsonType::Object),
            (json!({"const": 3}), JsonType::Integer),
            (json!({"const": true}), JsonType::Boolean),
            (json!({"enum": ["a", "b"]}), JsonType::String),
            (json!({"allOf": [{"type": ["string", "integer"]}, {"type": "string"}]}), JsonType::String),
            (json!({"anyOf": [{"const": 1}, {"const": 2.5}]}), JsonType::Number),
        ];
        for (schema, expected) in cases {
            let inferred = infer(&obj(schema.clone())).unwrap();
            assert_eq!(inferred.basetype, expected, "{schema}");
            assert!(!inferred.null_allowed);
        }
    }

    #[test]
    fn not_takes_the_complement() {
        let inferred = infer(&obj(json!({
            "type": ["string", "null", "boolean"],
            "not": {"type": "boolean"}
        })))
        .unwrap();
        assert_eq!(inferred.basetype, JsonType::String);
        assert!(inferred.null_allowed);
    }

    #[test]
    fn enum_with_null_member() {
        let inferred = infer(&obj(json!({"enum": ["a", null]}))).unwrap();
        assert_eq!(inferred.target, [JsonType::Null, JsonType::String].into_iter().collect());
        assert!(inferred.null_allowed);
    }

    #[test]
    fn keyword_order_is_irrelevant() {
        let a = obj(json!({"type": ["integer", "null"], "minimum": 0, "enum": [1, 2, null]}));
        let b = obj(json!({"enum": [1, 2, null], "minimum": 0, "type": ["integer", "null"]}));
        let c = obj(json!({"minimum": 0, "type": ["integer", "null"], "enum": [1, 2, null]}));
        let ta = infer_target(&a).unwrap();
        assert_eq!(ta, infer_target(&b).unwrap());
        assert_eq!(ta, infer_target(&c).unwrap());
    }

    #[test]
    fn basetype_is_member_and_null_allowed_iff_null_member() {
        let schemas = [
            json!({"type": "null"}),
            json!({"type": ["null", "boolean"]}),
            json!({"type": ["array", "null"]}),
            json!({"const": null}),
            json!({"type": "object"}),
        ];
        for schema in schemas {
            let inferred = infer(&obj(schema.clone())).unwrap();
            assert!(inferred.target.contains(inferred.basetype), "{schema}");
            assert_eq!(inferred.null_allowed, inferred.target.contains(JsonType::Null), "{schema}");
        }
    }

    #[test]
    fn bad_type_names_are_rejected() {
        let err = infer(&obj(json!({"type": "text"}))).unwrap_err();
        assert!(matches!(err, CompileErrorKind::InvalidKeyword { .. }));
    }
}
