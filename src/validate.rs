//! Validation seam.
//!
//! Validators consume the normalized schema (refs inlined, types inferred)
//! and report errors keyed by data pointer. The [`FormatRegistry`] is built
//! once by the host and handed to validators by reference.
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::expr::eval::strict_eq;
use crate::inference::JsonType;
use crate::pointer;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub pointer: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self { valid: errors.is_empty(), errors }
    }

    /// Errors grouped by data pointer, in first-seen order.
    pub fn by_pointer(&self) -> IndexMap<&str, Vec<&str>> {
        let mut out: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for error in &self.errors {
            out.entry(error.pointer.as_str()).or_default().push(error.message.as_str());
        }
        out
    }
}

pub trait Validator {
    fn validate(&self, schema: &Value, data: &Value) -> ValidationReport;
}

// ————————————————————————————————————————————————————————————————————————————
// FORMATS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Clone, Debug, Default)]
pub struct FormatRegistry {
    formats: IndexMap<String, Regex>,
}

const DEFAULT_FORMATS: &[(&str, &str)] = &[
    ("date", r"^\d{4}-\d{2}-\d{2}$"),
    ("time", r"^\d{2}:\d{2}(:\d{2}(\.\d+)?)?$"),
    ("date-time", r"^\d{4}-\d{2}-\d{2}[Tt ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?([Zz]|[+-]\d{2}:\d{2})?$"),
    ("email", r"^[^@\s]+@[^@\s]+\.[^@\s]+$"),
    ("uri", r"^[A-Za-z][A-Za-z0-9+.-]*:\S+$"),
    ("color", r"^#([0-9A-Fa-f]{3}|[0-9A-Fa-f]{6})$"),
];

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Result<Self, regex::Error> {
        let mut registry = Self::new();
        for (name, pattern) in DEFAULT_FORMATS {
            registry.register(name, pattern)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, name: &str, pattern: &str) -> Result<(), regex::Error> {
        self.formats.insert(name.to_string(), Regex::new(pattern)?);
        Ok(())
    }

    /// `None` for formats the registry does not know.
    pub fn check(&self, format: &str, text: &str) -> Option<bool> {
        self.formats.get(format).map(|re| re.is_match(text))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// STRUCTURAL VALIDATOR
// ————————————————————————————————————————————————————————————————————————————

/// Checks type, `const`, `enum`, `required`, `additionalProperties: false`,
/// string length, `pattern`, numeric bounds, item counts and `format`.
#[derive(Clone, Copy, Debug)]
pub struct StructuralValidator<'r> {
    formats: &'r FormatRegistry,
}

impl<'r> StructuralValidator<'r> {
    pub fn new(formats: &'r FormatRegistry) -> Self {
        Self { formats }
    }

    fn check(&self, schema: &Value, data: &Value, at: &str, errors: &mut Vec<ValidationError>) {
        let Value::Object(schema) = schema else {
            if schema == &Value::Bool(false) {
                errors.push(error(at, "no value is allowed here".into()));
            }
            return;
        };
        let mut report = |message: String| errors.push(error(at, message));

        if let Some(types) = schema.get("type") {
            let kind = JsonType::of_value(data);
            let allowed: Vec<JsonType> = match types {
                Value::String(t) => JsonType::parse(t).into_iter().collect(),
                Value::Array(ts) => ts.iter().filter_map(Value::as_str).filter_map(JsonType::parse).collect(),
                _ => Vec::new(),
            };
            if !allowed.is_empty() && !allowed.iter().any(|t| kind.satisfies(*t)) {
                report(format!("expected {}, found {kind}", join_types(&allowed)));
                return;
            }
        }
        if let Some(expected) = schema.get("const") {
            if !strict_eq(expected, data) {
                report(format!("must equal {expected}"));
            }
        }
        if let Some(Value::Array(members)) = schema.get("enum") {
            if !members.iter().any(|m| strict_eq(m, data)) {
                report("must be one of the enumerated values".into());
            }
        }
        match data {
            Value::String(text) => self.check_string(schema, text, &mut report),
            Value::Number(n) => check_number(schema, n.as_f64().unwrap_or_default(), &mut report),
            _ => {}
        }
        drop(report);

        match data {
            Value::Object(map) => self.check_object(schema, map, at, errors),
            Value::Array(items) => self.check_array(schema, items, at, errors),
            _ => {}
        }
    }

    fn check_string(&self, schema: &Map<String, Value>, text: &str, report: &mut impl FnMut(String)) {
        let len = text.chars().count() as u64;
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if len < min {
                report(format!("must be at least {min} characters"));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                report(format!("must be at most {max} characters"));
            }
        }
        if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
            match Regex::new(pattern) {
                Ok(re) if !re.is_match(text) => report(format!("must match /{pattern}/")),
                Ok(_) => {}
                Err(e) => report(format!("invalid pattern /{pattern}/: {e}")),
            }
        }
        if let Some(format) = schema.get("format").and_then(Value::as_str) {
            if self.formats.check(format, text) == Some(false) {
                report(format!("is not a valid {format}"));
            }
        }
    }

    fn check_object(&self, schema: &Map<String, Value>, map: &Map<String, Value>, at: &str, errors: &mut Vec<ValidationError>) {
        let properties = schema.get("properties").and_then(Value::as_object);
        for name in schema.get("required").and_then(Value::as_array).into_iter().flatten().filter_map(Value::as_str) {
            if !map.contains_key(name) {
                errors.push(error(&child(at, name), "is required".into()));
            }
        }
        let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
        for (name, value) in map {
            match properties.and_then(|p| p.get(name)) {
                Some(sub) => self.check(sub, value, &child(at, name), errors),
                None if closed => errors.push(error(&child(at, name), "is not allowed".into())),
                None => {}
            }
        }
    }

    fn check_array(&self, schema: &Map<String, Value>, items: &[Value], at: &str, errors: &mut Vec<ValidationError>) {
        let count = items.len() as u64;
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if count < min {
                errors.push(error(at, format!("must have at least {min} items")));
            }
        }
        if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
            if count > max {
                errors.push(error(at, format!("must have at most {max} items")));
            }
        }
        let Some(item_schema) = schema.get("items") else { return };
        let variants = item_schema.get("oneOf").and_then(Value::as_array);
        for (i, item) in items.iter().enumerate() {
            let item_at = child(at, &i.to_string());
            match variants {
                Some(variants) => {
                    let fits = variants.iter().any(|v| {
                        let mut scratch = Vec::new();
                        self.check(v, item, &item_at, &mut scratch);
                        scratch.is_empty()
                    });
                    if !fits {
                        errors.push(error(&item_at, "matches none of the item variants".into()));
                    }
                }
                None => self.check(item_schema, item, &item_at, errors),
            }
        }
    }
}

impl Validator for StructuralValidator<'_> {
    fn validate(&self, schema: &Value, data: &Value) -> ValidationReport {
        let mut errors = Vec::new();
        self.check(schema, data, "", &mut errors);
        ValidationReport::from_errors(errors)
    }
}

fn check_number(schema: &Map<String, Value>, n: f64, report: &mut impl FnMut(String)) {
    let bound = |key: &str| schema.get(key).and_then(Value::as_f64);
    if let Some(min) = bound("minimum") {
        if n < min {
            report(format!("must be ≥ {min}"));
        }
    }
    if let Some(max) = bound("maximum") {
        if n > max {
            report(format!("must be ≤ {max}"));
        }
    }
    if let Some(min) = bound("exclusiveMinimum") {
        if n <= min {
            report(format!("must be > {min}"));
        }
    }
    if let Some(max) = bound("exclusiveMaximum") {
        if n >= max {
            report(format!("must be < {max}"));
        }
    }
    if let Some(step) = bound("multipleOf").filter(|s| *s > 0.0) {
        let ratio = n / step;
        if (ratio - ratio.round()).abs() > 1e-9 {
            report(format!("must be a multiple of {step}"));
        }
    }
}

fn error(at: &str, message: String) -> ValidationError {
    ValidationError { pointer: at.to_string(), message }
}

fn child(at: &str, token: &str) -> String {
    format!("{at}/{}", pointer::escape(token))
}

fn join_types(types: &[JsonType]) -> String {
    types.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(" or ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use serde_json::json;

    fn registry() -> FormatRegistry {
        FormatRegistry::with_defaults().unwrap()
    }

    #[test]
    fn default_formats() {
        let formats = registry();
        assert_eq!(formats.check("date", "2024-02-29"), Some(true));
        assert_eq!(formats.check("email", "not-an-email"), Some(false));
        assert_eq!(formats.check("color", "#fa0"), Some(true));
        assert_eq!(formats.check("ipv6", "::1"), None);
    }

    #[test]
    fn errors_are_keyed_by_data_pointer() {
        let formats = registry();
        let validator = StructuralValidator::new(&formats);
        let schema = json!({
            "type": "object",
            "required": ["name", "email"],
            "additionalProperties": false,
            "properties": {
                "name": {"type": "string", "minLength": 2},
                "email": {"type": "string", "format": "email"},
                "age": {"type": "integer", "minimum": 0},
                "tags": {"type": "array", "maxItems": 2, "items": {"type": "string", "enum": ["a", "b"]}}
            }
        });
        let report = validator.validate(&schema, &json!({
            "name": "x", "age": -1.5, "tags": ["a", "z", "b"], "extra": true
        }));
        assert!(!report.valid);
        let grouped = report.by_pointer();
        let pointers: Vec<&str> = grouped.keys().copied().collect();
        assert_eq!(pointers, ["/email", "/name", "/age", "/tags", "/tags/1", "/extra"]);
        assert!(grouped["/age"][0].contains("integer"));
    }

    #[test]
    fn normalized_schema_drives_validation() {
        let compiled = compile(&json!({
            "definitions": {"qty": {"minimum": 1}},
            "properties": {"qty": {"$ref": "#/definitions/qty"}}
        }))
        .unwrap();
        let formats = registry();
        let validator = StructuralValidator::new(&formats);
        let schema = compiled.normalized();
        // `type` comes from inference, not from the raw document
        assert!(!validator.validate(&schema, &json!({"qty": "3"})).valid);
        assert!(validator.validate(&schema, &json!({"qty": 3})).valid);
    }

    #[test]
    fn variant_items_need_one_fitting_variant() {
        let formats = registry();
        let validator = StructuralValidator::new(&formats);
        let schema = json!({"type": "array", "items": {"oneOf": [{"type": "string"}, {"type": "number"}]}});
        let report = validator.validate(&schema, &json!(["a", 2, true]));
        assert_eq!(report.errors, [ValidationError { pointer: "/2".into(), message: "matches none of the item variants".into() }]);
    }
}
