//! Local reference inlining.
//!
//! `$ref` may only name an entry of the root's definitions namespace
//! (`#/definitions/x`, or `#/$defs/x` for newer dialects). The referenced
//! schema is copied in place, with the `$ref` object's sibling keywords
//! layered on top. The definitions sections are dropped from the result.
use serde_json::{Map, Value};

use crate::config::Dialect;
use crate::error::{CompileError, CompileErrorKind, FatalError};
use crate::pointer;

pub(crate) const STEP: &str = "reference inlining";

/// Keywords whose values are data, not subschemas.
const DATA_KEYWORDS: &[&str] = &["enum", "const", "default", "examples", "enumTitles"];

struct Inliner<'a> {
    root: &'a Map<String, Value>,
    namespaces: &'static [&'static str],
    stack: Vec<String>,
    errors: Vec<CompileError>,
}

/// Copy of `doc` with every supported `$ref` replaced by its target.
pub fn inline(doc: &Value, dialect: Dialect) -> Result<(Value, Vec<CompileError>), FatalError> {
    let Value::Object(root) = doc else {
        return Ok((doc.clone(), Vec::new()));
    };
    let mut inliner = Inliner { root, namespaces: dialect.definitions_keywords(), stack: Vec::new(), errors: Vec::new() };
    let mut out = inliner.value(doc, "")?;
    if let Value::Object(map) = &mut out {
        for namespace in inliner.namespaces {
            map.shift_remove(*namespace);
        }
    }
    Ok((out, inliner.errors))
}

impl Inliner<'_> {
    /// `pointer` is the data-shaped location used for error reports.
    fn value(&mut self, value: &Value, pointer: &str) -> Result<Value, FatalError> {
        match value {
            Value::Object(map) => match map.get("$ref").and_then(Value::as_str) {
                Some(reference) => self.reference(reference, map, pointer),
                None => self.object(map, pointer),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.value(item, pointer))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn object(&mut self, map: &Map<String, Value>, pointer: &str) -> Result<Value, FatalError> {
        let mut out = Map::new();
        for (key, sub) in map {
            let inlined = match key.as_str() {
                k if DATA_KEYWORDS.contains(&k) => sub.clone(),
                k if pointer.is_empty() && self.namespaces.contains(&k) => sub.clone(),
                "properties" => match sub {
                    Value::Object(props) => {
                        let mut inlined = Map::new();
                        for (name, prop) in props {
                            let child = format!("{pointer}/{}", pointer::escape(name));
                            inlined.insert(name.clone(), self.value(prop, &child)?);
                        }
                        Value::Object(inlined)
                    }
                    other => other.clone(),
                },
                "items" => self.value(sub, &format!("{pointer}/*"))?,
                _ => self.value(sub, pointer)?,
            };
            out.insert(key.clone(), inlined);
        }
        Ok(Value::Object(out))
    }

    fn reference(&mut self, reference: &str, map: &Map<String, Value>, pointer: &str) -> Result<Value, FatalError> {
        let mut siblings = map.clone();
        siblings.shift_remove("$ref");
        let Some((namespace, name)) = self.split(reference) else {
            self.report(pointer, CompileErrorKind::UnsupportedReference(reference.to_string()));
            return self.object(&siblings, pointer);
        };
        let root = self.root;
        let Some(section) = root.get(namespace).and_then(Value::as_object) else {
            return Err(FatalError::MissingDefinitions {
                reference: reference.to_string(),
                namespace: namespace.to_string(),
            });
        };
        let Some(target) = section.get(&name) else {
            self.report(pointer, CompileErrorKind::UnknownDefinition(reference.to_string()));
            return self.object(&siblings, pointer);
        };
        if self.stack.iter().any(|seen| seen == reference) {
            self.report(pointer, CompileErrorKind::ReferenceCycle(reference.to_string()));
            return self.object(&siblings, pointer);
        }

        let mut merged = match target {
            Value::Object(target) => target.clone(),
            Value::Bool(true) => Map::new(),
            other => {
                let reason = format!("definition must be an object, found {other}");
                self.report(pointer, CompileErrorKind::InvalidKeyword { keyword: "$ref".into(), reason });
                Map::new()
            }
        };
        for (key, value) in siblings {
            merged.insert(key, value);
        }
        self.stack.push(reference.to_string());
        let result = self.value(&Value::Object(merged), pointer);
        self.stack.pop();
        result
    }

    /// `#/<namespace>/<name>` with a namespace this dialect knows.
    fn split(&self, reference: &str) -> Option<(&'static str, String)> {
        let rest = reference.strip_prefix("#/")?;
        let (namespace, name) = rest.split_once('/')?;
        let namespace = self.namespaces.iter().copied().find(|ns| *ns == namespace)?;
        if name.contains('/') {
            return None;
        }
        Some((namespace, pointer::unescape(name)))
    }

    fn report(&mut self, pointer: &str, kind: CompileErrorKind) {
        self.errors.push(CompileError { step: STEP, pointer: pointer.to_string(), kind });
    }
}
