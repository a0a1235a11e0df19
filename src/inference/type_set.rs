use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

/// JSON value kinds as named by the `type` keyword.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JsonType {
    Null,
    Boolean,
    Object,
    Array,
    Number,
    String,
    Integer,
}

impl JsonType {
    pub const ALL: [JsonType; 7] = [
        JsonType::Null,
        JsonType::Boolean,
        JsonType::Object,
        JsonType::Array,
        JsonType::Number,
        JsonType::String,
        JsonType::Integer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Object => "object",
            JsonType::Array => "array",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Integer => "integer",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Runtime kind of a literal; whole numbers count as integers.
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => JsonType::Null,
            Value::Bool(_) => JsonType::Boolean,
            Value::Number(n) => {
                let whole = n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0);
                if whole { JsonType::Integer } else { JsonType::Number }
            }
            Value::String(_) => JsonType::String,
            Value::Array(_) => JsonType::Array,
            Value::Object(_) => JsonType::Object,
        }
    }

    /// Does a value of kind `self` satisfy a schema typed `other`?
    pub fn satisfies(self, other: JsonType) -> bool {
        self == other || (self == JsonType::Integer && other == JsonType::Number)
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of JSON types in canonical form.
///
/// `number` subsumes `integer`: a set holding `number` never also holds
/// `integer`. Every operation works on the expanded form and re-canonicalizes,
/// so intersection and union stay associative and commutative.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TypeSet(BTreeSet<JsonType>);

impl TypeSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn universal() -> Self {
        JsonType::ALL.into_iter().collect()
    }

    pub fn single(t: JsonType) -> Self {
        std::iter::once(t).collect()
    }

    pub fn contains(&self, t: JsonType) -> bool {
        self.0.contains(&t)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = JsonType> + '_ {
        self.0.iter().copied()
    }

    pub fn intersect(&self, other: &Self) -> Self {
        let (a, b) = (self.expanded(), other.expanded());
        a.intersection(&b).copied().collect()
    }

    pub fn union(&self, other: &Self) -> Self {
        self.0.union(&other.0).copied().collect()
    }

    /// Complement against the universal set.
    ///
    /// Excluding only `integer` keeps `number`, which re-admits integers:
    /// non-integer numbers have no kind of their own.
    pub fn complement(&self) -> Self {
        let excluded = self.expanded();
        JsonType::ALL.into_iter().filter(|t| !excluded.contains(t)).collect()
    }

    fn expanded(&self) -> BTreeSet<JsonType> {
        let mut out = self.0.clone();
        if out.contains(&JsonType::Number) {
            out.insert(JsonType::Integer);
        }
        out
    }
}

impl FromIterator<JsonType> for TypeSet {
    fn from_iter<I: IntoIterator<Item = JsonType>>(iter: I) -> Self {
        let mut set: BTreeSet<JsonType> = iter.into_iter().collect();
        if set.contains(&JsonType::Number) {
            set.remove(&JsonType::Integer);
        }
        TypeSet(set)
    }
}

impl fmt::Display for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(JsonType::as_str).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JsonType::*;

    fn set(types: &[JsonType]) -> TypeSet {
        types.iter().copied().collect()
    }

    #[test]
    fn number_subsumes_integer() {
        assert_eq!(set(&[Number, Integer]), set(&[Number]));
        assert_eq!(set(&[Number]).intersect(&set(&[Integer])), set(&[Integer]));
        assert_eq!(set(&[Integer, String]).union(&set(&[Number])), set(&[Number, String]));
    }

    #[test]
    fn complement_drops_integers_with_numbers() {
        let not_number = set(&[Number]).complement();
        assert!(!not_number.contains(Integer));
        assert!(!not_number.contains(Number));
        assert_eq!(not_number.len(), 5);
        assert!(TypeSet::universal().complement().is_empty());
    }

    #[test]
    fn intersection_laws() {
        let a = set(&[Number, Null, String]);
        let b = set(&[Integer, Null]);
        let c = set(&[Null, Integer, Boolean]);
        assert_eq!(a.intersect(&b), b.intersect(&a));
        assert_eq!(a.intersect(&b).intersect(&c), a.intersect(&b.intersect(&c)));
        assert_eq!(a.intersect(&a), a);
    }

    #[test]
    fn literal_kinds() {
        assert_eq!(JsonType::of_value(&serde_json::json!(5)), Integer);
        assert_eq!(JsonType::of_value(&serde_json::json!(5.0)), Integer);
        assert_eq!(JsonType::of_value(&serde_json::json!(5.5)), Number);
        assert!(Integer.satisfies(Number));
        assert!(!Number.satisfies(Integer));
    }
}
