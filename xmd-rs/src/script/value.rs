//! Runtime value type for the XMD scripting language.
//!
//! Values are cheap to clone: strings, arrays and objects are reference
//! counted, so a clone shares the underlying data with the original.  Field
//! updates go through [`Value::set_path`], which copies on write when the
//! object is shared.
//!
//! Class instances are plain objects carrying their class name under
//! [`CLASS_KEY`].

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value as JsonValue;

use super::ast::Lambda;
use crate::error::EvalError;

/// Reserved object key naming the class of an instance.
pub const CLASS_KEY: &str = "__class__";

/// An XMD runtime value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<Vec<Value>>),
    Object(Rc<BTreeMap<String, Value>>),
    Lambda(Rc<Lambda>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(x) => f.write_str(&format_number(*x)),
            Value::Str(s) => f.write_str(s),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Value::Object(_) => write!(f, "{}", self.to_json()),
            Value::Lambda(l) => write!(f, "({}) => ...", l.params.join(", ")),
        }
    }
}

/// Format a number the way templates expect: integral values without a
/// fractional part.
pub fn format_number(x: f64) -> String {
    if x.is_nan() {
        "NaN".to_owned()
    } else if x.is_infinite() {
        let s = if x > 0.0 { "Infinity" } else { "-Infinity" };
        s.to_owned()
    } else if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{x}")
    }
}

/// Parse a numeric literal (`42`, `-1.5`, `2e3`).  Rejects `inf`/`nan` spellings.
pub fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty()
        || !t
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return None;
    }
    t.parse().ok()
}

impl Value {
    /// Truthiness: `null`, `false`, `0`, `""`, `"false"` and empty
    /// collections are false.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(x) => *x != 0.0 && !x.is_nan(),
            Value::Str(s) => !s.is_empty() && &**s != "false",
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            Value::Lambda(_) => true,
        }
    }

    /// Numeric view used by arithmetic.  `null` counts as zero.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Null => Some(0.0),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Number(x) => Some(*x),
            Value::Str(s) => parse_number(s),
            Value::Array(_) | Value::Object(_) | Value::Lambda(_) => None,
        }
    }

    /// Name of the type, as returned by `type()`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Lambda(_) => "function",
        }
    }

    /// Class name when this value is a class instance.
    pub fn class_name(&self) -> Option<&str> {
        match self.get_field(CLASS_KEY) {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(name),
            _ => None,
        }
    }

    /// `value[index]`.  Out-of-range and mismatched lookups yield `null`.
    pub fn index(&self, index: &Value) -> Value {
        match (self, index) {
            (Value::Array(items), Value::Number(i)) if *i >= 0.0 => {
                items.get(*i as usize).cloned().unwrap_or_default()
            }
            (Value::Str(s), Value::Number(i)) if *i >= 0.0 => s
                .chars()
                .nth(*i as usize)
                .map(|c| Value::from(c.to_string()))
                .unwrap_or_default(),
            (Value::Object(map), key) => map.get(&key.to_string()).cloned().unwrap_or_default(),
            _ => Value::Null,
        }
    }

    /// Return a copy of `self` with the field at `path` replaced by `value`.
    /// Intermediate `null`s become empty objects.
    pub fn set_path(self, path: &[String], value: Value) -> Result<Value, EvalError> {
        let Some((head, rest)) = path.split_first() else {
            return Ok(value);
        };
        let mut map = match self {
            Value::Object(map) => map,
            Value::Null => Rc::new(BTreeMap::new()),
            other => {
                return Err(EvalError::Type(format!(
                    "cannot set field '{head}' on a {}",
                    other.type_name()
                )))
            }
        };
        let child = map.get(head).cloned().unwrap_or_default();
        let updated = child.set_path(rest, value)?;
        Rc::make_mut(&mut map).insert(head.clone(), updated);
        Ok(Value::Object(map))
    }

    /// Length of a string (in chars), array, or object.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            Value::Object(map) => Some(map.len()),
            _ => None,
        }
    }

    /// Materialize the value as a loop sequence.
    pub fn to_items(&self) -> Result<Vec<Value>, EvalError> {
        match self {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => Ok(items.as_ref().clone()),
            Value::Object(map) => Ok(map
                .keys()
                .filter(|k| k.as_str() != CLASS_KEY)
                .map(|k| Value::from(k.as_str()))
                .collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
            other => Err(EvalError::Type(format!("cannot iterate over a {}", other.type_name()))),
        }
    }

    // ── Arithmetic ────────────────────────────────────────────────────────────

    fn numeric_pair(&self, rhs: &Value, op: &str) -> Result<(f64, f64), EvalError> {
        match (self.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(EvalError::Type(format!(
                "cannot apply '{op}' to {} and {}",
                self.type_name(),
                rhs.type_name()
            ))),
        }
    }

    /// `+`: array concatenation, string concatenation when either side is a
    /// string, numeric addition otherwise.
    pub fn add(&self, rhs: &Value) -> Result<Value, EvalError> {
        match (self, rhs) {
            (Value::Array(a), Value::Array(b)) => {
                let mut items = a.as_ref().clone();
                items.extend(b.iter().cloned());
                Ok(Value::from(items))
            }
            (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::from(format!("{self}{rhs}"))),
            _ => {
                let (a, b) = self.numeric_pair(rhs, "+")?;
                Ok(Value::Number(a + b))
            }
        }
    }

    pub fn sub(&self, rhs: &Value) -> Result<Value, EvalError> {
        let (a, b) = self.numeric_pair(rhs, "-")?;
        Ok(Value::Number(a - b))
    }

    pub fn mul(&self, rhs: &Value) -> Result<Value, EvalError> {
        let (a, b) = self.numeric_pair(rhs, "*")?;
        Ok(Value::Number(a * b))
    }

    pub fn div(&self, rhs: &Value) -> Result<Value, EvalError> {
        let (a, b) = self.numeric_pair(rhs, "/")?;
        if b == 0.0 {
            return Err(EvalError::DivisionByZero);
        }
        Ok(Value::Number(a / b))
    }

    pub fn rem(&self, rhs: &Value) -> Result<Value, EvalError> {
        let (a, b) = self.numeric_pair(rhs, "%")?;
        if b == 0.0 {
            return Err(EvalError::DivisionByZero);
        }
        Ok(Value::Number(a % b))
    }

    pub fn neg(&self) -> Result<Value, EvalError> {
        match self.as_number() {
            Some(x) => Ok(Value::Number(-x)),
            None => Err(EvalError::Type(format!("cannot negate a {}", self.type_name()))),
        }
    }

    // ── Comparison ────────────────────────────────────────────────────────────

    /// `==` semantics: numbers compare numerically with numeric strings,
    /// everything else by type and content.
    pub fn loose_eq(&self, rhs: &Value) -> bool {
        match (self, rhs) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Number(a), Value::Str(s)) | (Value::Str(s), Value::Number(a)) => {
                parse_number(s) == Some(*a)
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Bool(_), Value::Str(_)) | (Value::Str(_), Value::Bool(_)) => {
                self.to_string() == rhs.to_string()
            }
            _ => self == rhs,
        }
    }

    /// Relational ordering: numeric when both sides are numeric, otherwise
    /// lexical on the rendered text.
    pub fn compare(&self, rhs: &Value) -> Ordering {
        match (self.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => self.to_string().cmp(&rhs.to_string()),
        }
    }

    // ── JSON bridge ───────────────────────────────────────────────────────────

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(x) => {
                if x.fract() == 0.0 && x.abs() < 9.0e15 {
                    JsonValue::from(*x as i64)
                } else {
                    serde_json::Number::from_f64(*x)
                        .map(JsonValue::Number)
                        .unwrap_or(JsonValue::Null)
                }
            }
            Value::Str(s) => JsonValue::String(s.to_string()),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map.iter() {
                    out.insert(k.clone(), v.to_json());
                }
                JsonValue::Object(out)
            }
            Value::Lambda(_) => JsonValue::String(self.to_string()),
        }
    }

    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            JsonValue::String(s) => Value::from(s.as_str()),
            JsonValue::Array(items) => Value::from(items.iter().map(Value::from_json).collect::<Vec<_>>()),
            JsonValue::Object(map) => Value::from(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect::<BTreeMap<_, _>>(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Number(x)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(items))
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(Rc::new(map))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: &[(&str, Value)]) -> Value {
        Value::from(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn display_integral_numbers() {
        assert_eq!(Value::from(3.0).to_string(), "3");
        assert_eq!(Value::from(-0.0).to_string(), "0");
        assert_eq!(Value::from(2.5).to_string(), "2.5");
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn display_collections() {
        let arr = Value::from(vec![Value::from(1.0), Value::from("a")]);
        assert_eq!(arr.to_string(), "1, a");
        let o = obj(&[("b", Value::from(2.0)), ("a", Value::from("x"))]);
        assert_eq!(o.to_string(), r#"{"a":"x","b":2}"#);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.as_bool());
        assert!(!Value::from("").as_bool());
        assert!(!Value::from("false").as_bool());
        assert!(Value::from("0").as_bool());
        assert!(!Value::from(0.0).as_bool());
        assert!(Value::from(-1.0).as_bool());
        assert!(!Value::from(Vec::new()).as_bool());
    }

    #[test]
    fn add_concatenates_strings() {
        let v = Value::from("n=").add(&Value::from(4.0)).unwrap();
        assert_eq!(v, Value::from("n=4"));
        let n = Value::from("2").sub(&Value::from(1.0)).unwrap();
        assert_eq!(n, Value::from(1.0));
    }

    #[test]
    fn arithmetic_type_errors() {
        let arr = Value::from(vec![Value::Null]);
        assert!(matches!(arr.mul(&Value::from(2.0)), Err(EvalError::Type(_))));
        assert_eq!(Value::from(1.0).div(&Value::from(0.0)), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn comparisons() {
        assert_eq!(Value::from("10").compare(&Value::from(9.0)), Ordering::Greater);
        assert_eq!(Value::from("abc").compare(&Value::from("abd")), Ordering::Less);
        assert!(Value::from("3").loose_eq(&Value::from(3.0)));
        assert!(!Value::Null.loose_eq(&Value::from("")));
        assert!(Value::from(true).loose_eq(&Value::from("true")));
    }

    #[test]
    fn set_path_copies_on_write() {
        let original = obj(&[("name", Value::from("a"))]);
        let shared = original.clone();
        let updated = shared
            .set_path(&["name".to_owned()], Value::from("b"))
            .unwrap();
        assert_eq!(original.get_field("name"), Some(&Value::from("a")));
        assert_eq!(updated.get_field("name"), Some(&Value::from("b")));
    }

    #[test]
    fn set_path_creates_nested_objects() {
        let v = Value::Null
            .set_path(&["a".to_owned(), "b".to_owned()], Value::from(1.0))
            .unwrap();
        assert_eq!(v.to_string(), r#"{"a":{"b":1}}"#);
        assert!(Value::from(1.0).set_path(&["x".to_owned()], Value::Null).is_err());
    }

    #[test]
    fn class_name_and_items() {
        let inst = obj(&[(CLASS_KEY, Value::from("Point")), ("x", Value::from(1.0))]);
        assert_eq!(inst.class_name(), Some("Point"));
        assert_eq!(inst.to_items().unwrap(), vec![Value::from("x")]);
        assert!(Value::from(5.0).to_items().is_err());
    }

    #[test]
    fn json_bridge() {
        let json: JsonValue = serde_json::from_str(r#"{"n": 2, "tags": ["a", "b"], "ok": true}"#).unwrap();
        let v = Value::from_json(&json);
        assert_eq!(v.get_field("n"), Some(&Value::from(2.0)));
        assert_eq!(v.get_field("tags").map(|t| t.to_string()), Some("a, b".to_owned()));
        assert_eq!(v.to_json(), json);
    }

    #[test]
    fn parse_number_rejects_words() {
        assert_eq!(parse_number(" 42 "), Some(42.0));
        assert_eq!(parse_number("nan"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number(""), None);
    }
}
