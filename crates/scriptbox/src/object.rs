use std::fmt::{self, Write};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A value passed between the host and a script, independent of the interpreter's heap.
///
/// Used for challenge-function arguments and return values. Serializes to natural JSON:
///
/// - `None` ↔ `null`
/// - `Bool` ↔ `true`/`false`
/// - `Int` ↔ JSON integer
/// - `Float` ↔ JSON float
/// - `Str` ↔ JSON string
/// - `List` ↔ JSON array (script tuples are returned as lists)
/// - `Dict` ↔ JSON object (non-string keys are converted with `repr`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Self>),
    Dict(IndexMap<String, Self>),
}

impl HostValue {
    /// Converts a JSON value, using the mapping documented on the type.
    ///
    /// Integers outside the `i64` range become floats.
    #[must_use]
    pub fn from_json_value(value: serde_json::Value) -> Self {
        use serde_json::Value as JV;
        match value {
            JV::Null => Self::None,
            JV::Bool(b) => Self::Bool(b),
            JV::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JV::String(s) => Self::Str(s),
            JV::Array(items) => Self::List(items.into_iter().map(Self::from_json_value).collect()),
            JV::Object(map) => Self::Dict(map.into_iter().map(|(k, v)| (k, Self::from_json_value(v))).collect()),
        }
    }

    /// Converts to JSON; NaN and infinities become `null`.
    #[must_use]
    pub fn to_json_value(&self) -> serde_json::Value {
        use serde_json::{Value as JV, json};
        match self {
            Self::None => JV::Null,
            Self::Bool(b) => JV::Bool(*b),
            Self::Int(i) => json!(i),
            Self::Float(f) => {
                if f.is_finite() {
                    json!(f)
                } else {
                    JV::Null
                }
            }
            Self::Str(s) => JV::String(s.clone()),
            Self::List(items) => JV::Array(items.iter().map(Self::to_json_value).collect()),
            Self::Dict(map) => JV::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json_value())).collect()),
        }
    }

    /// Python-style `repr()` of the value.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut s = String::new();
        // Writing into a String cannot fail.
        let _ = self.repr_fmt(&mut s);
        s
    }

    fn repr_fmt(&self, f: &mut impl Write) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(&crate::script::float_repr(*v)),
            Self::Str(s) => f.write_str(&crate::script::string_repr(s)),
            Self::List(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.repr_fmt(f)?;
                }
                f.write_char(']')
            }
            Self::Dict(map) => {
                f.write_char('{')?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&crate::script::string_repr(key))?;
                    f.write_str(": ")?;
                    value.repr_fmt(f)?;
                }
                f.write_char('}')
            }
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            _ => self.repr_fmt(f),
        }
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<T: Into<Self>> From<Vec<T>> for HostValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_json_round_trip() {
        let json = serde_json::json!({"name": "Ada", "scores": [1, 2.5, null], "ok": true});
        let value = HostValue::from_json_value(json.clone());
        assert_eq!(value.to_json_value(), json);
        let parsed: HostValue = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn repr_matches_python() {
        let value = HostValue::from(vec!["x", "it's"]);
        assert_eq!(value.py_repr(), r#"['x', "it's"]"#);
        assert_eq!(HostValue::Float(2.0).py_repr(), "2.0");
        assert_eq!(HostValue::Str("hi".into()).to_string(), "hi");
    }
}
