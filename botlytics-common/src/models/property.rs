// File: botlytics-common/src/models/property.rs

use std::collections::BTreeMap;
use std::fmt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::Error;

/// Free-form event properties. Keys are unordered as far as the store is
/// concerned; a `BTreeMap` just keeps serialization deterministic.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A single property value: a scalar or a nested mapping.
///
/// Arrays are not representable; producers flatten them before submitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Map(Properties),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Numeric view used by aggregations. Strings are never coerced.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(i) => Some(*i as f64),
            PropertyValue::Float(f) if f.is_finite() => Some(*f),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Properties> {
        match self {
            PropertyValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// JSON-containment semantics: scalars compare by value (numbers
    /// numerically), maps match when every key of `other` is contained.
    pub fn contains(&self, other: &PropertyValue) -> bool {
        match (self, other) {
            (PropertyValue::Map(lhs), PropertyValue::Map(rhs)) => rhs
                .iter()
                .all(|(k, v)| lhs.get(k).is_some_and(|lv| lv.contains(v))),
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => a == b,
            },
        }
    }

    /// Parse a command-line style literal: valid JSON scalars keep their type,
    /// anything else is taken as a plain string.
    pub fn parse_literal(raw: &str) -> PropertyValue {
        match serde_json::from_str::<PropertyValue>(raw) {
            Ok(PropertyValue::Map(_)) | Err(_) => PropertyValue::String(raw.to_string()),
            Ok(v) => v,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", Value::from(other.clone())),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Int(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        PropertyValue::Float(f)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<Properties> for PropertyValue {
    fn from(m: Properties) -> Self {
        PropertyValue::Map(m)
    }
}

impl From<PropertyValue> for Value {
    fn from(v: PropertyValue) -> Self {
        match v {
            PropertyValue::Null => Value::Null,
            PropertyValue::Bool(b) => Value::Bool(b),
            PropertyValue::Int(i) => Value::from(i),
            PropertyValue::Float(f) => Value::from(f),
            PropertyValue::String(s) => Value::String(s),
            PropertyValue::Map(m) => Value::Object(
                m.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

impl TryFrom<Value> for PropertyValue {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        Ok(match v {
            Value::Null => PropertyValue::Null,
            Value::Bool(b) => PropertyValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PropertyValue::Int(i),
                None => PropertyValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => PropertyValue::String(s),
            Value::Array(_) => {
                return Err(Error::Validation(
                    "array property values are not supported".into(),
                ))
            }
            Value::Object(obj) => PropertyValue::Map(properties_from_json(obj)?),
        })
    }
}

/// Converts a JSON object into `Properties`, rejecting arrays anywhere inside.
pub fn properties_from_json(obj: serde_json::Map<String, Value>) -> Result<Properties, Error> {
    obj.into_iter()
        .map(|(k, v)| Ok((k, PropertyValue::try_from(v)?)))
        .collect()
}

/// Looks up a value by path (`["meta", "utm_source"]`) through nested maps.
pub fn get_path<'a, S: AsRef<str>>(props: &'a Properties, path: &[S]) -> Option<&'a PropertyValue> {
    let (first, rest) = path.split_first()?;
    let mut current = props.get(first.as_ref())?;
    for key in rest {
        current = current.as_map()?.get(key.as_ref())?;
    }
    Some(current)
}

/// Splits a dotted accessor (`meta.utm_source`) into path segments.
pub fn split_path(dotted: &str) -> Vec<String> {
    dotted
        .split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_mixed_scalars_and_nested() {
        let props: Properties = serde_json::from_value(json!({
            "user_id": "42",
            "response_time_ms": 150,
            "ratio": 0.5,
            "contains_emoji": false,
            "phrase_category": null,
            "meta": { "utm_source": "google" }
        }))
        .unwrap();

        assert_eq!(props["user_id"], PropertyValue::String("42".into()));
        assert_eq!(props["response_time_ms"], PropertyValue::Int(150));
        assert_eq!(props["ratio"], PropertyValue::Float(0.5));
        assert_eq!(props["contains_emoji"], PropertyValue::Bool(false));
        assert_eq!(props["phrase_category"], PropertyValue::Null);
        assert_eq!(
            get_path(&props, &["meta", "utm_source"]),
            Some(&PropertyValue::String("google".into()))
        );
    }

    #[test]
    fn test_arrays_are_rejected() {
        let res = serde_json::from_value::<Properties>(json!({ "tags": [1, 2] }));
        assert!(res.is_err());

        let obj = json!({ "nested": { "tags": ["a"] } });
        let Value::Object(map) = obj else { unreachable!() };
        assert!(properties_from_json(map).unwrap_err().is_validation());
    }

    #[test]
    fn test_as_f64_skips_strings() {
        assert_eq!(PropertyValue::Int(100).as_f64(), Some(100.0));
        assert_eq!(PropertyValue::from("n/a").as_f64(), None);
        assert_eq!(PropertyValue::from("300").as_f64(), None);
    }

    #[test]
    fn test_contains_is_numeric_and_recursive() {
        assert!(PropertyValue::Int(1).contains(&PropertyValue::Float(1.0)));

        let mut inner = Properties::new();
        inner.insert("utm_source".into(), "google".into());
        inner.insert("utm_medium".into(), "cpc".into());
        let mut wanted = Properties::new();
        wanted.insert("utm_source".into(), "google".into());

        assert!(PropertyValue::Map(inner.clone()).contains(&PropertyValue::Map(wanted)));
        assert!(!PropertyValue::Map(Properties::new()).contains(&PropertyValue::Map(inner)));
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(PropertyValue::parse_literal("google"), PropertyValue::from("google"));
        assert_eq!(PropertyValue::parse_literal("42"), PropertyValue::Int(42));
        assert_eq!(PropertyValue::parse_literal("true"), PropertyValue::Bool(true));
        assert_eq!(PropertyValue::parse_literal("\"42\""), PropertyValue::from("42"));
        assert_eq!(PropertyValue::parse_literal("{\"a\":1}"), PropertyValue::from("{\"a\":1}"));
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("meta.utm_source"), vec!["meta", "utm_source"]);
        assert_eq!(split_path("response_time_ms"), vec!["response_time_ms"]);
    }
}
