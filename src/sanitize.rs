//! Replacement of non-finite floats with an explicit "undefined" marker.
//!
//! JSON has no representation for infinity or NaN, so every number leaving the
//! crate goes through [`Sanitize`]. Typed results use `Option<f64>` (`None` is
//! undefined); heterogeneous payloads use the [`Value`] tree.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

pub trait Sanitize {
    type Output;

    fn sanitize(&self) -> Self::Output;
}

impl Sanitize for f64 {
    type Output = Option<f64>;

    fn sanitize(&self) -> Option<f64> {
        self.is_finite().then_some(*self)
    }
}

impl Sanitize for Option<f64> {
    type Output = Option<f64>;

    fn sanitize(&self) -> Option<f64> {
        self.and_then(|v| v.sanitize())
    }
}

impl<T: Sanitize> Sanitize for Vec<T> {
    type Output = Vec<T::Output>;

    fn sanitize(&self) -> Self::Output {
        self.iter().map(Sanitize::sanitize).collect()
    }
}

impl<T: Sanitize> Sanitize for BTreeMap<String, T> {
    type Output = BTreeMap<String, T::Output>;

    fn sanitize(&self) -> Self::Output {
        self.iter().map(|(k, v)| (k.clone(), v.sanitize())).collect()
    }
}

/// Rounds half away from zero to `decimals` places.
pub fn round_f64(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// [`round_f64`] that leaves undefined as undefined.
pub fn round_to(value: Option<f64>, decimals: i32) -> Option<f64> {
    value.map(|v| round_f64(v, decimals))
}

/// Dynamically shaped payload value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Sanitize for Value {
    type Output = Value;

    fn sanitize(&self) -> Value {
        match self {
            Value::Float(v) if !v.is_finite() => Value::Undefined,
            Value::Seq(items) => Value::Seq(items.sanitize()),
            Value::Map(entries) => Value::Map(entries.sanitize()),
            other => other.clone(),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Option<f64>> for Value {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Value::Undefined, Value::Float)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Seq(items.into_iter().map(Into::into).collect())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) if !f.is_finite() => serializer.serialize_none(),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Seq(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    #[test]
    fn test_nested_non_finite_values_become_undefined() {
        let input = map(vec![
            ("a", Value::Float(f64::INFINITY)),
            ("b", Value::from(vec![1.0, f64::NAN, 3.0])),
        ]);
        let expected = map(vec![
            ("a", Value::Undefined),
            (
                "b",
                Value::Seq(vec![Value::Float(1.0), Value::Undefined, Value::Float(3.0)]),
            ),
        ]);
        assert_eq!(input.sanitize(), expected);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let input = map(vec![
            ("x", Value::Float(f64::NEG_INFINITY)),
            ("y", map(vec![("z", Value::from(vec![f64::NAN, 2.5]))])),
            ("n", Value::Int(7)),
            ("s", Value::from("label")),
            ("t", Value::Bool(true)),
        ]);
        let once = input.sanitize();
        assert_eq!(once.sanitize(), once);
    }

    #[test]
    fn test_finite_inputs_are_unchanged() {
        let input = map(vec![
            ("a", Value::Float(-1.5)),
            ("b", Value::from(vec![0.0, 1e300])),
            ("c", Value::Int(i64::MAX)),
            ("d", Value::Undefined),
        ]);
        assert_eq!(input.sanitize(), input);

        let typed = vec![1.0, 2.0];
        assert_eq!(typed.sanitize(), vec![Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_typed_sanitize_on_maps_and_options() {
        let mut weights = BTreeMap::new();
        weights.insert("AAPL".to_string(), 0.4);
        weights.insert("MSFT".to_string(), f64::NAN);
        let clean = weights.sanitize();
        assert_eq!(clean["AAPL"], Some(0.4));
        assert_eq!(clean["MSFT"], None);

        assert_eq!(Some(f64::INFINITY).sanitize(), None);
        assert_eq!(clean.sanitize(), clean);
    }

    #[test]
    fn test_undefined_serializes_as_null() {
        let value = map(vec![("a", Value::Undefined), ("b", Value::Float(2.0))]);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, serde_json::json!({ "a": null, "b": 2.0 }));
    }

    #[test]
    fn test_round_to_preserves_undefined() {
        assert_eq!(round_to(Some(1.23456), 2), Some(1.23));
        assert_eq!(round_to(None, 2), None);
    }
}
