//! Location descriptors.
//!
//! A [`Location`] is a flat JSON object whose values are strings, numbers or
//! booleans, e.g. `{"app": "X", "page": "home"}`. Locations double as
//! exclusivity regions: a region is simply a location with fewer fields, and a
//! location is inside a region when it agrees with every field the region sets.
//!
//! The canonical serialization (sorted keys, compact, integral numbers written
//! without a fraction) is what ends up in storage keys and values, so it must
//! stay byte-for-byte stable.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// LocationValue
// ---------------------------------------------------------------------------

/// A single field value inside a [`Location`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LocationValue {
    String(String),
    Number(Number),
    Bool(bool),
}

/// Integral floats become integers so `1.0` and `1` are the same value.
fn normalize_number(n: Number) -> Number {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            Number::from(f as i64)
        }
        _ => n,
    }
}

impl From<&str> for LocationValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for LocationValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for LocationValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for LocationValue {
    fn from(value: i64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<i32> for LocationValue {
    fn from(value: i32) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<u64> for LocationValue {
    fn from(value: u64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl TryFrom<f64> for LocationValue {
    type Error = CoreError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Number::from_f64(value)
            .map(|n| Self::Number(normalize_number(n)))
            .ok_or_else(|| CoreError::InvalidLocation(format!("non-finite number {value}")))
    }
}

impl From<&LocationValue> for Value {
    fn from(value: &LocationValue) -> Self {
        match value {
            LocationValue::String(s) => Value::String(s.clone()),
            LocationValue::Number(n) => Value::Number(n.clone()),
            LocationValue::Bool(b) => Value::Bool(*b),
        }
    }
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// A flat key/value description of where a user is (or of an exclusivity
/// region).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct Location(BTreeMap<String, LocationValue>);

impl Location {
    /// Create an empty location. An empty region matches every location.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<LocationValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set a field, returning the previous value if any.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<LocationValue>,
    ) -> Option<LocationValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&LocationValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LocationValue)> {
        self.0.iter()
    }

    /// Returns `true` if every field set in `region` has the same value here.
    ///
    /// Fields present only in `self` are ignored, so a location always matches
    /// itself and every region that is a subset of it.
    pub fn matches(&self, region: &Location) -> bool {
        region
            .0
            .iter()
            .all(|(key, value)| self.0.get(key) == Some(value))
    }

    /// Canonical compact JSON with sorted keys.
    pub fn canonical_json(&self) -> String {
        Value::from(self).to_string()
    }

    /// Decode a stored canonical JSON value.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| CoreError::InvalidLocation(e.to_string()))?;
        Self::try_from(value)
    }
}

impl From<&Location> for Value {
    fn from(location: &Location) -> Self {
        Value::Object(
            location
                .0
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v)))
                .collect(),
        )
    }
}

impl TryFrom<Value> for Location {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(map) = value else {
            return Err(CoreError::InvalidLocation(
                "location must be a JSON object".into(),
            ));
        };

        let mut fields = BTreeMap::new();
        for (key, value) in map {
            let value = match value {
                Value::String(s) => LocationValue::String(s),
                Value::Bool(b) => LocationValue::Bool(b),
                Value::Number(n) => LocationValue::Number(normalize_number(n)),
                other => {
                    return Err(CoreError::InvalidLocation(format!(
                        "field '{key}' must be a string, number or boolean, got {other}"
                    )));
                }
            };
            fields.insert(key, value);
        }
        Ok(Self(fields))
    }
}

impl<K: Into<String>, V: Into<LocationValue>> FromIterator<(K, V)> for Location {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Canonical order: fewer fields first, then byte-wise canonical JSON.
impl Ord for Location {
    fn cmp(&self, other: &Self) -> Ordering {
        self.len()
            .cmp(&other.len())
            .then_with(|| self.canonical_json().cmp(&other.canonical_json()))
    }
}

impl PartialOrd for Location {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_json())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
