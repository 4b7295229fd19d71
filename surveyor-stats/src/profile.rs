//! Population profile records.
//!
//! A profile is a flat attribute bag loaded from whatever source produced the
//! population. Well-known fields get typed accessors; everything else passes
//! through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Stratum label used when a unit has no value for a stratification variable.
pub const UNKNOWN_STRATUM: &str = "unknown";

/// A single member of the sampling frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileRecord {
    fields: BTreeMap<String, Value>,
}

impl ProfileRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from `(key, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Stable identifier. Numeric ids are stringified.
    pub fn id(&self) -> Option<String> {
        self.fields.get("id").and_then(scalar_to_string)
    }

    /// Human-readable name, falling back to the id.
    pub fn display_name(&self) -> String {
        ["name", "display_name"]
            .iter()
            .find_map(|k| self.fields.get(*k).and_then(scalar_to_string))
            .or_else(|| self.id())
            .unwrap_or_default()
    }

    /// Value of a stratification variable.
    ///
    /// Lists are reduced to their first element; null and missing fields
    /// yield `None`.
    pub fn stratum_value(&self, variable: &str) -> Option<String> {
        match self.fields.get(variable)? {
            Value::Array(items) => items.first().and_then(scalar_to_string),
            other => scalar_to_string(other),
        }
    }

    /// Stratum value with missing values collapsed into [`UNKNOWN_STRATUM`].
    pub fn stratum_or_unknown(&self, variable: &str) -> String {
        self.stratum_value(variable)
            .unwrap_or_else(|| UNKNOWN_STRATUM.to_string())
    }

    /// Numeric view of a field, if it holds a number or a numeric string.
    pub fn numeric(&self, key: &str) -> Option<f64> {
        match self.fields.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
