/// Keyword options forwarded to loader and module hooks
///
/// Callers may pass none, some, or all of the options a hook recognizes.
/// Keys a hook does not know are carried along verbatim; the hook decides
/// whether they are valid.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single option value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KwargValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for KwargValue {
    fn from(v: bool) -> Self {
        KwargValue::Bool(v)
    }
}

impl From<i64> for KwargValue {
    fn from(v: i64) -> Self {
        KwargValue::Int(v)
    }
}

impl From<usize> for KwargValue {
    fn from(v: usize) -> Self {
        // Saturates rather than wrapping negative
        KwargValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for KwargValue {
    fn from(v: f64) -> Self {
        KwargValue::Float(v)
    }
}

impl From<&str> for KwargValue {
    fn from(v: &str) -> Self {
        KwargValue::Str(v.to_string())
    }
}

impl From<String> for KwargValue {
    fn from(v: String) -> Self {
        KwargValue::Str(v)
    }
}

/// Ordered mapping from option name to value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kwargs(BTreeMap<String, KwargValue>);

impl Kwargs {
    /// Create an empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<KwargValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<KwargValue>) -> Option<KwargValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<KwargValue> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&KwargValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(KwargValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(KwargValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Non-negative integer option
    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get_i64(key).and_then(|v| usize::try_from(v).ok())
    }

    /// Float option; integers are widened
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key) {
            Some(KwargValue::Float(v)) => Some(*v),
            Some(KwargValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(KwargValue::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KwargValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
