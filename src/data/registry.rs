/// Field registry and field requests
///
/// A [`DataRegistry`] is attached to an [`super::AnnotatedData`] by the setup
/// step and lists the fields a loader may extract. A [`FieldSpec`] is what a
/// particular loader asks for, with the numeric type each field is cast to.
use std::collections::BTreeMap;

use candle_core::DType;
use serde::{Deserialize, Serialize};

use crate::constants::{BATCH_KEY, LABELS_KEY, LOCAL_L_MEAN_KEY, LOCAL_L_VAR_KEY, X_KEY};

/// Numeric representation of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldDType {
    /// Continuous values
    Float32,
    /// Categorical codes and counts
    Int64,
}

impl FieldDType {
    /// Matching Candle dtype
    pub fn to_dtype(self) -> DType {
        match self {
            FieldDType::Float32 => DType::F32,
            FieldDType::Int64 => DType::I64,
        }
    }
}

/// Fields registered on a data container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataRegistry {
    fields: BTreeMap<String, FieldDType>,
}

impl DataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration
    pub fn with(mut self, name: impl Into<String>, dtype: FieldDType) -> Self {
        self.register(name, dtype);
        self
    }

    /// Register a field, replacing any previous entry
    pub fn register(&mut self, name: impl Into<String>, dtype: FieldDType) {
        self.fields.insert(name.into(), dtype);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<FieldDType> {
        self.fields.get(name).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Fields a loader exposes per item, with their target dtypes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    fields: BTreeMap<String, FieldDType>,
}

impl Default for FieldSpec {
    /// The five standard fields
    fn default() -> Self {
        Self::empty()
            .with(X_KEY, FieldDType::Float32)
            .with(BATCH_KEY, FieldDType::Int64)
            .with(LOCAL_L_MEAN_KEY, FieldDType::Float32)
            .with(LOCAL_L_VAR_KEY, FieldDType::Float32)
            .with(LABELS_KEY, FieldDType::Int64)
    }
}

impl FieldSpec {
    /// Request no fields
    pub fn empty() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, dtype: FieldDType) -> Self {
        self.fields.insert(name.into(), dtype);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<FieldDType> {
        self.fields.get(name).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldDType)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First requested field the registry does not know about
    pub fn first_missing(&self, registry: &DataRegistry) -> Option<&str> {
        self.keys().find(|key| !registry.contains(key))
    }
}
