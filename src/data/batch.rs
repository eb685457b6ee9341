/// Realized tensors for one batch of cells
use std::collections::BTreeMap;

use candle_core::{Device, Tensor};

/// Field name -> tensor of shape [batch, n_cols], plus the dataset rows it came from
#[derive(Debug, Clone)]
pub struct TensorBatch {
    tensors: BTreeMap<String, Tensor>,
    indices: Vec<usize>,
}

impl TensorBatch {
    pub fn new(tensors: BTreeMap<String, Tensor>, indices: Vec<usize>) -> Self {
        Self { tensors, indices }
    }

    /// Look up a field tensor by name
    pub fn get(&self, key: &str) -> crate::Result<&Tensor> {
        self.tensors
            .get(key)
            .ok_or_else(|| crate::ScviError::MissingTensor(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tensors.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.tensors.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Dataset rows in this batch
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Number of cells in the batch
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// True when every tensor already lives on `device`
    pub fn is_on(&self, device: &Device) -> bool {
        self.tensors.values().all(|t| t.device().same_device(device))
    }

    /// Copy of the batch with every tensor on `device`
    ///
    /// Tensors already on `device` are shared, not copied.
    pub fn to_device(&self, device: &Device) -> crate::Result<Self> {
        let mut tensors = BTreeMap::new();
        for (name, tensor) in &self.tensors {
            let moved = if tensor.device().same_device(device) {
                tensor.clone()
            } else {
                tensor.to_device(device)?
            };
            tensors.insert(name.clone(), moved);
        }

        Ok(Self {
            tensors,
            indices: self.indices.clone(),
        })
    }
}
