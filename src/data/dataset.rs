/// Read-only projection of an annotated data container through a field spec
use std::collections::BTreeMap;

use candle_core::Device;

use super::anndata::AnnotatedData;
use super::batch::TensorBatch;
use super::registry::FieldSpec;

/// Dataset view exposing the requested fields of each cell
///
/// Borrows the container; only the rows of a requested batch are copied.
#[derive(Debug, Clone)]
pub struct ScviDataset<'a> {
    adata: &'a AnnotatedData,
    getitem_tensors: FieldSpec,
}

impl<'a> ScviDataset<'a> {
    /// Create a view over `adata` exposing `getitem_tensors`
    ///
    /// Fails if a requested field has no stored array.
    pub fn new(adata: &'a AnnotatedData, getitem_tensors: FieldSpec) -> crate::Result<Self> {
        if let Some(missing) = getitem_tensors.keys().find(|key| adata.field(key).is_none()) {
            return Err(crate::ScviError::Data(format!(
                "Field {} is registered but has no stored data",
                missing
            )));
        }

        Ok(Self {
            adata,
            getitem_tensors,
        })
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.adata.n_obs()
    }

    pub fn is_empty(&self) -> bool {
        self.adata.is_empty()
    }

    /// Fields exposed per item
    pub fn field_spec(&self) -> &FieldSpec {
        &self.getitem_tensors
    }

    pub fn adata(&self) -> &'a AnnotatedData {
        self.adata
    }

    /// Fetch a whole batch of rows at once
    ///
    /// # Arguments
    /// * `indices` - Dataset rows, already batched by the sampler
    /// * `device` - Device to build tensors on
    pub fn get_batch(&self, indices: &[usize], device: &Device) -> crate::Result<TensorBatch> {
        let mut tensors = BTreeMap::new();

        for (name, dtype) in self.getitem_tensors.iter() {
            let data = self
                .adata
                .field(name)
                .ok_or_else(|| crate::ScviError::MissingField(name.to_string()))?;
            tensors.insert(name.to_string(), data.gather(indices, dtype, device)?);
        }

        Ok(TensorBatch::new(tensors, indices.to_vec()))
    }
}
