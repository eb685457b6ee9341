/// Data loading modules for model training
pub mod anndata;
pub mod batch;
pub mod dataset;
pub mod loader;
pub mod registry;
pub mod sampler;

pub use anndata::{AnnotatedData, FieldData};
pub use batch::TensorBatch;
pub use dataset::ScviDataset;
pub use loader::{mask_to_indices, IndexSelection, ScviDataLoader, TensorBatches};
pub use registry::{DataRegistry, FieldDType, FieldSpec};
pub use sampler::{BatchIter, BatchSampler};
