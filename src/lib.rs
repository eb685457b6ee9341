//! scVI core - Rust implementation
//!
//! The generic variational-autoencoder contract and the annotated-data
//! batch loader that single-cell models are trained through.
//!
//! # Architecture
//!
//! - **Data**: an [`data::AnnotatedData`] container with an attached
//!   [`data::DataRegistry`], projected through a [`data::FieldSpec`] into
//!   [`data::TensorBatch`]es by the [`data::ScviDataLoader`]
//! - **Sampling**: [`data::BatchSampler`] yields index batches, optionally
//!   reshuffled on every traversal
//! - **Modules**: [`module::VaeModule`] runs the five-stage forward pass
//!   (inference input, inference, generative input, generative, loss)
//!   and reports a [`module::ScviLoss`]
//!
//! # Example
//!
//! ```ignore
//! use scvi::data::{AnnotatedData, IndexSelection, ScviDataLoader};
//! use scvi::module::{ForwardArgs, VaeModule};
//! use scvi::DataLoaderConfig;
//!
//! let loader = ScviDataLoader::new(&adata, DataLoaderConfig::default(), IndexSelection::All, None)?;
//! for batch in &loader {
//!     let output = model.forward(&batch?, &ForwardArgs::default())?;
//! }
//! ```

pub mod config;
pub mod constants;
pub mod data;
pub mod kwargs;
pub mod module;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used items
pub use config::DataLoaderConfig;
pub use kwargs::{KwargValue, Kwargs};

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum ScviError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Data registry not found: run setup on the annotated data first")]
    NotConfigured,

    #[error("{0} required for model but not included when the data registry was set up")]
    MissingField(String),

    #[error("Capability not implemented: {0}")]
    CapabilityNotImplemented(String),

    #[error("No tensor named {0}")]
    MissingTensor(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("NPY error: {0}")]
    Npy(#[from] ndarray_npy::ReadNpyError),
}

pub type Result<T> = std::result::Result<T, ScviError>;
