/// Generic VAE contract and its loss container
pub mod base;
pub mod composed;
pub mod decorators;
pub mod loss;

pub use base::{forward_stages, ForwardArgs, ForwardOutput, VaeModule};
pub use composed::{ComposedModule, ComposedModuleBuilder};
pub use decorators::auto_move_data;
pub use loss::{LossInput, LossTerm, ScviLoss};

use std::collections::BTreeMap;

use candle_core::Tensor;

/// Named tensors passed between forward stages
pub type TensorMap = BTreeMap<String, Tensor>;

/// Look up a stage output by name
pub fn get_tensor<'m>(map: &'m TensorMap, key: &str) -> crate::Result<&'m Tensor> {
    map.get(key)
        .ok_or_else(|| crate::ScviError::MissingTensor(key.to_string()))
}
