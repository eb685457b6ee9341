/// Module assembled from closures
///
/// Useful for quick experiments and wrappers around existing networks. Unlike
/// a trait impl, a missing hook is only detected when the module is built.
use candle_core::Device;

use super::base::VaeModule;
use super::loss::ScviLoss;
use super::TensorMap;
use crate::data::TensorBatch;
use crate::{Kwargs, ScviError};

type InputFn = Box<dyn Fn(&TensorBatch, &Kwargs) -> crate::Result<TensorMap>>;
type StageFn = Box<dyn Fn(TensorMap, &Kwargs) -> crate::Result<TensorMap>>;
type GenerativeInputFn = Box<dyn Fn(&TensorBatch, &TensorMap, &Kwargs) -> crate::Result<TensorMap>>;
type LossFn = Box<dyn Fn(&TensorBatch, &TensorMap, &TensorMap, &Kwargs) -> crate::Result<ScviLoss>>;

/// A [`VaeModule`] whose six hooks are closures
pub struct ComposedModule {
    device: Device,
    get_inference_input: InputFn,
    inference: StageFn,
    get_generative_input: GenerativeInputFn,
    generative: StageFn,
    loss: LossFn,
    sample: InputFn,
}

impl ComposedModule {
    pub fn builder(device: Device) -> ComposedModuleBuilder {
        ComposedModuleBuilder {
            device,
            get_inference_input: None,
            inference: None,
            get_generative_input: None,
            generative: None,
            loss: None,
            sample: None,
        }
    }
}

/// Collects hooks for a [`ComposedModule`]
pub struct ComposedModuleBuilder {
    device: Device,
    get_inference_input: Option<InputFn>,
    inference: Option<StageFn>,
    get_generative_input: Option<GenerativeInputFn>,
    generative: Option<StageFn>,
    loss: Option<LossFn>,
    sample: Option<InputFn>,
}

impl ComposedModuleBuilder {
    pub fn get_inference_input(
        mut self,
        f: impl Fn(&TensorBatch, &Kwargs) -> crate::Result<TensorMap> + 'static,
    ) -> Self {
        self.get_inference_input = Some(Box::new(f));
        self
    }

    pub fn inference(mut self, f: impl Fn(TensorMap, &Kwargs) -> crate::Result<TensorMap> + 'static) -> Self {
        self.inference = Some(Box::new(f));
        self
    }

    pub fn get_generative_input(
        mut self,
        f: impl Fn(&TensorBatch, &TensorMap, &Kwargs) -> crate::Result<TensorMap> + 'static,
    ) -> Self {
        self.get_generative_input = Some(Box::new(f));
        self
    }

    pub fn generative(mut self, f: impl Fn(TensorMap, &Kwargs) -> crate::Result<TensorMap> + 'static) -> Self {
        self.generative = Some(Box::new(f));
        self
    }

    pub fn loss(
        mut self,
        f: impl Fn(&TensorBatch, &TensorMap, &TensorMap, &Kwargs) -> crate::Result<ScviLoss> + 'static,
    ) -> Self {
        self.loss = Some(Box::new(f));
        self
    }

    pub fn sample(
        mut self,
        f: impl Fn(&TensorBatch, &Kwargs) -> crate::Result<TensorMap> + 'static,
    ) -> Self {
        self.sample = Some(Box::new(f));
        self
    }

    /// Build the module
    ///
    /// # Errors
    /// [`ScviError::CapabilityNotImplemented`] naming the first missing hook
    pub fn build(self) -> crate::Result<ComposedModule> {
        Ok(ComposedModule {
            device: self.device,
            get_inference_input: require(self.get_inference_input, "get_inference_input")?,
            inference: require(self.inference, "inference")?,
            get_generative_input: require(self.get_generative_input, "get_generative_input")?,
            generative: require(self.generative, "generative")?,
            loss: require(self.loss, "loss")?,
            sample: require(self.sample, "sample")?,
        })
    }
}

fn require<T>(hook: Option<T>, name: &str) -> crate::Result<T> {
    hook.ok_or_else(|| ScviError::CapabilityNotImplemented(name.to_string()))
}

impl VaeModule for ComposedModule {
    fn device(&self) -> &Device {
        &self.device
    }

    fn get_inference_input(&self, tensors: &TensorBatch, kwargs: &Kwargs) -> crate::Result<TensorMap> {
        (self.get_inference_input)(tensors, kwargs)
    }

    fn inference(&self, inputs: TensorMap, kwargs: &Kwargs) -> crate::Result<TensorMap> {
        (self.inference)(inputs, kwargs)
    }

    fn get_generative_input(
        &self,
        tensors: &TensorBatch,
        inference_outputs: &TensorMap,
        kwargs: &Kwargs,
    ) -> crate::Result<TensorMap> {
        (self.get_generative_input)(tensors, inference_outputs, kwargs)
    }

    fn generative(&self, inputs: TensorMap, kwargs: &Kwargs) -> crate::Result<TensorMap> {
        (self.generative)(inputs, kwargs)
    }

    fn loss(
        &self,
        tensors: &TensorBatch,
        inference_outputs: &TensorMap,
        generative_outputs: &TensorMap,
        kwargs: &Kwargs,
    ) -> crate::Result<ScviLoss> {
        (self.loss)(tensors, inference_outputs, generative_outputs, kwargs)
    }

    fn sample(&self, tensors: &TensorBatch, kwargs: &Kwargs) -> crate::Result<TensorMap> {
        (self.sample)(tensors, kwargs)
    }
}
