/// Variational autoencoder contract
///
/// Every model supplies six hooks. The forward pass is written once, here,
/// against the trait:
///
/// 1. `get_inference_input` - batch -> inference inputs
/// 2. `inference` - inference inputs -> inference outputs (e.g. q(z|x) parameters)
/// 3. `get_generative_input` - batch + inference outputs -> generative inputs
/// 4. `generative` - generative inputs -> generative outputs
/// 5. `loss` - batch + both outputs -> [`ScviLoss`] (only if requested)
///
/// `sample` draws from the model and is not part of the forward sequence.
use candle_core::Device;

use super::decorators::auto_move_data;
use super::loss::ScviLoss;
use super::TensorMap;
use crate::data::TensorBatch;
use crate::Kwargs;

/// Per-stage options for [`VaeModule::forward`]
///
/// Every option set starts empty; callers fill in only the stages they
/// want to tune.
#[derive(Debug, Clone)]
pub struct ForwardArgs {
    /// Options for `get_inference_input`
    pub get_inference_input_kwargs: Kwargs,
    /// Options for `get_generative_input`
    pub get_generative_input_kwargs: Kwargs,
    /// Options for `inference`
    pub inference_kwargs: Kwargs,
    /// Options for `generative`
    pub generative_kwargs: Kwargs,
    /// Options for `loss`
    pub loss_kwargs: Kwargs,
    /// Run the loss stage and return its result
    pub compute_loss: bool,
}

impl Default for ForwardArgs {
    fn default() -> Self {
        Self {
            get_inference_input_kwargs: Kwargs::new(),
            get_generative_input_kwargs: Kwargs::new(),
            inference_kwargs: Kwargs::new(),
            generative_kwargs: Kwargs::new(),
            loss_kwargs: Kwargs::new(),
            compute_loss: true,
        }
    }
}

impl ForwardArgs {
    /// Inference and generative stages only
    pub fn without_loss() -> Self {
        Self {
            compute_loss: false,
            ..Self::default()
        }
    }

    pub fn with_get_inference_input_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.get_inference_input_kwargs = kwargs;
        self
    }

    pub fn with_get_generative_input_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.get_generative_input_kwargs = kwargs;
        self
    }

    pub fn with_inference_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.inference_kwargs = kwargs;
        self
    }

    pub fn with_generative_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.generative_kwargs = kwargs;
        self
    }

    pub fn with_loss_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.loss_kwargs = kwargs;
        self
    }
}

/// Result of a forward pass
#[derive(Debug, Clone)]
pub enum ForwardOutput {
    /// Loss computation was disabled
    Outputs {
        inference_outputs: TensorMap,
        generative_outputs: TensorMap,
    },
    /// Loss computation was requested
    WithLoss {
        inference_outputs: TensorMap,
        generative_outputs: TensorMap,
        losses: ScviLoss,
    },
}

impl ForwardOutput {
    pub fn inference_outputs(&self) -> &TensorMap {
        match self {
            ForwardOutput::Outputs { inference_outputs, .. }
            | ForwardOutput::WithLoss { inference_outputs, .. } => inference_outputs,
        }
    }

    pub fn generative_outputs(&self) -> &TensorMap {
        match self {
            ForwardOutput::Outputs { generative_outputs, .. }
            | ForwardOutput::WithLoss { generative_outputs, .. } => generative_outputs,
        }
    }

    pub fn losses(&self) -> Option<&ScviLoss> {
        match self {
            ForwardOutput::Outputs { .. } => None,
            ForwardOutput::WithLoss { losses, .. } => Some(losses),
        }
    }

    pub fn into_losses(self) -> Option<ScviLoss> {
        match self {
            ForwardOutput::Outputs { .. } => None,
            ForwardOutput::WithLoss { losses, .. } => Some(losses),
        }
    }
}

/// Contract implemented by every concrete VAE
pub trait VaeModule {
    /// Device the module's parameters live on
    fn device(&self) -> &Device;

    /// Map a batch to the inputs of [`VaeModule::inference`]
    fn get_inference_input(&self, tensors: &TensorBatch, kwargs: &Kwargs) -> crate::Result<TensorMap>;

    /// Encoder pass
    fn inference(&self, inputs: TensorMap, kwargs: &Kwargs) -> crate::Result<TensorMap>;

    /// Map a batch and the inference outputs to the inputs of [`VaeModule::generative`]
    fn get_generative_input(
        &self,
        tensors: &TensorBatch,
        inference_outputs: &TensorMap,
        kwargs: &Kwargs,
    ) -> crate::Result<TensorMap>;

    /// Decoder pass
    fn generative(&self, inputs: TensorMap, kwargs: &Kwargs) -> crate::Result<TensorMap>;

    /// Losses for one batch
    fn loss(
        &self,
        tensors: &TensorBatch,
        inference_outputs: &TensorMap,
        generative_outputs: &TensorMap,
        kwargs: &Kwargs,
    ) -> crate::Result<ScviLoss>;

    /// Draw samples from the model
    fn sample(&self, tensors: &TensorBatch, kwargs: &Kwargs) -> crate::Result<TensorMap>;

    /// Forward pass through the network
    ///
    /// The batch is first placed on [`VaeModule::device`]; the five stages
    /// then run in order.
    fn forward(&self, tensors: &TensorBatch, args: &ForwardArgs) -> crate::Result<ForwardOutput> {
        auto_move_data(self.device(), tensors, |tensors| forward_stages(self, tensors, args))
    }
}

/// The five forward stages, without device handling
pub fn forward_stages<M: VaeModule + ?Sized>(
    module: &M,
    tensors: &TensorBatch,
    args: &ForwardArgs,
) -> crate::Result<ForwardOutput> {
    log::trace!("forward: get_inference_input");
    let inference_inputs = module.get_inference_input(tensors, &args.get_inference_input_kwargs)?;

    log::trace!("forward: inference");
    let inference_outputs = module.inference(inference_inputs, &args.inference_kwargs)?;

    log::trace!("forward: get_generative_input");
    let generative_inputs =
        module.get_generative_input(tensors, &inference_outputs, &args.get_generative_input_kwargs)?;

    log::trace!("forward: generative");
    let generative_outputs = module.generative(generative_inputs, &args.generative_kwargs)?;

    if !args.compute_loss {
        return Ok(ForwardOutput::Outputs {
            inference_outputs,
            generative_outputs,
        });
    }

    log::trace!("forward: loss");
    let losses = module.loss(tensors, &inference_outputs, &generative_outputs, &args.loss_kwargs)?;

    Ok(ForwardOutput::WithLoss {
        inference_outputs,
        generative_outputs,
        losses,
    })
}
