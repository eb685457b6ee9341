//! Shared fixtures for unit tests
use std::cell::RefCell;

use candle_core::{Device, Tensor};
use ndarray::Array2;

use crate::constants::{BATCH_KEY, LABELS_KEY, LOCAL_L_MEAN_KEY, LOCAL_L_VAR_KEY, X_KEY};
use crate::data::{AnnotatedData, FieldData, FieldSpec, ScviDataset, TensorBatch};
use crate::module::{get_tensor, ScviLoss, TensorMap, VaeModule};
use crate::Kwargs;

/// Container with the five standard fields and no registry
///
/// Counts are small deterministic integers stored as float32.
pub fn synthetic_unregistered(n_cells: usize, n_genes: usize) -> AnnotatedData {
    let counts = Array2::from_shape_fn((n_cells, n_genes), |(i, j)| ((i * 7 + j * 3) % 5) as f32);
    let library: Vec<f32> = (0..n_cells).map(|i| (i % 4) as f32 + 1.0).collect();

    let mut adata = AnnotatedData::new(n_cells);
    let fields = [
        (X_KEY, FieldData::from(counts)),
        (BATCH_KEY, FieldData::column_i64((0..n_cells).map(|i| (i % 2) as i64).collect())),
        (LOCAL_L_MEAN_KEY, FieldData::column_f32(library)),
        (LOCAL_L_VAR_KEY, FieldData::column_f32(vec![1.0; n_cells])),
        (LABELS_KEY, FieldData::column_i64((0..n_cells).map(|i| (i % 3) as i64).collect())),
    ];
    for (name, data) in fields {
        // Every fixture field has n_cells rows
        if let Err(e) = adata.insert_field(name, data) {
            panic!("fixture field {}: {}", name, e);
        }
    }
    adata
}

/// Container with the five standard fields and a registry covering them
pub fn synthetic_adata(n_cells: usize, n_genes: usize) -> AnnotatedData {
    let mut adata = synthetic_unregistered(n_cells, n_genes);
    adata.setup_registry();
    adata
}

/// First `n_cells` rows of a synthetic container as a CPU batch
pub fn cpu_batch(n_cells: usize, n_genes: usize) -> crate::Result<TensorBatch> {
    let adata = synthetic_adata(n_cells, n_genes);
    let dataset = ScviDataset::new(&adata, FieldSpec::default())?;
    let rows: Vec<usize> = (0..n_cells).collect();
    dataset.get_batch(&rows, &Device::Cpu)
}

/// Parameter-free module that records the order its hooks run in
///
/// inference: `z = scale * x` (scale 0.5 unless overridden)
/// generative: `px_rate = scale * z` (scale 2.0 unless overridden)
/// loss: squared reconstruction error per cell, `kl_local = 0.5 * sum(z^2)`
/// per cell, `kl_global = 1.0`
pub struct StageRecorder {
    device: Device,
    calls: RefCell<Vec<&'static str>>,
}

impl Default for StageRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRecorder {
    pub fn new() -> Self {
        Self {
            device: Device::Cpu,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }

    fn record(&self, stage: &'static str) {
        self.calls.borrow_mut().push(stage);
    }
}

impl VaeModule for StageRecorder {
    fn device(&self) -> &Device {
        &self.device
    }

    fn get_inference_input(&self, tensors: &TensorBatch, _kwargs: &Kwargs) -> crate::Result<TensorMap> {
        self.record("get_inference_input");
        Ok(TensorMap::from([("x".to_string(), tensors.get(X_KEY)?.clone())]))
    }

    fn inference(&self, inputs: TensorMap, kwargs: &Kwargs) -> crate::Result<TensorMap> {
        self.record("inference");
        let scale = kwargs.get_f64("scale").unwrap_or(0.5);
        let z = get_tensor(&inputs, "x")?.affine(scale, 0.0)?;
        Ok(TensorMap::from([("qz_m".to_string(), z.clone()), ("z".to_string(), z)]))
    }

    fn get_generative_input(
        &self,
        tensors: &TensorBatch,
        inference_outputs: &TensorMap,
        _kwargs: &Kwargs,
    ) -> crate::Result<TensorMap> {
        self.record("get_generative_input");
        Ok(TensorMap::from([
            ("z".to_string(), get_tensor(inference_outputs, "z")?.clone()),
            ("library".to_string(), tensors.get(LOCAL_L_MEAN_KEY)?.clone()),
        ]))
    }

    fn generative(&self, inputs: TensorMap, kwargs: &Kwargs) -> crate::Result<TensorMap> {
        self.record("generative");
        let scale = kwargs.get_f64("scale").unwrap_or(2.0);
        let px_rate = get_tensor(&inputs, "z")?.affine(scale, 0.0)?;
        Ok(TensorMap::from([("px_rate".to_string(), px_rate)]))
    }

    fn loss(
        &self,
        tensors: &TensorBatch,
        inference_outputs: &TensorMap,
        generative_outputs: &TensorMap,
        _kwargs: &Kwargs,
    ) -> crate::Result<ScviLoss> {
        self.record("loss");
        let x = tensors.get(X_KEY)?;
        let px_rate = get_tensor(generative_outputs, "px_rate")?;
        let qz_m = get_tensor(inference_outputs, "qz_m")?;

        let reconst: Tensor = (px_rate - x)?.sqr()?.sum(1)?;
        let kl_local: Tensor = qz_m.sqr()?.sum(1)?.affine(0.5, 0.0)?;
        let loss = (&reconst + &kl_local)?.mean_all()?;

        Ok(ScviLoss::new(loss, reconst, kl_local, 1.0))
    }

    fn sample(&self, tensors: &TensorBatch, _kwargs: &Kwargs) -> crate::Result<TensorMap> {
        self.record("sample");
        let inference_inputs = self.get_inference_input(tensors, &Kwargs::new())?;
        let inference_outputs = self.inference(inference_inputs, &Kwargs::new())?;
        let generative_inputs = self.get_generative_input(tensors, &inference_outputs, &Kwargs::new())?;
        self.generative(generative_inputs, &Kwargs::new())
    }
}
