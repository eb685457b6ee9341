/// Linear Gaussian VAE on synthetic counts - trains through ScviDataLoader and VaeModule
use candle_core::{DType, Device, Tensor};
use candle_nn::{linear, AdamW, Linear, Module, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use ndarray::Array2;
use rand::Rng;

use scvi::constants::{BATCH_KEY, LABELS_KEY, LOCAL_L_MEAN_KEY, LOCAL_L_VAR_KEY, X_KEY};
use scvi::data::{AnnotatedData, FieldData, IndexSelection, ScviDataLoader, TensorBatch};
use scvi::module::{get_tensor, ForwardArgs, ScviLoss, TensorMap, VaeModule};
use scvi::{DataLoaderConfig, Kwargs};

/// Encoder: log1p(x) -> (qz_m, qz_logv); decoder: z -> log rate, offset by library size
struct LinearVae {
    z_mean: Linear,
    z_logvar: Linear,
    decoder: Linear,
    device: Device,
}

impl LinearVae {
    fn new(n_genes: usize, n_latent: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            z_mean: linear(n_genes, n_latent, vb.pp("z_mean"))?,
            z_logvar: linear(n_genes, n_latent, vb.pp("z_logvar"))?,
            decoder: linear(n_latent, n_genes, vb.pp("decoder"))?,
            device: vb.device().clone(),
        })
    }
}

impl VaeModule for LinearVae {
    fn device(&self) -> &Device {
        &self.device
    }

    fn get_inference_input(&self, tensors: &TensorBatch, _kwargs: &Kwargs) -> scvi::Result<TensorMap> {
        Ok(TensorMap::from([("x".to_string(), tensors.get(X_KEY)?.clone())]))
    }

    fn inference(&self, inputs: TensorMap, kwargs: &Kwargs) -> scvi::Result<TensorMap> {
        let x = get_tensor(&inputs, "x")?;
        let x_log = (x + 1.0)?.log()?;

        let qz_m = self.z_mean.forward(&x_log)?;
        let qz_logv = self.z_logvar.forward(&x_log)?;

        // Reparameterized draw unless the caller asks for the posterior mean
        let z = if kwargs.get_bool("use_mean").unwrap_or(false) {
            qz_m.clone()
        } else {
            let std = (&qz_logv * 0.5)?.exp()?;
            (&qz_m + (std.randn_like(0.0, 1.0)? * &std)?)?
        };

        Ok(TensorMap::from([
            ("qz_m".to_string(), qz_m),
            ("qz_logv".to_string(), qz_logv),
            ("z".to_string(), z),
        ]))
    }

    fn get_generative_input(
        &self,
        tensors: &TensorBatch,
        inference_outputs: &TensorMap,
        _kwargs: &Kwargs,
    ) -> scvi::Result<TensorMap> {
        Ok(TensorMap::from([
            ("z".to_string(), get_tensor(inference_outputs, "z")?.clone()),
            ("library".to_string(), tensors.get(LOCAL_L_MEAN_KEY)?.clone()),
        ]))
    }

    fn generative(&self, inputs: TensorMap, _kwargs: &Kwargs) -> scvi::Result<TensorMap> {
        let z = get_tensor(&inputs, "z")?;
        let library = get_tensor(&inputs, "library")?;

        let px_log_rate = self.decoder.forward(z)?.broadcast_add(library)?;
        let px_rate = px_log_rate.exp()?;

        Ok(TensorMap::from([
            ("px_log_rate".to_string(), px_log_rate),
            ("px_rate".to_string(), px_rate),
        ]))
    }

    fn loss(
        &self,
        tensors: &TensorBatch,
        inference_outputs: &TensorMap,
        generative_outputs: &TensorMap,
        kwargs: &Kwargs,
    ) -> scvi::Result<ScviLoss> {
        let kl_weight = kwargs.get_f64("kl_weight").unwrap_or(1.0);
        let x = tensors.get(X_KEY)?;
        let qz_m = get_tensor(inference_outputs, "qz_m")?;
        let qz_logv = get_tensor(inference_outputs, "qz_logv")?;
        let px_rate = get_tensor(generative_outputs, "px_rate")?;
        let px_log_rate = get_tensor(generative_outputs, "px_log_rate")?;

        // Poisson negative log likelihood without the log(x!) constant
        let reconst_loss = (px_rate - (x * px_log_rate)?)?.sum(1)?;

        // KL(N(m, v) || N(0, 1))
        let kl_local = ((qz_m.sqr()? + qz_logv.exp()?)? - qz_logv)?
            .affine(1.0, -1.0)?
            .sum(1)?
            .affine(0.5, 0.0)?;

        let loss = (&reconst_loss + kl_local.affine(kl_weight, 0.0)?)?.mean_all()?;

        Ok(ScviLoss::new(loss, reconst_loss, kl_local, 0.0))
    }

    fn sample(&self, tensors: &TensorBatch, _kwargs: &Kwargs) -> scvi::Result<TensorMap> {
        let output = self.forward(tensors, &ForwardArgs::without_loss())?;
        Ok(output.generative_outputs().clone())
    }
}

/// Two cell populations with different expression programs, two batches
fn synthetic_counts(n_cells: usize, n_genes: usize) -> scvi::Result<AnnotatedData> {
    let mut rng = rand::thread_rng();

    let labels: Vec<i64> = (0..n_cells).map(|_| rng.gen_range(0..2)).collect();
    let counts = Array2::from_shape_fn((n_cells, n_genes), |(i, j)| {
        let high = (labels[i] == 0) == (j < n_genes / 2);
        let max = if high { 12 } else { 3 };
        rng.gen_range(0..max) as f32
    });

    let log_library: Vec<f32> = counts
        .rows()
        .into_iter()
        .map(|row| (row.sum() / n_genes as f32 + 1.0).ln())
        .collect();

    let mut adata = AnnotatedData::new(n_cells);
    adata.insert_field(X_KEY, counts)?;
    adata.insert_field(BATCH_KEY, FieldData::column_i64((0..n_cells).map(|i| (i % 2) as i64).collect()))?;
    adata.insert_field(LOCAL_L_MEAN_KEY, FieldData::column_f32(log_library))?;
    adata.insert_field(LOCAL_L_VAR_KEY, FieldData::column_f32(vec![1.0; n_cells]))?;
    adata.insert_field(LABELS_KEY, FieldData::column_i64(labels))?;
    adata.setup_registry();

    Ok(adata)
}

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("=== Linear VAE on synthetic counts ===");

    let (n_cells, n_genes, n_latent) = (1024, 40, 4);
    let adata = synthetic_counts(n_cells, n_genes)?;

    // 90/10 train/test split by mask
    let mut rng = rand::thread_rng();
    let train_mask: Vec<bool> = (0..n_cells).map(|_| rng.gen_bool(0.9)).collect();
    let test_mask: Vec<bool> = train_mask.iter().map(|&m| !m).collect();

    let config = DataLoaderConfig {
        batch_size: 128,
        ..Default::default()
    };
    let train_loader = ScviDataLoader::new(&adata, config.clone(), IndexSelection::Mask(train_mask), None)?;
    let test_loader = ScviDataLoader::new(&adata, config.clone(), IndexSelection::Mask(test_mask), None)?;

    log::info!(
        "Train cells: {}, test cells: {}, batches per epoch: {}",
        train_loader.indices().len(),
        test_loader.indices().len(),
        train_loader.num_batches()
    );

    // Batches are built on the CPU; forward moves them to the module's device
    let device = if config.use_cuda && candle_core::utils::cuda_is_available() {
        Device::new_cuda(0)?
    } else {
        Device::Cpu
    };
    log::info!("Using device: {:?}", device);

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = LinearVae::new(n_genes, n_latent, vb)?;

    let mut optimizer = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: 1e-2,
            ..Default::default()
        },
    )?;

    let n_epochs = 30;
    for epoch in 0..n_epochs {
        // Linear KL warmup over the first half
        let kl_weight = ((epoch + 1) as f64 / (n_epochs / 2) as f64).min(1.0);
        let args = ForwardArgs::default().with_loss_kwargs(Kwargs::new().with("kl_weight", kl_weight));

        let mut total_loss = 0.0;
        let mut num_batches = 0;
        for batch in &train_loader {
            let output = model.forward(&batch?, &args)?;
            let Some(losses) = output.losses() else {
                continue;
            };
            let loss: Tensor = losses.loss()?.to_tensor(&device)?;
            optimizer.backward_step(&loss)?;

            total_loss += loss.to_scalar::<f32>()? as f64;
            num_batches += 1;
        }

        if (epoch + 1) % 5 == 0 {
            log::info!(
                "Epoch {}/{}: avg_loss={:.4}, kl_weight={:.2}",
                epoch + 1,
                n_epochs,
                total_loss / num_batches.max(1) as f64,
                kl_weight
            );
        }
    }

    let eval_loader = test_loader.sequential(Some(256))?;
    log::info!("Test reconstruction error: {:.4}", eval_loader.compute_reconstruction_error(&model)?);
    log::info!("Test ELBO: {:.4}", eval_loader.compute_elbo(&model)?);

    Ok(())
}
