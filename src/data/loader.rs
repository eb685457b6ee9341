/// Data loader feeding tensor batches of an annotated data container to a module
use candle_core::Device;

use super::anndata::AnnotatedData;
use super::batch::TensorBatch;
use super::dataset::ScviDataset;
use super::registry::FieldSpec;
use super::sampler::{BatchIter, BatchSampler};
use crate::module::{ForwardArgs, VaeModule};
use crate::{DataLoaderConfig, Kwargs, ScviError};

/// Which cells a loader iterates over
#[derive(Debug, Clone, Default, PartialEq)]
pub enum IndexSelection {
    /// Every cell, in order unless `shuffle` is set
    #[default]
    All,
    /// Boolean mask over all cells
    Mask(Vec<bool>),
    /// Explicit positional indices, used as given
    Positions(Vec<usize>),
}

impl From<Vec<bool>> for IndexSelection {
    fn from(mask: Vec<bool>) -> Self {
        IndexSelection::Mask(mask)
    }
}

impl From<Vec<usize>> for IndexSelection {
    fn from(positions: Vec<usize>) -> Self {
        IndexSelection::Positions(positions)
    }
}

/// Positions where `mask` is true
pub fn mask_to_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &keep)| keep.then_some(i))
        .collect()
}

/// Loader over a subset of cells
///
/// A loader instance can be built per split (train/test, labelled/unlabelled)
/// over the same container. Batching is done entirely by the sampler: each
/// sampled index batch is fetched in one call, never re-batched.
#[derive(Debug)]
pub struct ScviDataLoader<'a> {
    dataset: ScviDataset<'a>,
    sampler: BatchSampler,
    config: DataLoaderConfig,
    device: Device,
}

impl<'a> ScviDataLoader<'a> {
    /// Create a loader, validating the container's registry
    ///
    /// # Arguments
    /// * `adata` - Container with an attached registry
    /// * `config` - Shuffle, batch size, and pass-through options
    /// * `indices` - Cells to iterate over
    /// * `field_spec` - Fields to expose; the five standard fields if `None`
    ///
    /// # Errors
    /// * [`ScviError::NotConfigured`] if no registry is attached
    /// * [`ScviError::MissingField`] if a requested field is not registered
    ///
    /// When explicit indices are given the sampler always shuffles,
    /// whatever `config.shuffle` says.
    pub fn new(
        adata: &'a AnnotatedData,
        config: DataLoaderConfig,
        indices: IndexSelection,
        field_spec: Option<FieldSpec>,
    ) -> crate::Result<Self> {
        let registry = adata.registry().ok_or(ScviError::NotConfigured)?;

        let field_spec = field_spec.unwrap_or_default();
        if let Some(missing) = field_spec.first_missing(registry) {
            return Err(ScviError::MissingField(missing.to_string()));
        }

        config.validate()?;

        let dataset = ScviDataset::new(adata, field_spec)?;
        let (indices, shuffle) = resolve_indices(indices, dataset.len(), config.shuffle)?;

        let mut loader_kwargs = config.loader_kwargs.clone();
        if loader_kwargs.remove("batch_size").is_some() {
            log::warn!("Ignoring batch_size in loader kwargs: batches come from the sampler");
        }
        let config = DataLoaderConfig {
            loader_kwargs,
            ..config
        };

        let sampler = build_sampler(indices, config.batch_size, shuffle, config.seed)?;

        log::info!(
            "Data loader created: {} cells, batch_size={}, shuffle={}, fields={:?}",
            sampler.num_indices(),
            sampler.batch_size(),
            shuffle,
            dataset.field_spec().keys().collect::<Vec<_>>()
        );

        Ok(Self {
            dataset,
            sampler,
            config,
            device: Device::Cpu,
        })
    }

    /// Materialize batches on `device`
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Start a new traversal, reshuffling if the sampler shuffles
    pub fn iter(&self) -> TensorBatches<'_, 'a> {
        TensorBatches {
            dataset: &self.dataset,
            batches: self.sampler.iter(),
            device: &self.device,
        }
    }

    /// Sampler length: full batches only (see [`BatchSampler::len`])
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.sampler.len()
    }

    /// Batches one traversal actually yields
    pub fn num_batches(&self) -> usize {
        self.sampler.num_batches()
    }

    /// Rebuild the sampler with a new batch size, keeping indices and shuffle policy
    pub fn update_batch_size(&mut self, batch_size: usize) -> crate::Result<()> {
        let sampler = build_sampler(
            self.sampler.indices().to_vec(),
            batch_size,
            self.sampler.shuffle(),
            self.config.seed,
        )?;
        log::debug!("Sampler rebuilt with batch_size={}", batch_size);

        self.sampler = sampler;
        self.config.batch_size = batch_size;
        Ok(())
    }

    /// Loader over the same cells and fields that never shuffles
    pub fn sequential(&self, batch_size: Option<usize>) -> crate::Result<ScviDataLoader<'a>> {
        let batch_size = batch_size.unwrap_or_else(|| self.sampler.batch_size());
        let sampler = BatchSampler::new(self.sampler.indices().to_vec(), batch_size, false)?;

        Ok(Self {
            dataset: self.dataset.clone(),
            sampler,
            config: DataLoaderConfig {
                shuffle: false,
                batch_size,
                ..self.config.clone()
            },
            device: self.device.clone(),
        })
    }

    /// Mean reconstruction loss per cell over every batch
    pub fn compute_reconstruction_error<M: VaeModule + ?Sized>(&self, module: &M) -> crate::Result<f64> {
        let mut total = 0.0;
        for batch in self.iter() {
            let losses = forward_losses(module, &batch?)?;
            total += losses.reconstruction_loss()?.sum_f64()?;
        }

        self.per_cell(total)
    }

    /// Per-cell negative ELBO: local terms summed over cells plus the global KL
    pub fn compute_elbo<M: VaeModule + ?Sized>(&self, module: &M) -> crate::Result<f64> {
        let mut total = 0.0;
        let mut kl_global = 0.0;
        for batch in self.iter() {
            let losses = forward_losses(module, &batch?)?;
            let local = losses.reconstruction_loss()?.add(&losses.kl_local()?)?;
            total += local.sum_f64()?;
            kl_global = losses.kl_global()?.sum_f64()?;
        }

        self.per_cell(total + kl_global)
    }

    fn per_cell(&self, total: f64) -> crate::Result<f64> {
        let n = self.sampler.num_indices();
        if n == 0 {
            return Err(ScviError::Data("No cells to evaluate".to_string()));
        }
        Ok(total / n as f64)
    }

    pub fn dataset(&self) -> &ScviDataset<'a> {
        &self.dataset
    }

    pub fn sampler(&self) -> &BatchSampler {
        &self.sampler
    }

    /// Cells this loader iterates over
    pub fn indices(&self) -> &[usize] {
        self.sampler.indices()
    }

    pub fn field_spec(&self) -> &FieldSpec {
        self.dataset.field_spec()
    }

    pub fn config(&self) -> &DataLoaderConfig {
        &self.config
    }

    /// Pass-through options, without `batch_size`
    pub fn loader_kwargs(&self) -> &Kwargs {
        &self.config.loader_kwargs
    }

    pub fn use_cuda(&self) -> bool {
        self.config.use_cuda
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl<'l, 'a> IntoIterator for &'l ScviDataLoader<'a> {
    type Item = crate::Result<TensorBatch>;
    type IntoIter = TensorBatches<'l, 'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One traversal of a [`ScviDataLoader`]
#[derive(Debug)]
pub struct TensorBatches<'l, 'a> {
    dataset: &'l ScviDataset<'a>,
    batches: BatchIter<'l>,
    device: &'l Device,
}

impl Iterator for TensorBatches<'_, '_> {
    type Item = crate::Result<TensorBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.batches
            .next()
            .map(|indices| self.dataset.get_batch(&indices, self.device))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.batches.size_hint()
    }
}

/// Resolve the index selection into positions and the effective shuffle flag
fn resolve_indices(
    selection: IndexSelection,
    n_obs: usize,
    shuffle: bool,
) -> crate::Result<(Vec<usize>, bool)> {
    let indices = match selection {
        IndexSelection::All => {
            log::debug!("Using all {} cells, shuffle={}", n_obs, shuffle);
            return Ok(((0..n_obs).collect(), shuffle));
        }
        IndexSelection::Mask(mask) => {
            if mask.len() != n_obs {
                return Err(ScviError::Config(format!(
                    "Index mask has length {}, dataset has {} cells",
                    mask.len(),
                    n_obs
                )));
            }
            mask_to_indices(&mask)
        }
        IndexSelection::Positions(positions) => {
            if let Some(&bad) = positions.iter().find(|&&i| i >= n_obs) {
                return Err(ScviError::Config(format!(
                    "Index {} out of range for dataset with {} cells",
                    bad, n_obs
                )));
            }
            positions
        }
    };

    if !shuffle {
        log::warn!("Explicit indices are always shuffled; shuffle=false is ignored");
    }
    log::debug!("Using {} explicit indices, shuffle=true", indices.len());

    Ok((indices, true))
}

fn build_sampler(
    indices: Vec<usize>,
    batch_size: usize,
    shuffle: bool,
    seed: Option<u64>,
) -> crate::Result<BatchSampler> {
    let sampler = BatchSampler::new(indices, batch_size, shuffle)?;
    Ok(match seed {
        Some(seed) => sampler.with_seed(seed),
        None => sampler,
    })
}

fn forward_losses<M: VaeModule + ?Sized>(
    module: &M,
    batch: &TensorBatch,
) -> crate::Result<crate::module::ScviLoss> {
    module
        .forward(batch, &ForwardArgs::default())?
        .into_losses()
        .ok_or_else(|| ScviError::Config("Forward pass did not compute losses".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{BATCH_KEY, LABELS_KEY, LOCAL_L_MEAN_KEY, LOCAL_L_VAR_KEY, X_KEY};
    use crate::data::registry::{DataRegistry, FieldDType};
    use crate::test_utils::{synthetic_adata, synthetic_unregistered, StageRecorder};
    use candle_core::DType;

    fn config(batch_size: usize, shuffle: bool) -> DataLoaderConfig {
        DataLoaderConfig {
            batch_size,
            shuffle,
            ..Default::default()
        }
    }

    fn collect_indices(loader: &ScviDataLoader) -> crate::Result<Vec<Vec<usize>>> {
        loader
            .iter()
            .map(|batch| batch.map(|b| b.indices().to_vec()))
            .collect()
    }

    #[test]
    fn test_no_registry() {
        let adata = synthetic_unregistered(8, 3);

        let err = ScviDataLoader::new(&adata, DataLoaderConfig::default(), IndexSelection::All, None)
            .unwrap_err();
        assert!(matches!(err, ScviError::NotConfigured));
    }

    #[test]
    fn test_missing_field() {
        let mut adata = synthetic_adata(8, 3);
        adata.set_registry(
            DataRegistry::new()
                .with(X_KEY, FieldDType::Float32)
                .with(BATCH_KEY, FieldDType::Int64),
        );

        let err = ScviDataLoader::new(&adata, DataLoaderConfig::default(), IndexSelection::All, None)
            .unwrap_err();
        assert!(matches!(err, ScviError::MissingField(ref key) if key == LABELS_KEY));

        // A narrower spec against the same registry is fine
        let spec = FieldSpec::empty().with(X_KEY, FieldDType::Float32);
        assert!(ScviDataLoader::new(&adata, DataLoaderConfig::default(), IndexSelection::All, Some(spec)).is_ok());
    }

    #[test]
    fn test_default_fields_and_dtypes() -> crate::Result<()> {
        let adata = synthetic_adata(10, 4);
        let loader = ScviDataLoader::new(&adata, config(4, false), IndexSelection::All, None)?;

        for batch in &loader {
            let batch = batch?;
            let mut keys: Vec<_> = batch.keys().collect();
            keys.sort();
            assert_eq!(keys, vec![X_KEY, BATCH_KEY, LABELS_KEY, LOCAL_L_MEAN_KEY, LOCAL_L_VAR_KEY]);

            assert_eq!(batch.get(X_KEY)?.dtype(), DType::F32);
            assert_eq!(batch.get(BATCH_KEY)?.dtype(), DType::I64);
            assert_eq!(batch.get(LOCAL_L_MEAN_KEY)?.dtype(), DType::F32);
            assert_eq!(batch.get(LOCAL_L_VAR_KEY)?.dtype(), DType::F32);
            assert_eq!(batch.get(LABELS_KEY)?.dtype(), DType::I64);
            assert_eq!(batch.get(X_KEY)?.dim(0)?, batch.len());
        }

        Ok(())
    }

    #[test]
    fn test_sequential_order_without_indices() -> crate::Result<()> {
        let adata = synthetic_adata(10, 2);
        let loader = ScviDataLoader::new(&adata, config(4, false), IndexSelection::All, None)?;

        let batches = collect_indices(&loader)?;
        assert_eq!(batches, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);

        // len() counts full batches only; iteration still yields the tail
        assert_eq!(loader.len(), 2);
        assert_eq!(loader.num_batches(), 3);

        // Restartable
        assert_eq!(collect_indices(&loader)?, batches);
        Ok(())
    }

    #[test]
    fn test_shuffle_reorders_each_traversal() -> crate::Result<()> {
        let adata = synthetic_adata(64, 2);
        let cfg = DataLoaderConfig {
            seed: Some(3),
            ..config(64, true)
        };
        let loader = ScviDataLoader::new(&adata, cfg, IndexSelection::All, None)?;

        let first: Vec<usize> = collect_indices(&loader)?.concat();
        let second: Vec<usize> = collect_indices(&loader)?.concat();
        assert_ne!(first, second);

        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(sorted, (0..64).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_mask_matches_where() -> crate::Result<()> {
        let adata = synthetic_adata(12, 2);
        let mask: Vec<bool> = (0..12).map(|i| i % 3 == 0 || i == 7).collect();
        let expected = vec![0, 3, 6, 7, 9];
        assert_eq!(mask_to_indices(&mask), expected);

        let loader = ScviDataLoader::new(&adata, config(2, false), mask.into(), None)?;
        assert_eq!(loader.indices(), expected.as_slice());

        let mut seen: Vec<usize> = collect_indices(&loader)?.concat();
        seen.sort();
        assert_eq!(seen, expected);
        Ok(())
    }

    #[test]
    fn test_mask_wrong_length() {
        let adata = synthetic_adata(5, 2);
        let err = ScviDataLoader::new(&adata, config(2, false), vec![true, false].into(), None).unwrap_err();
        assert!(matches!(err, ScviError::Config(_)));
    }

    #[test]
    fn test_positions_out_of_range() {
        let adata = synthetic_adata(5, 2);
        let err = ScviDataLoader::new(&adata, config(2, false), vec![1usize, 5].into(), None).unwrap_err();
        assert!(matches!(err, ScviError::Config(_)));
    }

    #[test]
    fn test_explicit_indices_always_shuffle() -> crate::Result<()> {
        let adata = synthetic_adata(200, 2);
        let positions: Vec<usize> = (0..200).rev().collect();
        let cfg = DataLoaderConfig {
            seed: Some(11),
            ..config(200, false)
        };
        let loader = ScviDataLoader::new(&adata, cfg, positions.clone().into(), None)?;

        assert!(loader.sampler().shuffle());
        assert!(!loader.config().shuffle);

        let seen: Vec<usize> = collect_indices(&loader)?.concat();
        assert_ne!(seen, positions);

        let mut sorted = seen;
        sorted.sort();
        assert_eq!(sorted, (0..200).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_batch_size_kwarg_is_dropped() -> crate::Result<()> {
        let adata = synthetic_adata(10, 2);
        let cfg = DataLoaderConfig {
            loader_kwargs: Kwargs::new().with("batch_size", 1usize).with("pin_memory", true),
            ..config(5, false)
        };
        let loader = ScviDataLoader::new(&adata, cfg, IndexSelection::All, None)?;

        assert!(!loader.loader_kwargs().contains_key("batch_size"));
        assert_eq!(loader.loader_kwargs().get_bool("pin_memory"), Some(true));

        let sizes: Vec<usize> = collect_indices(&loader)?.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![5, 5]);
        Ok(())
    }

    #[test]
    fn test_update_batch_size() -> crate::Result<()> {
        let adata = synthetic_adata(10, 2);
        let mut loader = ScviDataLoader::new(&adata, config(5, false), IndexSelection::All, None)?;

        loader.update_batch_size(3)?;
        assert_eq!(loader.config().batch_size, 3);
        assert_eq!(loader.num_batches(), 4);
        assert_eq!(collect_indices(&loader)?.concat(), (0..10).collect::<Vec<_>>());

        assert!(loader.update_batch_size(0).is_err());
        Ok(())
    }

    #[test]
    fn test_whole_dataset_in_one_batch() -> crate::Result<()> {
        let adata = synthetic_adata(6, 2);
        let loader = ScviDataLoader::new(&adata, config(usize::MAX, false), IndexSelection::All, None)?;

        assert_eq!(loader.len(), 0);
        assert_eq!(loader.num_batches(), 1);

        let iter = loader.iter();
        assert_eq!(iter.size_hint(), (1, Some(1)));
        assert!(format!("{:?}", iter).starts_with("TensorBatches"));

        assert_eq!(collect_indices(&loader)?, vec![(0..6).collect::<Vec<_>>()]);
        Ok(())
    }

    #[test]
    fn test_sequential_loader_keeps_subset_order() -> crate::Result<()> {
        let adata = synthetic_adata(10, 2);
        let positions = vec![8usize, 2, 5, 1];
        let loader = ScviDataLoader::new(&adata, config(3, true), positions.clone().into(), None)?;

        let sequential = loader.sequential(Some(2))?;
        assert!(!sequential.sampler().shuffle());
        assert_eq!(collect_indices(&sequential)?, vec![vec![8, 2], vec![5, 1]]);
        Ok(())
    }

    #[test]
    fn test_compute_reconstruction_error_and_elbo() -> crate::Result<()> {
        let adata = synthetic_adata(9, 3);
        let loader = ScviDataLoader::new(&adata, config(4, false), IndexSelection::All, None)?;
        let module = StageRecorder::new();

        // The recorder reconstructs exactly
        let recon = loader.compute_reconstruction_error(&module)?;
        assert!(recon.abs() < 1e-6);

        // kl_local per cell is 0.5 * sum(x^2 / 4); kl_global is 1.0 per pass
        let rows: Vec<usize> = (0..9).collect();
        let x = adata
            .field(X_KEY)
            .ok_or_else(|| ScviError::MissingField(X_KEY.to_string()))?
            .gather(&rows, FieldDType::Float32, &Device::Cpu)?;
        let expected_kl = (x.sqr()?.sum_all()?.to_scalar::<f32>()? as f64) * 0.125;
        let elbo = loader.compute_elbo(&module)?;
        assert!((elbo - (expected_kl + 1.0) / 9.0).abs() < 1e-4);
        Ok(())
    }
}
