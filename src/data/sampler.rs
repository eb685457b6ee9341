/// Batch sampler yielding fixed-size chunks of dataset indices
///
/// Not meant for concurrent traversal: a sampler is `!Sync` and each call
/// to [`BatchSampler::iter`] starts a fresh pass.
use std::cell::RefCell;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Sampler over an ordered set of eligible indices
pub struct BatchSampler {
    indices: Vec<usize>,
    batch_size: usize,
    shuffle: bool,
    seed: Option<u64>,
    rng: Option<RefCell<StdRng>>,
}

impl std::fmt::Debug for BatchSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSampler")
            .field("num_indices", &self.indices.len())
            .field("batch_size", &self.batch_size)
            .field("shuffle", &self.shuffle)
            .field("seed", &self.seed)
            .finish()
    }
}

impl BatchSampler {
    /// Create a sampler
    ///
    /// # Arguments
    /// * `indices` - Indices to sample from
    /// * `batch_size` - Size of each batch (the last one may be smaller)
    /// * `shuffle` - Draw a new permutation on every traversal
    pub fn new(indices: Vec<usize>, batch_size: usize, shuffle: bool) -> crate::Result<Self> {
        if batch_size == 0 {
            return Err(crate::ScviError::Config(
                "batch_size must be > 0".to_string(),
            ));
        }

        Ok(Self {
            indices,
            batch_size,
            shuffle,
            seed: None,
            rng: None,
        })
    }

    /// Use a seeded generator for shuffling
    ///
    /// Each traversal still gets its own permutation; the sequence of
    /// permutations is reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self.rng = Some(RefCell::new(StdRng::seed_from_u64(seed)));
        self
    }

    /// Start a new traversal
    pub fn iter(&self) -> BatchIter<'_> {
        let mut order: Vec<usize> = (0..self.indices.len()).collect();

        if self.shuffle {
            match &self.rng {
                Some(rng) => order.shuffle(&mut *rng.borrow_mut()),
                None => order.shuffle(&mut rand::thread_rng()),
            }
        }

        BatchIter {
            indices: &self.indices,
            order,
            batch_size: self.batch_size,
            cursor: 0,
        }
    }

    /// Number of *full* batches: `num_indices / batch_size`
    ///
    /// Undercounts [`BatchSampler::iter`] by one whenever the indices do not
    /// divide evenly; the trailing partial batch is still yielded by `iter`.
    /// Use [`BatchSampler::num_batches`] for the true count.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.indices.len() / self.batch_size
    }

    /// Number of batches one traversal yields, including a partial one
    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn num_indices(&self) -> usize {
        self.indices.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

impl<'s> IntoIterator for &'s BatchSampler {
    type Item = Vec<usize>;
    type IntoIter = BatchIter<'s>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One traversal of a [`BatchSampler`]
#[derive(Debug)]
pub struct BatchIter<'s> {
    indices: &'s [usize],
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl Iterator for BatchIter<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = self.cursor.saturating_add(self.batch_size).min(self.order.len());
        let batch = self.order[self.cursor..end]
            .iter()
            .map(|&pos| self.indices[pos])
            .collect();
        self.cursor = end;

        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.order.len() - self.cursor;
        let n = remaining.div_ceil(self.batch_size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for BatchIter<'_> {}
