use crate::Kwargs;

/// Configuration for [`crate::data::ScviDataLoader`]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DataLoaderConfig {
    /// Reshuffle indices on every traversal.
    /// Only honored when no explicit indices are given.
    #[serde(default)]
    pub shuffle: bool,

    /// Request accelerator placement. Recorded only; placement happens
    /// at the module's forward boundary.
    #[serde(default = "default_use_cuda")]
    pub use_cuda: bool,

    /// Number of cells per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seed for reproducible shuffling (advances per traversal)
    #[serde(default)]
    pub seed: Option<u64>,

    /// Options carried through to the batch fetch layer
    #[serde(default)]
    pub loader_kwargs: Kwargs,
}

fn default_use_cuda() -> bool {
    true
}

fn default_batch_size() -> usize {
    128
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            shuffle: false,
            use_cuda: default_use_cuda(),
            batch_size: default_batch_size(),
            seed: None,
            loader_kwargs: Kwargs::new(),
        }
    }
}

impl DataLoaderConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(crate::ScviError::Config(
                "batch_size must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DataLoaderConfig::default();
        assert!(!config.shuffle);
        assert!(config.use_cuda);
        assert_eq!(config.batch_size, 128);
        assert!(config.seed.is_none());
        assert!(config.loader_kwargs.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = DataLoaderConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(crate::ScviError::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"shuffle": true, "loader_kwargs": {"num_workers": 4}}"#;
        let config: DataLoaderConfig = serde_json::from_str(json).unwrap();

        assert!(config.shuffle);
        assert!(config.use_cuda);
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.loader_kwargs.get_i64("num_workers"), Some(4));
    }
}
