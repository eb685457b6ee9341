/// Registry keys shared by loaders and modules

/// Expression matrix (cells x genes)
pub const X_KEY: &str = "X";

/// Batch assignment per cell
pub const BATCH_KEY: &str = "batch";

/// Mean of the log library size prior
pub const LOCAL_L_MEAN_KEY: &str = "local_l_mean";

/// Variance of the log library size prior
pub const LOCAL_L_VAR_KEY: &str = "local_l_var";

/// Cell-type or other categorical labels
pub const LABELS_KEY: &str = "labels";
