use thiserror::Error;

/// A result type for rule-based learning
pub type Result<T> = std::result::Result<T, BerblError>;

/// An error when using the rule-based learner
#[derive(Error, Debug)]
pub enum BerblError {
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a local model is fitted on too few matched points
    #[error("Data insufficient error: {needed} points needed, got {got}")]
    DataInsufficientError {
        /// Minimal number of points
        needed: usize,
        /// Actual number of points
        got: usize,
    },
    /// When an input is matched by no rule at inference
    #[error("Unmatched input error: no rule matches input #{index}")]
    UnmatchedInputError {
        /// Row index of the unmatched input
        index: usize,
    },
    /// When fitting a mixture fails numerically
    #[error("Fit error: {0}")]
    FitError(String),
    /// When hyperparameters or bounds are invalid
    #[error("InvalidConfig error: {0}")]
    InvalidConfigError(String),
    /// When error during saving
    #[cfg(feature = "persistent")]
    #[error("Save error: {0}")]
    SaveError(#[from] serde_json::Error),
    /// When error during loading
    #[error("Load IO error")]
    LoadIoError(#[from] std::io::Error),
    /// When error during loading
    #[error("Load error: {0}")]
    LoadError(String),
    /// When the evolutionary search executor fails
    #[error(transparent)]
    ArgminError(#[from] argmin::core::Error),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
}
