use thiserror::Error;

/// Broad class of a [`MuFitError`], used by callers to decide how to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad model string, grouping, formula or fit setup. Revert to the previous dashboard.
    Configuration,
    /// Runs that cannot be summed or compared. Drop the offending run.
    Compatibility,
    /// Degenerate normalization or non-finite model values.
    Numerical,
    /// The minimizer did not reach a valid minimum.
    Optimizer,
    /// I/O, serialization and internal bookkeeping failures.
    Internal,
}

/// Error types for the mufit-rs library.
#[derive(Error, Debug)]
pub enum MuFitError {
    /// Invalid model string, grouping, fit range or other user configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A COMPUTED parameter's formula could not be parsed or resolved.
    #[error("Formula error in parameter '{name}' ('{formula}'): {message}")]
    Formula {
        name: String,
        formula: String,
        message: String,
    },

    /// Runs with different geometry or timing were summed or compared.
    #[error("Run {run} is incompatible: {message}")]
    Compatibility { run: u32, message: String },

    /// The N0 normalization fit of a run had no usable solution.
    #[error("Degenerate normalization for run {run}: {message}")]
    DegenerateNormalization { run: u32, message: String },

    /// Non-finite values appeared while evaluating the model or the data.
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// The minimizer failed on a run.
    #[error("Fit of run {run} did not converge: {message}")]
    NonConvergence { run: u32, message: String },

    /// Error indicating a mismatch in array dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error indicating a singular matrix was encountered.
    #[error("Singular matrix encountered")]
    SingularMatrix,

    /// Operation called in the wrong fit-session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Parameter not found.
    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl MuFitError {
    /// Category used for recovery decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MuFitError::Configuration(_)
            | MuFitError::Formula { .. }
            | MuFitError::InvalidState(_)
            | MuFitError::ParameterNotFound(_) => ErrorCategory::Configuration,
            MuFitError::Compatibility { .. } => ErrorCategory::Compatibility,
            MuFitError::DegenerateNormalization { .. }
            | MuFitError::Numerical(_)
            | MuFitError::SingularMatrix => ErrorCategory::Numerical,
            MuFitError::NonConvergence { .. } => ErrorCategory::Optimizer,
            MuFitError::DimensionMismatch(_)
            | MuFitError::IoError(_)
            | MuFitError::JsonError(_) => ErrorCategory::Internal,
        }
    }

    /// Run number named by the error, if any.
    pub fn run(&self) -> Option<u32> {
        match self {
            MuFitError::Compatibility { run, .. }
            | MuFitError::DegenerateNormalization { run, .. }
            | MuFitError::NonConvergence { run, .. } => Some(*run),
            _ => None,
        }
    }
}

impl From<crate::parameters::parameter::ParameterError> for MuFitError {
    fn from(err: crate::parameters::parameter::ParameterError) -> Self {
        match err {
            crate::parameters::parameter::ParameterError::NotFound { name } => {
                MuFitError::ParameterNotFound(name)
            }
            other => MuFitError::Configuration(other.to_string()),
        }
    }
}

impl From<crate::parameters::bounds::BoundsError> for MuFitError {
    fn from(err: crate::parameters::bounds::BoundsError) -> Self {
        MuFitError::Configuration(err.to_string())
    }
}

impl From<crate::parameters::expression::ExpressionError> for MuFitError {
    fn from(err: crate::parameters::expression::ExpressionError) -> Self {
        MuFitError::Configuration(format!("formula: {}", err))
    }
}

/// Result type alias for mufit-rs operations.
pub type Result<T> = std::result::Result<T, MuFitError>;
