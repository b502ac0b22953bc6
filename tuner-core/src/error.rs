use thiserror::Error;

/// Errors surfaced by the tuner core.
///
/// Everything here is fatal for the caller and is raised before any analysis
/// round runs. Numerical trouble inside a round never ends up here: it is
/// reported as a [`FitError`] and turned into a diagnostic line.
#[derive(Debug, Error)]
pub enum TunerError {
    #[error("invalid configuration: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("tuning table '{0}' has no entry for the pivot key \"A\"")]
    MissingPivot(String),

    #[error("tuning table '{0}' is empty")]
    EmptyTable(String),

    #[error("unknown temperament: {0}")]
    UnknownTemperament(String),

    #[error("tuning table parse error: {0}")]
    TableParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TunerError>;

/// Failure of a single peak or candidate fit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("fit window around bin {bin} exceeds spectrum bounds (len {len})")]
    WindowOutOfRange { bin: usize, len: usize },

    #[error("fit did not converge after {0} iterations")]
    NotConverged(usize),

    #[error("degenerate fit input: {0}")]
    Degenerate(&'static str),
}
