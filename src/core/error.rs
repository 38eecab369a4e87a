use thiserror::Error;

/// Errors raised by the shooting, attachment and estimation code
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// A getter was called after an input changed and before `update()`
    #[error("stale state: {0}")]
    StaleState(String),

    /// Operation is not defined for the current state (e.g. transport on a single time point)
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Dimension mismatch
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Template and target objects are not of the same kind
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Invalid parameter value or unsupported combination of options
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Index outside of a trajectory or point set
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Continuous time outside of [tmin, tmax]
    #[error("time {time} outside of [{tmin}, {tmax}]")]
    TimeOutOfRange { time: f64, tmin: f64, tmax: f64 },

    /// Computation failed (e.g. kernel matrix not positive definite)
    #[error("computation failed: {0}")]
    ComputationFailed(String),

    /// Reading or writing arrays failed
    #[error("i/o error: {0}")]
    Io(String),
}

/// Convert I/O errors to Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Result type for the whole crate
pub type Result<T> = std::result::Result<T, Error>;
