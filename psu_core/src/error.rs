use thiserror::Error;

/// Typed failure kinds surfaced by the controller.
///
/// Every rejected command and every aborted background task maps to exactly one
/// of these; the `Display` text is what goes out in `error` events.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PsuError {
    /// Bad input: out-of-range voltage, positive target, too few correction pairs.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Operation not allowed right now: not calibrated, monitoring active, sweep running.
    #[error("invalid state: {0}")]
    State(String),
    /// Bus transaction failed.
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("timeout waiting for hardware")]
    Timeout,
    /// Degenerate least-squares input.
    #[error("numerical error: {0}")]
    Numerical(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PsuError {
    /// Stable lowercase tag used in machine-readable output.
    pub fn kind(&self) -> &'static str {
        match self {
            PsuError::Validation(_) => "validation",
            PsuError::State(_) => "state",
            PsuError::Hardware(_) => "hardware",
            PsuError::Timeout => "timeout",
            PsuError::Numerical(_) => "numerical",
            PsuError::Internal(_) => "internal",
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing bus")]
    MissingBus,
    #[error("missing notifier")]
    MissingNotifier,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, PsuError>;
pub use eyre::Report;
