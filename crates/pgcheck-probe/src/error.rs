//! Error types for the consistency probe.

use pgcheck_store::StoreError;
use thiserror::Error;

/// Result type alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors that stop the probe. Consistency violations are not errors:
/// they are reported and the loop carries on.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid probe configuration: {0}")]
    Config(String),

    /// Connect + schema setup failed on every attempt of the startup budget.
    #[error("startup failed after {attempts} attempts: {source}")]
    Startup {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Shutdown was requested before the probe finished starting.
    #[error("interrupted during startup")]
    Interrupted,
}
