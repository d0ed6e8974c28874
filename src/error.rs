//! Classified error kinds surfaced at the pipeline boundary.
//!
//! Unknown users and empty candidate pools are not errors: the recommender
//! returns an empty result and the caller maps that to "nothing to
//! recommend". Everything here is either fatal for the request or a
//! logged warning.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecError>;

#[derive(Debug, Error)]
pub enum RecError {
    /// Upstream data source unreachable; retryable from the caller's side.
    #[error("data source unavailable: {source}")]
    DataUnavailable {
        #[source]
        source: sqlx::Error,
    },

    /// The registry was fitted twice within one run.
    #[error("dataset registry already fitted")]
    RegistryRefit,

    /// Empty interaction matrix, dimension mismatch, or an empty user row.
    /// Indicates an upstream bug; never swallowed.
    #[error("training invariant violated: {0}")]
    TrainingInvariant(String),

    /// Downstream save failure. Logged by the caller; the computed
    /// recommendations stay valid.
    #[error("failed to persist {what}: {source}")]
    Persistence {
        what: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl RecError {
    pub(crate) fn unavailable(source: sqlx::Error) -> Self {
        Self::DataUnavailable { source }
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::TrainingInvariant(msg.into())
    }
}
