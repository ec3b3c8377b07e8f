use thiserror::Error;

/// Core error type shared across martforge crates.
#[derive(Debug, Error)]
pub enum Error {
    /// A requested policy or model change is illegal given the current state.
    /// The mutation was rejected and nothing changed.
    #[error("validation failed: {0}")]
    Validation(String),
    /// A partition table could not produce rows, or a dataset could not be
    /// converted to or from partition-table status.
    #[error("partition error: {0}")]
    Partition(String),
    /// Synchronization or generation hit a structural inconsistency.
    #[error("data model error: {0}")]
    DataModel(String),
    /// Database error or adapter failure.
    #[error("database error: {0}")]
    Db(String),
    /// The caller declined a destructive change (e.g. deleting orphaned keys).
    #[error("aborted: {0}")]
    Aborted(String),
    /// A condition the algorithm already guarantees did not hold. This is a
    /// defect, not a recoverable failure.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn partition(message: impl Into<String>) -> Self {
        Error::Partition(message.into())
    }

    pub fn data_model(message: impl Into<String>) -> Self {
        Error::DataModel(message.into())
    }

    /// Build an invariant error and log it; these should never surface from
    /// a consistent entity graph.
    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(error = %message, "invariant violated");
        Error::Invariant(message)
    }
}

/// Convenience alias for results returned by martforge crates.
pub type Result<T> = std::result::Result<T, Error>;
