//! Run registry: one timestamped directory per CLI run holding the run
//! config, the structured log and the artifacts the command produced.

mod logging;
mod run;

pub use logging::init_run_logging;
pub use run::{
    RunContext, start_run, write_datasets, write_out, write_partitions, write_relations,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid log filter '{directive}': {message}")]
    Filter { directive: String, message: String },
    #[error("logging error: {0}")]
    Logging(String),
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
