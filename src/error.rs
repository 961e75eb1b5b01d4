use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions that stop an execution. Everything else is recovered and logged.
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("source file not found: {0}")]
    MissingSource(PathBuf),

    #[error("directions file not found: {0}")]
    MissingDirections(PathBuf),

    #[error("execution {execution}: model {model} failed on verses {first}-{last}: {message}")]
    ModelCall {
        execution: String,
        model: String,
        first: u64,
        last: u64,
        message: String,
    },

    #[error("execution {execution}: model {model} returned no verses for {first}-{last}")]
    EmptyModelOutput {
        execution: String,
        model: String,
        first: u64,
        last: u64,
    },

    #[error("execution {execution}: model {model} skipped verses {missing:?} in {first}-{last}")]
    IncompleteModelOutput {
        execution: String,
        model: String,
        first: u64,
        last: u64,
        missing: Vec<u64>,
    },

    #[error("unknown execution: {0}")]
    UnknownExecution(String),
}
