use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the deviation pipeline and the action-plan store.
#[derive(Debug, Error)]
pub enum KpiError {
    /// Missing columns, missing `Type` row, unknown KPI mode, bad weights.
    #[error("input contract violation: {0}")]
    InputContractViolation(String),

    #[error("I/O error on {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("action plan file {path} is not valid JSON: {source}")]
    CorruptStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl KpiError {
    pub fn contract(message: impl Into<String>) -> Self {
        KpiError::InputContractViolation(message.into())
    }

    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KpiError::Persistence {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, KpiError>;
