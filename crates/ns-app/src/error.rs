//! Error types for the ns-app service layer.

use std::path::PathBuf;

/// Errors surfaced to callers of selection and dispatch.
///
/// Failures of individual analysis functions and missing run files are not
/// represented here: dispatch contains those and reports them instead.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Failed to read options file: {path}")]
    OptionsFileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse options file {path}: {message}")]
    OptionsFileParse { path: PathBuf, message: String },

    #[error("Varied parameter '{name}' not found (varied: {available:?})")]
    UnknownVaried {
        name: String,
        available: Vec<String>,
    },

    #[error("Only one varied range can be selected per call (got {count})")]
    MultipleVariedRanges { count: usize },

    #[error("Varied parameter '{name}' has non-numeric values and cannot be range-selected")]
    NonNumericVaried { name: String },

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Results error: {0}")]
    Results(#[from] ns_results::ResultsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for ns-app operations.
pub type AppResult<T> = Result<T, AppError>;

impl From<ns_core::NsError> for AppError {
    fn from(err: ns_core::NsError) -> Self {
        AppError::Results(ns_results::ResultsError::Record(err))
    }
}
