//! ns-results: simulation records, study directories and result persistence.

pub mod persist;
pub mod store;
pub mod types;

pub use persist::{Figure, ImageFormat, WriteOutcome, save_derived, save_figure};
pub use store::{
    POST_SIM_PLOTS_DIR, POST_SIM_RESULTS_DIR, STUDYINFO_FILE, StudyStore, ensure_dir,
    load_record_file, save_record_file,
};
pub use types::*;

pub type ResultsResult<T> = Result<T, ResultsError>;

#[derive(thiserror::Error, Debug)]
pub enum ResultsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid record: {0}")]
    Record(#[from] ns_core::NsError),

    #[error("Simulation {sim_id} not found: {path}")]
    SimNotFound {
        sim_id: u32,
        path: std::path::PathBuf,
    },

    #[error("Invalid path: {message}")]
    InvalidPath { message: String },

    #[error("Figure '{figure}' cannot be encoded as {format}")]
    UnsupportedFormat { figure: String, format: ImageFormat },

    #[error("Failed to render figure '{figure}': {message}")]
    Render { figure: String, message: String },
}
