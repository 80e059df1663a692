//! Selection and analysis service layer for neurosweep.
//!
//! Narrows simulation records along time, cells and swept parameters, and
//! applies analysis/plot functions over single runs, record arrays and
//! on-disk studies, naming and saving what they produce.

pub mod annotate;
pub mod builtin;
pub mod dispatch;
pub mod error;
pub mod functions;
pub mod naming;
pub mod options;
pub mod query;
pub mod resolve;
pub mod select;

// Re-export key types for convenience
pub use annotate::{annotate, sweep_point};
pub use dispatch::{
    DispatchReport, FunctionReport, RunEntry, RunOutput, SaveFailure, dispatch, evaluate,
};
pub use error::{AppError, AppResult};
pub use functions::{CallKind, FnFunction, FunctionError, Output, SimFunction, classify};
pub use naming::{name_from_varied, post_sim_file_name, sanitize_field_name};
pub use options::{
    AnalysisConfig, DispatchOptions, RoiFilter, SelectOptions, VariedFilter, VariedSelection,
    load_config,
};
pub use query::{RecordSummary, SweepTable, summarize, sweep_table};
pub use resolve::{Resolved, Source, resolve};
pub use select::select;
