//! ns-core: shared foundation for the neurosweep crates.
//!
//! Contains:
//! - numeric (Real + tolerances + float helpers)
//! - error (shared error types)

pub mod error;
pub mod numeric;

pub use error::{NsError, NsResult};
pub use numeric::*;
