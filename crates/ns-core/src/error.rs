use thiserror::Error;

pub type NsResult<T> = Result<T, NsError>;

#[derive(Error, Debug)]
pub enum NsError {
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },

    #[error("Shape mismatch for {what}: expected {expected} rows, found {found}")]
    ShapeMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("Missing field: {what}")]
    MissingField { what: String },
}
