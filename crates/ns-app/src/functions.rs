//! Analysis and plot functions applied to simulation records.

use std::fmt;

use ns_results::{Figure, FunctionOptions, ImageFormat, SimRecord};
use serde::{Deserialize, Serialize};

/// What a function produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallKind {
    /// Derived numeric data.
    Analysis,
    /// A renderable figure.
    Plot,
}

#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    #[error("label '{0}' not present in record")]
    MissingLabel(String),

    #[error("invalid option {key}: {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

/// Value returned by one function call.
pub enum Output {
    Empty,
    Figure(Box<dyn Figure>),
    Data(serde_json::Value),
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Figure(fig) => write!(f, "Figure({})", fig.name()),
            Self::Data(v) => write!(f, "Data({})", v),
        }
    }
}

/// A function the dispatcher can apply to each record.
pub trait SimFunction: Send + Sync {
    fn name(&self) -> &str;

    /// Declared output kind. `None` leaves classification to the name.
    fn kind(&self) -> Option<CallKind> {
        None
    }

    /// Whether figures from this function can be saved as `format`.
    fn supports_format(&self, _format: ImageFormat) -> bool {
        true
    }

    fn call(&self, record: &SimRecord, options: &FunctionOptions)
    -> Result<Output, FunctionError>;
}

/// Classify a function: explicit flag, then declared kind, then a
/// case-insensitive "plot" in the name.
pub fn classify(function: &dyn SimFunction, explicit_plot: Option<bool>) -> CallKind {
    if let Some(is_plot) = explicit_plot {
        return if is_plot {
            CallKind::Plot
        } else {
            CallKind::Analysis
        };
    }
    if let Some(kind) = function.kind() {
        return kind;
    }
    if function.name().to_ascii_lowercase().contains("plot") {
        CallKind::Plot
    } else {
        CallKind::Analysis
    }
}

/// Closure-backed function.
pub struct FnFunction<F> {
    name: String,
    kind: Option<CallKind>,
    f: F,
}

impl<F> FnFunction<F>
where
    F: Fn(&SimRecord, &FunctionOptions) -> Result<Output, FunctionError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            kind: None,
            f,
        }
    }

    pub fn with_kind(mut self, kind: CallKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

impl<F> SimFunction for FnFunction<F>
where
    F: Fn(&SimRecord, &FunctionOptions) -> Result<Output, FunctionError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> Option<CallKind> {
        self.kind
    }

    fn call(
        &self,
        record: &SimRecord,
        options: &FunctionOptions,
    ) -> Result<Output, FunctionError> {
        (self.f)(record, options)
    }
}
