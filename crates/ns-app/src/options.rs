//! Typed configuration records for selection and dispatch.
//!
//! Both records are built once per top-level call and passed down by
//! reference. Unknown keys in an options file are rejected at parse time;
//! value constraints are checked by `validate`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ns_results::{FunctionOptions, ImageFormat, SimId};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// How a varied parameter is narrowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariedSelection {
    /// Inclusive `[low, high]` range.
    Range([f64; 2]),
    /// Exact values. A run matches when its value equals one of them up to
    /// `Tolerances::default()` (absolute 1e-12, relative 1e-9), so values
    /// that went through decimal text still match.
    Values(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariedFilter {
    pub param: String,
    pub select: VariedSelection,
}

impl VariedFilter {
    pub fn range(param: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            param: param.into(),
            select: VariedSelection::Range([low, high]),
        }
    }

    pub fn values(param: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            param: param.into(),
            select: VariedSelection::Values(values),
        }
    }
}

/// Parses `name=low:high` (range) or `name=v1,v2,...` (exact values).
impl FromStr for VariedFilter {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, selection) = split_assignment(s)?;
        if let Some((low, high)) = selection.split_once(':') {
            Ok(Self::range(name, parse_f64(low)?, parse_f64(high)?))
        } else {
            let values = selection
                .split(',')
                .map(parse_f64)
                .collect::<AppResult<Vec<_>>>()?;
            Ok(Self::values(name, values))
        }
    }
}

/// Column range of one labeled table. Only the first and last bound are used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoiFilter {
    pub label: String,
    pub bounds: Vec<usize>,
}

impl RoiFilter {
    pub fn new(label: impl Into<String>, low: usize, high: usize) -> Self {
        Self {
            label: label.into(),
            bounds: vec![low, high],
        }
    }

    /// Inclusive `(low, high)` cell indices, if any bound was given.
    pub fn limits(&self) -> Option<(usize, usize)> {
        Some((*self.bounds.first()?, *self.bounds.last()?))
    }
}

/// Parses `label=low:high`.
impl FromStr for RoiFilter {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (label, bounds) = split_assignment(s)?;
        let (low, high) = bounds
            .split_once(':')
            .ok_or_else(|| AppError::InvalidOption(format!("roi '{}' must be label=low:high", s)))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<usize>()
                .map_err(|e| AppError::InvalidOption(format!("roi bound '{}': {}", v, e)))
        };
        Ok(Self::new(label, parse(low)?, parse(high)?))
    }
}

/// Options of the data selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SelectOptions {
    pub time_limits: [f64; 2],
    pub varied: Vec<VariedFilter>,
    pub roi: Vec<RoiFilter>,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            time_limits: [f64::NEG_INFINITY, f64::INFINITY],
            varied: Vec::new(),
            roi: Vec::new(),
        }
    }
}

impl SelectOptions {
    pub fn with_time_limits(mut self, low: f64, high: f64) -> Self {
        self.time_limits = [low, high];
        self
    }

    pub fn with_varied(mut self, filter: VariedFilter) -> Self {
        self.varied.push(filter);
        self
    }

    pub fn with_roi(mut self, filter: RoiFilter) -> Self {
        self.roi.push(filter);
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        let [low, high] = self.time_limits;
        if low.is_nan() || high.is_nan() || low > high {
            return Err(AppError::InvalidOption(format!(
                "time_limits must satisfy low <= high, got [{}, {}]",
                low, high
            )));
        }

        if self.varied.len() > 1 {
            return Err(AppError::MultipleVariedRanges {
                count: self.varied.len(),
            });
        }
        if let Some(filter) = self.varied.first() {
            match &filter.select {
                VariedSelection::Range([lo, hi]) if lo.is_nan() || hi.is_nan() || lo > hi => {
                    return Err(AppError::InvalidOption(format!(
                        "varied range for '{}' must satisfy low <= high",
                        filter.param
                    )));
                }
                VariedSelection::Values(values) if values.is_empty() => {
                    return Err(AppError::InvalidOption(format!(
                        "varied values for '{}' must not be empty",
                        filter.param
                    )));
                }
                _ => {}
            }
        }

        let mut labels = HashSet::new();
        for roi in &self.roi {
            match roi.limits() {
                Some((lo, hi)) if lo <= hi => {}
                _ => {
                    return Err(AppError::InvalidOption(format!(
                        "roi for '{}' needs bounds with low <= high",
                        roi.label
                    )));
                }
            }
            if !labels.insert(roi.label.as_str()) {
                return Err(AppError::InvalidOption(format!(
                    "roi given twice for '{}'",
                    roi.label
                )));
            }
        }
        Ok(())
    }
}

/// Options of the analysis/plot dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DispatchOptions {
    pub save_results: bool,
    pub overwrite: bool,
    /// Output stem for single-run dispatch.
    pub result_file: String,
    pub format: ImageFormat,
    /// Embed the sweep point in output names.
    pub varied_filename: bool,
    pub save_prefix: Option<String>,
    /// Explicit plot/analysis classification, one flag per function.
    pub plot_flags: Option<Vec<bool>>,
    pub load_all_data: bool,
    /// Evaluate runs on the active rayon pool, if any.
    pub parallel: bool,
    /// Restrict processing to these simulations.
    pub sim_ids: Option<Vec<SimId>>,
    /// Output root when the source does not name a study directory.
    pub study_dir: Option<PathBuf>,
    pub close_figures: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            save_results: false,
            overwrite: false,
            result_file: "result".to_string(),
            format: ImageFormat::Svg,
            varied_filename: false,
            save_prefix: None,
            plot_flags: None,
            load_all_data: false,
            parallel: false,
            sim_ids: None,
            study_dir: None,
            close_figures: true,
        }
    }
}

impl DispatchOptions {
    pub fn validate(&self, num_functions: usize, num_function_options: usize) -> AppResult<()> {
        if self.result_file.trim().is_empty() {
            return Err(AppError::InvalidOption(
                "result_file must not be empty".to_string(),
            ));
        }
        if let Some(flags) = &self.plot_flags
            && flags.len() != num_functions
        {
            return Err(AppError::InvalidOption(format!(
                "plot_flags has {} entries for {} functions",
                flags.len(),
                num_functions
            )));
        }
        if num_function_options > num_functions {
            return Err(AppError::InvalidOption(format!(
                "{} function option sets given for {} functions",
                num_function_options, num_functions
            )));
        }
        if let Some(ids) = &self.sim_ids
            && ids.is_empty()
        {
            return Err(AppError::InvalidOption("sim_ids must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Contents of an analysis options file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AnalysisConfig {
    pub options: DispatchOptions,
    pub function_options: Vec<FunctionOptions>,
    pub select: Option<SelectOptions>,
}

/// Load an analysis options file (YAML, or JSON for `.json`).
pub fn load_config(path: &Path) -> AppResult<AnalysisConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AppError::OptionsFileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        serde_json::from_str(&content).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(&content).map_err(|e| e.to_string())
    };

    parsed.map_err(|message| AppError::OptionsFileParse {
        path: path.to_path_buf(),
        message,
    })
}

fn split_assignment(s: &str) -> AppResult<(&str, &str)> {
    s.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .ok_or_else(|| AppError::InvalidOption(format!("expected name=value, got '{}'", s)))
}

fn parse_f64(s: &str) -> AppResult<f64> {
    let s = s.trim();
    match s {
        "inf" | "+inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        _ => s
            .parse::<f64>()
            .map_err(|e| AppError::InvalidOption(format!("'{}' is not a number: {}", s, e))),
    }
}

/// Parses `low:high` into a time window; either side may be empty.
pub fn parse_time_limits(s: &str) -> AppResult<[f64; 2]> {
    let (low, high) = s
        .split_once(':')
        .ok_or_else(|| AppError::InvalidOption(format!("time limits '{}' must be low:high", s)))?;
    let low = if low.trim().is_empty() {
        f64::NEG_INFINITY
    } else {
        parse_f64(low)?
    };
    let high = if high.trim().is_empty() {
        f64::INFINITY
    } else {
        parse_f64(high)?
    };
    Ok([low, high])
}
