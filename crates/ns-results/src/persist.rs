//! Writing figures and derived results to disk.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::ensure_dir;
use crate::types::DerivedResult;
use crate::{ResultsError, ResultsResult};

/// Output encodings a figure can be saved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Svg,
    Jpg,
    Eps,
    Png,
    Fig,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 5] = [Self::Svg, Self::Jpg, Self::Eps, Self::Png, Self::Fig];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Jpg => "jpg",
            Self::Eps => "eps",
            Self::Png => "png",
            Self::Fig => "fig",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.extension().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown format '{}' (expected svg, jpg, eps, png or fig)", s))
    }
}

/// A renderable artifact produced by a plot function.
pub trait Figure: Send {
    fn name(&self) -> &str;

    /// Render the figure to `path`. Formats the figure cannot produce
    /// return `ResultsError::UnsupportedFormat`.
    fn render(&self, path: &Path, format: ImageFormat) -> ResultsResult<()>;

    /// Release whatever the figure holds once it has been saved.
    fn close(&mut self) {}
}

impl fmt::Debug for dyn Figure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Figure({})", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(PathBuf),
    /// Target existed and overwriting was not allowed.
    Skipped(PathBuf),
}

impl WriteOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Written(p) | Self::Skipped(p) => p,
        }
    }
}

fn prepare_target(path: &Path, overwrite: bool) -> ResultsResult<Option<WriteOutcome>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    if path.exists() && !overwrite {
        info!(path = %path.display(), "output exists, not overwriting");
        return Ok(Some(WriteOutcome::Skipped(path.to_path_buf())));
    }
    Ok(None)
}

pub fn save_figure(
    figure: &dyn Figure,
    path: &Path,
    format: ImageFormat,
    overwrite: bool,
) -> ResultsResult<WriteOutcome> {
    if let Some(skipped) = prepare_target(path, overwrite)? {
        return Ok(skipped);
    }
    figure.render(path, format)?;
    info!(figure = figure.name(), path = %path.display(), "saved figure");
    Ok(WriteOutcome::Written(path.to_path_buf()))
}

pub fn save_derived(
    result: &DerivedResult,
    path: &Path,
    overwrite: bool,
) -> ResultsResult<WriteOutcome> {
    if let Some(skipped) = prepare_target(path, overwrite)? {
        return Ok(skipped);
    }
    let json = serde_json::to_string_pretty(result)?;
    fs::write(path, json)?;
    info!(function = %result.function, path = %path.display(), "saved result");
    Ok(WriteOutcome::Written(path.to_path_buf()))
}

/// Unsupported-format error for `figure`.
pub fn unsupported(figure: &dyn Figure, format: ImageFormat) -> ResultsError {
    ResultsError::UnsupportedFormat {
        figure: figure.name().to_string(),
        format,
    }
}
