//! Built-in analysis and plot functions.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use ns_core::ensure_finite;
use ns_results::persist::unsupported;
use ns_results::{Figure, FunctionOptions, ImageFormat, ResultsError, ResultsResult, SimRecord};
use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::functions::{CallKind, FunctionError, Output, SimFunction};

/// Look up a built-in function by name.
pub fn builtin(name: &str) -> Option<Arc<dyn SimFunction>> {
    match name {
        "calc_mean" => Some(Arc::new(CalcMean)),
        "calc_fr" => Some(Arc::new(CalcFiringRate)),
        "plot_waveforms" => Some(Arc::new(PlotWaveforms)),
        _ => None,
    }
}

pub const BUILTIN_NAMES: [&str; 3] = ["calc_mean", "calc_fr", "plot_waveforms"];

/// Labels an options map restricts a call to (`label`), or all of them.
fn selected_labels<'a>(
    record: &'a SimRecord,
    options: &FunctionOptions,
) -> Result<Vec<&'a String>, FunctionError> {
    match options.get_str("label") {
        Some(wanted) => record
            .labels
            .iter()
            .find(|l| l.as_str() == wanted)
            .map(|l| vec![l])
            .ok_or_else(|| FunctionError::MissingLabel(wanted.to_string())),
        None => Ok(record.labels.iter().collect()),
    }
}

/// Mean of every labeled table over time and cells.
pub struct CalcMean;

impl SimFunction for CalcMean {
    fn name(&self) -> &str {
        "calc_mean"
    }

    fn kind(&self) -> Option<CallKind> {
        Some(CallKind::Analysis)
    }

    fn call(
        &self,
        record: &SimRecord,
        options: &FunctionOptions,
    ) -> Result<Output, FunctionError> {
        let mut out = Map::new();
        for label in selected_labels(record, options)? {
            let Some(table) = record.table(label) else {
                return Err(FunctionError::MissingLabel(label.clone()));
            };
            let value = if table.is_empty() {
                Value::Null
            } else {
                json!(table.mean())
            };
            out.insert(label.clone(), value);
        }
        Ok(Output::Data(Value::Object(out)))
    }
}

/// Per-cell spike counts and rates from upward threshold crossings.
///
/// Options: `threshold` (default 0), `label` (restrict to one table).
/// Rates are spikes per unit of simulated time.
pub struct CalcFiringRate;

impl SimFunction for CalcFiringRate {
    fn name(&self) -> &str {
        "calc_fr"
    }

    fn kind(&self) -> Option<CallKind> {
        Some(CallKind::Analysis)
    }

    fn call(
        &self,
        record: &SimRecord,
        options: &FunctionOptions,
    ) -> Result<Output, FunctionError> {
        let threshold = match options.get("threshold") {
            None => 0.0,
            Some(v) => v
                .as_f64()
                .and_then(|t| ensure_finite(t, "threshold").ok())
                .ok_or_else(|| FunctionError::InvalidOption {
                    key: "threshold".to_string(),
                    reason: format!("expected a finite number, got {}", v),
                })?,
        };

        let duration = match (record.time.first(), record.time.last()) {
            (Some(first), Some(last)) if last > first => last - first,
            _ => {
                return Err(FunctionError::Failed(
                    "record needs at least two distinct time points".to_string(),
                ));
            }
        };

        let mut out = Map::new();
        for label in selected_labels(record, options)? {
            let Some(table) = record.table(label) else {
                return Err(FunctionError::MissingLabel(label.clone()));
            };
            let counts: Vec<usize> = table
                .column_iter()
                .map(|cell| {
                    let trace: Vec<f64> = cell.iter().copied().collect();
                    trace
                        .windows(2)
                        .filter(|w| w[0] < threshold && w[1] >= threshold)
                        .count()
                })
                .collect();
            let rates: Vec<f64> = counts.iter().map(|&c| c as f64 / duration).collect();
            out.insert(label.clone(), json!({ "spikes": counts, "rate": rates }));
        }
        Ok(Output::Data(Value::Object(out)))
    }
}

/// Figure of the cell-averaged trace of every label.
pub struct PlotWaveforms;

impl SimFunction for PlotWaveforms {
    fn name(&self) -> &str {
        "plot_waveforms"
    }

    fn kind(&self) -> Option<CallKind> {
        Some(CallKind::Plot)
    }

    fn supports_format(&self, format: ImageFormat) -> bool {
        WaveformFigure::supports(format)
    }

    fn call(
        &self,
        record: &SimRecord,
        options: &FunctionOptions,
    ) -> Result<Output, FunctionError> {
        let mut series = Vec::new();
        for label in selected_labels(record, options)? {
            let Some(table) = record.table(label) else {
                return Err(FunctionError::MissingLabel(label.clone()));
            };
            if table.ncols() == 0 {
                continue;
            }
            let points = record
                .time
                .iter()
                .zip(table.row_iter())
                .map(|(t, row)| (*t, row.mean()))
                .collect();
            series.push(Trace {
                label: label.clone(),
                points,
            });
        }

        let title = match record.sim_id {
            Some(id) => format!("sim{}", id),
            None => "waveforms".to_string(),
        };
        Ok(Output::Figure(Box::new(WaveformFigure { title, series })))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    pub label: String,
    pub points: Vec<(f64, f64)>,
}

/// Line figure drawn with plotters (`svg`, `png`, `jpg`) or written as a
/// JSON `fig` document.
///
/// Only the traces are drawn; labels and title live in the `fig` form, so
/// rendering needs no system fonts.
#[derive(Debug, Clone, Serialize)]
pub struct WaveformFigure {
    pub title: String,
    pub series: Vec<Trace>,
}

const SIZE: (u32, u32) = (800, 400);
const COLORS: [RGBColor; 6] = [
    RGBColor(31, 119, 180),
    RGBColor(214, 39, 40),
    RGBColor(44, 160, 44),
    RGBColor(255, 127, 14),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
];

fn finite(point: &&(f64, f64)) -> bool {
    point.0.is_finite() && point.1.is_finite()
}

/// Degenerate axis ranges are padded so the chart has a non-zero extent.
fn padded(low: f64, high: f64) -> Range<f64> {
    if high > low {
        low..high
    } else {
        (low - 1.0)..(high + 1.0)
    }
}

impl WaveformFigure {
    pub fn supports(format: ImageFormat) -> bool {
        !matches!(format, ImageFormat::Eps)
    }

    fn bounds(&self) -> Option<(Range<f64>, Range<f64>)> {
        let mut points = self
            .series
            .iter()
            .flat_map(|s| s.points.iter())
            .filter(finite);
        let (x0, y0) = *points.next()?;
        let (xl, xh, yl, yh) = points.fold((x0, x0, y0, y0), |(xl, xh, yl, yh), (x, y)| {
            (xl.min(*x), xh.max(*x), yl.min(*y), yh.max(*y))
        });
        Some((padded(xl, xh), padded(yl, yh)))
    }

    fn draw<DB: DrawingBackend>(
        &self,
        root: &DrawingArea<DB, Shift>,
    ) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
        root.fill(&WHITE)?;
        if let Some((x_range, y_range)) = self.bounds() {
            let mut chart = ChartBuilder::on(root)
                .margin(20)
                .build_cartesian_2d(x_range, y_range)?;
            for (idx, trace) in self.series.iter().enumerate() {
                let color = COLORS[idx % COLORS.len()];
                chart.draw_series(LineSeries::new(
                    trace.points.iter().filter(finite).copied(),
                    color.stroke_width(2),
                ))?;
            }
        }
        root.present()
    }

    fn render_error(&self, err: impl std::fmt::Display) -> ResultsError {
        ResultsError::Render {
            figure: self.title.clone(),
            message: err.to_string(),
        }
    }
}

impl Figure for WaveformFigure {
    fn name(&self) -> &str {
        &self.title
    }

    fn render(&self, path: &Path, format: ImageFormat) -> ResultsResult<()> {
        match format {
            ImageFormat::Svg => {
                let root = SVGBackend::new(path, SIZE).into_drawing_area();
                self.draw(&root).map_err(|e| self.render_error(e))
            }
            ImageFormat::Png | ImageFormat::Jpg => {
                let root = BitMapBackend::new(path, SIZE).into_drawing_area();
                self.draw(&root).map_err(|e| self.render_error(e))
            }
            ImageFormat::Fig => Ok(std::fs::write(path, serde_json::to_vec_pretty(self)?)?),
            other => Err(unsupported(self, other)),
        }
    }

    fn close(&mut self) {
        self.series.clear();
    }
}
