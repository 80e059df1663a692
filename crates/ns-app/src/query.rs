//! Query helpers over loaded records.

use nalgebra::DMatrix;
use ns_results::{ParamValue, SimRecord};

/// Summary of one record's time axis and tables.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSummary {
    pub sim_id: Option<u32>,
    pub time_range: Option<(f64, f64)>,
    pub sample_count: usize,
    /// `(label, cell count)` in label order.
    pub cells: Vec<(String, usize)>,
    pub varied: Vec<(String, ParamValue)>,
}

pub fn summarize(record: &SimRecord) -> RecordSummary {
    let time_range = match (record.time.first(), record.time.last()) {
        (Some(first), Some(last)) => Some((*first, *last)),
        _ => None,
    };

    let cells = record
        .labels
        .iter()
        .map(|label| {
            let ncols = record.table(label).map(|t| t.ncols()).unwrap_or(0);
            (label.clone(), ncols)
        })
        .collect();

    let varied = record
        .varied
        .iter()
        .filter_map(|name| record.param(name).map(|v| (name.clone(), v.clone())))
        .collect();

    RecordSummary {
        sim_id: record.sim_id,
        time_range,
        sample_count: record.time.len(),
        cells,
        varied,
    }
}

/// Records x numeric varied parameters.
///
/// A parameter is a column only when no record holds a text value for it;
/// text-valued parameters are listed in `skipped`. Records lacking a value
/// hold NaN.
#[derive(Debug, Clone)]
pub struct SweepTable {
    pub names: Vec<String>,
    pub skipped: Vec<String>,
    pub values: DMatrix<f64>,
}

impl SweepTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

pub fn sweep_table(records: &[SimRecord]) -> SweepTable {
    let mut all_names: Vec<String> = Vec::new();
    for record in records {
        for name in &record.varied {
            if !all_names.contains(name) {
                all_names.push(name.clone());
            }
        }
    }

    let (names, skipped): (Vec<String>, Vec<String>) = all_names.into_iter().partition(|name| {
        records
            .iter()
            .all(|r| !matches!(r.param(name), Some(ParamValue::Text(_))))
    });

    let values = DMatrix::from_fn(records.len(), names.len(), |row, col| {
        records[row]
            .param(&names[col])
            .and_then(ParamValue::as_f64)
            .unwrap_or(f64::NAN)
    });

    SweepTable {
        names,
        skipped,
        values,
    }
}
