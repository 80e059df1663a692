//! Narrowing records along time, cells (ROI) and varied parameters.

use ns_core::{Tolerances, nearly_equal, within};
use ns_results::SimRecord;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::options::{RoiFilter, SelectOptions, VariedFilter, VariedSelection};
use crate::query::sweep_table;

/// Select a subset of `records`.
///
/// The varied filter narrows the record sequence first; the time window and
/// ROI filters are then applied to every remaining record. Inputs are left
/// untouched and a new sequence is returned.
pub fn select(records: &[SimRecord], options: &SelectOptions) -> AppResult<Vec<SimRecord>> {
    options.validate()?;

    let kept = match options.varied.first() {
        Some(filter) => select_varied(records, filter)?,
        None => (0..records.len()).collect(),
    };
    debug!(kept = kept.len(), total = records.len(), "varied selection");

    Ok(kept
        .into_iter()
        .map(|idx| narrow_record(&records[idx], options.time_limits, &options.roi))
        .collect())
}

/// Indices of the records whose value of `filter.param` matches.
pub fn select_varied(records: &[SimRecord], filter: &VariedFilter) -> AppResult<Vec<usize>> {
    let table = sweep_table(records);

    let Some(col) = table.column(&filter.param) else {
        if table.skipped.contains(&filter.param) {
            return Err(AppError::NonNumericVaried {
                name: filter.param.clone(),
            });
        }
        let mut available = table.names.clone();
        available.extend(table.skipped.iter().cloned());
        return Err(AppError::UnknownVaried {
            name: filter.param.clone(),
            available,
        });
    };

    let tol = Tolerances::default();
    let values = table.values.column(col);
    let matches = |v: f64| match &filter.select {
        VariedSelection::Range([low, high]) => within(v, *low, *high),
        VariedSelection::Values(wanted) => wanted.iter().any(|w| nearly_equal(v, *w, tol)),
    };

    Ok(values
        .iter()
        .enumerate()
        .filter(|(_, v)| matches(**v))
        .map(|(idx, _)| idx)
        .collect())
}

/// Apply the time window and ROI filters to one record.
pub fn narrow_record(record: &SimRecord, time_limits: [f64; 2], roi: &[RoiFilter]) -> SimRecord {
    let [low, high] = time_limits;
    let rows: Vec<usize> = record
        .time
        .iter()
        .enumerate()
        .filter(|(_, t)| within(**t, low, high))
        .map(|(idx, _)| idx)
        .collect();
    let all_rows = rows.len() == record.time.len();

    let mut narrowed = record.clone();
    if !all_rows {
        narrowed.time = rows.iter().map(|&idx| record.time[idx]).collect();
    }

    for (label, table) in narrowed.tables.iter_mut() {
        if !all_rows {
            *table = table.select_rows(rows.iter());
        }
        let Some((lo, hi)) = roi
            .iter()
            .find(|r| &r.label == label)
            .and_then(RoiFilter::limits)
        else {
            continue;
        };
        let cols: Vec<usize> = (0..table.ncols()).filter(|c| *c >= lo && *c <= hi).collect();
        if cols.len() != table.ncols() {
            *table = table.select_columns(cols.iter());
        }
    }

    narrowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn record(g: f64) -> SimRecord {
        let time: Vec<f64> = (0..5).map(|i| i as f64 * 10.0).collect();
        SimRecord::new(time)
            .with_table("E_v", DMatrix::from_fn(5, 6, |r, c| (r * 10 + c) as f64))
            .with_table("I_v", DMatrix::from_element(5, 3, g))
            .with_varied("E_gNa", g)
    }

    #[test]
    fn time_window_is_inclusive() {
        let opts = SelectOptions::default().with_time_limits(10.0, 30.0);
        let out = select(&[record(0.0)], &opts).unwrap();
        assert_eq!(out[0].time, vec![10.0, 20.0, 30.0]);
        let v = out[0].table("E_v").unwrap();
        assert_eq!(v.nrows(), 3);
        assert_eq!(v[(0, 0)], 10.0);
        assert_eq!(out[0].table("I_v").unwrap().nrows(), 3);
    }

    #[test]
    fn window_above_data_gives_empty_tables() {
        let opts = SelectOptions::default().with_time_limits(1000.0, 2000.0);
        let out = select(&[record(0.0)], &opts).unwrap();
        assert!(out[0].time.is_empty());
        assert_eq!(out[0].table("E_v").unwrap().shape(), (0, 6));
    }

    #[test]
    fn roi_keeps_inclusive_columns_of_named_label_only() {
        let opts = SelectOptions::default().with_roi(RoiFilter::new("E_v", 1, 4));
        let out = select(&[record(0.0)], &opts).unwrap();
        let v = out[0].table("E_v").unwrap();
        assert_eq!(v.ncols(), 4);
        assert_eq!(v[(0, 0)], 1.0);
        assert_eq!(v[(0, 3)], 4.0);
        assert_eq!(out[0].table("I_v").unwrap().ncols(), 3);
    }

    #[test]
    fn roi_uses_first_and_last_bound() {
        let roi = RoiFilter {
            label: "E_v".to_string(),
            bounds: vec![2, 3, 5],
        };
        let out = select(&[record(0.0)], &SelectOptions::default().with_roi(roi)).unwrap();
        assert_eq!(out[0].table("E_v").unwrap().ncols(), 4);
    }

    #[test]
    fn varied_range_and_values() {
        let sweep = vec![record(0.0), record(5.0), record(10.0)];

        let opts = SelectOptions::default().with_varied(VariedFilter::range("E_gNa", 3.0, 7.0));
        let out = select(&sweep, &opts).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].param("E_gNa").and_then(|v| v.as_f64()), Some(5.0));

        let opts =
            SelectOptions::default().with_varied(VariedFilter::values("E_gNa", vec![10.0, 0.0]));
        let out = select(&sweep, &opts).unwrap();
        let picked: Vec<f64> = out
            .iter()
            .filter_map(|r| r.param("E_gNa").and_then(|v| v.as_f64()))
            .collect();
        assert_eq!(picked, vec![0.0, 10.0]);
    }

    #[test]
    fn exact_values_allow_rounding_noise_only() {
        let sweep = vec![record(0.1 * 3.0), record(0.3001)];
        let opts = SelectOptions::default().with_varied(VariedFilter::values("E_gNa", vec![0.3]));
        let out = select(&sweep, &opts).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].param("E_gNa").and_then(|v| v.as_f64()), Some(0.1 * 3.0));
    }

    #[test]
    fn unknown_or_text_varied_is_an_error() {
        let sweep = vec![record(0.0).with_varied("solver", "rk4")];

        let opts = SelectOptions::default().with_varied(VariedFilter::range("E_gK", 0.0, 1.0));
        assert!(matches!(
            select(&sweep, &opts),
            Err(AppError::UnknownVaried { .. })
        ));

        let opts = SelectOptions::default().with_varied(VariedFilter::values("solver", vec![1.0]));
        assert!(matches!(
            select(&sweep, &opts),
            Err(AppError::NonNumericVaried { .. })
        ));
    }

    #[test]
    fn inputs_are_not_modified() {
        let sweep = vec![record(0.0), record(5.0)];
        let before = sweep.clone();
        let opts = SelectOptions::default()
            .with_time_limits(0.0, 10.0)
            .with_roi(RoiFilter::new("E_v", 0, 0));
        let _ = select(&sweep, &opts).unwrap();
        assert_eq!(sweep, before);
    }
}
