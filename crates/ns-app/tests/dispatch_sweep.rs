use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::DMatrix;
use ns_app::builtin::{CalcFiringRate, PlotWaveforms};
use ns_app::*;
use ns_results::{
    DerivedResult, Figure, FunctionOptions, ImageFormat, Modification, ResultsError,
    ResultsResult, SimRecord, StudyStore,
};
use serde_json::json;

fn sweep() -> Vec<SimRecord> {
    [0.0, 5.0, 10.0]
        .iter()
        .map(|&g| {
            SimRecord::new(vec![0.0, 1.0, 2.0, 3.0])
                .with_table(
                    "E_v",
                    DMatrix::from_row_slice(4, 1, &[-70.0, 10.0 + g, -70.0, 10.0]),
                )
                .with_varied("E_gNa", g)
        })
        .collect()
}

fn gna(record: &SimRecord, _: &FunctionOptions) -> Result<Output, FunctionError> {
    let g = record.param("E_gNa").and_then(|v| v.as_f64()).unwrap_or_default();
    if g == 5.0 {
        return Err(FunctionError::Failed("diverged".to_string()));
    }
    Ok(Output::Data(json!(g)))
}

struct Handle(String);

impl Figure for Handle {
    fn name(&self) -> &str {
        &self.0
    }

    fn render(&self, path: &Path, _: ImageFormat) -> ResultsResult<()> {
        if self.0 == "broken" {
            return Err(ResultsError::Render {
                figure: self.0.clone(),
                message: "backend gave up".to_string(),
            });
        }
        Ok(std::fs::write(path, &self.0)?)
    }
}

fn handle_plot(record: &SimRecord, _: &FunctionOptions) -> Result<Output, FunctionError> {
    Ok(Output::Figure(Box::new(Handle(format!(
        "fig{}",
        record.sim_id.unwrap_or_default()
    )))))
}

fn values(report: &FunctionReport) -> Vec<Option<f64>> {
    report
        .runs
        .iter()
        .map(|run| run.output.data().and_then(|d| d.value.as_f64()))
        .collect()
}

#[test]
fn failing_run_degrades_to_empty_result() {
    let f = FnFunction::new("calc_gna", gna);
    let report = dispatch(
        sweep().into(),
        &[&f],
        &[],
        &DispatchOptions::default(),
    )
    .unwrap();

    let fr = report.function("calc_gna").unwrap();
    assert_eq!(fr.kind, CallKind::Analysis);
    assert_eq!(values(fr), vec![Some(0.0), None, Some(10.0)]);
    assert!(fr.runs[1].output.is_empty());
    assert_eq!(fr.failures, 1);
    assert_eq!(report.total_failures(), 1);
}

#[test]
fn each_result_carries_its_own_sweep_point() {
    let f = FnFunction::new("calc_gna", gna);
    let opts = FunctionOptions::new().with("threshold", 0.0);
    let report = dispatch(
        sweep().into(),
        &[&f],
        std::slice::from_ref(&opts),
        &DispatchOptions::default(),
    )
    .unwrap();

    let last: &DerivedResult = report.functions[0].runs[2].output.data().unwrap();
    assert_eq!(last.varied, vec!["E_gNa".to_string()]);
    assert_eq!(last.params["E_gNa"].as_f64(), Some(10.0));
    assert_eq!(last.options, opts);
    assert_eq!(last.function, "calc_gna");
}

#[test]
fn plot_in_name_marks_function_as_plot() {
    let dir = tempfile::tempdir().unwrap();
    let f = FnFunction::new("dsPlotHandles", handle_plot);
    let options = DispatchOptions {
        save_results: true,
        study_dir: Some(dir.path().to_path_buf()),
        ..DispatchOptions::default()
    };
    let report = dispatch(sweep().into(), &[&f], &[], &options).unwrap();

    let fr = &report.functions[0];
    assert_eq!(fr.kind, CallKind::Plot);
    assert_eq!(fr.saved.len(), 3);
    let expected = dir
        .path()
        .join("postSimPlots")
        .join("study_sim2_plot1_dsPlotHandles.svg");
    assert!(fr.saved.contains(&expected));
    assert_eq!(std::fs::read_to_string(expected).unwrap(), "fig2");
    // more than one figure in the batch, so they were closed after saving
    assert!(fr.runs.iter().all(|r| matches!(r.output, RunOutput::Released)));
}

fn saved_study(dir: &Path) -> StudyStore {
    let store = StudyStore::create(dir.to_path_buf()).unwrap();
    let info = store.save_study(&sweep()).unwrap();
    std::fs::remove_file(dir.join(&info.simulations[1].data_file)).unwrap();
    store
}

#[test]
fn bitmap_plots_are_saved_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let options = DispatchOptions {
        save_results: true,
        format: ImageFormat::Png,
        study_dir: Some(dir.path().to_path_buf()),
        ..DispatchOptions::default()
    };
    let report = dispatch(sweep().into(), &[&PlotWaveforms], &[], &options).unwrap();

    let fr = &report.functions[0];
    assert_eq!(fr.runs.len(), 3);
    assert_eq!(fr.saved.len(), 3);
    assert!(fr.save_failures.is_empty());
    let png = dir
        .path()
        .join("postSimPlots")
        .join("study_sim3_plot1_plot_waveforms.png");
    assert_eq!(&std::fs::read(png).unwrap()[..4], b"\x89PNG");
}

#[test]
fn unsupported_figure_format_fails_before_evaluation() {
    let dir = tempfile::tempdir().unwrap();
    let options = DispatchOptions {
        save_results: true,
        format: ImageFormat::Eps,
        study_dir: Some(dir.path().to_path_buf()),
        ..DispatchOptions::default()
    };
    let err = dispatch(sweep().into(), &[&PlotWaveforms], &[], &options).unwrap_err();
    assert!(matches!(err, AppError::InvalidOption(_)));
    assert!(!dir.path().join("postSimPlots").exists());

    // without saving the format is irrelevant
    let options = DispatchOptions {
        save_results: false,
        ..options
    };
    assert!(dispatch(sweep().into(), &[&PlotWaveforms], &[], &options).is_ok());
}

#[test]
fn failed_save_is_reported_and_other_runs_continue() {
    let dir = tempfile::tempdir().unwrap();
    let f = FnFunction::new("plot_handles", |record: &SimRecord, _: &FunctionOptions| {
        let name = match record.sim_id {
            Some(2) => "broken".to_string(),
            other => format!("fig{}", other.unwrap_or_default()),
        };
        Ok(Output::Figure(Box::new(Handle(name))))
    });
    let options = DispatchOptions {
        save_results: true,
        study_dir: Some(dir.path().to_path_buf()),
        ..DispatchOptions::default()
    };
    let report = dispatch(sweep().into(), &[&f], &[], &options).unwrap();

    let fr = &report.functions[0];
    assert_eq!(fr.runs.len(), 3);
    assert_eq!(fr.saved.len(), 2);
    assert_eq!(fr.save_failures.len(), 1);
    assert_eq!(fr.save_failures[0].sim_id, Some(2));
    assert!(fr.save_failures[0].message.contains("backend gave up"));
    assert_eq!(report.total_save_failures(), 1);
    assert_eq!(fr.failures, 0);
}

#[test]
fn lazy_study_plots_are_saved_and_released_per_sim() {
    let dir = tempfile::tempdir().unwrap();
    let store = saved_study(dir.path());

    let options = DispatchOptions {
        save_results: true,
        ..DispatchOptions::default()
    };
    let report = dispatch(
        Source::Path(store.studyinfo_path()),
        &[&PlotWaveforms],
        &[],
        &options,
    )
    .unwrap();

    let fr = &report.functions[0];
    assert_eq!(fr.kind, CallKind::Plot);
    assert_eq!(fr.missing, vec![2]);
    let ids: Vec<_> = fr.runs.iter().filter_map(|r| r.sim_id).collect();
    assert_eq!(ids, vec![1, 3]);
    assert!(fr.runs.iter().all(|r| matches!(r.output, RunOutput::Released)));

    let plots = dir.path().join("postSimPlots");
    assert_eq!(
        fr.saved,
        vec![
            plots.join("study_sim1_plot1_plot_waveforms.svg"),
            plots.join("study_sim3_plot1_plot_waveforms.svg"),
        ]
    );
    assert!(fr.saved.iter().all(|p| p.exists()));
    assert!(!plots.join("study_sim2_plot1_plot_waveforms.svg").exists());
}

#[test]
fn lazy_study_releases_figures_without_saving() {
    let dir = tempfile::tempdir().unwrap();
    let store = saved_study(dir.path());

    let report = dispatch(
        Source::Path(store.studyinfo_path()),
        &[&PlotWaveforms],
        &[],
        &DispatchOptions::default(),
    )
    .unwrap();

    let fr = &report.functions[0];
    assert_eq!(fr.runs.len(), 2);
    assert!(fr.saved.is_empty());
    assert!(fr.runs.iter().all(|r| matches!(r.output, RunOutput::Released)));
    assert!(!dir.path().join("postSimPlots").exists());
}

#[test]
fn explicit_flags_override_name() {
    let f = FnFunction::new("plot_like_analysis", gna);
    let options = DispatchOptions {
        plot_flags: Some(vec![false]),
        ..DispatchOptions::default()
    };
    let report = dispatch(sweep().into(), &[&f], &[], &options).unwrap();
    assert_eq!(report.functions[0].kind, CallKind::Analysis);
}

#[test]
fn invalid_options_fail_before_evaluation() {
    let calls = AtomicUsize::new(0);
    let f = FnFunction::new("counting", |_: &SimRecord, _: &FunctionOptions| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Output::Empty)
    });
    let options = DispatchOptions {
        plot_flags: Some(vec![true, false]),
        ..DispatchOptions::default()
    };
    let err = dispatch(sweep().into(), &[&f], &[], &options).unwrap_err();
    assert!(matches!(err, AppError::InvalidOption(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn parallel_evaluation_matches_sequential_order() {
    let records: Vec<SimRecord> = (0..32)
        .map(|i| {
            SimRecord::new(vec![0.0, 1.0])
                .with_table("E_v", DMatrix::zeros(2, 1))
                .with_varied("E_gNa", i as f64)
        })
        .collect();
    let f = FnFunction::new("calc_gna", gna);

    let sequential = dispatch(
        records.clone().into(),
        &[&f],
        &[],
        &DispatchOptions::default(),
    )
    .unwrap();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .unwrap();
    let options = DispatchOptions {
        parallel: true,
        ..DispatchOptions::default()
    };
    let parallel = pool
        .install(|| dispatch(records.into(), &[&f], &[], &options))
        .unwrap();

    assert_eq!(values(&sequential.functions[0]), values(&parallel.functions[0]));
    assert_eq!(parallel.functions[0].failures, 1);
}

#[test]
fn lazy_study_skips_missing_runs_and_saves_per_sim() {
    let dir = tempfile::tempdir().unwrap();
    let store = StudyStore::create(dir.path().to_path_buf()).unwrap();
    let info = store.save_study(&sweep()).unwrap();
    std::fs::remove_file(dir.path().join(&info.simulations[2].data_file)).unwrap();

    let options = DispatchOptions {
        save_results: true,
        save_prefix: Some("gna".to_string()),
        ..DispatchOptions::default()
    };
    let report = dispatch(
        Source::Path(store.studyinfo_path()),
        &[&CalcFiringRate],
        &[],
        &options,
    )
    .unwrap();

    let fr = &report.functions[0];
    assert_eq!(fr.missing, vec![3]);
    assert_eq!(fr.runs.len(), 2);
    assert_eq!(fr.saved.len(), 2);

    let saved = dir
        .path()
        .join("postSimResults")
        .join("gna_sim1_analysis1_calc_fr.json");
    let loaded: DerivedResult =
        serde_json::from_str(&std::fs::read_to_string(saved).unwrap()).unwrap();
    assert_eq!(loaded.params["E_gNa"].as_f64(), Some(0.0));
    assert_eq!(loaded.value["E_v"]["spikes"], json!([2]));
}

#[test]
fn sim_ids_restrict_lazy_and_eager_runs() {
    let dir = tempfile::tempdir().unwrap();
    let store = StudyStore::create(dir.path().to_path_buf()).unwrap();
    store.save_study(&sweep()).unwrap();

    for load_all_data in [false, true] {
        let options = DispatchOptions {
            sim_ids: Some(vec![3, 1]),
            load_all_data,
            ..DispatchOptions::default()
        };
        let f = FnFunction::new("calc_gna", gna);
        let report = dispatch(dir.path().into(), &[&f], &[], &options).unwrap();
        let mut ids: Vec<_> = report.functions[0]
            .runs
            .iter()
            .filter_map(|r| r.sim_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![1, 3], "load_all_data = {}", load_all_data);
    }
}

#[test]
fn single_run_uses_result_file_and_varied_name() {
    let dir = tempfile::tempdir().unwrap();
    let record = SimRecord::new(vec![0.0, 1.0, 2.0])
        .with_table("E_v", DMatrix::from_element(3, 2, -65.0))
        .with_varied("E_Iapp", 10.0)
        .with_varied("I_E_tauD", 5.0);

    let stem = dir.path().join("out");
    let options = DispatchOptions {
        save_results: true,
        varied_filename: true,
        format: ImageFormat::Fig,
        result_file: stem.to_string_lossy().into_owned(),
        ..DispatchOptions::default()
    };
    let plot_opts = FunctionOptions::new().with("plot_type", "waveform");
    let report = dispatch(
        record.into(),
        &[&PlotWaveforms],
        std::slice::from_ref(&plot_opts),
        &options,
    )
    .unwrap();

    let expected = dir.path().join("out_waveform_E_Iapp10_I_E_tauD5.fig");
    assert_eq!(report.functions[0].saved, vec![expected.clone()]);
    assert!(expected.exists());
    // a single figure stays open
    assert!(report.functions[0].runs[0].output.figure().is_some());
}

#[test]
fn modification_runs_are_named_by_sanitized_fields() {
    let record = SimRecord::new(vec![0.0, 1.0])
        .with_table("E_v", DMatrix::zeros(2, 1))
        .with_modification(Modification::new("E->I", "gSYN", 0.25));
    let f = FnFunction::new("calc_const", |_: &SimRecord, _: &FunctionOptions| {
        Ok(Output::Data(json!(1)))
    });
    let report = dispatch(record.into(), &[&f], &[], &DispatchOptions::default()).unwrap();
    let derived = report.functions[0].runs[0].output.data().unwrap();
    assert_eq!(derived.varied, vec!["E_I_gSYN".to_string()]);
    assert_eq!(derived.modifications.len(), 1);
}

#[test]
fn unknown_source_is_fatal() {
    let f = FnFunction::new("calc_gna", gna);
    let err = dispatch(
        Source::Path("/no/such/study".into()),
        &[&f],
        &[],
        &DispatchOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, AppError::UnknownSource(_)));
}
