//! Applying analysis and plot functions over simulation results.
//!
//! A dispatch resolves its source once, then runs each function in turn.
//! Loaded records are evaluated together (on the active rayon pool when
//! parallel evaluation is requested). A study that was not loaded eagerly is
//! walked one simulation at a time: load, evaluate, save, release.
//!
//! A failing function call yields an empty output for that run and a
//! warning; a missing run file is skipped; a failed write is recorded in
//! the report. None of these abort the dispatch. A plot function that
//! cannot produce the requested figure format is rejected up front.

use std::fmt;
use std::path::PathBuf;

use ns_results::{
    DerivedResult, Figure, FunctionOptions, POST_SIM_PLOTS_DIR, POST_SIM_RESULTS_DIR,
    ResultsError, SimId, SimRecord, StudyInfo, StudyStore, WriteOutcome, save_derived,
    save_figure,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::annotate::{annotate, sweep_point};
use crate::error::{AppError, AppResult};
use crate::functions::{CallKind, FunctionError, Output, SimFunction, classify};
use crate::naming::{effective_prefix, name_from_varied, post_sim_file_name};
use crate::options::DispatchOptions;
use crate::resolve::{Resolved, Source, resolve, wanted};

const DEFAULT_STUDY_PREFIX: &str = "study";

/// What one run produced for one function.
pub enum RunOutput {
    Empty,
    Figure(Box<dyn Figure>),
    Data(DerivedResult),
    /// Figure that was saved and then closed.
    Released,
}

impl RunOutput {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn data(&self) -> Option<&DerivedResult> {
        match self {
            Self::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn figure(&self) -> Option<&dyn Figure> {
        match self {
            Self::Figure(f) => Some(f.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Debug for RunOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Figure(fig) => write!(f, "Figure({})", fig.name()),
            Self::Data(d) => write!(f, "Data({:?})", d),
            Self::Released => write!(f, "Released"),
        }
    }
}

/// A run whose output could not be written.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveFailure {
    pub sim_id: Option<SimId>,
    pub message: String,
}

#[derive(Debug)]
pub struct RunEntry {
    pub sim_id: Option<SimId>,
    pub output: RunOutput,
}

/// Outcome of one function over every run.
#[derive(Debug)]
pub struct FunctionReport {
    pub function: String,
    pub kind: CallKind,
    /// One entry per evaluated run, in source order.
    pub runs: Vec<RunEntry>,
    pub saved: Vec<PathBuf>,
    /// Outputs not written because the target existed.
    pub kept_existing: Vec<PathBuf>,
    pub save_failures: Vec<SaveFailure>,
    /// Calls that failed and were replaced by an empty output.
    pub failures: usize,
    /// Simulations skipped because their data could not be loaded.
    pub missing: Vec<SimId>,
}

impl FunctionReport {
    fn new(function: &str, kind: CallKind) -> Self {
        Self {
            function: function.to_string(),
            kind,
            runs: Vec::new(),
            saved: Vec::new(),
            kept_existing: Vec::new(),
            save_failures: Vec::new(),
            failures: 0,
            missing: Vec::new(),
        }
    }

    fn record_write(
        &mut self,
        sim_id: Option<SimId>,
        outcome: AppResult<Option<WriteOutcome>>,
    ) {
        match outcome {
            Ok(Some(WriteOutcome::Written(path))) => self.saved.push(path),
            Ok(Some(WriteOutcome::Skipped(path))) => self.kept_existing.push(path),
            Ok(None) => {}
            Err(e) => {
                warn!(function = %self.function, ?sim_id, error = %e, "failed to save output");
                self.save_failures.push(SaveFailure {
                    sim_id,
                    message: e.to_string(),
                });
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub functions: Vec<FunctionReport>,
}

impl DispatchReport {
    pub fn function(&self, name: &str) -> Option<&FunctionReport> {
        self.functions.iter().find(|f| f.function == name)
    }

    pub fn total_failures(&self) -> usize {
        self.functions.iter().map(|f| f.failures).sum()
    }

    pub fn total_save_failures(&self) -> usize {
        self.functions.iter().map(|f| f.save_failures.len()).sum()
    }
}

/// Apply `functions` to the runs of `src`.
///
/// `function_options[i]` is handed to `functions[i]`; missing entries mean
/// no options. Options are validated before anything is loaded.
pub fn dispatch(
    src: Source,
    functions: &[&dyn SimFunction],
    function_options: &[FunctionOptions],
    options: &DispatchOptions,
) -> AppResult<DispatchReport> {
    options.validate(functions.len(), function_options.len())?;
    let kinds: Vec<CallKind> = functions
        .iter()
        .enumerate()
        .map(|(idx, function)| {
            let explicit = options.plot_flags.as_ref().map(|flags| flags[idx]);
            classify(*function, explicit)
        })
        .collect();
    check_formats(functions, &kinds, options)?;

    let resolved = resolve(src, options)?;
    let post_sim = resolved.is_post_sim();
    let records = if resolved.is_lazy() {
        Vec::new()
    } else {
        numbered_records(&resolved, options)
    };
    let output_dir = resolved
        .study_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    let empty = FunctionOptions::default();
    let mut report = DispatchReport::default();
    for (idx, function) in functions.iter().enumerate() {
        let job = Job {
            index: idx + 1,
            function: *function,
            kind: kinds[idx],
            function_options: function_options.get(idx).unwrap_or(&empty),
            options,
            post_sim,
            output_dir: output_dir.clone(),
        };
        debug!(
            function = function.name(),
            kind = ?job.kind,
            post_sim,
            lazy = resolved.is_lazy(),
            "dispatching function"
        );

        let mut function_report = match &resolved.study {
            Some(study) if resolved.is_lazy() => job.run_lazy(study)?,
            _ => job.run_loaded(&records)?,
        };
        function_report
            .missing
            .extend(resolved.missing.iter().copied());
        report.functions.push(function_report);
    }

    Ok(report)
}

/// Plot functions whose figures cannot be saved in the requested format.
fn check_formats(
    functions: &[&dyn SimFunction],
    kinds: &[CallKind],
    options: &DispatchOptions,
) -> AppResult<()> {
    if !options.save_results {
        return Ok(());
    }
    for (function, kind) in functions.iter().zip(kinds) {
        if *kind == CallKind::Plot && !function.supports_format(options.format) {
            return Err(AppError::InvalidOption(format!(
                "{} cannot save figures as {}",
                function.name(),
                options.format
            )));
        }
    }
    Ok(())
}

/// Loaded records restricted to `sim_ids`, each carrying a sim id
/// (position + 1 when the source had none).
fn numbered_records(resolved: &Resolved, options: &DispatchOptions) -> Vec<SimRecord> {
    resolved
        .records
        .iter()
        .enumerate()
        .filter_map(|(idx, record)| {
            let sim_id = record.sim_id.unwrap_or(idx as SimId + 1);
            if !wanted(sim_id, options.sim_ids.as_deref()) {
                return None;
            }
            let mut record = record.clone();
            record.sim_id = Some(sim_id);
            Some(record)
        })
        .collect()
}

/// Evaluate `function` on every record, keeping input order.
///
/// Runs on the current rayon pool only when `parallel` is set and this
/// thread already belongs to one; no pool is ever created here.
pub fn evaluate(
    function: &dyn SimFunction,
    records: &[SimRecord],
    options: &FunctionOptions,
    parallel: bool,
) -> Vec<Result<Output, FunctionError>> {
    if parallel && rayon::current_thread_index().is_some() {
        debug!(
            threads = rayon::current_num_threads(),
            runs = records.len(),
            "evaluating on active worker pool"
        );
        return records
            .par_iter()
            .map(|record| function.call(record, options))
            .collect();
    }
    if parallel {
        debug!("no active worker pool, evaluating sequentially");
    }
    records
        .iter()
        .map(|record| function.call(record, options))
        .collect()
}

struct Job<'a> {
    /// 1-based position of the function in the dispatch.
    index: usize,
    function: &'a dyn SimFunction,
    kind: CallKind,
    function_options: &'a FunctionOptions,
    options: &'a DispatchOptions,
    post_sim: bool,
    output_dir: PathBuf,
}

impl Job<'_> {
    fn name(&self) -> &str {
        self.function.name()
    }

    fn run_loaded(&self, records: &[SimRecord]) -> AppResult<FunctionReport> {
        let mut report = FunctionReport::new(self.name(), self.kind);
        let results = evaluate(
            self.function,
            records,
            self.function_options,
            self.options.parallel,
        );

        for (record, result) in records.iter().zip(results) {
            let output = self.finish(record, result, &mut report.failures);
            report.runs.push(RunEntry {
                sim_id: record.sim_id,
                output,
            });
        }

        if self.options.save_results {
            let close = self.options.close_figures && records.len() > 1;
            for (idx, record) in records.iter().enumerate() {
                let outcome = self.persist(record, &report.runs[idx].output);
                report.record_write(record.sim_id, outcome);
                if close {
                    release(&mut report.runs[idx].output);
                }
            }
        }

        Ok(report)
    }

    /// One run at a time: load, call, save, then close any figure so only
    /// one run's data and figure are alive at once. Figures are closed even
    /// when nothing is saved.
    fn run_lazy(&self, study: &StudyInfo) -> AppResult<FunctionReport> {
        let mut report = FunctionReport::new(self.name(), self.kind);
        let store = StudyStore::open(study.study_dir.clone())?;
        let sim_ids = match &self.options.sim_ids {
            Some(ids) => ids.clone(),
            None => study.sim_ids(),
        };

        for sim_id in sim_ids {
            let Some(entry) = study.find(sim_id) else {
                info!(sim_id, "simulation not listed in study, skipping");
                report.missing.push(sim_id);
                continue;
            };
            let record = match store.load_sim(entry) {
                Ok(record) => record,
                Err(ResultsError::SimNotFound { path, .. }) => {
                    info!(sim_id, path = %path.display(), "simulation data missing, skipping");
                    report.missing.push(sim_id);
                    continue;
                }
                Err(e) => {
                    warn!(sim_id, error = %e, "failed to load simulation, skipping");
                    report.missing.push(sim_id);
                    continue;
                }
            };

            let result = self.function.call(&record, self.function_options);
            let mut output = self.finish(&record, result, &mut report.failures);
            if self.options.save_results {
                let outcome = self.persist(&record, &output);
                report.record_write(Some(sim_id), outcome);
            }
            release(&mut output);
            report.runs.push(RunEntry {
                sim_id: Some(sim_id),
                output,
            });
        }

        Ok(report)
    }

    /// Turn a call result into a run output: failures become empty,
    /// data is annotated with the run's sweep point.
    fn finish(
        &self,
        record: &SimRecord,
        result: Result<Output, FunctionError>,
        failures: &mut usize,
    ) -> RunOutput {
        match result {
            Err(e) => {
                warn!(
                    function = self.name(),
                    sim_id = ?record.sim_id,
                    error = %e,
                    "function failed, using empty result"
                );
                *failures += 1;
                RunOutput::Empty
            }
            Ok(Output::Empty) => RunOutput::Empty,
            Ok(Output::Figure(figure)) => RunOutput::Figure(figure),
            Ok(Output::Data(value)) => {
                let mut derived = DerivedResult::new(self.name(), value);
                derived.options = self.function_options.clone();
                annotate(
                    std::slice::from_mut(&mut derived),
                    std::slice::from_ref(record),
                );
                RunOutput::Data(derived)
            }
        }
    }

    fn persist(&self, record: &SimRecord, output: &RunOutput) -> AppResult<Option<WriteOutcome>> {
        let outcome = match (self.kind, output) {
            (CallKind::Plot, RunOutput::Figure(figure)) => Some(save_figure(
                figure.as_ref(),
                &self.output_path(record),
                self.options.format,
                self.options.overwrite,
            )?),
            (CallKind::Analysis, RunOutput::Data(derived)) => Some(save_derived(
                derived,
                &self.output_path(record),
                self.options.overwrite,
            )?),
            (_, RunOutput::Empty | RunOutput::Released) => None,
            (kind, other) => {
                debug!(
                    function = self.name(),
                    ?kind,
                    output = ?other,
                    "output does not match function kind, not saved"
                );
                None
            }
        };
        Ok(outcome)
    }

    fn output_path(&self, record: &SimRecord) -> PathBuf {
        let extension = match self.kind {
            CallKind::Plot => self.options.format.extension(),
            CallKind::Analysis => "json",
        };
        let (varied, params) = sweep_point(record);

        if self.post_sim {
            let prefix = self
                .options
                .save_prefix
                .as_deref()
                .unwrap_or(DEFAULT_STUDY_PREFIX);
            let stem = if self.options.varied_filename {
                name_from_varied(prefix, "", &varied, &params)
            } else {
                prefix.to_string()
            };
            let subdir = match self.kind {
                CallKind::Plot => POST_SIM_PLOTS_DIR,
                CallKind::Analysis => POST_SIM_RESULTS_DIR,
            };
            let file = post_sim_file_name(
                &stem,
                record.sim_id.unwrap_or(1),
                self.kind,
                self.index,
                self.name(),
                extension,
            );
            return self.output_dir.join(subdir).join(file);
        }

        let stem = if self.options.varied_filename {
            let inferred = match self.kind {
                CallKind::Plot => self
                    .function_options
                    .get_str("plot_type")
                    .unwrap_or(self.name()),
                CallKind::Analysis => self.name(),
            };
            let prefix = effective_prefix(inferred, self.options.save_prefix.as_deref());
            name_from_varied(&self.options.result_file, prefix, &varied, &params)
        } else {
            self.options.result_file.clone()
        };
        PathBuf::from(format!("{}.{}", stem, extension))
    }
}

/// Close a saved figure and drop it.
fn release(output: &mut RunOutput) {
    if !matches!(output, RunOutput::Figure(_)) {
        return;
    }
    if let RunOutput::Figure(mut figure) = std::mem::replace(output, RunOutput::Released) {
        figure.close();
    }
}
