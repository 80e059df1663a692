use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ns_app::builtin::{BUILTIN_NAMES, builtin};
use ns_app::options::parse_time_limits;
use ns_app::resolve::study_dir_of;
use ns_app::{
    AnalysisConfig, AppError, AppResult, DispatchOptions, DispatchReport, RoiFilter,
    SelectOptions, SimFunction, Source, VariedFilter, dispatch, load_config, resolve, select,
    summarize,
};
use ns_results::{ImageFormat, ResultsError, SimRecord, StudyStore, save_record_file};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ns-cli")]
#[command(about = "neurosweep CLI - select and analyze simulation results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a record file or study
    Inspect {
        /// Record file, studyinfo.json or study directory
        src: PathBuf,
        /// Also load and summarize every run of a study
        #[arg(long)]
        runs: bool,
    },
    /// Narrow records and write them to a file
    Select {
        /// Record file, studyinfo.json or study directory
        src: PathBuf,
        /// Output record file
        #[arg(short, long)]
        out: PathBuf,
        /// Time window as low:high (either side may be empty)
        #[arg(long)]
        time: Option<String>,
        /// Varied filter: name=low:high or name=v1,v2,...
        #[arg(long)]
        varied: Option<VariedFilter>,
        /// Cell range of one label: label=low:high
        #[arg(long)]
        roi: Vec<RoiFilter>,
    },
    /// Apply built-in analysis or plot functions
    Analyze {
        /// Record file, studyinfo.json or study directory
        src: PathBuf,
        /// Function to apply (repeatable)
        #[arg(short, long = "function", required = true)]
        functions: Vec<String>,
        /// Options file (YAML, or JSON for .json)
        #[arg(long)]
        options: Option<PathBuf>,
        /// Save outputs to disk
        #[arg(long)]
        save: bool,
        /// Figure format
        #[arg(long)]
        format: Option<ImageFormat>,
        /// Load every run up front instead of one at a time
        #[arg(long)]
        load_all: bool,
        /// Evaluate runs on a worker pool of this many threads
        #[arg(long)]
        parallel: Option<usize>,
    },
}

fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { src, runs } => cmd_inspect(&src, runs),
        Commands::Select {
            src,
            out,
            time,
            varied,
            roi,
        } => cmd_select(&src, &out, time.as_deref(), varied, roi),
        Commands::Analyze {
            src,
            functions,
            options,
            save,
            format,
            load_all,
            parallel,
        } => cmd_analyze(
            &src,
            &functions,
            options.as_deref(),
            AnalyzeFlags {
                save,
                format,
                load_all,
                parallel,
            },
        ),
    }
}

/// Every record of `src`, loading a study eagerly.
fn load_records(src: &Path) -> AppResult<Vec<SimRecord>> {
    let options = DispatchOptions {
        load_all_data: true,
        ..DispatchOptions::default()
    };
    let resolved = resolve(Source::Path(src.to_path_buf()), &options)?;
    for sim_id in &resolved.missing {
        println!("  sim{} missing, skipped", sim_id);
    }
    Ok(resolved.records)
}

/// Studies are summarized from their index; run data is read only with
/// `load_runs`, one run at a time.
fn cmd_inspect(src: &Path, load_runs: bool) -> AppResult<()> {
    let resolved = resolve(Source::Path(src.to_path_buf()), &DispatchOptions::default())?;
    let Some(study) = resolved.study.as_ref().filter(|_| resolved.is_lazy()) else {
        if resolved.records.is_empty() {
            println!("No records found");
        }
        for (idx, record) in resolved.records.iter().enumerate() {
            print_summary(idx, record);
        }
        return Ok(());
    };

    println!("Study: {}", study.study_dir.display());
    if let Some(created) = &study.created {
        println!("  created: {}", created);
    }
    println!("  {} simulations", study.simulations.len());
    for entry in &study.simulations {
        println!(
            "  sim{}: {} ({} modifications)",
            entry.sim_id,
            entry.data_file.display(),
            entry.modifications.len()
        );
    }
    if !load_runs {
        return Ok(());
    }

    let store = StudyStore::open(study.study_dir.clone())?;
    for (idx, entry) in study.simulations.iter().enumerate() {
        match store.load_sim(entry) {
            Ok(record) => print_summary(idx, &record),
            Err(ResultsError::SimNotFound { .. }) => {
                println!("  sim{} missing, skipped", entry.sim_id)
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn print_summary(idx: usize, record: &SimRecord) {
    let summary = summarize(record);
    let id = summary.sim_id.map_or_else(|| format!("#{}", idx + 1), |id| format!("sim{}", id));
    let window = match summary.time_range {
        Some((first, last)) => format!("t = [{}, {}]", first, last),
        None => "no samples".to_string(),
    };
    println!("{} ({} samples, {})", id, summary.sample_count, window);
    for (label, cells) in &summary.cells {
        println!("    {}: {} cells", label, cells);
    }
    if !summary.varied.is_empty() {
        let point: Vec<String> = summary
            .varied
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        println!("    varied: {}", point.join(", "));
    }
}

fn cmd_select(
    src: &Path,
    out: &Path,
    time: Option<&str>,
    varied: Option<VariedFilter>,
    roi: Vec<RoiFilter>,
) -> AppResult<()> {
    let mut options = SelectOptions {
        roi,
        ..SelectOptions::default()
    };
    if let Some(time) = time {
        options.time_limits = parse_time_limits(time)?;
    }
    options.varied.extend(varied);

    let records = load_records(src)?;
    let selected = select(&records, &options)?;
    save_record_file(out, &selected)?;
    println!(
        "✓ Wrote {} of {} records to {}",
        selected.len(),
        records.len(),
        out.display()
    );
    Ok(())
}

struct AnalyzeFlags {
    save: bool,
    format: Option<ImageFormat>,
    load_all: bool,
    parallel: Option<usize>,
}

fn cmd_analyze(
    src: &Path,
    names: &[String],
    options_path: Option<&Path>,
    flags: AnalyzeFlags,
) -> AppResult<()> {
    let mut config = match options_path {
        Some(path) => load_config(path)?,
        None => AnalysisConfig::default(),
    };
    config.options.save_results |= flags.save;
    config.options.load_all_data |= flags.load_all;
    if let Some(format) = flags.format {
        config.options.format = format;
    }
    config.options.parallel |= flags.parallel.is_some();

    let functions = names
        .iter()
        .map(|name| {
            builtin(name).ok_or_else(|| {
                AppError::InvalidOption(format!(
                    "unknown function '{}' (available: {})",
                    name,
                    BUILTIN_NAMES.join(", ")
                ))
            })
        })
        .collect::<AppResult<Vec<Arc<dyn SimFunction>>>>()?;
    let refs: Vec<&dyn SimFunction> = functions.iter().map(|f| f.as_ref()).collect();

    let source = match &config.select {
        Some(select_options) => {
            let records = load_records(src)?;
            Source::Records(select(&records, select_options)?)
        }
        None => Source::Path(src.to_path_buf()),
    };
    if config.options.study_dir.is_none() {
        config.options.study_dir = study_dir_of(src);
    }

    let run = || dispatch(source, &refs, &config.function_options, &config.options);
    let report = match flags.parallel {
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| AppError::InvalidOption(format!("worker pool: {}", e)))?;
            info!(threads = pool.current_num_threads(), "starting worker pool");
            pool.install(run)?
        }
        None => run()?,
    };

    print_report(&report);
    Ok(())
}

fn print_report(report: &DispatchReport) {
    for function in &report.functions {
        println!(
            "{} ({:?}): {} runs, {} failed",
            function.function,
            function.kind,
            function.runs.len(),
            function.failures
        );
        for run in &function.runs {
            let Some(derived) = run.output.data() else {
                continue;
            };
            let id = run.sim_id.map_or_else(|| "-".to_string(), |id| format!("sim{}", id));
            println!("  {}: {}", id, serde_json::to_string(&derived.value).unwrap_or_default());
        }
        for path in &function.saved {
            println!("  ✓ saved {}", path.display());
        }
        for path in &function.kept_existing {
            println!("  kept existing {}", path.display());
        }
        for sim_id in &function.missing {
            println!("  sim{} missing, skipped", sim_id);
        }
        for failure in &function.save_failures {
            let id = failure
                .sim_id
                .map_or_else(|| "-".to_string(), |id| format!("sim{}", id));
            println!("  ✗ {} not saved: {}", id, failure.message);
        }
    }
    if report.total_failures() > 0 {
        println!("{} function calls failed", report.total_failures());
    }
    if report.total_save_failures() > 0 {
        println!("{} outputs could not be saved", report.total_save_failures());
    }
}
