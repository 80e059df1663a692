//! Normalizing input sources into records and study metadata.

use std::path::{Path, PathBuf};

use ns_results::{
    ResultsError, STUDYINFO_FILE, SimId, SimRecord, StudyInfo, StudyStore, load_record_file,
};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::options::DispatchOptions;

/// Anything dispatch can run over.
#[derive(Debug, Clone)]
pub enum Source {
    /// Records already in memory.
    Records(Vec<SimRecord>),
    /// A record file, a `studyinfo.json` file, or a study directory.
    Path(PathBuf),
    /// An already-loaded study index.
    Study(StudyInfo),
}

impl From<SimRecord> for Source {
    fn from(record: SimRecord) -> Self {
        Self::Records(vec![record])
    }
}

impl From<Vec<SimRecord>> for Source {
    fn from(records: Vec<SimRecord>) -> Self {
        Self::Records(records)
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for Source {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<StudyInfo> for Source {
    fn from(info: StudyInfo) -> Self {
        Self::Study(info)
    }
}

/// Output of `resolve`.
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    pub records: Vec<SimRecord>,
    pub study: Option<StudyInfo>,
    pub study_dir: Option<PathBuf>,
    /// Runs reported missing while loading.
    pub missing: Vec<SimId>,
    /// Whether `records` hold the study's runs (as opposed to loading
    /// them one at a time later).
    pub eager: bool,
}

impl Resolved {
    /// Multi-run input: a study, or more than one record.
    pub fn is_post_sim(&self) -> bool {
        self.study.is_some() || self.records.len() > 1
    }

    /// Runs still have to be loaded one at a time from the study.
    pub fn is_lazy(&self) -> bool {
        self.study.is_some() && !self.eager
    }
}

/// Resolve `src` into records and/or a study index.
///
/// In-memory records come back untouched. A study path or index loads every
/// run only when `load_all_data` is set; otherwise only the index is kept.
pub fn resolve(src: Source, options: &DispatchOptions) -> AppResult<Resolved> {
    let resolved = match src {
        Source::Records(records) => Resolved {
            records,
            eager: true,
            ..Resolved::default()
        },
        Source::Study(info) => {
            let store = StudyStore::open(info.study_dir.clone())?;
            from_study(&store, info, options)?
        }
        Source::Path(path) => resolve_path(&path, options)?,
    };

    let resolved = Resolved {
        study_dir: resolved.study_dir.or_else(|| options.study_dir.clone()),
        ..resolved
    };
    debug!(
        records = resolved.records.len(),
        study = resolved.study.is_some(),
        lazy = resolved.is_lazy(),
        "resolved source"
    );
    Ok(resolved)
}

/// Study directory named by `path`: the parent of a studyinfo file, or the
/// path itself when it is a directory.
pub fn study_dir_of(path: &Path) -> Option<PathBuf> {
    if path.file_name().is_some_and(|name| name == STUDYINFO_FILE) {
        return Some(
            path.parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        );
    }
    if path.is_dir() {
        return Some(path.to_path_buf());
    }
    None
}

fn resolve_path(path: &Path, options: &DispatchOptions) -> AppResult<Resolved> {
    if let Some(dir) = study_dir_of(path) {
        let store = StudyStore::open(dir)?;
        if !store.has_studyinfo() {
            return Err(AppError::UnknownSource(format!(
                "{} holds no {}",
                path.display(),
                STUDYINFO_FILE
            )));
        }
        let info = store.load_studyinfo()?;
        return from_study(&store, info, options);
    }

    if path.is_file() {
        let records = load_record_file(path)?;
        return Ok(Resolved {
            records,
            eager: true,
            ..Resolved::default()
        });
    }

    Err(AppError::UnknownSource(format!(
        "{} is neither a record file nor a study",
        path.display()
    )))
}

fn from_study(
    store: &StudyStore,
    info: StudyInfo,
    options: &DispatchOptions,
) -> AppResult<Resolved> {
    let study_dir = Some(store.study_dir().to_path_buf());
    if !options.load_all_data {
        return Ok(Resolved {
            study: Some(info),
            study_dir,
            ..Resolved::default()
        });
    }

    let mut records = Vec::new();
    let mut missing = Vec::new();
    for entry in &info.simulations {
        if !wanted(entry.sim_id, options.sim_ids.as_deref()) {
            continue;
        }
        match store.load_sim(entry) {
            Ok(record) => records.push(record),
            Err(ResultsError::SimNotFound { sim_id, path }) => {
                info!(sim_id, path = %path.display(), "simulation data missing, skipping");
                missing.push(sim_id);
            }
            Err(e) => {
                warn!(sim_id = entry.sim_id, error = %e, "failed to load simulation, skipping");
                missing.push(entry.sim_id);
            }
        }
    }

    Ok(Resolved {
        records,
        study: Some(info),
        study_dir,
        missing,
        eager: true,
    })
}

pub(crate) fn wanted(sim_id: SimId, sim_ids: Option<&[SimId]>) -> bool {
    sim_ids.is_none_or(|ids| ids.contains(&sim_id))
}
