//! Study directory storage API.

use crate::types::{SimId, SimRecord, SimulationEntry, StudyInfo};
use crate::{ResultsError, ResultsResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const STUDYINFO_FILE: &str = "studyinfo.json";
pub const POST_SIM_PLOTS_DIR: &str = "postSimPlots";
pub const POST_SIM_RESULTS_DIR: &str = "postSimResults";
const DATA_DIR: &str = "data";

/// Create `dir` and its parents; a concurrent creator winning the race is fine.
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone)]
pub struct StudyStore {
    study_dir: PathBuf,
}

impl StudyStore {
    /// Open a study directory, creating it when missing.
    pub fn create(study_dir: PathBuf) -> ResultsResult<Self> {
        ensure_dir(&study_dir)?;
        Ok(Self { study_dir })
    }

    /// Open an existing study directory.
    pub fn open(study_dir: PathBuf) -> ResultsResult<Self> {
        if !study_dir.is_dir() {
            return Err(ResultsError::InvalidPath {
                message: format!("study directory {} does not exist", study_dir.display()),
            });
        }
        Ok(Self { study_dir })
    }

    pub fn study_dir(&self) -> &Path {
        &self.study_dir
    }

    pub fn studyinfo_path(&self) -> PathBuf {
        self.study_dir.join(STUDYINFO_FILE)
    }

    pub fn has_studyinfo(&self) -> bool {
        self.studyinfo_path().exists()
    }

    pub fn plots_dir(&self) -> PathBuf {
        self.study_dir.join(POST_SIM_PLOTS_DIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.study_dir.join(POST_SIM_RESULTS_DIR)
    }

    /// Write every record plus the study index. Records without a
    /// `sim_id` are numbered by position, starting at 1.
    pub fn save_study(&self, records: &[SimRecord]) -> ResultsResult<StudyInfo> {
        let data_dir = self.study_dir.join(DATA_DIR);
        ensure_dir(&data_dir)?;

        let mut simulations = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            record.validate()?;
            let sim_id = record.sim_id.unwrap_or(idx as SimId + 1);
            let data_file = PathBuf::from(DATA_DIR).join(format!("sim{}.json", sim_id));

            let mut stored = record.clone();
            stored.sim_id = Some(sim_id);
            let json = serde_json::to_string(&stored)?;
            fs::write(self.study_dir.join(&data_file), json)?;

            simulations.push(SimulationEntry {
                sim_id,
                data_file,
                modifications: record.modifications().to_vec(),
            });
        }

        let info = StudyInfo {
            study_dir: self.study_dir.clone(),
            created: Some(chrono::Utc::now().to_rfc3339()),
            simulations,
        };
        let info_json = serde_json::to_string_pretty(&info)?;
        fs::write(self.studyinfo_path(), info_json)?;

        Ok(info)
    }

    /// Load the study index. `study_dir` is re-pointed at the directory the
    /// index was actually read from, so moved studies stay loadable.
    pub fn load_studyinfo(&self) -> ResultsResult<StudyInfo> {
        let path = self.studyinfo_path();
        if !path.exists() {
            return Err(ResultsError::InvalidPath {
                message: format!("no {} in {}", STUDYINFO_FILE, self.study_dir.display()),
            });
        }
        let content = fs::read_to_string(path)?;
        let mut info: StudyInfo = serde_json::from_str(&content)?;
        info.study_dir = self.study_dir.clone();
        Ok(info)
    }

    /// Load one run of the study.
    pub fn load_sim(&self, entry: &SimulationEntry) -> ResultsResult<SimRecord> {
        let path = self.study_dir.join(&entry.data_file);
        if !path.exists() {
            return Err(ResultsError::SimNotFound {
                sim_id: entry.sim_id,
                path,
            });
        }
        let content = fs::read_to_string(&path)?;
        let mut record: SimRecord = serde_json::from_str(&content)?;
        record.sim_id.get_or_insert(entry.sim_id);
        Ok(record)
    }

    /// Load every run listed in the study index, in index order.
    pub fn load_all(&self, info: &StudyInfo) -> ResultsResult<Vec<SimRecord>> {
        info.simulations
            .iter()
            .map(|entry| self.load_sim(entry))
            .collect()
    }
}

/// Import a persisted record file holding one record or an array of records.
pub fn load_record_file(path: &Path) -> ResultsResult<Vec<SimRecord>> {
    let content = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let records = if value.is_array() {
        serde_json::from_value::<Vec<SimRecord>>(value)?
    } else {
        vec![serde_json::from_value::<SimRecord>(value)?]
    };
    for record in &records {
        record.validate()?;
    }
    Ok(records)
}

/// Write records to a single JSON file (one object, or an array when
/// there are several).
pub fn save_record_file(path: &Path, records: &[SimRecord]) -> ResultsResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    let json = match records {
        [single] => serde_json::to_string_pretty(single)?,
        _ => serde_json::to_string_pretty(records)?,
    };
    fs::write(path, json)?;
    Ok(())
}
