//! Result data types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use nalgebra::DMatrix;
use ns_core::{NsError, NsResult};
use serde::{Deserialize, Serialize};

pub type SimId = u32;

/// Value of a swept or modified model parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Ad-hoc override applied to one run, outside of a formal sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub target: String,
    pub parameter: String,
    pub value: ParamValue,
}

impl Modification {
    pub fn new(
        target: impl Into<String>,
        parameter: impl Into<String>,
        value: impl Into<ParamValue>,
    ) -> Self {
        Self {
            target: target.into(),
            parameter: parameter.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulatorOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifications: Vec<Modification>,
}

/// Output of one simulation run.
///
/// Every table has one row per entry of `time` and one column per cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sim_id: Option<SimId>,
    pub time: Vec<f64>,
    pub labels: Vec<String>,
    pub tables: BTreeMap<String, DMatrix<f64>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub varied: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub simulator_options: SimulatorOptions,
}

impl SimRecord {
    pub fn new(time: Vec<f64>) -> Self {
        Self {
            sim_id: None,
            time,
            labels: Vec::new(),
            tables: BTreeMap::new(),
            varied: Vec::new(),
            params: BTreeMap::new(),
            simulator_options: SimulatorOptions::default(),
        }
    }

    pub fn with_sim_id(mut self, sim_id: SimId) -> Self {
        self.sim_id = Some(sim_id);
        self
    }

    /// Add (or replace) a labeled table.
    pub fn with_table(mut self, label: impl Into<String>, table: DMatrix<f64>) -> Self {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label.clone());
        }
        self.tables.insert(label, table);
        self
    }

    /// Mark `name` as a swept parameter of this run.
    pub fn with_varied(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        let name = name.into();
        if !self.varied.contains(&name) {
            self.varied.push(name.clone());
        }
        self.params.insert(name, value.into());
        self
    }

    pub fn with_modification(mut self, modification: Modification) -> Self {
        self.simulator_options.modifications.push(modification);
        self
    }

    pub fn table(&self, label: &str) -> Option<&DMatrix<f64>> {
        self.tables.get(label)
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn modifications(&self) -> &[Modification] {
        &self.simulator_options.modifications
    }

    pub fn is_swept(&self) -> bool {
        !self.varied.is_empty()
    }

    /// Check the structural invariants of a record.
    pub fn validate(&self) -> NsResult<()> {
        for label in &self.labels {
            let table = self.tables.get(label).ok_or_else(|| NsError::MissingField {
                what: format!("table for label '{}'", label),
            })?;
            if table.nrows() != self.time.len() {
                return Err(NsError::ShapeMismatch {
                    what: label.clone(),
                    expected: self.time.len(),
                    found: table.nrows(),
                });
            }
        }
        if let Some(extra) = self.tables.keys().find(|k| !self.labels.contains(k)) {
            return Err(NsError::MissingField {
                what: format!("label entry for table '{}'", extra),
            });
        }
        for name in &self.varied {
            if !self.params.contains_key(name) {
                return Err(NsError::MissingField {
                    what: format!("value of varied parameter '{}'", name),
                });
            }
        }
        Ok(())
    }
}

/// One run registered in a study directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationEntry {
    pub sim_id: SimId,
    /// Data file, relative to the study directory.
    pub data_file: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifications: Vec<Modification>,
}

/// Index over the runs of an on-disk study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyInfo {
    pub study_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default)]
    pub simulations: Vec<SimulationEntry>,
}

impl StudyInfo {
    pub fn find(&self, sim_id: SimId) -> Option<&SimulationEntry> {
        self.simulations.iter().find(|s| s.sim_id == sim_id)
    }

    pub fn sim_ids(&self) -> Vec<SimId> {
        self.simulations.iter().map(|s| s.sim_id).collect()
    }
}

/// Ordered key/value options handed to an analysis or plot function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionOptions(pub BTreeMap<String, serde_json::Value>);

impl FunctionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flattened key/value pairs, in key order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Output of an analysis function, annotated with the sweep point it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedResult {
    pub function: String,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub varied: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifications: Vec<Modification>,
    #[serde(default)]
    pub options: FunctionOptions,
}

impl DerivedResult {
    pub fn new(function: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            function: function.into(),
            value,
            varied: Vec::new(),
            params: BTreeMap::new(),
            modifications: Vec::new(),
            options: FunctionOptions::default(),
        }
    }
}
