//! Tracking backend contract
//!
//! The backend persists runs, experiments, metrics, parameters, tags and
//! artifacts. The engine only depends on the [`Backend`] trait; the
//! [`InMemoryBackend`] implementation keeps everything in process memory
//! and is what tests and local experiments run against.
//!
//! Backends keep a stack of active runs: starting a nested run pushes onto
//! it, ending a run pops it, so the parent becomes active again.

mod memory;
mod meta;

pub use memory::InMemoryBackend;
pub use meta::{
    is_meta_path, meta_name, ArtifactMeta, FileFormat, MetaKind, MetricMeta, ParameterMeta,
    TagMeta, META_SUFFIX,
};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Finished,
}

/// Identity and status of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub experiment_id: String,
    #[serde(default)]
    pub run_name: Option<String>,
    /// Run that was active when this run was started as nested
    #[serde(default)]
    pub parent_run_id: Option<String>,
    pub status: RunStatus,
    pub start_time_ms: u64,
    #[serde(default)]
    pub end_time_ms: Option<u64>,
}

impl RunInfo {
    pub fn is_nested(&self) -> bool {
        self.parent_run_id.is_some()
    }
}

/// Latest logged values of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunData {
    pub metrics: BTreeMap<String, f64>,
    pub params: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub info: RunInfo,
    pub data: RunData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
}

/// One entry of a metric history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub value: f64,
    pub step: u64,
    pub timestamp_ms: u64,
}

/// Entry of an artifact directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub is_dir: bool,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// Parameters of a run start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartRun {
    /// Existing run to resume; a new run is created when `None`
    pub run_id: Option<String>,
    pub experiment_id: Option<String>,
    pub run_name: Option<String>,
    pub nested: bool,
}

impl StartRun {
    /// Request that makes an existing run active again
    pub fn resume(run_id: &str) -> Self {
        Self {
            run_id: Some(run_id.to_string()),
            ..Self::default()
        }
    }
}

/// Persistent storage for runs and everything logged into them
pub trait Backend: Send + Sync {
    // ---- run lifecycle ----

    /// Start (or resume) a run and make it active
    fn start_run(&self, request: &StartRun) -> Result<RunInfo>;

    /// End the active run; returns it, or `None` if no run was active
    fn end_run(&self) -> Result<Option<RunInfo>>;

    fn active_run(&self) -> Option<RunInfo>;

    /// Id of the experiment called `name`, created if missing
    fn get_or_create_experiment(&self, name: &str) -> Result<String>;

    // ---- write path ----

    fn log_metric(&self, run_id: &str, value: f64, meta: &MetricMeta) -> Result<()>;

    fn log_param(&self, run_id: &str, value: &str, meta: &ParameterMeta) -> Result<()>;

    fn set_tag(&self, run_id: &str, value: &str, meta: &TagMeta) -> Result<()>;

    /// Copy a local file into the run's artifacts at `meta.path`
    fn log_artifact(&self, run_id: &str, local_path: &Path, meta: &ArtifactMeta) -> Result<()>;

    /// Store in-memory content as an artifact at `meta.path`
    fn log_mem_artifact(&self, run_id: &str, content: &[u8], meta: &ArtifactMeta) -> Result<()>;

    // ---- read path ----

    fn get_run(&self, run_id: &str) -> Result<Run>;

    fn list_experiments(&self) -> Result<Vec<Experiment>>;

    fn list_run_infos(&self, experiment_id: &str) -> Result<Vec<RunInfo>>;

    /// Direct children of `path` (or of the artifact root)
    fn list_artifacts(&self, run_id: &str, path: Option<&str>) -> Result<Vec<FileInfo>>;

    fn read_artifact(&self, run_id: &str, path: &str) -> Result<Vec<u8>>;

    fn get_metric_history(&self, run_id: &str, key: &str) -> Result<Vec<MetricPoint>>;
}
