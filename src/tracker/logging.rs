// Logging primitives
//
// Every write goes to the backend first; the meta record is then stored
// as a JSON artifact under the deterministic name from `meta_name`, so it
// can be read back later by key alone.

use crate::backend::{
    meta_name, ArtifactMeta, FileFormat, MetaKind, MetricMeta, ParameterMeta, RunInfo, TagMeta,
};
use crate::error::{Result, TrackError};
use crate::tracker::Tracker;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

impl Tracker {
    fn require_run(&self) -> Result<RunInfo> {
        self.active_run().ok_or(TrackError::NoActiveRun)
    }

    pub(crate) fn resolve_run_id(&self, run_id: Option<&str>) -> Result<String> {
        match run_id {
            Some(id) => Ok(id.to_string()),
            None => Ok(self.require_run()?.run_id),
        }
    }

    pub fn log_metric(&self, value: f64, meta: MetricMeta) -> Result<()> {
        let run = self.require_run()?;
        self.backend().log_metric(&run.run_id, value, &meta)?;
        self.write_meta(&run.run_id, MetaKind::Metric, &meta.name, &meta)
    }

    pub fn log_param(&self, value: &str, meta: ParameterMeta) -> Result<()> {
        let run = self.require_run()?;
        self.backend().log_param(&run.run_id, value, &meta)?;
        self.write_meta(&run.run_id, MetaKind::Parameter, &meta.name, &meta)
    }

    pub fn set_tag(&self, value: &str, meta: TagMeta) -> Result<()> {
        let run = self.require_run()?;
        self.backend().set_tag(&run.run_id, value, &meta)?;
        self.write_meta(&run.run_id, MetaKind::Tag, &meta.name, &meta)
    }

    /// Copy a local file into the active run's artifacts
    pub fn log_artifact(&self, local_path: &Path, meta: ArtifactMeta) -> Result<()> {
        let run = self.require_run()?;
        self.backend().log_artifact(&run.run_id, local_path, &meta)?;
        self.write_meta(&run.run_id, MetaKind::Artifact, &meta.path, &meta)
    }

    /// Store in-memory content as an artifact of the active run
    pub fn log_mem_artifact(&self, content: &[u8], meta: ArtifactMeta) -> Result<()> {
        let run = self.require_run()?;
        self.backend().log_mem_artifact(&run.run_id, content, &meta)?;
        self.write_meta(&run.run_id, MetaKind::Artifact, &meta.path, &meta)
    }

    /// Serialize `value` as pretty JSON and store it as an artifact
    pub fn log_json_artifact<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        let content = serde_json::to_vec_pretty(value)?;
        self.log_mem_artifact(&content, ArtifactMeta::new(path).file_format(FileFormat::Json))
    }

    fn write_meta<T: Serialize>(
        &self,
        run_id: &str,
        kind: MetaKind,
        key: &str,
        meta: &T,
    ) -> Result<()> {
        let content = serde_json::to_vec(meta)?;
        let record = ArtifactMeta::new(meta_name(kind, key)).file_format(FileFormat::Json);
        self.backend().log_mem_artifact(run_id, &content, &record)
    }

    /// Read a meta record back by kind and key
    pub fn read_meta<T: DeserializeOwned>(
        &self,
        kind: MetaKind,
        key: &str,
        run_id: Option<&str>,
    ) -> Result<T> {
        let run_id = self.resolve_run_id(run_id)?;
        let content = self.backend().read_artifact(&run_id, &meta_name(kind, key))?;
        Ok(serde_json::from_slice(&content)?)
    }

    pub fn metric_meta(&self, key: &str, run_id: Option<&str>) -> Result<MetricMeta> {
        self.read_meta(MetaKind::Metric, key, run_id)
    }

    pub fn param_meta(&self, key: &str, run_id: Option<&str>) -> Result<ParameterMeta> {
        self.read_meta(MetaKind::Parameter, key, run_id)
    }

    pub fn tag_meta(&self, key: &str, run_id: Option<&str>) -> Result<TagMeta> {
        self.read_meta(MetaKind::Tag, key, run_id)
    }

    pub fn artifact_meta(&self, path: &str, run_id: Option<&str>) -> Result<ArtifactMeta> {
        self.read_meta(MetaKind::Artifact, path, run_id)
    }

    /// Raw content of an artifact
    pub fn artifact(&self, path: &str, run_id: Option<&str>) -> Result<Vec<u8>> {
        let run_id = self.resolve_run_id(run_id)?;
        self.backend().read_artifact(&run_id, path)
    }

    /// Scratch directory of the active run, created if missing
    ///
    /// Removed when the run ends.
    pub fn scratch_dir(&self) -> Result<PathBuf> {
        let run = self.require_run()?;
        let dir = self.config().scratch_dir(&run.run_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
