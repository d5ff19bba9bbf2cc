// Read-side queries over the backend

use crate::backend::{
    is_meta_path, meta_name, ArtifactMeta, Experiment, FileInfo, MetaKind, MetricPoint, Run,
    RunInfo,
};
use crate::error::{Result, TrackError};
use crate::tracker::Tracker;
use std::collections::BTreeMap;

/// An artifact found by [`Tracker::list_artifacts`]
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactEntry {
    pub run_id: String,
    pub file: FileInfo,
    /// Meta record of the file; only filled by recursive listings
    pub meta: Option<ArtifactMeta>,
}

impl Tracker {
    pub fn get_run(&self, run_id: Option<&str>) -> Result<Run> {
        let run_id = self.resolve_run_id(run_id)?;
        self.backend().get_run(&run_id)
    }

    pub fn list_experiments(&self) -> Result<Vec<Experiment>> {
        self.backend().list_experiments()
    }

    pub fn list_run_infos(&self, experiment_id: &str) -> Result<Vec<RunInfo>> {
        self.backend().list_run_infos(experiment_id)
    }

    /// Full history of every metric of a run
    pub fn list_metrics(&self, run_id: Option<&str>) -> Result<BTreeMap<String, Vec<MetricPoint>>> {
        let run = self.get_run(run_id)?;
        run.data
            .metrics
            .keys()
            .map(|key| {
                let history = self.backend().get_metric_history(&run.info.run_id, key)?;
                Ok((key.clone(), history))
            })
            .collect()
    }

    pub fn list_parameters(&self, run_id: Option<&str>) -> Result<BTreeMap<String, String>> {
        Ok(self.get_run(run_id)?.data.params)
    }

    pub fn list_tags(&self, run_id: Option<&str>) -> Result<BTreeMap<String, String>> {
        Ok(self.get_run(run_id)?.data.tags)
    }

    /// List artifacts
    ///
    /// Without a run id the listing fans out over the runs of
    /// `experiment_id`, or over every experiment. A path ending in `*`
    /// lists recursively, skips meta records and attaches the meta record
    /// of each file found.
    pub fn list_artifacts(
        &self,
        experiment_id: Option<&str>,
        run_id: Option<&str>,
        path: Option<&str>,
    ) -> Result<Vec<ArtifactEntry>> {
        if let Some(run_id) = run_id {
            return self.list_run_artifacts(run_id, path);
        }

        let experiment_ids = match experiment_id {
            Some(id) => vec![id.to_string()],
            None => self
                .list_experiments()?
                .into_iter()
                .map(|e| e.experiment_id)
                .collect(),
        };

        let mut entries = Vec::new();
        for experiment_id in experiment_ids {
            for info in self.list_run_infos(&experiment_id)? {
                entries.extend(self.list_run_artifacts(&info.run_id, path)?);
            }
        }
        Ok(entries)
    }

    fn list_run_artifacts(&self, run_id: &str, path: Option<&str>) -> Result<Vec<ArtifactEntry>> {
        match path.and_then(|p| p.strip_suffix('*')) {
            Some(prefix) => {
                let prefix = prefix.trim_end_matches('/');
                let root = if prefix.is_empty() { None } else { Some(prefix) };
                let mut entries = Vec::new();
                self.collect_artifacts(run_id, root, &mut entries)?;
                Ok(entries)
            }
            None => Ok(self
                .backend()
                .list_artifacts(run_id, path)?
                .into_iter()
                .map(|file| ArtifactEntry {
                    run_id: run_id.to_string(),
                    file,
                    meta: None,
                })
                .collect()),
        }
    }

    fn collect_artifacts(
        &self,
        run_id: &str,
        path: Option<&str>,
        entries: &mut Vec<ArtifactEntry>,
    ) -> Result<()> {
        for file in self.backend().list_artifacts(run_id, path)? {
            if file.is_dir {
                self.collect_artifacts(run_id, Some(&file.path), entries)?;
                continue;
            }
            if is_meta_path(&file.path) {
                continue;
            }
            let meta = self.read_artifact_meta(run_id, &file.path)?;
            entries.push(ArtifactEntry {
                run_id: run_id.to_string(),
                file,
                meta,
            });
        }
        Ok(())
    }

    fn read_artifact_meta(&self, run_id: &str, path: &str) -> Result<Option<ArtifactMeta>> {
        match self
            .backend()
            .read_artifact(run_id, &meta_name(MetaKind::Artifact, path))
        {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(TrackError::ArtifactNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
