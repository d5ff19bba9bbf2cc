use crate::backend::{
    ArtifactMeta, Backend, Experiment, FileInfo, MetricMeta, MetricPoint, ParameterMeta, Run,
    RunData, RunInfo, RunStatus, StartRun, TagMeta,
};
use crate::error::{Result, TrackError};
use crate::sync::lock;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_EXPERIMENT_ID: &str = "0";
const DEFAULT_EXPERIMENT_NAME: &str = "Default";

#[derive(Debug)]
struct RunRecord {
    info: RunInfo,
    data: RunData,
    metric_history: BTreeMap<String, Vec<MetricPoint>>,
    artifacts: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    experiments: BTreeMap<String, Experiment>,
    runs: HashMap<String, RunRecord>,
    /// Active run stack, innermost last
    active: Vec<String>,
}

impl State {
    fn run(&self, run_id: &str) -> Result<&RunRecord> {
        self.runs
            .get(run_id)
            .ok_or_else(|| TrackError::UnknownRun(run_id.to_string()))
    }

    fn run_mut(&mut self, run_id: &str) -> Result<&mut RunRecord> {
        self.runs
            .get_mut(run_id)
            .ok_or_else(|| TrackError::UnknownRun(run_id.to_string()))
    }
}

/// Backend keeping all runs and artifacts in process memory
///
/// Experiment `"0"` (named `Default`) always exists. Run ids are 32 hex
/// digits drawn from `rand`.
#[derive(Debug)]
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let mut state = State::default();
        state.experiments.insert(
            DEFAULT_EXPERIMENT_ID.to_string(),
            Experiment {
                experiment_id: DEFAULT_EXPERIMENT_ID.to_string(),
                name: DEFAULT_EXPERIMENT_NAME.to_string(),
            },
        );
        Self {
            state: Mutex::new(state),
        }
    }

    /// Depth of the active run stack
    pub fn active_depth(&self) -> usize {
        lock(&self.state).active.len()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn generate_run_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

impl Backend for InMemoryBackend {
    fn start_run(&self, request: &StartRun) -> Result<RunInfo> {
        let mut state = lock(&self.state);
        let top = state.active.last().cloned();

        if let Some(run_id) = &request.run_id {
            if top.as_deref() == Some(run_id.as_str()) {
                return Ok(state.run(run_id)?.info.clone());
            }
            if let (Some(active), false) = (&top, request.nested) {
                return Err(TrackError::RunAlreadyActive(active.clone()));
            }
            let record = state.run_mut(run_id)?;
            record.info.status = RunStatus::Running;
            record.info.end_time_ms = None;
            let info = record.info.clone();
            state.active.push(run_id.clone());
            return Ok(info);
        }

        if let (Some(active), false) = (&top, request.nested) {
            return Err(TrackError::RunAlreadyActive(active.clone()));
        }

        let experiment_id = request
            .experiment_id
            .clone()
            .unwrap_or_else(|| DEFAULT_EXPERIMENT_ID.to_string());
        if !state.experiments.contains_key(&experiment_id) {
            return Err(TrackError::UnknownExperiment(experiment_id));
        }

        let info = RunInfo {
            run_id: generate_run_id(),
            experiment_id,
            run_name: request.run_name.clone(),
            parent_run_id: if request.nested { top } else { None },
            status: RunStatus::Running,
            start_time_ms: now_ms(),
            end_time_ms: None,
        };
        state.runs.insert(
            info.run_id.clone(),
            RunRecord {
                info: info.clone(),
                data: RunData::default(),
                metric_history: BTreeMap::new(),
                artifacts: BTreeMap::new(),
            },
        );
        state.active.push(info.run_id.clone());
        Ok(info)
    }

    fn end_run(&self) -> Result<Option<RunInfo>> {
        let mut state = lock(&self.state);
        let Some(run_id) = state.active.pop() else {
            return Ok(None);
        };
        let record = state.run_mut(&run_id)?;
        record.info.status = RunStatus::Finished;
        record.info.end_time_ms = Some(now_ms());
        Ok(Some(record.info.clone()))
    }

    fn active_run(&self) -> Option<RunInfo> {
        let state = lock(&self.state);
        let run_id = state.active.last()?;
        state.runs.get(run_id).map(|r| r.info.clone())
    }

    fn get_or_create_experiment(&self, name: &str) -> Result<String> {
        let mut state = lock(&self.state);
        if let Some(existing) = state.experiments.values().find(|e| e.name == name) {
            return Ok(existing.experiment_id.clone());
        }
        let experiment_id = state.experiments.len().to_string();
        state.experiments.insert(
            experiment_id.clone(),
            Experiment {
                experiment_id: experiment_id.clone(),
                name: name.to_string(),
            },
        );
        Ok(experiment_id)
    }

    fn log_metric(&self, run_id: &str, value: f64, meta: &MetricMeta) -> Result<()> {
        let mut state = lock(&self.state);
        let record = state.run_mut(run_id)?;
        let history = record.metric_history.entry(meta.name.clone()).or_default();
        let step = meta.step.unwrap_or(history.len() as u64);
        history.push(MetricPoint {
            value,
            step,
            timestamp_ms: now_ms(),
        });
        record.data.metrics.insert(meta.name.clone(), value);
        Ok(())
    }

    fn log_param(&self, run_id: &str, value: &str, meta: &ParameterMeta) -> Result<()> {
        let mut state = lock(&self.state);
        state
            .run_mut(run_id)?
            .data
            .params
            .insert(meta.name.clone(), value.to_string());
        Ok(())
    }

    fn set_tag(&self, run_id: &str, value: &str, meta: &TagMeta) -> Result<()> {
        let mut state = lock(&self.state);
        state
            .run_mut(run_id)?
            .data
            .tags
            .insert(meta.name.clone(), value.to_string());
        Ok(())
    }

    fn log_artifact(&self, run_id: &str, local_path: &Path, meta: &ArtifactMeta) -> Result<()> {
        let content = fs::read(local_path)?;
        self.log_mem_artifact(run_id, &content, meta)
    }

    fn log_mem_artifact(&self, run_id: &str, content: &[u8], meta: &ArtifactMeta) -> Result<()> {
        let mut state = lock(&self.state);
        state
            .run_mut(run_id)?
            .artifacts
            .insert(meta.path.trim_matches('/').to_string(), content.to_vec());
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> Result<Run> {
        let state = lock(&self.state);
        let record = state.run(run_id)?;
        Ok(Run {
            info: record.info.clone(),
            data: record.data.clone(),
        })
    }

    fn list_experiments(&self) -> Result<Vec<Experiment>> {
        Ok(lock(&self.state).experiments.values().cloned().collect())
    }

    fn list_run_infos(&self, experiment_id: &str) -> Result<Vec<RunInfo>> {
        let state = lock(&self.state);
        if !state.experiments.contains_key(experiment_id) {
            return Err(TrackError::UnknownExperiment(experiment_id.to_string()));
        }
        let mut infos: Vec<RunInfo> = state
            .runs
            .values()
            .filter(|r| r.info.experiment_id == experiment_id)
            .map(|r| r.info.clone())
            .collect();
        infos.sort_by(|a, b| {
            a.start_time_ms
                .cmp(&b.start_time_ms)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(infos)
    }

    fn list_artifacts(&self, run_id: &str, path: Option<&str>) -> Result<Vec<FileInfo>> {
        let state = lock(&self.state);
        let record = state.run(run_id)?;
        let prefix = match path.map(|p| p.trim_matches('/')) {
            Some(p) if !p.is_empty() => format!("{p}/"),
            _ => String::new(),
        };

        let mut listing: BTreeMap<String, FileInfo> = BTreeMap::new();
        for (key, content) in &record.artifacts {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    let dir_path = format!("{prefix}{dir}");
                    listing.entry(dir_path.clone()).or_insert(FileInfo {
                        path: dir_path,
                        is_dir: true,
                        file_size: None,
                    });
                }
                None => {
                    listing.insert(
                        key.clone(),
                        FileInfo {
                            path: key.clone(),
                            is_dir: false,
                            file_size: Some(content.len() as u64),
                        },
                    );
                }
            }
        }
        Ok(listing.into_values().collect())
    }

    fn read_artifact(&self, run_id: &str, path: &str) -> Result<Vec<u8>> {
        let state = lock(&self.state);
        state
            .run(run_id)?
            .artifacts
            .get(path.trim_matches('/'))
            .cloned()
            .ok_or_else(|| TrackError::ArtifactNotFound(path.to_string()))
    }

    fn get_metric_history(&self, run_id: &str, key: &str) -> Result<Vec<MetricPoint>> {
        let state = lock(&self.state);
        Ok(state
            .run(run_id)?
            .metric_history
            .get(key)
            .cloned()
            .unwrap_or_default())
    }
}
