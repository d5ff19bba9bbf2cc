// Shared helpers for integration tests
//
// Builds trackers over the in-memory backend, a fake estimator namespace
// and a logger that records what it observes.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracepads::config::TrackerConfig;
use tracepads::function::{CallArgs, Function, Namespace};
use tracepads::logger::{CallLogger, CallOutcome, LoggerEnv};
use tracepads::tracker::Tracker;

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Tracker with a private scratch root and the sklearn catalogue loaded
pub fn tracker_with_catalogue(scratch: &tempfile::TempDir) -> Arc<Tracker> {
    let config = TrackerConfig {
        scratch_root: scratch.path().to_path_buf(),
        mapping_files: vec![fixture("sklearn_mappings.toml")],
        ..TrackerConfig::default()
    };
    Tracker::new(config, Arc::new(tracepads::backend::InMemoryBackend::new()))
        .expect("tracker from fixture catalogue")
}

/// Namespace standing in for `sklearn.tree.DecisionTreeClassifier`
pub fn decision_tree() -> Arc<Namespace> {
    let ns = Namespace::new("sklearn.tree.DecisionTreeClassifier");
    ns.define(Function::new("sklearn.tree", "fit", |args| {
        let depth = args.kwarg("max_depth").cloned().unwrap_or(json!(null));
        Ok(json!({"fitted": true, "max_depth": depth}))
    }));
    ns.define(Function::new("sklearn.tree", "predict", |args| {
        let rows = args.arg(0).and_then(Value::as_array).map_or(0, Vec::len);
        Ok(json!(vec![0; rows]))
    }));
    ns.define(Function::new("sklearn.tree", "score", |_| {
        anyhow::bail!("estimator is not fitted")
    }));
    ns
}

pub fn no_args() -> CallArgs {
    CallArgs::new()
}

/// Event seen by a [`Recorder`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Before { function: String, run_id: Option<String> },
    After { function: String, ok: bool },
}

/// Logger keeping every event it observes
#[derive(Default)]
pub struct Recorder {
    name: String,
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

fn function_of(env: &LoggerEnv) -> String {
    env.data["function"].as_str().unwrap_or_default().to_string()
}

impl CallLogger for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn before_call(&self, _tracker: &Tracker, env: &LoggerEnv) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(Event::Before {
            function: function_of(env),
            run_id: env.run_id.clone(),
        });
        Ok(())
    }

    fn after_call(
        &self,
        _tracker: &Tracker,
        env: &LoggerEnv,
        outcome: &CallOutcome<'_>,
    ) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(Event::After {
            function: function_of(env),
            ok: outcome.is_ok(),
        });
        Ok(())
    }
}
