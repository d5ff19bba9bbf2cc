// Tests for run lifecycle control and setup/teardown registries

use super::*;
use crate::backend::{ArtifactMeta, FileFormat, InMemoryBackend, MetaKind};
use crate::cache::{CacheValue, CACHE_CLEANUP};
use crate::config::TrackerConfig;
use std::sync::Mutex;

type Log = Arc<Mutex<Vec<String>>>;

fn tracker() -> Arc<Tracker> {
    Tracker::in_memory().expect("default tracker")
}

fn recorder(
    log: &Log,
    label: &str,
) -> impl Fn(&Tracker, &LoggerEnv) -> std::result::Result<(), RunFnError> + Send + Sync + 'static {
    let log = Arc::clone(log);
    let label = label.to_string();
    move |_, _| {
        log.lock().unwrap().push(label.clone());
        Ok(())
    }
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[test]
fn test_registry_dedupes_by_name() {
    let log: Log = Arc::default();
    let mut registry = FunctionRegistry::new();
    let first = RunFunction::utility("a", recorder(&log, "fn1"));
    assert!(registry.register(first.clone(), true));
    assert!(!registry.register(RunFunction::utility("a", recorder(&log, "fn2")), true));
    assert!(!registry.register(RunFunction::utility("a", recorder(&log, "fn3")), false));

    assert_eq!(registry.len(), 1);
    assert!(registry.get("a").unwrap().same_callable(&first));
}

#[test]
fn test_registry_orders_stably() {
    let log: Log = Arc::default();
    let mut registry = FunctionRegistry::new();
    for (name, order) in [("five", 5), ("one", 1), ("three", 3), ("also_one", 1)] {
        registry.register(RunFunction::utility(name, recorder(&log, name)).with_order(order), true);
    }
    let names: Vec<String> = registry
        .ordered()
        .iter()
        .map(|e| e.name().to_string())
        .collect();
    assert_eq!(names, vec!["one", "also_one", "three", "five"]);
}

#[test]
fn test_applies_to_gates_by_flags() {
    let entry = RunFunction::utility("x", |_, _| Ok(()))
        .with_nested(false)
        .with_intermediate(true);
    assert!(entry.applies_to(false, false));
    assert!(!entry.applies_to(true, false));

    let entry = entry.with_nested(true).with_intermediate(false);
    assert!(entry.applies_to(true, false));
    assert!(!entry.applies_to(true, true));
}

#[test]
fn test_setups_run_in_order() {
    let tracker = tracker();
    let log: Log = Arc::default();
    for (name, order) in [("five", 5), ("one", 1), ("three", 3)] {
        tracker.register_setup_utility(name, recorder(&log, name), RunFnOptions::default().order(order));
    }

    tracker.start_run(RunOptions::new()).unwrap();
    assert_eq!(entries(&log), vec!["one", "three", "five"]);
}

#[test]
fn test_setups_skipped_when_disabled() {
    let tracker = tracker();
    let log: Log = Arc::default();
    tracker.register_setup_utility("s", recorder(&log, "s"), RunFnOptions::default());

    tracker.start_run(RunOptions::new().run_setups(false)).unwrap();
    assert!(entries(&log).is_empty());
}

#[test]
fn test_duplicate_setup_keeps_first() {
    let tracker = tracker();
    let log: Log = Arc::default();
    assert!(tracker.register_setup(RunFunction::utility("a", recorder(&log, "fn1")), true));
    assert!(!tracker.register_setup(RunFunction::utility("a", recorder(&log, "fn2")), true));

    tracker.start_run(RunOptions::new()).unwrap();
    assert_eq!(entries(&log), vec!["fn1"]);
}

#[test]
fn test_setup_env_carries_run_and_phase() {
    let tracker = tracker();
    let seen: Arc<Mutex<Option<LoggerEnv>>> = Arc::default();
    let sink = Arc::clone(&seen);
    tracker.register_setup_fn(
        "capture_env",
        "Captures the setup environment",
        move |_, env| {
            *sink.lock().unwrap() = Some(env.clone());
            Ok(())
        },
        RunFnOptions::default(),
    );

    let run = tracker.start_run(RunOptions::new()).unwrap();
    let env = seen.lock().unwrap().clone().unwrap();
    assert_eq!(env.run_id.as_deref(), Some(run.run_id.as_str()));
    assert_eq!(env.data_type(), Some("SetupFn"));
}

#[test]
fn test_non_nested_setup_skipped_for_nested_run() {
    let tracker = tracker();
    let log: Log = Arc::default();
    tracker.register_setup_fn(
        "top_only",
        "Runs for top-level runs only",
        recorder(&log, "top_only"),
        RunFnOptions::default().nested(false),
    );

    tracker.start_run(RunOptions::new()).unwrap();
    tracker.start_run(RunOptions::new().nested(true)).unwrap();
    assert_eq!(entries(&log), vec!["top_only"]);
}

#[test]
fn test_setup_failure_does_not_abort() {
    let tracker = tracker();
    let log: Log = Arc::default();
    tracker.register_setup_utility(
        "broken",
        |_, _| Err(anyhow::anyhow!("boom").into()),
        RunFnOptions::default().order(0),
    );
    tracker.register_setup_utility("after", recorder(&log, "after"), RunFnOptions::default().order(1));

    assert!(tracker.start_run(RunOptions::new()).is_ok());
    assert_eq!(entries(&log), vec!["after"]);
}

#[test]
fn test_interrupted_setup_aborts_start() {
    let tracker = tracker();
    let log: Log = Arc::default();
    tracker.register_setup_utility(
        "cancel",
        |_, _| Err(RunFnError::Interrupted),
        RunFnOptions::default().order(0),
    );
    tracker.register_setup_utility("after", recorder(&log, "after"), RunFnOptions::default().order(1));

    let err = tracker.start_run(RunOptions::new()).unwrap_err();
    assert!(matches!(err, TrackError::Interrupted { ref entry } if entry == "cancel"));
    assert!(entries(&log).is_empty());
}

#[test]
fn test_teardowns_isolate_failures() {
    let tracker = tracker();
    let log: Log = Arc::default();
    tracker.start_run(RunOptions::new()).unwrap();

    tracker
        .register_teardown_utility("first", recorder(&log, "first"), RunFnOptions::default().order(1))
        .unwrap();
    tracker
        .register_teardown_utility(
            "second",
            |_, _| Err(anyhow::anyhow!("teardown failed").into()),
            RunFnOptions::default().order(2),
        )
        .unwrap();
    tracker
        .register_teardown_utility("third", recorder(&log, "third"), RunFnOptions::default().order(3))
        .unwrap();

    let report = tracker.end_run().unwrap();
    assert_eq!(entries(&log), vec!["first", "third"]);
    assert!(report.failed("second"));
    assert_eq!(report.failures.len(), 1);
    assert!(tracker.active_run().is_none());
}

#[test]
fn test_interrupted_teardown_does_not_abort() {
    let tracker = tracker();
    let log: Log = Arc::default();
    tracker.start_run(RunOptions::new()).unwrap();
    tracker
        .register_teardown_utility("cancel", |_, _| Err(RunFnError::Interrupted), RunFnOptions::default())
        .unwrap();
    tracker
        .register_teardown_utility("after", recorder(&log, "after"), RunFnOptions::default().order(1))
        .unwrap();

    let report = tracker.end_run().unwrap();
    assert_eq!(entries(&log), vec!["after"]);
    assert!(report.failures[0].interrupted);
}

#[test]
fn test_teardown_error_message_prefixes_failure() {
    let tracker = tracker();
    tracker.start_run(RunOptions::new()).unwrap();
    tracker
        .register_teardown_fn(
            "export",
            "Exports results",
            |_, _| Err(anyhow::anyhow!("disk full").into()),
            RunFnOptions::default().error_message("Export failed"),
        )
        .unwrap();

    let report = tracker.end_run().unwrap();
    assert_eq!(report.failures[0].message, "Export failed: disk full");
}

#[test]
fn test_process_teardown_applies_to_every_run() {
    let tracker = tracker();
    let log: Log = Arc::default();
    tracker
        .register_teardown_utility("always", recorder(&log, "always"), RunFnOptions::default())
        .unwrap();

    tracker.start_run(RunOptions::new()).unwrap();
    tracker.end_run().unwrap();
    tracker.start_run(RunOptions::new()).unwrap();
    tracker.end_run().unwrap();
    assert_eq!(entries(&log), vec!["always", "always"]);
}

#[test]
fn test_run_teardown_dies_with_run() {
    let tracker = tracker();
    let log: Log = Arc::default();
    tracker.start_run(RunOptions::new()).unwrap();
    tracker
        .register_teardown_utility("once", recorder(&log, "once"), RunFnOptions::default())
        .unwrap();
    tracker.end_run().unwrap();

    tracker.start_run(RunOptions::new()).unwrap();
    tracker.end_run().unwrap();
    assert_eq!(entries(&log), vec!["once"]);
}

#[test]
fn test_end_run_removes_run_cache() {
    let tracker = tracker();
    let run = tracker.start_run(RunOptions::new()).unwrap();
    let before = tracker.cache().run_init(None).unwrap();
    tracker.cache().run_add("x", 1, None).unwrap();

    let report = tracker.end_run().unwrap();
    assert!(report.executed.iter().any(|n| n == CACHE_CLEANUP));
    assert!(!tracker.cache().contains_run(&run.run_id));

    let after = tracker.cache().run_init(Some(&run.run_id)).unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(!tracker.cache().run_exists("x", Some(&run.run_id)).unwrap());
}

#[test]
fn test_end_run_without_run_fails() {
    let tracker = tracker();
    assert!(matches!(tracker.end_run(), Err(TrackError::NoActiveRun)));
}

#[test]
fn test_end_run_flushes_consolidated_log() {
    let tracker = tracker();
    let run = tracker.start_run(RunOptions::new()).unwrap();
    tracker
        .cache()
        .add("consolidated_dict", CacheValue::map_of([("calls", 3)]))
        .unwrap();
    tracker.end_run().unwrap();

    let content = tracker
        .artifact("consolidated_log.json", Some(&run.run_id))
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&content).unwrap();
    assert_eq!(value["calls"], 3);

    let meta = tracker
        .read_meta::<ArtifactMeta>(
            MetaKind::Artifact,
            "consolidated_log.json",
            Some(&run.run_id),
        )
        .unwrap();
    assert_eq!(meta.file_format, FileFormat::Json);
}

#[test]
fn test_end_run_removes_scratch_dir() {
    let root = tempfile::tempdir().unwrap();
    let config = TrackerConfig {
        scratch_root: root.path().to_path_buf(),
        ..TrackerConfig::default()
    };
    let tracker = Tracker::new(config, Arc::new(InMemoryBackend::new())).unwrap();
    tracker.start_run(RunOptions::new()).unwrap();

    let scratch = tracker.scratch_dir().unwrap();
    std::fs::write(scratch.join("tmp.bin"), b"x").unwrap();
    tracker.end_run().unwrap();
    assert!(!scratch.exists());
}

#[test]
fn test_intermediate_run_restores_enclosing_on_drop() {
    let tracker = tracker();
    let outer = tracker.start_run(RunOptions::new()).unwrap();

    {
        let inner = tracker.intermediate_run(RunOptions::new()).unwrap();
        assert_eq!(tracker.active_run().unwrap().run_id, inner.run_id());
        assert!(tracker.is_intermediate_run().unwrap());
    }

    assert_eq!(tracker.active_run().unwrap().run_id, outer.run_id);
    assert!(!tracker.is_intermediate_run().unwrap());
}

#[test]
fn test_intermediate_run_ended_early_restores_enclosing() {
    let tracker = tracker();
    let outer = tracker.start_run(RunOptions::new()).unwrap();

    let inner = tracker.intermediate_run(RunOptions::new()).unwrap();
    let inner_id = inner.run_id().to_string();
    tracker.end_run().unwrap();
    inner.finish().unwrap();

    assert_eq!(tracker.active_run().unwrap().run_id, outer.run_id);
    assert!(!tracker.cache().contains_run(&inner_id));
}

#[test]
fn test_intermediate_run_released_on_error() {
    let tracker = tracker();
    let outer = tracker.start_run(RunOptions::new()).unwrap();

    let result: anyhow::Result<()> = tracker.with_intermediate_run(RunOptions::new(), |_| {
        anyhow::bail!("training diverged")
    });
    assert!(result.is_err());
    assert_eq!(tracker.active_run().unwrap().run_id, outer.run_id);
}

#[test]
fn test_intermediate_setup_gating() {
    let tracker = tracker();
    let log: Log = Arc::default();
    tracker.register_setup_fn(
        "not_intermediate",
        "Skipped for intermediate runs",
        recorder(&log, "setup"),
        RunFnOptions::default().intermediate(false),
    );

    tracker.start_run(RunOptions::new()).unwrap();
    let value = tracker
        .with_intermediate_run(RunOptions::new(), |run| Ok(run.parent_run_id.clone()))
        .unwrap();
    assert!(value.is_some());
    assert_eq!(entries(&log), vec!["setup"]);
}

#[test]
fn test_start_run_uses_named_experiment() {
    let tracker = tracker();
    let run = tracker
        .start_run(RunOptions::new().experiment_name("trees"))
        .unwrap();
    let experiments = tracker.backend().list_experiments().unwrap();
    let trees = experiments.iter().find(|e| e.name == "trees").unwrap();
    assert_eq!(run.experiment_id, trees.experiment_id);
}
