// Integration tests for run lifecycle and run-scoped caches
//
// A small tracking setup: a logger collects training parameters into the
// run cache, a teardown turns them into backend records at the end of the
// run.

mod utils;

use serde_json::json;
use std::sync::{Arc, Mutex};
use tracepads::backend::{MetricMeta, ParameterMeta};
use tracepads::cache::CacheValue;
use tracepads::lifecycle::{RunFnError, RunFnOptions, RunOptions};
use tracepads::logger::{CallLogger, LoggerEnv};
use tracepads::tracker::Tracker;
use tracepads::TrackError;
use utils::{decision_tree, tracker_with_catalogue};

/// Collects hyperparameters of fit calls into the run cache
struct HyperparameterLogger;

impl CallLogger for HyperparameterLogger {
    fn name(&self) -> &str {
        "hyperparameters"
    }

    fn before_call(&self, tracker: &Tracker, env: &LoggerEnv) -> anyhow::Result<()> {
        let params = CacheValue::from_json(json!(env.parameter));
        tracker
            .cache()
            .run_merge_value("hyperparameters", params, env.run_id.as_deref())?;
        tracker
            .cache()
            .run_merge_value("fit_calls", CacheValue::seq_of([1]), env.run_id.as_deref())?;
        Ok(())
    }
}

fn export_hyperparameters(tracker: &Tracker, _env: &LoggerEnv) -> Result<(), RunFnError> {
    let Some(CacheValue::Mapping(params)) = tracker.cache().run_get("hyperparameters", None)?
    else {
        return Ok(());
    };
    for (name, value) in params {
        let rendered = value.to_json().to_string();
        tracker.log_param(&rendered, ParameterMeta::new(name))?;
    }
    let calls = tracker
        .cache()
        .run_get("fit_calls", None)?
        .and_then(|v| v.as_items().map(<[CacheValue]>::len))
        .unwrap_or(0);
    tracker.log_metric(calls as f64, MetricMeta::new("fit_calls"))?;
    Ok(())
}

#[test]
fn test_parameters_exported_at_end_of_run() {
    let scratch = tempfile::tempdir().unwrap();
    let tracker = tracker_with_catalogue(&scratch);
    tracker.subscribe("on_fit", Arc::new(HyperparameterLogger));
    tracker.register_teardown_fn(
        "export_hyperparameters",
        "Log collected hyperparameters",
        export_hyperparameters,
        RunFnOptions::default(),
    )
    .unwrap();

    let model = decision_tree();
    let fit = model.get("fit").unwrap();
    tracker.track_declared(&fit, Some(&model)).unwrap();

    let run = tracker.start_run(RunOptions::new().run_name("tree")).unwrap();
    model
        .call("fit", &tracepads::function::CallArgs::new().with_kwarg("max_depth", 4))
        .unwrap();
    model
        .call("fit", &tracepads::function::CallArgs::new().with_kwarg("criterion", "gini"))
        .unwrap();
    let report = tracker.end_run().unwrap();
    assert!(report.is_clean());

    let params = tracker.list_parameters(Some(&run.run_id)).unwrap();
    assert_eq!(params["max_depth"], "4");
    assert_eq!(params["criterion"], "\"gini\"");
    let metrics = tracker.list_metrics(Some(&run.run_id)).unwrap();
    assert_eq!(metrics["fit_calls"][0].value, 2.0);
}

#[test]
fn test_run_caches_do_not_leak_between_runs() {
    let tracker = Tracker::in_memory().unwrap();
    let r1 = tracker.start_run(RunOptions::new()).unwrap();
    let r2 = tracker.start_run(RunOptions::new().nested(true)).unwrap();
    tracker.cache().run_init(Some(&r2.run_id)).unwrap();

    tracker.cache().run_add("x", 1, Some(&r1.run_id)).unwrap();
    assert_eq!(tracker.cache().run_get("x", Some(&r2.run_id)).unwrap(), None);
}

#[test]
fn test_run_cache_gone_after_end_run() {
    let tracker = Tracker::in_memory().unwrap();
    let run = tracker.start_run(RunOptions::new()).unwrap();
    let before = tracker.cache().run_init(None).unwrap();
    tracker.end_run().unwrap();

    assert!(!tracker.cache().contains_run(&run.run_id));
    let after = tracker.cache().run_init(Some(&run.run_id)).unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
}

#[test]
fn test_run_scoped_calls_need_a_run() {
    let tracker = Tracker::in_memory().unwrap();
    assert!(matches!(
        tracker.cache().run_add("x", 1, None),
        Err(TrackError::NoActiveRun)
    ));
    assert!(matches!(tracker.end_run(), Err(TrackError::NoActiveRun)));
}

#[test]
fn test_teardown_order_and_isolation() {
    let tracker = Tracker::in_memory().unwrap();
    let log: Arc<Mutex<Vec<i64>>> = Arc::default();
    for order in [5, 1, 3] {
        let log = Arc::clone(&log);
        tracker
            .register_teardown_utility(
                &format!("step_{order}"),
                move |_, _| {
                    log.lock().unwrap().push(order);
                    if order == 3 {
                        return Err(anyhow::anyhow!("step {order} failed").into());
                    }
                    Ok(())
                },
                RunFnOptions::default().order(order),
            )
            .unwrap();
    }

    tracker.start_run(RunOptions::new()).unwrap();
    let report = tracker.end_run().unwrap();

    assert_eq!(*log.lock().unwrap(), vec![1, 3, 5]);
    assert!(report.failed("step_3"));
    assert_eq!(report.failures.len(), 1);
}

#[test]
fn test_duplicate_setup_keeps_first() {
    let tracker = Tracker::in_memory().unwrap();
    let seen: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    for label in ["fn1", "fn2"] {
        let seen = Arc::clone(&seen);
        tracker.register_setup_utility(
            "a",
            move |_, _| {
                seen.lock().unwrap().push(label);
                Ok(())
            },
            RunFnOptions::default(),
        );
    }

    tracker.start_run(RunOptions::new()).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["fn1"]);
}

#[test]
fn test_intermediate_run_restores_enclosing() {
    let tracker = Tracker::in_memory().unwrap();
    let outer = tracker.start_run(RunOptions::new()).unwrap();

    {
        let inner = tracker.intermediate_run(RunOptions::new()).unwrap();
        assert_eq!(tracker.active_run().unwrap().run_id, inner.run_id());
        assert!(tracker.is_intermediate_run().unwrap());
        tracker.cache().run_add("scratch", 1, None).unwrap();
    }

    assert_eq!(tracker.active_run().unwrap().run_id, outer.run_id);
    assert!(!tracker.is_intermediate_run().unwrap());
}

#[test]
fn test_intermediate_run_released_when_closure_fails() {
    let tracker = Tracker::in_memory().unwrap();
    let outer = tracker.start_run(RunOptions::new()).unwrap();

    let result: anyhow::Result<()> = tracker.with_intermediate_run(RunOptions::new(), |run| {
        anyhow::bail!("cross validation fold {} failed", run.run_id)
    });

    assert!(result.is_err());
    assert_eq!(tracker.active_run().unwrap().run_id, outer.run_id);
    assert_eq!(tracker.cache().run_ids(), Vec::<String>::new());
}
