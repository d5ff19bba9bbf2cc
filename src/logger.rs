//! Call loggers and anchor subscriptions
//!
//! A [`CallLogger`] subscribes to one or more anchors. When a wrapped
//! function fires an anchor, every subscribed logger observes the call
//! before and after the original runs. Loggers read and write run state
//! through the tracker's cache registry.
//!
//! Dispatch order is stable: loggers are sorted by their `order` and, for
//! equal orders, by subscription sequence.

use crate::anchor::Anchor;
use crate::backend::RunInfo;
use crate::cache::{CacheRegistry, CacheValue};
use crate::error::Result;
use crate::mapping::MatchedMapping;
use crate::sync::{read, write};
use crate::tracker::Tracker;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Environment descriptor handed to loggers and run functions
#[derive(Debug, Clone, Default)]
pub struct LoggerEnv {
    pub run_id: Option<String>,
    pub experiment_id: Option<String>,
    /// Keyword arguments of the observed call, or free parameters
    pub parameter: Map<String, Value>,
    /// Mappings that caused the call to be intercepted
    pub mappings: Vec<MatchedMapping>,
    /// Free-form payload; carries at least a `type` entry
    pub data: Value,
}

impl LoggerEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment bound to a run
    pub fn for_run(run: &RunInfo) -> Self {
        Self {
            run_id: Some(run.run_id.clone()),
            experiment_id: Some(run.experiment_id.clone()),
            ..Self::default()
        }
    }

    pub fn with_parameter(mut self, parameter: Map<String, Value>) -> Self {
        self.parameter = parameter;
        self
    }

    pub fn with_mappings(mut self, mappings: impl IntoIterator<Item = MatchedMapping>) -> Self {
        self.mappings = mappings.into_iter().collect();
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// The `type` entry of the data payload, if any
    pub fn data_type(&self) -> Option<&str> {
        self.data.get("type").and_then(Value::as_str)
    }

    pub fn anchors(&self) -> BTreeSet<Anchor> {
        self.mappings
            .iter()
            .flat_map(|m| m.anchors().iter().cloned())
            .collect()
    }
}

/// What the original function did, as seen by `after_call`
#[derive(Debug)]
pub struct CallOutcome<'a> {
    pub result: std::result::Result<&'a Value, &'a anyhow::Error>,
    pub duration: Duration,
}

impl CallOutcome<'_> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_message(&self) -> Option<String> {
        self.result.as_ref().err().map(|e| format!("{e:#}"))
    }
}

/// Observer of intercepted calls
///
/// Failures returned from either hook are logged and never reach the
/// caller of the wrapped function.
pub trait CallLogger: Send + Sync {
    fn name(&self) -> &str;

    /// Lower values run first
    fn order(&self) -> i64 {
        0
    }

    fn before_call(&self, _tracker: &Tracker, _env: &LoggerEnv) -> anyhow::Result<()> {
        Ok(())
    }

    fn after_call(
        &self,
        _tracker: &Tracker,
        _env: &LoggerEnv,
        _outcome: &CallOutcome<'_>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Subscription {
    anchor: Anchor,
    logger: Arc<dyn CallLogger>,
    seq: u64,
}

/// Subscriptions of loggers to anchors
#[derive(Default)]
pub struct LoggerRegistry {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl LoggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `logger` to `anchor`
    ///
    /// Subscribing the same logger instance to the same anchor twice is a
    /// no-op.
    pub fn subscribe(&self, anchor: Anchor, logger: Arc<dyn CallLogger>) {
        let mut subscriptions = write(&self.subscriptions);
        if subscriptions
            .iter()
            .any(|s| s.anchor == anchor && same_logger(&s.logger, &logger))
        {
            return;
        }
        let seq = subscriptions.len() as u64;
        tracing::debug!(anchor = %anchor, logger = logger.name(), "Subscribed logger");
        subscriptions.push(Subscription {
            anchor,
            logger,
            seq,
        });
    }

    /// Remove every subscription of the logger called `name`
    pub fn unsubscribe(&self, name: &str) -> usize {
        let mut subscriptions = write(&self.subscriptions);
        let before = subscriptions.len();
        subscriptions.retain(|s| s.logger.name() != name);
        before - subscriptions.len()
    }

    /// Loggers subscribed to any of `anchors`, deduplicated, in dispatch order
    pub fn loggers_for(&self, anchors: &BTreeSet<Anchor>) -> Vec<Arc<dyn CallLogger>> {
        let subscriptions = read(&self.subscriptions);
        let mut selected: Vec<(i64, u64, Arc<dyn CallLogger>)> = Vec::new();
        for sub in subscriptions.iter().filter(|s| anchors.contains(&s.anchor)) {
            if selected.iter().any(|(_, _, l)| same_logger(l, &sub.logger)) {
                continue;
            }
            selected.push((sub.logger.order(), sub.seq, Arc::clone(&sub.logger)));
        }
        selected.sort_by_key(|(order, seq, _)| (*order, *seq));
        selected.into_iter().map(|(_, _, l)| l).collect()
    }

    pub fn len(&self) -> usize {
        read(&self.subscriptions).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.subscriptions).is_empty()
    }
}

impl std::fmt::Debug for LoggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscriptions = read(&self.subscriptions);
        f.debug_list()
            .entries(
                subscriptions
                    .iter()
                    .map(|s| format!("{} -> {}", s.anchor, s.logger.name())),
            )
            .finish()
    }
}

fn same_logger(a: &Arc<dyn CallLogger>, b: &Arc<dyn CallLogger>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Run cache key the call statistics are merged into
pub const CALL_STATS_KEY: &str = "call_stats";

/// Aggregated statistics for one matched path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionStats {
    pub calls: u64,
    pub failures: u64,
    /// Total wall time spent in the original function (microseconds)
    pub total_time_us: u64,
}

impl FunctionStats {
    pub fn avg_time_us(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_time_us as f64 / self.calls as f64
        }
    }
}

/// Built-in logger recording call counts and durations per matched path
///
/// Each observed call appends its duration to
/// `call_stats.<path>.durations_us` in the active run cache (and a marker
/// to `failures` when the call failed). Appending goes through the merge
/// algorithm, so several writers on the same key never overwrite each
/// other.
#[derive(Debug, Default)]
pub struct CallStatsLogger;

impl CallStatsLogger {
    pub fn new() -> Self {
        Self
    }

    /// Summarize the statistics of a run
    pub fn summary(
        cache: &CacheRegistry,
        run_id: Option<&str>,
    ) -> Result<BTreeMap<String, FunctionStats>> {
        let mut stats = BTreeMap::new();
        let Some(CacheValue::Mapping(paths)) = cache.run_get(CALL_STATS_KEY, run_id)? else {
            return Ok(stats);
        };

        for (path, entry) in &paths {
            let Some(fields) = entry.as_mapping() else {
                continue;
            };
            let durations = fields
                .get("durations_us")
                .and_then(CacheValue::as_items)
                .unwrap_or(&[]);
            let failures = fields
                .get("failures")
                .and_then(CacheValue::as_items)
                .map_or(0, <[CacheValue]>::len);
            stats.insert(
                path.clone(),
                FunctionStats {
                    calls: durations.len() as u64,
                    failures: failures as u64,
                    total_time_us: durations
                        .iter()
                        .filter_map(CacheValue::as_i64)
                        .map(|d| d.max(0) as u64)
                        .sum(),
                },
            );
        }
        Ok(stats)
    }
}

impl CallLogger for CallStatsLogger {
    fn name(&self) -> &str {
        "call_stats"
    }

    fn order(&self) -> i64 {
        i64::MAX
    }

    fn after_call(
        &self,
        tracker: &Tracker,
        env: &LoggerEnv,
        outcome: &CallOutcome<'_>,
    ) -> anyhow::Result<()> {
        let Some(run_id) = env.run_id.as_deref() else {
            tracing::debug!("No active run, call statistics not recorded");
            return Ok(());
        };

        let duration_us = i64::try_from(outcome.duration.as_micros()).unwrap_or(i64::MAX);
        let paths: BTreeSet<&str> = env.mappings.iter().map(|m| m.path.as_str()).collect();
        for path in paths {
            let mut fields = vec![("durations_us", CacheValue::seq_of([duration_us]))];
            if !outcome.is_ok() {
                fields.push(("failures", CacheValue::seq_of([json!(true)])));
            }
            let update = CacheValue::map_of([(path, CacheValue::map_of(fields))]);
            let conflicts = tracker
                .cache()
                .run_merge_value(CALL_STATS_KEY, update, Some(run_id))?;
            for conflict in conflicts {
                tracing::warn!(
                    key = %conflict.key,
                    existing = conflict.existing,
                    incoming = conflict.incoming,
                    "Call statistics not merged"
                );
            }
        }
        Ok(())
    }
}
