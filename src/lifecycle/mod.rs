// Run lifecycle: ordered setup and teardown registrations
//
// Setup entries run when a run starts, teardown entries when it ends. Both
// are kept in name-deduplicated registries and executed in ascending order.
// An entry returns `RunFnError` on failure; the phase decides whether to
// continue (teardown always continues, setup stops on interruption).

mod run;

pub use run::{IntermediateRun, RunOptions};

use crate::error::{Result, TrackError};
use crate::logger::LoggerEnv;
use crate::tracker::Tracker;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a single setup or teardown entry
#[derive(Error, Debug)]
pub enum RunFnError {
    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    /// Cooperative cancellation, kept apart from ordinary failures
    #[error("interrupted")]
    Interrupted,
}

impl From<TrackError> for RunFnError {
    fn from(err: TrackError) -> Self {
        RunFnError::Failed(err.into())
    }
}

/// Callable behind a run function entry
pub type RunFnCallable =
    Arc<dyn Fn(&Tracker, &LoggerEnv) -> std::result::Result<(), RunFnError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunFnKind {
    /// Entry that counts as a logger of its own
    Logger { description: String },
    /// Plain housekeeping entry
    Utility,
}

/// Named, ordered setup or teardown entry
#[derive(Clone)]
pub struct RunFunction {
    name: String,
    kind: RunFnKind,
    callable: RunFnCallable,
    error_message: Option<String>,
    order: i64,
    nested: bool,
    intermediate: bool,
}

impl RunFunction {
    pub fn logger<F>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Tracker, &LoggerEnv) -> std::result::Result<(), RunFnError> + Send + Sync + 'static,
    {
        Self::build(
            name.into(),
            RunFnKind::Logger {
                description: description.into(),
            },
            Arc::new(f),
        )
    }

    /// Utility entries run for every run, nested and intermediate included
    pub fn utility<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Tracker, &LoggerEnv) -> std::result::Result<(), RunFnError> + Send + Sync + 'static,
    {
        Self::build(name.into(), RunFnKind::Utility, Arc::new(f))
    }

    fn build(name: String, kind: RunFnKind, callable: RunFnCallable) -> Self {
        Self {
            name,
            kind,
            callable,
            error_message: None,
            order: 0,
            nested: true,
            intermediate: true,
        }
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn with_nested(mut self, nested: bool) -> Self {
        self.nested = nested;
        self
    }

    pub fn with_intermediate(mut self, intermediate: bool) -> Self {
        self.intermediate = intermediate;
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    fn with_options(self, options: &RunFnOptions) -> Self {
        let entry = self
            .with_order(options.order)
            .with_nested(options.nested)
            .with_intermediate(options.intermediate);
        match &options.error_message {
            Some(message) => entry.with_error_message(message.clone()),
            None => entry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &RunFnKind {
        &self.kind
    }

    pub fn order(&self) -> i64 {
        self.order
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Whether the entry executes for a run with the given flags
    pub fn applies_to(&self, nested: bool, intermediate: bool) -> bool {
        (!nested || self.nested) && (!intermediate || self.intermediate)
    }

    pub fn call(&self, tracker: &Tracker, env: &LoggerEnv) -> std::result::Result<(), RunFnError> {
        (self.callable)(tracker, env)
    }

    /// Whether two entries share the same callable instance
    pub fn same_callable(&self, other: &RunFunction) -> bool {
        Arc::ptr_eq(&self.callable, &other.callable)
    }
}

impl fmt::Debug for RunFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunFunction")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("order", &self.order)
            .field("nested", &self.nested)
            .field("intermediate", &self.intermediate)
            .finish()
    }
}

/// Options of the registration convenience forms
#[derive(Debug, Clone)]
pub struct RunFnOptions {
    pub order: i64,
    pub nested: bool,
    pub intermediate: bool,
    pub error_message: Option<String>,
    /// Skip the diagnostic when the name is already registered
    pub silent_duplicate: bool,
}

impl Default for RunFnOptions {
    fn default() -> Self {
        Self {
            order: 0,
            nested: true,
            intermediate: true,
            error_message: None,
            silent_duplicate: true,
        }
    }
}

impl RunFnOptions {
    pub fn order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn nested(mut self, nested: bool) -> Self {
        self.nested = nested;
        self
    }

    pub fn intermediate(mut self, intermediate: bool) -> Self {
        self.intermediate = intermediate;
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn silent_duplicate(mut self, silent: bool) -> Self {
        self.silent_duplicate = silent;
        self
    }
}

/// Name-deduplicated collection of run function entries
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    entries: Vec<RunFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry unless one with the same name exists
    ///
    /// Returns whether the entry was added. A skipped duplicate is only
    /// reported when `silent_duplicate` is false.
    pub fn register(&mut self, entry: RunFunction, silent_duplicate: bool) -> bool {
        if self.contains(entry.name()) {
            if !silent_duplicate {
                tracing::debug!(name = entry.name(), "Run function already registered, skipped");
            }
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn get(&self, name: &str) -> Option<&RunFunction> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Entries in execution order; registration order breaks ties
    pub fn ordered(&self) -> Vec<RunFunction> {
        let mut entries = self.entries.clone();
        entries.sort_by_key(RunFunction::order);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Teardown,
}

impl Phase {
    fn data_type(self) -> &'static str {
        match self {
            Phase::Setup => "SetupFn",
            Phase::Teardown => "TearDownFn",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Setup => write!(f, "setup"),
            Phase::Teardown => write!(f, "teardown"),
        }
    }
}

/// A failed entry of a phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub entry: String,
    pub message: String,
    pub interrupted: bool,
}

/// Outcome of executing one setup or teardown phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub phase: Phase,
    pub executed: Vec<String>,
    /// Entries gated out by their nested/intermediate flags
    pub skipped: Vec<String>,
    pub failures: Vec<EntryFailure>,
}

impl PhaseReport {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            executed: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, entry: &str) -> bool {
        self.failures.iter().any(|f| f.entry == entry)
    }
}

/// Execute entries in order
///
/// Every entry gets its own copy of `env` with the phase type set in its
/// data payload. Failures are logged with the entry name. In the setup
/// phase an interruption aborts the remaining entries; in the teardown
/// phase nothing aborts.
pub(crate) fn run_phase(
    tracker: &Tracker,
    phase: Phase,
    entries: &[RunFunction],
    env: &LoggerEnv,
    nested: bool,
    intermediate: bool,
) -> Result<PhaseReport> {
    let mut report = PhaseReport::new(phase);

    for entry in entries {
        if !entry.applies_to(nested, intermediate) {
            report.skipped.push(entry.name.clone());
            continue;
        }

        let mut entry_env = env.clone();
        if entry_env.data.is_null() {
            entry_env.data = serde_json::json!({ "type": phase.data_type() });
        }

        report.executed.push(entry.name.clone());
        let Err(err) = entry.call(tracker, &entry_env) else {
            continue;
        };

        let interrupted = matches!(err, RunFnError::Interrupted);
        let message = match &entry.error_message {
            Some(prefix) => format!("{prefix}: {err:#}"),
            None => format!("{err:#}"),
        };
        tracing::warn!(
            phase = %phase,
            entry = %entry.name,
            interrupted,
            "Failed running {} function: {}",
            phase,
            message
        );
        report.failures.push(EntryFailure {
            entry: entry.name.clone(),
            message,
            interrupted,
        });

        if interrupted && phase == Phase::Setup {
            return Err(TrackError::Interrupted {
                entry: entry.name.clone(),
            });
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests;
