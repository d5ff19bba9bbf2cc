use crate::backend::{ArtifactMeta, FileFormat, RunInfo, StartRun};
use crate::error::{Result, TrackError};
use crate::lifecycle::{run_phase, Phase, PhaseReport, RunFnError, RunFnOptions, RunFunction};
use crate::logger::LoggerEnv;
use crate::tracker::Tracker;
use std::fs;

/// Run cache key marking a run as intermediate; holds the enclosing run id
pub(crate) const ENCLOSING_RUN_KEY: &str = "enclosing_run";

/// Parameters of [`Tracker::start_run`]
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Existing run to resume
    pub run_id: Option<String>,
    pub experiment_id: Option<String>,
    /// Experiment looked up (or created) by name when no id is given
    pub experiment_name: Option<String>,
    pub run_name: Option<String>,
    pub nested: bool,
    /// Environment handed to the setup entries
    pub env: Option<LoggerEnv>,
    pub run_setups: bool,
    pub(crate) intermediate: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_id: None,
            experiment_id: None,
            experiment_name: None,
            run_name: None,
            nested: false,
            env: None,
            run_setups: true,
            intermediate: false,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn experiment_id(mut self, experiment_id: impl Into<String>) -> Self {
        self.experiment_id = Some(experiment_id.into());
        self
    }

    pub fn experiment_name(mut self, name: impl Into<String>) -> Self {
        self.experiment_name = Some(name.into());
        self
    }

    pub fn run_name(mut self, run_name: impl Into<String>) -> Self {
        self.run_name = Some(run_name.into());
        self
    }

    pub fn nested(mut self, nested: bool) -> Self {
        self.nested = nested;
        self
    }

    pub fn env(mut self, env: LoggerEnv) -> Self {
        self.env = Some(env);
        self
    }

    pub fn run_setups(mut self, run_setups: bool) -> Self {
        self.run_setups = run_setups;
        self
    }
}

/// Scoped nested run that restores its enclosing run when released
///
/// Release happens in [`IntermediateRun::finish`] or, failing that, on
/// drop. If the nested run is still active it is ended and its run cache
/// removed; then the enclosing run, if any, is made active again.
#[must_use = "dropping the guard immediately ends the intermediate run"]
pub struct IntermediateRun<'a> {
    tracker: &'a Tracker,
    run: RunInfo,
    enclosing: Option<RunInfo>,
    released: bool,
}

impl IntermediateRun<'_> {
    pub fn run(&self) -> &RunInfo {
        &self.run
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    pub fn enclosing(&self) -> Option<&RunInfo> {
        self.enclosing.as_ref()
    }

    /// Release the run and report any error doing so
    pub fn finish(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let backend = self.tracker.backend();

        let mut outcome = Ok(());
        let still_active = backend
            .active_run()
            .is_some_and(|active| active.run_id == self.run.run_id);
        if still_active {
            outcome = self.tracker.end_run().map(|_| ());
        }
        self.tracker.cache().discard_run(&self.run.run_id);

        if let Some(enclosing) = &self.enclosing {
            let restored = backend
                .active_run()
                .is_some_and(|active| active.run_id == enclosing.run_id);
            if !restored {
                let resumed = backend.start_run(&StartRun::resume(&enclosing.run_id));
                outcome = outcome.and(resumed.map(|_| ()));
            }
        }
        tracing::debug!(run_id = %self.run.run_id, "Released intermediate run");
        outcome
    }
}

impl Drop for IntermediateRun<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(run_id = %self.run.run_id, "Failed releasing intermediate run: {}", err);
        }
    }
}

impl Tracker {
    pub fn active_run(&self) -> Option<RunInfo> {
        self.backend().active_run()
    }

    /// Start (or resume) a run and execute the setup entries
    ///
    /// Setup entries gated out by their nested/intermediate flags are
    /// skipped. Ordinary setup failures are logged and the run starts
    /// anyway.
    ///
    /// # Errors
    /// Backend errors, and `Interrupted` when a setup entry signals
    /// cancellation. The run stays active in that case.
    pub fn start_run(&self, options: RunOptions) -> Result<RunInfo> {
        let experiment_id = match (&options.experiment_id, &options.run_id) {
            (Some(id), _) => Some(id.clone()),
            (None, Some(_)) => None,
            (None, None) => {
                let name = options
                    .experiment_name
                    .as_deref()
                    .unwrap_or(&self.config().default_experiment);
                Some(self.backend().get_or_create_experiment(name)?)
            }
        };

        let run = self.backend().start_run(&StartRun {
            run_id: options.run_id.clone(),
            experiment_id,
            run_name: options.run_name.clone(),
            nested: options.nested,
        })?;
        tracing::debug!(run_id = %run.run_id, nested = run.is_nested(), "Started run");

        if options.run_setups {
            let env = options.env.clone().unwrap_or_else(|| LoggerEnv::for_run(&run));
            let setups = self.cache().setups();
            run_phase(
                self,
                Phase::Setup,
                &setups,
                &env,
                run.is_nested(),
                options.intermediate,
            )?;
        }
        Ok(run)
    }

    /// End the active run
    ///
    /// Flushes the consolidated log, runs every teardown entry (process
    /// scope and run scope, ascending order, failures isolated), closes the
    /// run in the backend and removes its scratch directory.
    ///
    /// # Errors
    /// `NoActiveRun` when no run is active, and backend errors from the
    /// flush or the close.
    pub fn end_run(&self) -> Result<PhaseReport> {
        let run = self.active_run().ok_or(TrackError::NoActiveRun)?;

        if let Some(consolidated) = self.cache().get(&self.config().consolidated_log_key) {
            let content = serde_json::to_vec_pretty(&consolidated.to_json())?;
            self.log_mem_artifact(
                &content,
                ArtifactMeta::new(self.config().consolidated_log_artifact.clone())
                    .file_format(FileFormat::Json)
                    .description("Consolidated log of the run"),
            )?;
        }

        let run_cache = self.cache().peek_run(&run.run_id);
        let intermediate = run_cache
            .as_ref()
            .is_some_and(|c| c.with_cache(|cache| cache.exists(ENCLOSING_RUN_KEY)));

        let mut teardowns = self.cache().process_teardowns();
        if let Some(run_cache) = &run_cache {
            teardowns.extend(run_cache.teardowns());
        }
        teardowns.sort_by_key(RunFunction::order);

        let env = LoggerEnv::for_run(&run);
        let report = run_phase(
            self,
            Phase::Teardown,
            &teardowns,
            &env,
            run.is_nested(),
            intermediate,
        )?;

        self.backend().end_run()?;

        let scratch = self.config().scratch_dir(&run.run_id);
        if scratch.exists() {
            if let Err(err) = fs::remove_dir_all(&scratch) {
                tracing::warn!(path = %scratch.display(), "Failed removing scratch directory: {}", err);
            }
        }
        tracing::debug!(
            run_id = %run.run_id,
            teardowns = report.executed.len(),
            failures = report.failures.len(),
            "Ended run"
        );
        Ok(report)
    }

    /// Start a nested run managed by a scope guard
    ///
    /// The run cache of the new run records the enclosing run, which is
    /// what [`Tracker::is_intermediate_run`] checks.
    pub fn intermediate_run(&self, options: RunOptions) -> Result<IntermediateRun<'_>> {
        let enclosing = self.active_run();
        let mut options = options.nested(true);
        options.intermediate = true;
        let run = self.start_run(options)?;

        let mut guard = IntermediateRun {
            tracker: self,
            run,
            enclosing,
            released: false,
        };
        if let Some(enclosing) = &guard.enclosing {
            let marked = self.cache().run_add(
                ENCLOSING_RUN_KEY,
                enclosing.run_id.as_str(),
                Some(&guard.run.run_id),
            );
            if let Err(err) = marked {
                if let Err(release_err) = guard.release() {
                    tracing::warn!(
                        run_id = %guard.run.run_id,
                        "Failed releasing intermediate run: {}",
                        release_err
                    );
                }
                return Err(err);
            }
        }
        Ok(guard)
    }

    /// Run `f` inside an intermediate run
    ///
    /// The run is released whether `f` succeeds or not; an error from `f`
    /// takes precedence over an error releasing the run.
    pub fn with_intermediate_run<T, F>(&self, options: RunOptions, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&RunInfo) -> anyhow::Result<T>,
    {
        let guard = self.intermediate_run(options)?;
        let outcome = f(guard.run());
        let released = guard.finish();
        let value = outcome?;
        released?;
        Ok(value)
    }

    /// Whether the active run was started by [`Tracker::intermediate_run`]
    pub fn is_intermediate_run(&self) -> Result<bool> {
        self.cache().run_exists(ENCLOSING_RUN_KEY, None)
    }

    // ---- registration ----

    /// Register a setup entry; duplicates by name are skipped
    pub fn register_setup(&self, entry: RunFunction, silent_duplicate: bool) -> bool {
        self.cache().register_setup(entry, silent_duplicate)
    }

    /// Register a setup logger built from a function
    pub fn register_setup_fn<F>(
        &self,
        name: &str,
        description: &str,
        f: F,
        options: RunFnOptions,
    ) -> bool
    where
        F: Fn(&Tracker, &LoggerEnv) -> std::result::Result<(), RunFnError> + Send + Sync + 'static,
    {
        let entry = RunFunction::logger(name, description, f).with_options(&options);
        self.register_setup(entry, options.silent_duplicate)
    }

    /// Register a setup utility; utilities ignore the nested and
    /// intermediate flags of `options`
    pub fn register_setup_utility<F>(&self, name: &str, f: F, options: RunFnOptions) -> bool
    where
        F: Fn(&Tracker, &LoggerEnv) -> std::result::Result<(), RunFnError> + Send + Sync + 'static,
    {
        let entry = RunFunction::utility(name, f).with_options(&utility_options(&options));
        self.register_setup(entry, options.silent_duplicate)
    }

    /// Register a teardown entry
    ///
    /// With a run active the entry belongs to that run and is dropped with
    /// its run cache. Without one it goes to the process scope and runs at
    /// the end of every run.
    pub fn register_teardown(&self, entry: RunFunction, silent_duplicate: bool) -> Result<bool> {
        if self.active_run().is_none() {
            return Ok(self.cache().register_process_teardown(entry, silent_duplicate));
        }
        Ok(self
            .cache()
            .run_cache(None)?
            .register_teardown(entry, silent_duplicate))
    }

    /// Register a teardown logger built from a function
    pub fn register_teardown_fn<F>(
        &self,
        name: &str,
        description: &str,
        f: F,
        options: RunFnOptions,
    ) -> Result<bool>
    where
        F: Fn(&Tracker, &LoggerEnv) -> std::result::Result<(), RunFnError> + Send + Sync + 'static,
    {
        let entry = RunFunction::logger(name, description, f).with_options(&options);
        self.register_teardown(entry, options.silent_duplicate)
    }

    /// Register a teardown utility for simple cleanup tasks
    pub fn register_teardown_utility<F>(
        &self,
        name: &str,
        f: F,
        options: RunFnOptions,
    ) -> Result<bool>
    where
        F: Fn(&Tracker, &LoggerEnv) -> std::result::Result<(), RunFnError> + Send + Sync + 'static,
    {
        let entry = RunFunction::utility(name, f).with_options(&utility_options(&options));
        self.register_teardown(entry, options.silent_duplicate)
    }
}

fn utility_options(options: &RunFnOptions) -> RunFnOptions {
    RunFnOptions {
        nested: true,
        intermediate: true,
        ..options.clone()
    }
}
