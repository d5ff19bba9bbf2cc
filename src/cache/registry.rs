use crate::backend::{Backend, RunInfo};
use crate::cache::{Cache, CacheValue, MergeConflict};
use crate::error::{Result, TrackError};
use crate::lifecycle::{FunctionRegistry, RunFunction};
use crate::sync::lock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Name of the teardown entry that deletes a run cache when its run ends
pub const CACHE_CLEANUP: &str = "cache_cleanup";

/// Cache bound to a single tracked run
///
/// Besides its entries, a run cache holds the teardown entries registered
/// while its run was active, so they disappear together with the run.
#[derive(Debug)]
pub struct RunCache {
    run: RunInfo,
    cache: Mutex<Cache>,
    teardowns: Mutex<FunctionRegistry>,
}

impl RunCache {
    fn new(run: RunInfo) -> Self {
        Self {
            run,
            cache: Mutex::new(Cache::new()),
            teardowns: Mutex::new(FunctionRegistry::new()),
        }
    }

    pub fn run(&self) -> &RunInfo {
        &self.run
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    /// Run `f` with exclusive access to the cache entries
    pub fn with_cache<T>(&self, f: impl FnOnce(&mut Cache) -> T) -> T {
        f(&mut lock(&self.cache))
    }

    /// Copy of the current entries
    pub fn snapshot(&self) -> Cache {
        lock(&self.cache).clone()
    }

    /// Register a teardown entry for this run; returns false on duplicate name
    pub fn register_teardown(&self, entry: RunFunction, silent_duplicate: bool) -> bool {
        lock(&self.teardowns).register(entry, silent_duplicate)
    }

    pub fn teardowns(&self) -> Vec<RunFunction> {
        lock(&self.teardowns).ordered()
    }
}

/// Process-wide cache plus one [`RunCache`] per tracked run
///
/// Every `run_*` operation takes an optional run id; `None` means the run
/// the backend reports as active. Run caches are created on first use and
/// register a [`CACHE_CLEANUP`] teardown with maximal order, so they are
/// removed after every other teardown of their run has executed.
pub struct CacheRegistry {
    backend: Arc<dyn Backend>,
    process: Mutex<Cache>,
    setups: Mutex<FunctionRegistry>,
    teardowns: Mutex<FunctionRegistry>,
    runs: Mutex<HashMap<String, Arc<RunCache>>>,
}

impl CacheRegistry {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            process: Mutex::new(Cache::new()),
            setups: Mutex::new(FunctionRegistry::new()),
            teardowns: Mutex::new(FunctionRegistry::new()),
            runs: Mutex::new(HashMap::new()),
        }
    }

    // ---- process scope ----

    pub fn add(&self, key: impl Into<String>, value: impl Into<CacheValue>) -> Result<()> {
        lock(&self.process).add(key, value)
    }

    pub fn get(&self, key: &str) -> Option<CacheValue> {
        lock(&self.process).get(key).cloned()
    }

    pub fn pop(&self, key: &str) -> Option<CacheValue> {
        lock(&self.process).pop(key)
    }

    pub fn exists(&self, key: &str) -> bool {
        lock(&self.process).exists(key)
    }

    pub fn clear(&self) {
        lock(&self.process).clear();
    }

    pub fn merge_value(
        &self,
        key: impl Into<String>,
        value: impl Into<CacheValue>,
    ) -> Vec<MergeConflict> {
        lock(&self.process).merge_value(key, value)
    }

    /// Copy of the process-wide entries
    pub fn snapshot(&self) -> Cache {
        lock(&self.process).clone()
    }

    /// Setup entries live in the process scope; they exist before any run
    pub fn register_setup(&self, entry: RunFunction, silent_duplicate: bool) -> bool {
        lock(&self.setups).register(entry, silent_duplicate)
    }

    pub fn setups(&self) -> Vec<RunFunction> {
        lock(&self.setups).ordered()
    }

    /// Teardown entries registered while no run was active
    pub fn register_process_teardown(&self, entry: RunFunction, silent_duplicate: bool) -> bool {
        lock(&self.teardowns).register(entry, silent_duplicate)
    }

    pub fn process_teardowns(&self) -> Vec<RunFunction> {
        lock(&self.teardowns).ordered()
    }

    // ---- run scope ----

    fn resolve_run(&self, run_id: Option<&str>) -> Result<RunInfo> {
        match run_id {
            Some(id) => Ok(self.backend.get_run(id)?.info),
            None => self.backend.active_run().ok_or(TrackError::NoActiveRun),
        }
    }

    /// Resolve a run and make sure its cache exists
    ///
    /// The check-then-create sequence runs under the registry lock, so two
    /// callers racing on the same run end up sharing one instance.
    ///
    /// # Errors
    /// `NoActiveRun` when `run_id` is `None` and no run is active,
    /// `UnknownRun` when the backend does not know `run_id`.
    pub fn run_init(&self, run_id: Option<&str>) -> Result<Arc<RunCache>> {
        let run = self.resolve_run(run_id)?;
        let mut runs = lock(&self.runs);
        if let Some(existing) = runs.get(&run.run_id) {
            return Ok(Arc::clone(existing));
        }

        let id = run.run_id.clone();
        let run_cache = Arc::new(RunCache::new(run));
        let cleanup_id = id.clone();
        run_cache.register_teardown(
            RunFunction::utility(CACHE_CLEANUP, move |tracker, _env| {
                tracker.cache().discard_run(&cleanup_id);
                tracing::debug!(run_id = %cleanup_id, "Cleared run cache after run");
                Ok(())
            })
            .with_order(i64::MAX),
            true,
        );
        runs.insert(id.clone(), Arc::clone(&run_cache));
        tracing::debug!(run_id = %id, "Created run cache");
        Ok(run_cache)
    }

    /// Run cache for a run, created on first use
    pub fn run_cache(&self, run_id: Option<&str>) -> Result<Arc<RunCache>> {
        self.run_init(run_id)
    }

    pub fn run_add(
        &self,
        key: impl Into<String>,
        value: impl Into<CacheValue>,
        run_id: Option<&str>,
    ) -> Result<()> {
        self.run_init(run_id)?.with_cache(|c| c.add(key, value))
    }

    pub fn run_get(&self, key: &str, run_id: Option<&str>) -> Result<Option<CacheValue>> {
        Ok(self.run_init(run_id)?.with_cache(|c| c.get(key).cloned()))
    }

    pub fn run_pop(&self, key: &str, run_id: Option<&str>) -> Result<Option<CacheValue>> {
        Ok(self.run_init(run_id)?.with_cache(|c| c.pop(key)))
    }

    pub fn run_exists(&self, key: &str, run_id: Option<&str>) -> Result<bool> {
        Ok(self.run_init(run_id)?.with_cache(|c| c.exists(key)))
    }

    pub fn run_clear(&self, run_id: Option<&str>) -> Result<()> {
        self.run_init(run_id)?.with_cache(Cache::clear);
        Ok(())
    }

    pub fn run_merge_value(
        &self,
        key: impl Into<String>,
        value: impl Into<CacheValue>,
        run_id: Option<&str>,
    ) -> Result<Vec<MergeConflict>> {
        Ok(self.run_init(run_id)?.with_cache(|c| c.merge_value(key, value)))
    }

    /// Remove the run cache of a run from the registry
    pub fn run_delete(&self, run_id: Option<&str>) -> Result<()> {
        let run = self.resolve_run(run_id)?;
        self.discard_run(&run.run_id);
        Ok(())
    }

    /// Remove a run cache without resolving the run or creating anything
    pub fn discard_run(&self, run_id: &str) -> Option<Arc<RunCache>> {
        lock(&self.runs).remove(run_id)
    }

    /// Whether a run cache currently exists, without creating one
    pub fn contains_run(&self, run_id: &str) -> bool {
        lock(&self.runs).contains_key(run_id)
    }

    /// Existing run cache of a run, without creating one
    pub fn peek_run(&self, run_id: &str) -> Option<Arc<RunCache>> {
        lock(&self.runs).get(run_id).cloned()
    }

    pub fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.runs).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Fold another registry into this one
    ///
    /// The process caches are merged, then every run cache of `other` is
    /// merged into the run cache of the same run here, creating it if
    /// needed.
    pub fn merge(&self, other: &CacheRegistry) -> Result<Vec<MergeConflict>> {
        let incoming = other.snapshot();
        let mut conflicts = lock(&self.process).merge(&incoming);

        let others: Vec<Arc<RunCache>> = lock(&other.runs).values().cloned().collect();
        for run_cache in others {
            let snapshot = run_cache.snapshot();
            let target = self.run_init(Some(run_cache.run_id()))?;
            conflicts.extend(target.with_cache(|c| c.merge(&snapshot)));
        }
        Ok(conflicts)
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("process", &*lock(&self.process))
            .field("runs", &self.run_ids())
            .finish()
    }
}
