//! Tracker service
//!
//! The [`Tracker`] owns every process-wide registry (anchors, mappings,
//! loggers, caches, wrapped targets) together with the backend and the
//! configuration. It is built once and shared as `Arc<Tracker>`; nothing
//! in this crate keeps global state.
//!
//! Run control lives in [`crate::lifecycle`], the logging primitives in
//! `logging.rs` and the read-side queries in `results.rs`.

mod logging;
mod results;

pub use results::ArtifactEntry;

use crate::anchor::{Anchor, AnchorRef, AnchorRegistry};
use crate::backend::{Backend, InMemoryBackend};
use crate::cache::CacheRegistry;
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::function::{Function, Namespace};
use crate::logger::{CallLogger, LoggerRegistry};
use crate::mapping::{
    LibrarySpec, Mapping, MappingCollection, MappingRegistry, MatchedMapping, PackagePath,
    PathMatcher,
};
use crate::wrap::WrapManager;
use serde_json::{json, Map};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Context path used for functions tracked without a namespace
pub const UNBOUND_CONTEXT: &str = "<unbound>";

/// Options of [`Tracker::track`]
#[derive(Debug, Clone, Default)]
pub struct TrackOptions {
    /// Anchors the call fires; the default anchor when empty
    pub anchors: Vec<AnchorRef>,
    /// Explicit mapping; one is synthesized when `None`
    pub mapping: Option<Mapping>,
}

impl TrackOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anchor(mut self, anchor: impl Into<AnchorRef>) -> Self {
        self.anchors.push(anchor.into());
        self
    }

    pub fn mapping(mut self, mapping: Mapping) -> Self {
        self.mapping = Some(mapping);
        self
    }
}

/// Injected tracking service
pub struct Tracker {
    config: TrackerConfig,
    backend: Arc<dyn Backend>,
    cache: CacheRegistry,
    anchors: AnchorRegistry,
    default_anchor: Anchor,
    mappings: MappingRegistry,
    loggers: LoggerRegistry,
    wraps: WrapManager,
}

impl Tracker {
    /// Build a tracker over `backend`
    ///
    /// Registers the default anchor and loads every mapping catalogue named
    /// in the configuration.
    ///
    /// # Errors
    /// Invalid configuration or an unreadable mapping catalogue.
    pub fn new(config: TrackerConfig, backend: Arc<dyn Backend>) -> Result<Arc<Self>> {
        config.validate()?;

        let anchors = AnchorRegistry::new();
        let default_anchor = anchors.register(
            &config.default_anchor,
            "Generic anchor fired by every tracked call",
        );
        let mappings = MappingRegistry::new();
        for file in &config.mapping_files {
            mappings.load_file(file, &anchors)?;
        }

        let tracker = Arc::new_cyclic(|weak| Self {
            cache: CacheRegistry::new(Arc::clone(&backend)),
            wraps: WrapManager::new(weak.clone()),
            config,
            backend,
            anchors,
            default_anchor,
            mappings,
            loggers: LoggerRegistry::new(),
        });
        tracing::debug!(
            default_anchor = %tracker.default_anchor,
            catalogues = tracker.mappings.len(),
            "Tracker initialized"
        );
        Ok(tracker)
    }

    /// Tracker with default configuration over an [`InMemoryBackend`]
    pub fn in_memory() -> Result<Arc<Self>> {
        Self::new(TrackerConfig::default(), Arc::new(InMemoryBackend::new()))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn cache(&self) -> &CacheRegistry {
        &self.cache
    }

    pub fn anchors(&self) -> &AnchorRegistry {
        &self.anchors
    }

    pub fn default_anchor(&self) -> &Anchor {
        &self.default_anchor
    }

    pub fn mappings(&self) -> &MappingRegistry {
        &self.mappings
    }

    pub fn loggers(&self) -> &LoggerRegistry {
        &self.loggers
    }

    pub fn wraps(&self) -> &WrapManager {
        &self.wraps
    }

    /// Add a mapping catalogue
    pub fn add_mappings(&self, collection: MappingCollection) {
        self.mappings.add(collection);
    }

    /// Subscribe a logger to an anchor, creating the anchor if needed
    ///
    /// Returns `None` when `anchor` is an empty name.
    pub fn subscribe(
        &self,
        anchor: impl Into<AnchorRef>,
        logger: Arc<dyn CallLogger>,
    ) -> Option<Anchor> {
        let anchor = self.anchors.resolve(anchor.into())?;
        self.loggers.subscribe(anchor.clone(), logger);
        Some(anchor)
    }

    /// Namespace to bind to, if it actually defines `function`
    fn binding<'a>(
        &self,
        function: &Function,
        namespace: Option<&'a Arc<Namespace>>,
    ) -> Option<&'a Arc<Namespace>> {
        let ns = namespace?;
        if ns.defines(function.name()) {
            return Some(ns);
        }
        tracing::warn!(
            function = function.name(),
            context = ns.path(),
            "Context does not define the tracked function, tracking it unbound"
        );
        None
    }

    fn qualified_path(function: &Function, namespace: Option<&Arc<Namespace>>) -> PackagePath {
        let context = namespace.map_or(UNBOUND_CONTEXT, |ns| ns.path());
        PackagePath::new(format!("{}.{}", context, function.name()))
    }

    fn resolve_anchors(&self, anchors: &[AnchorRef]) -> BTreeSet<Anchor> {
        let resolved: BTreeSet<Anchor> = anchors
            .iter()
            .filter_map(|a| self.anchors.resolve(a.clone()))
            .collect();
        if resolved.is_empty() {
            return BTreeSet::from([self.default_anchor.clone()]);
        }
        resolved
    }

    /// Mappings a call to `function` would be intercepted with
    ///
    /// An explicit mapping is used as given. Otherwise a mapping matching
    /// exactly the qualified path of the function is synthesized, with the
    /// resolved anchors and a `CustomTrack` classification.
    pub fn resolve_mappings(
        &self,
        function: &Function,
        namespace: Option<&Arc<Namespace>>,
        options: &TrackOptions,
    ) -> Result<BTreeSet<MatchedMapping>> {
        let namespace = self.binding(function, namespace);
        self.mappings_for(function, namespace, options)
    }

    fn mappings_for(
        &self,
        function: &Function,
        bound: Option<&Arc<Namespace>>,
        options: &TrackOptions,
    ) -> Result<BTreeSet<MatchedMapping>> {
        let path = Self::qualified_path(function, bound);

        let mapping = match &options.mapping {
            Some(mapping) => mapping.clone(),
            None => {
                tracing::warn!(
                    path = %path,
                    "Tracking a function without a mapping definition, generating a default mapping"
                );
                let mut values = Map::new();
                values.insert("type".to_string(), json!("CustomTrack"));
                values.insert("concept".to_string(), json!(function.name()));
                Mapping::new(
                    PathMatcher::exact(&path)?,
                    LibrarySpec::run_time(function.module()),
                    self.resolve_anchors(&options.anchors),
                    values,
                )
            }
        };
        Ok(BTreeSet::from([MatchedMapping::new(Arc::new(mapping), path)]))
    }

    /// Intercept calls to `function`
    ///
    /// With a namespace that defines the function, its slot is replaced so
    /// callers going through the namespace hit the wrapper. The wrapper is
    /// returned either way.
    pub fn track(
        &self,
        function: &Function,
        namespace: Option<&Arc<Namespace>>,
        options: TrackOptions,
    ) -> Result<Function> {
        let bound = self.binding(function, namespace);
        let mappings = self.mappings_for(function, bound, &options)?;
        Ok(self.wraps.wrap(function, bound, mappings))
    }

    /// Intercept `function` with the mappings declared in the catalogues
    ///
    /// Falls back to [`Tracker::track`] with default options when no
    /// catalogue matches the function's path.
    pub fn track_declared(
        &self,
        function: &Function,
        namespace: Option<&Arc<Namespace>>,
    ) -> Result<Function> {
        let bound = namespace.filter(|ns| ns.defines(function.name()));
        let path = Self::qualified_path(function, bound);
        let declared = self.mappings.resolve(&path);
        if declared.is_empty() {
            return self.track(function, namespace, TrackOptions::default());
        }
        Ok(self.wraps.wrap(function, bound, declared))
    }

    /// Remove interception from `function`, returning the original
    pub fn untrack(&self, function: &Function) -> Option<Function> {
        self.wraps.unwrap(function)
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("anchors", &self.anchors.len())
            .field("loggers", &self.loggers)
            .field("wraps", &self.wraps)
            .finish()
    }
}
