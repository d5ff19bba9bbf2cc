//! Interception of tracked functions
//!
//! The [`WrapManager`] keeps a side-table of wrapped targets. A target is
//! either a slot of a [`Namespace`] or, for unbound functions, the function
//! instance itself. Wrapping produces a replacement [`Function`] with the
//! same name that dispatches to the subscribed loggers around the
//! original call; for bound targets the namespace slot is replaced in
//! place. Unwrapping restores the original exactly.
//!
//! Wrapping an already wrapped target does not nest a second wrapper: the
//! new mappings are added to the existing wrapper's mapping set.

use crate::anchor::Anchor;
use crate::function::{CallArgs, Function, FunctionId, Namespace, NamespaceId};
use crate::logger::{CallOutcome, LoggerEnv};
use crate::mapping::MatchedMapping;
use crate::sync::{lock, read, write};
use crate::tracker::Tracker;
use fnv::FnvHashMap;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Instant;

/// Identity of a wrapped target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetKey {
    Bound { namespace: NamespaceId, name: String },
    Unbound(FunctionId),
}

type SharedMappings = Arc<RwLock<BTreeSet<MatchedMapping>>>;

struct WrapRecord {
    original: Function,
    replacement: Function,
    namespace: Option<Weak<Namespace>>,
    mappings: SharedMappings,
}

#[derive(Default)]
struct WrapTable {
    records: FnvHashMap<TargetKey, WrapRecord>,
    /// Replacement function id -> target it was installed for
    replacements: FnvHashMap<FunctionId, TargetKey>,
}

impl WrapTable {
    fn key_of(&self, function: &Function) -> Option<TargetKey> {
        if let Some(key) = self.replacements.get(&function.id()) {
            return Some(key.clone());
        }
        self.records
            .iter()
            .find(|(_, r)| r.original.id() == function.id())
            .map(|(k, _)| k.clone())
    }

    fn remove(&mut self, key: &TargetKey) -> Option<WrapRecord> {
        let record = self.records.remove(key)?;
        self.replacements.remove(&record.replacement.id());
        Some(record)
    }
}

/// Side-table of wrapped functions
pub struct WrapManager {
    tracker: Weak<Tracker>,
    table: Mutex<WrapTable>,
}

impl WrapManager {
    pub(crate) fn new(tracker: Weak<Tracker>) -> Self {
        Self {
            tracker,
            table: Mutex::new(WrapTable::default()),
        }
    }

    /// Wrap `function` and install the replacement
    ///
    /// With a namespace the slot named after the function is replaced in
    /// place. If the target is already wrapped, `mappings` are added to the
    /// existing wrapper and that wrapper is returned.
    pub fn wrap(
        &self,
        function: &Function,
        namespace: Option<&Arc<Namespace>>,
        mappings: BTreeSet<MatchedMapping>,
    ) -> Function {
        let mut table = lock(&self.table);

        let key = match (table.replacements.get(&function.id()), namespace) {
            (Some(key), _) => key.clone(),
            (None, Some(ns)) => TargetKey::Bound {
                namespace: ns.id(),
                name: function.name().to_string(),
            },
            (None, None) => TargetKey::Unbound(function.id()),
        };

        if let Some(record) = table.records.get(&key) {
            let same_target = record.original.id() == function.id()
                || record.replacement.id() == function.id();
            if same_target {
                write(&record.mappings).extend(mappings);
                tracing::debug!(function = function.name(), "Target already wrapped, mappings added");
                return record.replacement.clone();
            }
            // The slot now holds a different function; wrap that one instead
            table.remove(&key);
        }

        let shared: SharedMappings = Arc::new(RwLock::new(mappings));
        let replacement = {
            let tracker = Weak::clone(&self.tracker);
            let original = function.clone();
            let mappings = Arc::clone(&shared);
            function.derive(move |args| match tracker.upgrade() {
                Some(tracker) => {
                    let mappings = read(&mappings).clone();
                    dispatch(&tracker, &original, &mappings, args)
                }
                None => original.call(args),
            })
        };

        if let Some(ns) = namespace {
            ns.replace(function.name(), replacement.clone());
        }
        table.replacements.insert(replacement.id(), key.clone());
        table.records.insert(
            key,
            WrapRecord {
                original: function.clone(),
                replacement: replacement.clone(),
                namespace: namespace.map(Arc::downgrade),
                mappings: shared,
            },
        );
        tracing::debug!(
            function = function.name(),
            module = function.module(),
            bound = namespace.is_some(),
            "Wrapped function"
        );
        replacement
    }

    /// Remove the wrapper of `function` (given as original or replacement)
    ///
    /// Restores the namespace slot if it still holds the replacement and
    /// returns the original function.
    pub fn unwrap(&self, function: &Function) -> Option<Function> {
        let mut table = lock(&self.table);
        let key = table.key_of(function)?;
        let record = table.remove(&key)?;
        drop(table);
        Some(restore(record))
    }

    /// Remove the wrapper installed in `name` of `namespace`
    pub fn unwrap_in(&self, namespace: &Namespace, name: &str) -> Option<Function> {
        let key = TargetKey::Bound {
            namespace: namespace.id(),
            name: name.to_string(),
        };
        let record = lock(&self.table).remove(&key)?;
        Some(restore(record))
    }

    pub fn is_wrapped(&self, function: &Function) -> bool {
        lock(&self.table).key_of(function).is_some()
    }

    pub fn is_wrapped_in(&self, namespace: &Namespace, name: &str) -> bool {
        lock(&self.table).records.contains_key(&TargetKey::Bound {
            namespace: namespace.id(),
            name: name.to_string(),
        })
    }

    /// Mappings the wrapper of `function` dispatches for
    pub fn mappings_of(&self, function: &Function) -> Option<BTreeSet<MatchedMapping>> {
        let table = lock(&self.table);
        let key = table.key_of(function)?;
        table.records.get(&key).map(|r| read(&r.mappings).clone())
    }

    pub fn len(&self) -> usize {
        lock(&self.table).records.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.table).records.is_empty()
    }
}

impl std::fmt::Debug for WrapManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrapManager")
            .field("wrapped", &self.len())
            .finish()
    }
}

fn restore(record: WrapRecord) -> Function {
    let namespace = record.namespace.as_ref().and_then(Weak::upgrade);
    if let Some(ns) = namespace {
        let name = record.original.name();
        let holds_replacement = ns
            .get(name)
            .is_some_and(|current| current.id() == record.replacement.id());
        if holds_replacement {
            ns.replace(name, record.original.clone());
        }
    }
    tracing::debug!(function = record.original.name(), "Unwrapped function");
    record.original
}

/// Call `original` with every logger subscribed to the mappings' anchors
///
/// Logger failures are logged and ignored. The result of the original
/// call, success or failure, is returned unchanged after the loggers
/// observed it.
fn dispatch(
    tracker: &Tracker,
    original: &Function,
    mappings: &BTreeSet<MatchedMapping>,
    args: &CallArgs,
) -> anyhow::Result<Value> {
    let anchors: BTreeSet<Anchor> = mappings
        .iter()
        .flat_map(|m| m.anchors().iter().cloned())
        .collect();
    let loggers = tracker.loggers().loggers_for(&anchors);
    if loggers.is_empty() {
        return original.call(args);
    }

    let env = match tracker.active_run() {
        Some(run) => LoggerEnv::for_run(&run),
        None => LoggerEnv::new(),
    }
    .with_parameter(args.kwargs.clone())
    .with_mappings(mappings.iter().cloned())
    .with_data(json!({
        "type": "CallFn",
        "function": original.name(),
        "module": original.module(),
    }));

    for logger in &loggers {
        if let Err(err) = logger.before_call(tracker, &env) {
            tracing::warn!(
                logger = logger.name(),
                function = original.name(),
                "Logger failed before call: {:#}",
                err
            );
        }
    }

    let started = Instant::now();
    let result = original.call(args);
    let outcome = CallOutcome {
        result: result.as_ref(),
        duration: started.elapsed(),
    };

    for logger in &loggers {
        if let Err(err) = logger.after_call(tracker, &env, &outcome) {
            tracing::warn!(
                logger = logger.name(),
                function = original.name(),
                "Logger failed after call: {:#}",
                err
            );
        }
    }
    result
}
