// Scoped caches and the run-cache registry
//
// A `Cache` is a mergeable key/value store. The `CacheRegistry` owns one
// process-wide cache plus one `RunCache` per tracked run; run caches are
// created lazily on first use and deleted by a teardown entry registered
// at creation time, so their lifetime follows the run they belong to.

mod merge;
mod registry;
mod value;

pub use merge::{merge_layers, MergeConflict, MergeReport};
pub use registry::{CacheRegistry, RunCache, CACHE_CLEANUP};
pub use value::CacheValue;

use crate::error::{Result, TrackError};
use serde_json::Value;
use std::collections::BTreeMap;

/// Mergeable key/value store
///
/// Keys are unique. Combining two caches goes through [`Cache::merge`];
/// [`Cache::add`] never replaces a compound value with a value of another
/// variant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cache {
    entries: BTreeMap<String, CacheValue>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value
    ///
    /// When both the stored and the new value are dictionary-like
    /// (mappings or nested caches), the new keys are written into the
    /// stored value one by one instead of replacing it.
    ///
    /// # Errors
    /// `MergeTypeConflict` if a compound value would be replaced by a value
    /// of another variant.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<CacheValue>) -> Result<()> {
        let key = key.into();
        let value = value.into();

        let Some(existing) = self.entries.get_mut(&key) else {
            self.entries.insert(key, value);
            return Ok(());
        };

        match (existing, value) {
            (CacheValue::Mapping(current), CacheValue::Mapping(extra)) => {
                current.extend(extra);
            }
            (CacheValue::Cache(current), CacheValue::Cache(extra)) => {
                current.entries.extend(extra.entries);
            }
            (existing, value)
                if (existing.is_compound() || value.is_compound())
                    && existing.kind() != value.kind() =>
            {
                return Err(TrackError::MergeTypeConflict {
                    key,
                    existing: existing.kind(),
                    incoming: value.kind(),
                });
            }
            (existing, value) => *existing = value,
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&CacheValue> {
        self.entries.get(key)
    }

    /// Get a value or fall back to `default`
    pub fn get_or(&self, key: &str, default: CacheValue) -> CacheValue {
        self.entries.get(key).cloned().unwrap_or(default)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CacheValue> {
        self.entries.get_mut(key)
    }

    pub fn pop(&mut self, key: &str) -> Option<CacheValue> {
        self.entries.remove(key)
    }

    /// Remove a value or fall back to `default`
    pub fn pop_or(&mut self, key: &str, default: CacheValue) -> CacheValue {
        self.entries.remove(key).unwrap_or(default)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterate entries in key order; call again to restart
    pub fn items(&self) -> impl Iterator<Item = (&str, &CacheValue)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all entries, keeping the container
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Merge `other` into this cache; `other` is layered on top
    pub fn merge(&mut self, other: &Cache) -> Vec<MergeConflict> {
        let report = merge_layers([&self.entries, &other.entries]);
        self.entries = report.merged;
        report.conflicts
    }

    /// Merge a single value into the slot `key`
    ///
    /// This is how independent writers share a key: sequences grow,
    /// mappings and sets combine, nothing compound is overwritten.
    pub fn merge_value(
        &mut self,
        key: impl Into<String>,
        value: impl Into<CacheValue>,
    ) -> Vec<MergeConflict> {
        let key = key.into();
        let mut conflicts = Vec::new();
        let path = key.clone();
        merge::merge_slot(&mut self.entries, key, value.into(), &path, &mut conflicts);
        conflicts
    }

    /// Merge any number of caches into a new entry map
    pub fn merged<'a, I>(caches: I) -> MergeReport
    where
        I: IntoIterator<Item = &'a Cache>,
    {
        merge_layers(caches.into_iter().map(|c| &c.entries))
    }

    pub fn entries(&self) -> &BTreeMap<String, CacheValue> {
        &self.entries
    }

    pub(crate) fn replace_entries(&mut self, entries: BTreeMap<String, CacheValue>) {
        self.entries = entries;
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, CacheValue)> for Cache {
    fn from_iter<T: IntoIterator<Item = (String, CacheValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
