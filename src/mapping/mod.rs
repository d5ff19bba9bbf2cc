// Mappings: declarative rules binding function paths to anchors
//
// A mapping pairs a path pattern with the anchors a matching call fires
// and free-form classification values. A function may be matched by any
// number of mappings at once; every match is kept together with the
// concrete path that satisfied it.

mod collection;
mod path;

pub use collection::{MappingCollection, MappingRegistry};
pub use path::{PackagePath, PathMatcher};

use crate::anchor::Anchor;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Library a mapping was declared for
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LibrarySpec {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl LibrarySpec {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Library for mappings synthesized at run time for a module
    pub fn run_time(module: &str) -> Self {
        Self::new(module, None)
    }
}

/// Rule binding a path pattern to anchors and classification values
#[derive(Debug, Clone)]
pub struct Mapping {
    matcher: PathMatcher,
    library: LibrarySpec,
    anchors: BTreeSet<Anchor>,
    values: Map<String, Value>,
    // Serialized `values`; keys are sorted, so equal maps render equally
    values_key: String,
}

impl Mapping {
    pub fn new(
        matcher: PathMatcher,
        library: LibrarySpec,
        anchors: BTreeSet<Anchor>,
        values: Map<String, Value>,
    ) -> Self {
        let values_key = Value::Object(values.clone()).to_string();
        Self {
            matcher,
            library,
            anchors,
            values,
            values_key,
        }
    }

    pub fn matcher(&self) -> &PathMatcher {
        &self.matcher
    }

    pub fn library(&self) -> &LibrarySpec {
        &self.library
    }

    pub fn anchors(&self) -> &BTreeSet<Anchor> {
        &self.anchors
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn matches(&self, path: &PackagePath) -> bool {
        self.matcher.matches(path)
    }

    fn sort_key(&self) -> (&PathMatcher, &LibrarySpec, &BTreeSet<Anchor>, &str) {
        (&self.matcher, &self.library, &self.anchors, self.values_key.as_str())
    }
}

impl PartialEq for Mapping {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

/// A mapping together with the concrete path it matched
#[derive(Debug, Clone)]
pub struct MatchedMapping {
    pub mapping: Arc<Mapping>,
    pub path: PackagePath,
}

impl MatchedMapping {
    pub fn new(mapping: Arc<Mapping>, path: PackagePath) -> Self {
        Self { mapping, path }
    }

    pub fn anchors(&self) -> &BTreeSet<Anchor> {
        self.mapping.anchors()
    }
}

impl PartialEq for MatchedMapping {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MatchedMapping {}

impl PartialOrd for MatchedMapping {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MatchedMapping {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path
            .cmp(&other.path)
            .then_with(|| self.mapping.sort_key().cmp(&other.mapping.sort_key()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(pattern: &str, anchor: &str) -> Arc<Mapping> {
        classified(pattern, anchor, Map::new())
    }

    fn classified(pattern: &str, anchor: &str, values: Map<String, Value>) -> Arc<Mapping> {
        Arc::new(Mapping::new(
            PathMatcher::new(pattern).unwrap(),
            LibrarySpec::new("sklearn", Some("0.23".to_string())),
            [Anchor::new(anchor, "")].into_iter().collect(),
            values,
        ))
    }

    fn type_value(kind: &str) -> Map<String, Value> {
        [("type".to_string(), Value::from(kind))].into_iter().collect()
    }

    #[test]
    fn test_matched_mappings_keep_distinct_rules() {
        let path = PackagePath::new("sklearn.tree.fit");
        let set: BTreeSet<MatchedMapping> = [
            MatchedMapping::new(mapping("sklearn.**", "on_call"), path.clone()),
            MatchedMapping::new(mapping("sklearn.*.fit", "on_fit"), path.clone()),
            MatchedMapping::new(mapping("sklearn.*.fit", "on_fit"), path),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_mappings_differing_only_in_values_are_distinct() {
        let path = PackagePath::new("sklearn.tree.fit");
        let training = classified("sklearn.**", "on_fit", type_value("Training"));
        let estimator = classified("sklearn.**", "on_fit", type_value("Estimator"));
        assert_ne!(*training, *estimator);

        let set: BTreeSet<MatchedMapping> = [
            MatchedMapping::new(Arc::clone(&training), path.clone()),
            MatchedMapping::new(estimator, path.clone()),
            MatchedMapping::new(classified("sklearn.**", "on_fit", type_value("Training")), path),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_run_time_library_has_no_version() {
        let lib = LibrarySpec::run_time("my_module");
        assert_eq!(lib.name, "my_module");
        assert!(lib.version.is_none());
    }
}
