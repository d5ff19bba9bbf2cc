use crate::anchor::AnchorRegistry;
use crate::error::Result;
use crate::mapping::{LibrarySpec, Mapping, MatchedMapping, PackagePath, PathMatcher};
use crate::sync::{read, write};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Mappings declared for one library
///
/// # Example TOML
/// ```toml
/// [library]
/// name = "sklearn"
/// version = "0.23.2"
///
/// [[mapping]]
/// pattern = "sklearn.**.fit"
/// anchors = ["on_fit"]
///
/// [mapping.values]
/// type = "Training"
/// ```
#[derive(Debug, Clone)]
pub struct MappingCollection {
    library: LibrarySpec,
    mappings: Vec<Arc<Mapping>>,
}

#[derive(Deserialize)]
struct CollectionFile {
    library: LibrarySpec,
    #[serde(default)]
    mapping: Vec<MappingEntry>,
}

#[derive(Deserialize)]
struct MappingEntry {
    pattern: PathMatcher,
    #[serde(default)]
    anchors: Vec<String>,
    #[serde(default)]
    values: toml::Table,
}

impl MappingCollection {
    pub fn new(library: LibrarySpec) -> Self {
        Self {
            library,
            mappings: Vec::new(),
        }
    }

    /// Load a collection from a TOML file, registering the anchors it names
    pub fn from_toml<P: AsRef<Path>>(path: P, anchors: &AnchorRegistry) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content, anchors)
    }

    pub fn from_toml_str(content: &str, anchors: &AnchorRegistry) -> Result<Self> {
        let file: CollectionFile = toml::from_str(content)?;
        let mut collection = Self::new(file.library);

        for entry in file.mapping {
            let resolved = entry
                .anchors
                .into_iter()
                .filter_map(|name| anchors.resolve(name.into()))
                .collect();
            let values: Map<String, Value> = serde_json::to_value(entry.values)?
                .as_object()
                .cloned()
                .unwrap_or_default();
            collection.push(Mapping::new(
                entry.pattern,
                collection.library.clone(),
                resolved,
                values,
            ));
        }
        Ok(collection)
    }

    pub fn push(&mut self, mapping: Mapping) {
        self.mappings.push(Arc::new(mapping));
    }

    pub fn library(&self) -> &LibrarySpec {
        &self.library
    }

    pub fn mappings(&self) -> &[Arc<Mapping>] {
        &self.mappings
    }

    /// Every mapping of this collection that matches `path`
    pub fn matches<'a>(
        &'a self,
        path: &'a PackagePath,
    ) -> impl Iterator<Item = MatchedMapping> + 'a {
        self.mappings
            .iter()
            .filter(move |m| m.matches(path))
            .map(move |m| MatchedMapping::new(Arc::clone(m), path.clone()))
    }
}

/// All mapping collections known to a tracker
#[derive(Debug, Default)]
pub struct MappingRegistry {
    collections: RwLock<Vec<MappingCollection>>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, collection: MappingCollection) {
        tracing::debug!(
            library = %collection.library().name,
            mappings = collection.mappings().len(),
            "Registered mapping collection"
        );
        write(&self.collections).push(collection);
    }

    pub fn load_file<P: AsRef<Path>>(&self, path: P, anchors: &AnchorRegistry) -> Result<()> {
        self.add(MappingCollection::from_toml(path, anchors)?);
        Ok(())
    }

    /// Every mapping, across all collections, that matches `path`
    pub fn resolve(&self, path: &PackagePath) -> BTreeSet<MatchedMapping> {
        read(&self.collections)
            .iter()
            .flat_map(|c| c.matches(path).collect::<Vec<_>>())
            .collect()
    }

    pub fn len(&self) -> usize {
        read(&self.collections).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.collections).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SKLEARN: &str = r#"
[library]
name = "sklearn"
version = "0.23.2"

[[mapping]]
pattern = "sklearn.**.fit"
anchors = ["on_fit"]

[mapping.values]
type = "Training"

[[mapping]]
pattern = "sklearn.**"
anchors = ["log_call", "on_call"]
"#;

    #[test]
    fn test_from_toml_str() -> Result<()> {
        let anchors = AnchorRegistry::new();
        let collection = MappingCollection::from_toml_str(SKLEARN, &anchors)?;

        assert_eq!(collection.library().name, "sklearn");
        assert_eq!(collection.mappings().len(), 2);
        assert_eq!(anchors.len(), 3);
        assert_eq!(
            collection.mappings()[0].values().get("type"),
            Some(&Value::from("Training"))
        );
        Ok(())
    }

    #[test]
    fn test_registry_keeps_all_matches() -> Result<()> {
        let anchors = AnchorRegistry::new();
        let registry = MappingRegistry::new();
        registry.add(MappingCollection::from_toml_str(SKLEARN, &anchors)?);

        let fit = registry.resolve(&PackagePath::new("sklearn.tree.Tree.fit"));
        assert_eq!(fit.len(), 2);
        assert!(fit
            .iter()
            .all(|m| m.path.as_str() == "sklearn.tree.Tree.fit"));

        let predict = registry.resolve(&PackagePath::new("sklearn.tree.Tree.predict"));
        assert_eq!(predict.len(), 1);

        assert!(registry.resolve(&PackagePath::new("numpy.mean")).is_empty());
        Ok(())
    }

    #[test]
    fn test_entries_differing_only_in_values_both_match() -> Result<()> {
        let catalogue = r#"
[library]
name = "sklearn"

[[mapping]]
pattern = "sklearn.**"
anchors = ["on_fit"]

[mapping.values]
type = "Training"

[[mapping]]
pattern = "sklearn.**"
anchors = ["on_fit"]

[mapping.values]
type = "Estimator"
"#;
        let anchors = AnchorRegistry::new();
        let registry = MappingRegistry::new();
        registry.add(MappingCollection::from_toml_str(catalogue, &anchors)?);

        let matched = registry.resolve(&PackagePath::new("sklearn.tree.Tree.fit"));
        let kinds: BTreeSet<&str> = matched
            .iter()
            .filter_map(|m| m.mapping.values().get("type").and_then(Value::as_str))
            .collect();
        assert_eq!(matched.len(), 2);
        assert_eq!(kinds, BTreeSet::from(["Estimator", "Training"]));
        Ok(())
    }

    #[test]
    fn test_load_file() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(SKLEARN.as_bytes())?;
        file.flush()?;

        let anchors = AnchorRegistry::new();
        let registry = MappingRegistry::new();
        registry.load_file(file.path(), &anchors)?;
        assert_eq!(registry.len(), 1);
        Ok(())
    }

    #[test]
    fn test_missing_library_table_is_error() {
        let anchors = AnchorRegistry::new();
        let result = MappingCollection::from_toml_str("[[mapping]]\npattern = \"a\"", &anchors);
        assert!(result.is_err());
    }
}
