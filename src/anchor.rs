//! Anchors: named trigger points that call loggers subscribe to
//!
//! Anchors are identified by name only. Two anchors built independently
//! with the same name compare equal and hash the same, so they can be
//! used interchangeably. The [`AnchorRegistry`] keeps one instance per
//! name for the lifetime of its tracker.

use crate::sync::{read, write};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

const NO_DESCRIPTION: &str = "No description available";

/// Immutable (name, description) pair
#[derive(Debug, Clone)]
pub struct Anchor {
    name: Arc<str>,
    description: Arc<str>,
}

impl Anchor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: Arc::from(name),
            description: Arc::from(description),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for Anchor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Anchor {}

impl Hash for Anchor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for Anchor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Anchor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// An anchor given either by name or as an instance
#[derive(Debug, Clone)]
pub enum AnchorRef {
    Name(String),
    Anchor(Anchor),
}

impl From<&str> for AnchorRef {
    fn from(name: &str) -> Self {
        AnchorRef::Name(name.to_string())
    }
}

impl From<String> for AnchorRef {
    fn from(name: String) -> Self {
        AnchorRef::Name(name)
    }
}

impl From<Anchor> for AnchorRef {
    fn from(anchor: Anchor) -> Self {
        AnchorRef::Anchor(anchor)
    }
}

impl From<&Anchor> for AnchorRef {
    fn from(anchor: &Anchor) -> Self {
        AnchorRef::Anchor(anchor.clone())
    }
}

/// Registry of uniquely named anchors
#[derive(Debug, Default)]
pub struct AnchorRegistry {
    anchors: RwLock<BTreeMap<String, Anchor>>,
}

impl AnchorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a registered anchor by name or by an instance's name
    pub fn get_anchor(&self, anchor: impl Into<AnchorRef>) -> Option<Anchor> {
        let anchors = read(&self.anchors);
        match anchor.into() {
            AnchorRef::Name(name) => anchors.get(&name).cloned(),
            AnchorRef::Anchor(anchor) => anchors.get(anchor.name()).cloned(),
        }
    }

    /// Register an anchor, or return the one already registered under `name`
    pub fn register(&self, name: &str, description: &str) -> Anchor {
        write(&self.anchors)
            .entry(name.to_string())
            .or_insert_with(|| Anchor::new(name, description))
            .clone()
    }

    /// Normalize an anchor reference to the registered instance
    ///
    /// Unknown names are registered on demand. Empty names are not valid
    /// anchors and resolve to `None`.
    pub fn resolve(&self, anchor: AnchorRef) -> Option<Anchor> {
        match anchor {
            AnchorRef::Name(name) if name.trim().is_empty() => {
                tracing::debug!("Ignoring anchor with empty name");
                None
            }
            AnchorRef::Name(name) => Some(self.register(&name, NO_DESCRIPTION)),
            AnchorRef::Anchor(anchor) => {
                Some(self.register(anchor.name(), anchor.description()))
            }
        }
    }

    /// All registered anchors in name order
    pub fn anchors(&self) -> Vec<Anchor> {
        read(&self.anchors).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        read(&self.anchors).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.anchors).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_register_returns_existing_instance() {
        let registry = AnchorRegistry::new();
        let first = registry.register("on_fit", "Called when fitting");
        let second = registry.register("on_fit", "Another description");

        assert_eq!(registry.len(), 1);
        assert_eq!(second.description(), "Called when fitting");
        assert_eq!(first, second);
    }

    #[test]
    fn test_get_anchor_unknown_is_none() {
        let registry = AnchorRegistry::new();
        assert!(registry.get_anchor("missing").is_none());
    }

    #[test]
    fn test_get_anchor_by_instance() {
        let registry = AnchorRegistry::new();
        registry.register("on_score", "Scoring");

        let found = registry.get_anchor(Anchor::new("on_score", "")).unwrap();
        assert_eq!(found.description(), "Scoring");
        assert!(registry.get_anchor(&found).is_some());
        assert!(registry.get_anchor(Anchor::new("on_fit", "")).is_none());
    }

    #[test]
    fn test_equality_by_name_only() {
        let a = Anchor::new("log_call", "one");
        let b = Anchor::new("log_call", "two");
        assert_eq!(a, b);

        let set: HashSet<Anchor> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_resolve_creates_missing_names() {
        let registry = AnchorRegistry::new();
        let anchor = registry.resolve("on_predict".into()).unwrap();
        assert_eq!(anchor.description(), NO_DESCRIPTION);
        assert!(registry.get_anchor("on_predict").is_some());
    }

    #[test]
    fn test_resolve_ignores_empty_names() {
        let registry = AnchorRegistry::new();
        assert!(registry.resolve("  ".into()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_instance_registers_it() {
        let registry = AnchorRegistry::new();
        let anchor = Anchor::new("on_score", "Scoring");
        let resolved = registry.resolve(anchor.clone().into()).unwrap();
        assert_eq!(resolved, anchor);
        assert_eq!(registry.get_anchor("on_score").unwrap().description(), "Scoring");
    }
}
