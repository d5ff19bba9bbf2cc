use crate::error::Result;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Fully qualified, dot separated path of a function (e.g. `sklearn.tree.DecisionTreeClassifier.fit`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackagePath(String);

impl PackagePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Last segment, the simple name of the function
    pub fn name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for PackagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pattern over package paths
///
/// Syntax: `*` matches within one path segment, `**` matches across
/// segments, everything else is literal. Patterns are anchored at both
/// ends.
///
/// ```
/// use tracepads::mapping::{PackagePath, PathMatcher};
///
/// let matcher = PathMatcher::new("sklearn.*.fit")?;
/// assert!(matcher.matches(&PackagePath::new("sklearn.tree.fit")));
/// assert!(!matcher.matches(&PackagePath::new("sklearn.tree.base.fit")));
/// # Ok::<(), tracepads::error::TrackError>(())
/// ```
#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: String,
    regex: Regex,
}

impl PathMatcher {
    pub fn new(pattern: &str) -> Result<Self> {
        let mut source = String::with_capacity(pattern.len() + 8);
        source.push('^');
        let mut rest = pattern;
        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix("**") {
                source.push_str(".*");
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix('*') {
                source.push_str("[^.]*");
                rest = tail;
            } else {
                let end = rest.find('*').unwrap_or(rest.len());
                source.push_str(&regex::escape(&rest[..end]));
                rest = &rest[end..];
            }
        }
        source.push('$');

        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(&source)?,
        })
    }

    /// Matcher for exactly one path
    pub fn exact(path: &PackagePath) -> Result<Self> {
        Ok(Self {
            pattern: path.as_str().to_string(),
            regex: Regex::new(&format!("^{}$", regex::escape(path.as_str())))?,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, path: &PackagePath) -> bool {
        self.regex.is_match(path.as_str())
    }
}

impl PartialEq for PathMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for PathMatcher {}

impl Hash for PathMatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern.hash(state);
    }
}

impl PartialOrd for PathMatcher {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PathMatcher {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pattern.cmp(&other.pattern)
    }
}

impl Serialize for PathMatcher {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.pattern)
    }
}

impl<'de> Deserialize<'de> for PathMatcher {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        PathMatcher::new(&pattern).map_err(serde::de::Error::custom)
    }
}
