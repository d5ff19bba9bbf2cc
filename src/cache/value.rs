use crate::cache::Cache;
use serde_json::Value;
use std::collections::BTreeMap;

/// A value held by a [`Cache`]
///
/// Closed sum type so the merge algorithm can dispatch exhaustively on
/// the variant pair instead of probing runtime types. JSON objects and
/// arrays are normalized into `Mapping` and `Sequence` on conversion, so
/// `Scalar` only ever holds null, bool, number or string.
#[derive(Debug, Clone)]
pub enum CacheValue {
    /// Leaf value; later writes overwrite earlier ones
    Scalar(Value),
    /// Dictionary-like value; merged recursively key by key
    Mapping(BTreeMap<String, CacheValue>),
    /// List-like value; merged by concatenation
    Sequence(Vec<CacheValue>),
    /// Set-like value; merged by union, members are unique by equality
    Set(Vec<CacheValue>),
    /// Nested cache; merged with the same algorithm as top-level caches
    Cache(Cache),
}

impl CacheValue {
    /// Short variant name used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            CacheValue::Scalar(_) => "scalar",
            CacheValue::Mapping(_) => "mapping",
            CacheValue::Sequence(_) => "sequence",
            CacheValue::Set(_) => "set",
            CacheValue::Cache(_) => "cache",
        }
    }

    pub fn is_compound(&self) -> bool {
        !matches!(self, CacheValue::Scalar(_))
    }

    /// Build an empty mapping
    pub fn mapping() -> Self {
        CacheValue::Mapping(BTreeMap::new())
    }

    /// Build a set, dropping duplicate members
    pub fn set_of<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<CacheValue>,
    {
        let mut members: Vec<CacheValue> = Vec::new();
        for item in items {
            let item = item.into();
            if !members.contains(&item) {
                members.push(item);
            }
        }
        CacheValue::Set(members)
    }

    /// Build a sequence
    pub fn seq_of<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<CacheValue>,
    {
        CacheValue::Sequence(items.into_iter().map(Into::into).collect())
    }

    /// Build a mapping from key/value pairs
    pub fn map_of<I, K, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: Into<CacheValue>,
    {
        CacheValue::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Convert a JSON value, normalizing objects and arrays
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => CacheValue::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, CacheValue::from_json(v)))
                    .collect(),
            ),
            Value::Array(items) => {
                CacheValue::Sequence(items.into_iter().map(CacheValue::from_json).collect())
            }
            scalar => CacheValue::Scalar(scalar),
        }
    }

    /// Render as JSON; sets become arrays and caches become objects
    pub fn to_json(&self) -> Value {
        match self {
            CacheValue::Scalar(v) => v.clone(),
            CacheValue::Mapping(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            CacheValue::Sequence(items) | CacheValue::Set(items) => {
                Value::Array(items.iter().map(CacheValue::to_json).collect())
            }
            CacheValue::Cache(cache) => cache.to_json(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CacheValue::Scalar(v) => v.as_str(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CacheValue::Scalar(v) => v.as_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CacheValue::Scalar(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, CacheValue>> {
        match self {
            CacheValue::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Elements of a sequence or members of a set
    pub fn as_items(&self) -> Option<&[CacheValue]> {
        match self {
            CacheValue::Sequence(items) | CacheValue::Set(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_cache(&self) -> Option<&Cache> {
        match self {
            CacheValue::Cache(cache) => Some(cache),
            _ => None,
        }
    }
}

/// Structural equality; set members compare without regard to order
impl PartialEq for CacheValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CacheValue::Scalar(a), CacheValue::Scalar(b)) => a == b,
            (CacheValue::Mapping(a), CacheValue::Mapping(b)) => a == b,
            (CacheValue::Sequence(a), CacheValue::Sequence(b)) => a == b,
            (CacheValue::Set(a), CacheValue::Set(b)) => {
                a.len() == b.len()
                    && a.iter().all(|m| b.contains(m))
                    && b.iter().all(|m| a.contains(m))
            }
            (CacheValue::Cache(a), CacheValue::Cache(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        CacheValue::from_json(value)
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::Scalar(Value::from(value))
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        CacheValue::Scalar(Value::from(value))
    }
}

impl From<bool> for CacheValue {
    fn from(value: bool) -> Self {
        CacheValue::Scalar(Value::from(value))
    }
}

impl From<i64> for CacheValue {
    fn from(value: i64) -> Self {
        CacheValue::Scalar(Value::from(value))
    }
}

impl From<u64> for CacheValue {
    fn from(value: u64) -> Self {
        CacheValue::Scalar(Value::from(value))
    }
}

impl From<i32> for CacheValue {
    fn from(value: i32) -> Self {
        CacheValue::Scalar(Value::from(value))
    }
}

impl From<f64> for CacheValue {
    fn from(value: f64) -> Self {
        CacheValue::Scalar(Value::from(value))
    }
}

impl From<Cache> for CacheValue {
    fn from(value: Cache) -> Self {
        CacheValue::Cache(value)
    }
}
