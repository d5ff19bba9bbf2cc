//! Type-dispatching merge of cache contents
//!
//! Layers are folded left to right: values from later layers are layered
//! onto earlier ones. Per key, the variant pair decides the rule:
//!
//! | existing  | incoming  | rule                                   |
//! |-----------|-----------|----------------------------------------|
//! | mapping   | mapping   | recursive merge key by key             |
//! | sequence  | sequence  | concatenation, existing elements first |
//! | set       | set       | union; equal members are kept once     |
//! | cache     | cache     | this algorithm on the inner entries    |
//! | scalar    | scalar    | overwrite with the incoming value      |
//! | otherwise |           | conflict recorded, existing value kept |

use crate::cache::CacheValue;
use std::collections::BTreeMap;

/// An incompatible variant pair found while merging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    /// Dotted path of the key inside the merged tree
    pub key: String,
    pub existing: &'static str,
    pub incoming: &'static str,
}

/// Result of merging several layers of entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub merged: BTreeMap<String, CacheValue>,
    pub conflicts: Vec<MergeConflict>,
}

impl MergeReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Merge layers of entries into a fresh mapping
pub fn merge_layers<'a, I>(layers: I) -> MergeReport
where
    I: IntoIterator<Item = &'a BTreeMap<String, CacheValue>>,
{
    let mut report = MergeReport::default();
    for layer in layers {
        for (key, value) in layer {
            merge_slot(
                &mut report.merged,
                key.clone(),
                value.clone(),
                key,
                &mut report.conflicts,
            );
        }
    }
    report
}

/// Merge one incoming value into the slot `key` of `target`
pub(crate) fn merge_slot(
    target: &mut BTreeMap<String, CacheValue>,
    key: String,
    incoming: CacheValue,
    path: &str,
    conflicts: &mut Vec<MergeConflict>,
) {
    match target.get_mut(&key) {
        Some(existing) => merge_value(existing, incoming, path, conflicts),
        None => {
            target.insert(key, incoming);
        }
    }
}

fn merge_value(
    existing: &mut CacheValue,
    incoming: CacheValue,
    path: &str,
    conflicts: &mut Vec<MergeConflict>,
) {
    match (&mut *existing, incoming) {
        (CacheValue::Mapping(current), CacheValue::Mapping(extra)) => {
            for (key, value) in extra {
                let child = format!("{path}.{key}");
                merge_slot(current, key, value, &child, conflicts);
            }
        }
        (CacheValue::Sequence(current), CacheValue::Sequence(extra)) => {
            current.extend(extra);
        }
        (CacheValue::Set(current), CacheValue::Set(extra)) => {
            for member in extra {
                insert_member(current, member);
            }
        }
        (CacheValue::Cache(current), CacheValue::Cache(extra)) => {
            let report = merge_layers([current.entries(), extra.entries()]);
            conflicts.extend(report.conflicts.into_iter().map(|c| MergeConflict {
                key: format!("{path}.{}", c.key),
                ..c
            }));
            current.replace_entries(report.merged);
        }
        (CacheValue::Scalar(current), CacheValue::Scalar(extra)) => {
            *current = extra;
        }
        (current, extra) => {
            tracing::warn!(
                key = path,
                existing = current.kind(),
                incoming = extra.kind(),
                "Merge type conflict; keeping existing value"
            );
            conflicts.push(MergeConflict {
                key: path.to_string(),
                existing: current.kind(),
                incoming: extra.kind(),
            });
        }
    }
}

/// Add a set member unless an equal one is already present
///
/// An equal member is the same element; folding it in again would double
/// the sequences nested inside it.
fn insert_member(members: &mut Vec<CacheValue>, incoming: CacheValue) {
    if !members.contains(&incoming) {
        members.push(incoming);
    }
}
