//! Structural tree diffing between snapshot bodies.
//!
//! [`diff`] compares two nested JSON objects and classifies every
//! difference as added, removed, or changed. The three passes are
//! independent projections over the same inputs: each recurses only into
//! keys that are maps on both sides, so a nested node in the `added`
//! tree contains only further additions, and likewise for the other two.
//!
//! Which of the three trees a leaf lives in is its marker; leaves carry
//! raw values. Equality is structural with ignored keys excluded —
//! serde_json objects are key-sorted, so value equality coincides with
//! canonical serialization equality.

pub mod flatten;
pub mod normalize;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

pub use flatten::{flatten, tabulate, ChangeKind, FlatRow, FlatTable};
pub use normalize::{port_dictionary, validate_body};

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("Snapshot body failed schema validation: missing required field `{0}`")]
    Schema(String),

    #[error("Snapshot body is not a JSON object")]
    NotAnObject,
}

/// Keys at one level of a diff tree.
pub type DiffMap = BTreeMap<String, DiffNode>;

/// One classified difference under a key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DiffNode {
    /// A scalar whose value changed in place.
    Edit { from: Value, to: Value },
    /// A value present on only one side (raw value).
    Leaf(Value),
    /// A nested map with differences of the same kind deeper down.
    Branch(DiffTree),
}

/// The nested added/removed/changed structure produced by [`diff`].
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DiffTree {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub added: DiffMap,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub removed: DiffMap,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub changed: DiffMap,
}

impl DiffTree {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Number of leaf differences (added/removed values and scalar
    /// edits) across the whole tree.
    pub fn leaf_count(&self) -> usize {
        fn count(map: &DiffMap) -> usize {
            map.values()
                .map(|node| match node {
                    DiffNode::Edit { .. } | DiffNode::Leaf(_) => 1,
                    DiffNode::Branch(sub) => sub.leaf_count(),
                })
                .sum()
        }
        count(&self.added) + count(&self.removed) + count(&self.changed)
    }
}

/// Options controlling a diff run.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Field names excluded from all three passes at every depth.
    /// Defaults cover fingerprint-only and host-identity fields that
    /// vary between scans without being meaningful drift.
    pub ignore: BTreeSet<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self::with_ignore(["host", "osfingerprint", "last_boot", "servicefp"])
    }
}

impl DiffOptions {
    pub fn with_ignore<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignore: fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// Compute the structured difference between two snapshot bodies.
///
/// `newer` and `older` must be JSON objects. Lists are treated as opaque
/// scalars; a key whose value type changes between map and non-map is
/// always recorded as a changed leaf with the raw old and new values.
pub fn diff(newer: &Value, older: &Value, options: &DiffOptions) -> Result<DiffTree, DiffError> {
    let (newer, older) = match (newer.as_object(), older.as_object()) {
        (Some(n), Some(o)) => (n, o),
        _ => return Err(DiffError::NotAnObject),
    };

    Ok(DiffTree {
        added: added_pass(newer, older, &options.ignore),
        removed: removed_pass(newer, older, &options.ignore),
        changed: changed_pass(newer, older, &options.ignore),
    })
}

type Object = serde_json::Map<String, Value>;

/// Structural equality with ignored keys excluded at every depth.
///
/// The recursion decision in the three passes uses this instead of raw
/// value equality, so two values that differ only in ignored fields
/// never produce a diff node.
fn eq_ignoring(a: &Value, b: &Value, ignore: &BTreeSet<String>) -> bool {
    match (a.as_object(), b.as_object()) {
        (Some(a), Some(b)) => {
            let live = |m: &Object| m.keys().filter(|k| !ignore.contains(k.as_str())).count();
            live(a) == live(b)
                && a.iter()
                    .filter(|(k, _)| !ignore.contains(k.as_str()))
                    .all(|(k, av)| b.get(k).is_some_and(|bv| eq_ignoring(av, bv, ignore)))
        }
        _ => a == b,
    }
}

fn added_pass(newer: &Object, older: &Object, ignore: &BTreeSet<String>) -> DiffMap {
    let mut out = DiffMap::new();
    for (key, new_val) in newer {
        if ignore.contains(key) {
            continue;
        }
        match older.get(key) {
            None => {
                out.insert(key.clone(), DiffNode::Leaf(new_val.clone()));
            }
            Some(old_val) => {
                if let (Some(n), Some(o)) = (new_val.as_object(), old_val.as_object()) {
                    if !eq_ignoring(new_val, old_val, ignore) {
                        let sub = added_pass(n, o, ignore);
                        if !sub.is_empty() {
                            out.insert(
                                key.clone(),
                                DiffNode::Branch(DiffTree {
                                    added: sub,
                                    ..Default::default()
                                }),
                            );
                        }
                    }
                }
            }
        }
    }
    out
}

fn removed_pass(newer: &Object, older: &Object, ignore: &BTreeSet<String>) -> DiffMap {
    let mut out = DiffMap::new();
    for (key, old_val) in older {
        if ignore.contains(key) {
            continue;
        }
        match newer.get(key) {
            None => {
                out.insert(key.clone(), DiffNode::Leaf(old_val.clone()));
            }
            Some(new_val) => {
                if let (Some(n), Some(o)) = (new_val.as_object(), old_val.as_object()) {
                    if !eq_ignoring(new_val, old_val, ignore) {
                        let sub = removed_pass(n, o, ignore);
                        if !sub.is_empty() {
                            out.insert(
                                key.clone(),
                                DiffNode::Branch(DiffTree {
                                    removed: sub,
                                    ..Default::default()
                                }),
                            );
                        }
                    }
                }
            }
        }
    }
    out
}

fn changed_pass(newer: &Object, older: &Object, ignore: &BTreeSet<String>) -> DiffMap {
    let mut out = DiffMap::new();
    for (key, new_val) in newer {
        if ignore.contains(key) {
            continue;
        }
        let Some(old_val) = older.get(key) else {
            continue;
        };
        if eq_ignoring(new_val, old_val, ignore) {
            continue;
        }
        match (new_val.as_object(), old_val.as_object()) {
            (Some(n), Some(o)) => {
                // The recursive result may be empty (the maps differ
                // only by added/removed keys); it is recorded anyway.
                out.insert(
                    key.clone(),
                    DiffNode::Branch(DiffTree {
                        changed: changed_pass(n, o, ignore),
                        ..Default::default()
                    }),
                );
            }
            // Scalars, opaque lists, and map/non-map type changes are
            // all changed leaves with the raw old and new values.
            _ => {
                out.insert(
                    key.clone(),
                    DiffNode::Edit {
                        from: old_val.clone(),
                        to: new_val.clone(),
                    },
                );
            }
        }
    }
    out
}
