//! Diff flattening: the nested diff tree becomes an ordered list of
//! path-keyed rows suitable for tabular display and export.
//!
//! Rows come out added first, then removed, then changed, each
//! depth-first in sorted-key order — the ordering is part of the
//! contract so display and export stay reproducible.

use serde::Serialize;
use serde_json::Value;

use crate::{DiffMap, DiffNode, DiffTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Changed => "changed",
        })
    }
}

/// A single flattened difference.
///
/// `path` is the sequence of keys walked to reach the leaf. For changed
/// leaves `from`/`to` carry the old and new rendered values; for
/// added/removed leaves they are empty and the final path segment
/// carries the rendered raw value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatRow {
    pub kind: ChangeKind,
    pub path: Vec<String>,
    pub from: String,
    pub to: String,
}

/// Flattened rows padded to a uniform path depth.
#[derive(Debug, Clone, Serialize)]
pub struct FlatTable {
    /// Maximum path depth across the row set; renderers emit
    /// `field_1..field_{depth}` headers from it.
    pub depth: usize,
    pub rows: Vec<FlatRow>,
}

/// Flatten a diff tree into display rows.
pub fn flatten(tree: &DiffTree) -> Vec<FlatRow> {
    let mut rows = Vec::new();
    walk(&tree.added, ChangeKind::Added, &mut Vec::new(), &mut rows);
    walk(&tree.removed, ChangeKind::Removed, &mut Vec::new(), &mut rows);
    walk(&tree.changed, ChangeKind::Changed, &mut Vec::new(), &mut rows);
    rows
}

/// Pad row paths to the maximum depth so renderers can build a
/// fixed-width table regardless of which branch produced a row.
pub fn tabulate(mut rows: Vec<FlatRow>) -> FlatTable {
    let depth = rows.iter().map(|r| r.path.len()).max().unwrap_or(0);
    for row in &mut rows {
        row.path.resize(depth, String::new());
    }
    FlatTable { depth, rows }
}

fn walk(map: &DiffMap, kind: ChangeKind, path: &mut Vec<String>, rows: &mut Vec<FlatRow>) {
    for (key, node) in map {
        path.push(key.clone());
        match node {
            DiffNode::Leaf(value) => {
                let mut full = path.clone();
                full.push(render(value));
                rows.push(FlatRow {
                    kind,
                    path: full,
                    from: String::new(),
                    to: String::new(),
                });
            }
            DiffNode::Edit { from, to } => rows.push(FlatRow {
                kind,
                path: path.clone(),
                from: render(from),
                to: render(to),
            }),
            DiffNode::Branch(sub) => {
                let inner = match kind {
                    ChangeKind::Added => &sub.added,
                    ChangeKind::Removed => &sub.removed,
                    ChangeKind::Changed => &sub.changed,
                };
                walk(inner, kind, path, rows);
            }
        }
        path.pop();
    }
}

/// Render a leaf value for display: bare strings stay bare, null is
/// empty, everything else is compact JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
