//! Field-level diffing between two snapshots of a device.
//!
//! A snapshot is the object half and configuration half of a device's
//! state, either as stored in a registry or as read live. Diffs are
//! advisory output: they never fail, and missing data on either side is
//! reported as an added or removed field.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::model::{ConfigRecord, FieldMap, LiveSnapshot, ObjectRecord};

/// One labelled side of a diff.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub label: String,
    pub object: FieldMap,
    pub config: FieldMap,
}

impl Snapshot {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Default::default()
        }
    }

    /// Snapshot of registry records. Either record may be missing.
    pub fn from_records(
        label: &str,
        object: Option<&ObjectRecord>,
        config: Option<&ConfigRecord>,
    ) -> Self {
        Self {
            label: label.to_string(),
            object: object.map(ObjectRecord::field_view).unwrap_or_default(),
            config: config.map(|c| c.fields.clone()).unwrap_or_default(),
        }
    }

    /// Snapshot of a live device read.
    pub fn from_live(label: &str, live: &LiveSnapshot) -> Self {
        Self {
            label: label.to_string(),
            object: live.object_view(),
            config: live.config_fields.clone(),
        }
    }
}

/// Which half of the snapshot a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffScope {
    Object,
    Config,
}

impl fmt::Display for DiffScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffScope::Object => write!(f, "object"),
            DiffScope::Config => write!(f, "config"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffKind {
    /// Present on both sides with different values.
    Changed,
    /// Only present on the right side.
    Added,
    /// Only present on the left side.
    Removed,
}

/// Presentation mode for a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffMode {
    /// Two-sided comparison of independent snapshots (registry vs live).
    Full,
    /// Before/after view of one record across an operation.
    Changes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    pub scope: DiffScope,
    pub field: String,
    pub kind: DiffKind,
    pub left: Option<Value>,
    pub right: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffReport {
    pub left_label: String,
    pub right_label: String,
    pub mode: DiffMode,
    pub entries: Vec<DiffEntry>,
}

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The (scope, field) pairs that differ, independent of labels and order.
    pub fn field_names(&self) -> BTreeSet<(DiffScope, String)> {
        self.entries
            .iter()
            .map(|e| (e.scope, e.field.clone()))
            .collect()
    }
}

/// Compare two snapshots field by field.
pub fn diff(left: &Snapshot, right: &Snapshot, mode: DiffMode) -> DiffReport {
    let mut entries = Vec::new();
    diff_maps(DiffScope::Object, &left.object, &right.object, &mut entries);
    diff_maps(DiffScope::Config, &left.config, &right.config, &mut entries);

    DiffReport {
        left_label: left.label.clone(),
        right_label: right.label.clone(),
        mode,
        entries,
    }
}

fn diff_maps(scope: DiffScope, left: &FieldMap, right: &FieldMap, out: &mut Vec<DiffEntry>) {
    let keys: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
    for key in keys {
        let (l, r) = (left.get(key), right.get(key));
        let kind = match (l, r) {
            (Some(a), Some(b)) if a == b => continue,
            (Some(_), Some(_)) => DiffKind::Changed,
            (None, Some(_)) => DiffKind::Added,
            (Some(_), None) => DiffKind::Removed,
            (None, None) => continue,
        };
        out.push(DiffEntry {
            scope,
            field: key.clone(),
            kind,
            left: l.cloned(),
            right: r.cloned(),
        });
    }
}

fn render_value(value: Option<&Value>) -> String {
    match value {
        None => "(absent)".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl fmt::Display for DiffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return writeln!(f, "No differences ({} vs {})", self.left_label, self.right_label);
        }
        match self.mode {
            DiffMode::Full => {
                writeln!(f, "Differences ({} vs {}):", self.left_label, self.right_label)?;
                let width = self.entries.iter().map(|e| e.field.len()).max().unwrap_or(0);
                for e in &self.entries {
                    writeln!(
                        f,
                        "  [{}] {:<width$}  {}: {}  |  {}: {}",
                        e.scope,
                        e.field,
                        self.left_label,
                        render_value(e.left.as_ref()),
                        self.right_label,
                        render_value(e.right.as_ref()),
                        width = width
                    )?;
                }
            }
            DiffMode::Changes => {
                writeln!(f, "Changes ({} -> {}):", self.left_label, self.right_label)?;
                for e in &self.entries {
                    writeln!(
                        f,
                        "  [{}] {}: {} -> {}",
                        e.scope,
                        e.field,
                        render_value(e.left.as_ref()),
                        render_value(e.right.as_ref())
                    )?;
                }
            }
        }
        Ok(())
    }
}
