//! # Edit History and Snapshots
//!
//! A [`Snapshot`] is a lightweight, immutable capture of a ficha: section
//! structure without content, plus every field value flattened under a
//! `"sectionId.fieldKey"` key. Snapshots are kept in chronological order in
//! `Ficha::history` and drive undo/redo and auditing.
//!
//! ## Bounds
//!
//! - [`MAX_HISTORY_ENTRIES`] (50): [`prune_history`] keeps only the newest
//!   entries, dropping from the front.
//! - [`MAX_SNAPSHOTS_PER_RECORD`] (10): declared policy, not enforced by any
//!   operation here.
//!
//! ## Index Arithmetic
//!
//! [`apply_undo`] and [`apply_redo`] clamp at both ends and never wrap.
//! Pruning shifts every index, so whoever holds a cursor must recompute it
//! after a prune. [`Timeline`] does that bookkeeping for the facade.

use crate::model::{Ficha, RecordStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const MAX_HISTORY_ENTRIES: usize = 50;
pub const MAX_SNAPSHOTS_PER_RECORD: usize = 10;
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTrigger {
    ManualSave,
    AutoSave,
    PreReset,
    StatusChange,
    Import,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub status: RecordStatus,
    pub version: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub ficha_id: String,
    pub schema_version: u32,
    pub structure: Vec<SectionDescriptor>,
    pub values: BTreeMap<String, String>,
    #[serde(default)]
    pub references: Vec<String>,
    pub metadata: SnapshotMetadata,
    pub timestamp: DateTime<Utc>,
    pub trigger: SnapshotTrigger,
}

fn value_key(section_id: &str, field_key: &str) -> String {
    format!("{}.{}", section_id, field_key)
}

pub fn create_snapshot(record: &Ficha, trigger: SnapshotTrigger) -> Snapshot {
    let structure = record
        .sections
        .iter()
        .map(|s| SectionDescriptor {
            id: s.id.clone(),
            kind: s.kind.clone(),
            visible: s.visible,
        })
        .collect();

    let values = record
        .sections
        .iter()
        .flat_map(|s| {
            s.content
                .iter()
                .map(move |(key, field)| (value_key(&s.id, key), field.value.clone()))
        })
        .collect();

    Snapshot {
        id: Uuid::new_v4().to_string(),
        ficha_id: record.id.clone(),
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        structure,
        values,
        references: Vec::new(),
        metadata: SnapshotMetadata {
            status: record.status,
            version: record.version,
            last_modified: record.last_modified,
        },
        timestamp: Utc::now(),
        trigger,
    }
}

/// Step back one entry, stopping at 0.
pub fn apply_undo<T>(_history: &[T], current: usize) -> usize {
    current.saturating_sub(1)
}

/// Step forward one entry, stopping at the last index.
pub fn apply_redo<T>(history: &[T], current: usize) -> usize {
    let last = history.len().saturating_sub(1);
    if current < last {
        current + 1
    } else {
        last
    }
}

/// Keep the newest [`MAX_HISTORY_ENTRIES`] entries.
pub fn prune_history<T>(history: Vec<T>) -> Vec<T> {
    prune_history_to(history, MAX_HISTORY_ENTRIES)
}

pub fn prune_history_to<T>(mut history: Vec<T>, cap: usize) -> Vec<T> {
    if history.len() > cap {
        let excess = history.len() - cap;
        history.drain(..excess);
    }
    history
}

/// Write a snapshot's values and section visibility back onto `record`.
///
/// Only fields and sections that still exist are restored; structure is not
/// recreated. Returns whether anything changed.
pub fn restore_snapshot(record: &mut Ficha, snapshot: &Snapshot) -> bool {
    let mut changed = false;
    for section in record.sections.iter_mut() {
        if let Some(desc) = snapshot.structure.iter().find(|d| d.id == section.id) {
            if section.visible != desc.visible {
                section.visible = desc.visible;
                changed = true;
            }
        }
        for (key, field) in section.content.iter_mut() {
            if let Some(value) = snapshot.values.get(&value_key(&section.id, key)) {
                if &field.value != value {
                    field.value = value.clone();
                    field.modified_at = Some(Utc::now());
                    changed = true;
                }
            }
        }
    }
    if changed {
        record.touch();
    }
    changed
}

/// Undo/redo cursor over a ficha's history.
///
/// The history itself stays in `Ficha::history`; the timeline only owns the
/// cursor and keeps it valid across truncation and pruning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    cursor: Option<usize>,
    cap: usize,
}

impl Timeline {
    /// Start with the cursor on the newest entry.
    pub fn new(history: &[Snapshot]) -> Self {
        Self::with_cap(history, MAX_HISTORY_ENTRIES)
    }

    pub fn with_cap(history: &[Snapshot], cap: usize) -> Self {
        Self {
            cursor: history.len().checked_sub(1),
            cap: cap.max(1),
        }
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Append a snapshot after the cursor, discarding any redo branch.
    pub fn record(&mut self, history: &mut Vec<Snapshot>, snapshot: Snapshot) {
        if let Some(cursor) = self.cursor {
            history.truncate(cursor + 1);
        }
        history.push(snapshot);
        let pruned = prune_history_to(std::mem::take(history), self.cap);
        *history = pruned;
        self.cursor = history.len().checked_sub(1);
    }

    /// Move back one entry. Returns the snapshot to restore, if the cursor moved.
    pub fn undo<'h>(&mut self, history: &'h [Snapshot]) -> Option<&'h Snapshot> {
        let current = self.cursor?;
        let next = apply_undo(history, current);
        self.step(history, current, next)
    }

    /// Move forward one entry. Returns the snapshot to restore, if the cursor moved.
    pub fn redo<'h>(&mut self, history: &'h [Snapshot]) -> Option<&'h Snapshot> {
        let current = self.cursor?;
        let next = apply_redo(history, current);
        self.step(history, current, next)
    }

    fn step<'h>(
        &mut self,
        history: &'h [Snapshot],
        current: usize,
        next: usize,
    ) -> Option<&'h Snapshot> {
        if next == current {
            return None;
        }
        self.cursor = Some(next);
        history.get(next)
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(c) if c > 0)
    }

    pub fn can_redo(&self, history: &[Snapshot]) -> bool {
        matches!(self.cursor, Some(c) if c + 1 < history.len())
    }
}
