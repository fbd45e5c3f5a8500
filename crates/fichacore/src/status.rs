//! # Ficha Status Lifecycle
//!
//! Every ficha moves through a fixed set of workflow states:
//!
//! ```text
//!            START_EDITING          COMPLETE            FINALIZE
//!   draft ─────────────────> editing ──────> complete ──────────> finalized
//!                               ^               │                     │
//!                               └──── REOPEN ───┴─────── REOPEN ──────┘
//! ```
//!
//! The table in [`TRANSITIONS`] is exhaustive. Anything not listed is an
//! [`FichaError::InvalidTransition`]; callers must handle it rather than
//! treating it as a no-op.
//!
//! There is no terminal state. A finalized ficha can always be reopened so
//! corrections can be made after sign-off.

use crate::error::{FichaError, Result};
use crate::model::{Ficha, RecordStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusAction {
    StartEditing,
    Complete,
    Finalize,
    Reopen,
}

impl fmt::Display for StatusAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StartEditing => "START_EDITING",
            Self::Complete => "COMPLETE",
            Self::Finalize => "FINALIZE",
            Self::Reopen => "REOPEN",
        };
        f.write_str(name)
    }
}

/// Status assigned to newly created fichas.
pub const INITIAL_STATUS: RecordStatus = RecordStatus::Draft;

/// `(from, action, to)` rows.
pub const TRANSITIONS: &[(RecordStatus, StatusAction, RecordStatus)] = &[
    (
        RecordStatus::Draft,
        StatusAction::StartEditing,
        RecordStatus::Editing,
    ),
    (
        RecordStatus::Editing,
        StatusAction::Complete,
        RecordStatus::Complete,
    ),
    (
        RecordStatus::Complete,
        StatusAction::Finalize,
        RecordStatus::Finalized,
    ),
    (
        RecordStatus::Complete,
        StatusAction::Reopen,
        RecordStatus::Editing,
    ),
    (
        RecordStatus::Finalized,
        StatusAction::Reopen,
        RecordStatus::Editing,
    ),
];

fn lookup(status: RecordStatus, action: StatusAction) -> Option<RecordStatus> {
    TRANSITIONS
        .iter()
        .find(|(from, a, _)| *from == status && *a == action)
        .map(|(_, _, to)| *to)
}

pub fn can_transition(status: RecordStatus, action: StatusAction) -> bool {
    lookup(status, action).is_some()
}

pub fn next_state(status: RecordStatus, action: StatusAction) -> Result<RecordStatus> {
    lookup(status, action).ok_or(FichaError::InvalidTransition {
        from: status,
        action,
    })
}

/// Actions allowed from `status`, in table order.
pub fn available_transitions(status: RecordStatus) -> Vec<StatusAction> {
    TRANSITIONS
        .iter()
        .filter(|(from, _, _)| *from == status)
        .map(|(_, action, _)| *action)
        .collect()
}

impl Ficha {
    /// Move the ficha to the next status. The ficha is left untouched on error.
    pub fn apply_action(&mut self, action: StatusAction) -> Result<RecordStatus> {
        let next = next_state(self.status, action)?;
        self.status = next;
        self.touch();
        Ok(next)
    }

    pub fn is_editable(&self) -> bool {
        matches!(self.status, RecordStatus::Draft | RecordStatus::Editing)
    }
}
