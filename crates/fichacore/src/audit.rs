//! Bounded audit trail of user and system events.
//!
//! Newest entries sit at the front; once the cap is exceeded the oldest are
//! dropped from the back. Every change is mirrored to the `audit_log` key on
//! a best-effort basis: a failed write is logged and otherwise ignored.

use crate::store::{KeyValueBackend, AUDIT_LOG_KEY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::warn;
use uuid::Uuid;

pub const MAX_AUDIT_ENTRIES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEventType {
    Action,
    Error,
    Sync,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: AppEventType,
    pub source: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// An event before the log stamps its id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub kind: AppEventType,
    pub source: String,
    pub payload: Value,
    pub user_id: Option<String>,
}

impl NewEvent {
    pub fn new(kind: AppEventType, source: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            source: source.into(),
            payload,
            user_id: None,
        }
    }

    pub fn action(source: impl Into<String>, payload: Value) -> Self {
        Self::new(AppEventType::Action, source, payload)
    }

    pub fn error(source: impl Into<String>, payload: Value) -> Self {
        Self::new(AppEventType::Error, source, payload)
    }

    pub fn system(source: impl Into<String>, payload: Value) -> Self {
        Self::new(AppEventType::System, source, payload)
    }

    pub fn by_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

pub struct AuditEventLog<B: KeyValueBackend> {
    entries: VecDeque<AppEvent>,
    capacity: usize,
    backend: B,
}

impl<B: KeyValueBackend> AuditEventLog<B> {
    pub fn new(backend: B) -> Self {
        Self::with_capacity(backend, MAX_AUDIT_ENTRIES)
    }

    pub fn with_capacity(backend: B, capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            backend,
        }
    }

    /// Rehydrate from the durable mirror. Missing or corrupt data gives an empty log.
    pub fn load(backend: B, capacity: usize) -> Self {
        let mut log = Self::with_capacity(backend, capacity);
        match log.backend.get(AUDIT_LOG_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<VecDeque<AppEvent>>(&raw) {
                Ok(entries) => {
                    log.entries = entries;
                    log.entries.truncate(log.capacity);
                }
                Err(e) => warn!(error = %e, "discarding unreadable audit log"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "audit log unavailable"),
        }
        log
    }

    pub fn log(&mut self, event: NewEvent) -> AppEvent {
        let entry = AppEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind: event.kind,
            source: event.source,
            payload: event.payload,
            user_id: event.user_id,
        };
        self.entries.push_front(entry.clone());
        self.entries.truncate(self.capacity);
        self.mirror();
        entry
    }

    /// All retained events, newest first.
    pub fn get_logs(&self) -> Vec<AppEvent> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.mirror();
    }

    fn mirror(&self) {
        let serialized = match serde_json::to_string(&self.entries) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "audit log not serializable");
                return;
            }
        };
        if let Err(e) = self.backend.set(AUDIT_LOG_KEY, &serialized) {
            warn!(error = %e, "audit log mirror failed");
        }
    }
}
