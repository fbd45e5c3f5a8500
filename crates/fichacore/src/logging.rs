//! # Logging
//!
//! Components emit `tracing` events directly. Binaries and tests that want
//! to see them call [`init_tracing`], which installs a fmt subscriber filtered
//! by the `FICHA_LOG` environment variable (default `info`).
//!
//! Warnings and errors the user should be able to inspect later (failed
//! saves, recoveries, refused photos) are also kept in a
//! [`DiagnosticHistory`], mirrored to the `logger_history` key.

use crate::store::{KeyValueBackend, LOGGER_HISTORY_KEY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "FICHA_LOG";
pub const MAX_DIAGNOSTIC_ENTRIES: usize = 100;

/// Install the global fmt subscriber. Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEntry {
    pub level: DiagnosticLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct DiagnosticHistory<B: KeyValueBackend> {
    entries: VecDeque<DiagnosticEntry>,
    backend: B,
}

impl<B: KeyValueBackend> DiagnosticHistory<B> {
    pub fn new(backend: B) -> Self {
        Self {
            entries: VecDeque::new(),
            backend,
        }
    }

    /// Record an entry, emit it as a tracing event and mirror the history.
    pub fn record(
        &mut self,
        level: DiagnosticLevel,
        message: impl Into<String>,
        context: Option<&str>,
    ) {
        let message = message.into();
        let ctx = context.unwrap_or("");
        match level {
            DiagnosticLevel::Info => tracing::info!(context = ctx, "{}", message),
            DiagnosticLevel::Warn => tracing::warn!(context = ctx, "{}", message),
            DiagnosticLevel::Error => tracing::error!(context = ctx, "{}", message),
        }

        self.entries.push_front(DiagnosticEntry {
            level,
            message,
            context: context.map(str::to_string),
            timestamp: Utc::now(),
        });
        self.entries.truncate(MAX_DIAGNOSTIC_ENTRIES);
        self.mirror();
    }

    pub fn warn(&mut self, message: impl Into<String>, context: Option<&str>) {
        self.record(DiagnosticLevel::Warn, message, context);
    }

    pub fn error(&mut self, message: impl Into<String>, context: Option<&str>) {
        self.record(DiagnosticLevel::Error, message, context);
    }

    /// Newest first.
    pub fn entries(&self) -> impl Iterator<Item = &DiagnosticEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn mirror(&self) {
        // The logger must never fail its caller.
        if let Ok(serialized) = serde_json::to_string(&self.entries) {
            let _ = self.backend.set(LOGGER_HISTORY_KEY, &serialized);
        }
    }
}
