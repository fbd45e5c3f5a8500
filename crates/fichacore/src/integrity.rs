//! # State Integrity: Validation, Guarded Persistence, Tiered Recovery
//!
//! The cardinal rule: a ficha that fails structural validation is never
//! written, so a good persisted copy is never overwritten by a bad one.
//!
//! ## Two Slots Per Ficha
//!
//! [`StateIntegrityGuardian::safe_persist`] writes the same serialized value
//! to two keys:
//!
//! ```text
//! record_<id>              current copy
//! record_<id>_last_valid   fallback copy
//! ```
//!
//! Each write replaces the whole value. The pair is not a transaction: a crash
//! between the two writes leaves them out of step, which is fine because each
//! slot is validated independently on read.
//!
//! ## Recovery Tiers
//!
//! [`StateIntegrityGuardian::recover_state`] never fails:
//!
//! 1. Current slot, if present and valid: `stateStatus = ok`.
//! 2. Last-valid slot, if present and valid: `stateStatus = recovered`.
//! 3. A fresh [`base_state`]: `stateStatus = reset`. This is total data loss
//!    for that ficha and is logged at error level.
//!
//! Read errors, unparsable JSON, shape violations and type mismatches are all
//! treated as "absent" and fall through to the next tier.

use crate::error::{FichaError, Result};
use crate::model::{base_state, Ficha, StateStatus};
use crate::store::{last_valid_key, record_id_from_key, record_key, KeyValueBackend};
use serde_json::Value;
use tracing::{debug, error, info, warn};

fn non_empty_str(obj: &serde_json::Map<String, Value>, field: &str) -> bool {
    matches!(obj.get(field).and_then(Value::as_str), Some(s) if !s.is_empty())
}

/// List every structural problem with a candidate ficha. Empty means valid.
pub fn validation_errors(candidate: &Value) -> Vec<String> {
    let Some(obj) = candidate.as_object() else {
        return vec!["ficha is not an object".to_string()];
    };

    let mut errors = Vec::new();
    for field in ["id", "pozoId"] {
        if !non_empty_str(obj, field) {
            errors.push(format!("{} is missing or empty", field));
        }
    }

    match obj.get("sections").and_then(Value::as_array) {
        None => errors.push("sections is not a list".to_string()),
        Some(sections) => {
            for (i, section) in sections.iter().enumerate() {
                let Some(section) = section.as_object() else {
                    errors.push(format!("sections[{}] is not an object", i));
                    continue;
                };
                for field in ["id", "type"] {
                    if !section.get(field).is_some_and(Value::is_string) {
                        errors.push(format!("sections[{}].{} is missing", i, field));
                    }
                }
                if !section.get("content").is_some_and(Value::is_object) {
                    errors.push(format!("sections[{}].content is not an object", i));
                }
            }
        }
    }

    let colors = obj
        .get("customizations")
        .and_then(|c| c.get("colors"))
        .and_then(Value::as_object);
    match colors {
        None => errors.push("customizations.colors is missing".to_string()),
        Some(colors) if colors.is_empty() => {
            errors.push("customizations.colors is empty".to_string())
        }
        Some(colors) => {
            for (name, color) in colors {
                if !matches!(color.as_str(), Some(s) if !s.is_empty()) {
                    errors.push(format!("customizations.colors.{} is blank", name));
                }
            }
        }
    }

    errors
}

/// Structural check on the durable shape. Never panics.
pub fn is_valid(candidate: &Value) -> bool {
    validation_errors(candidate).is_empty()
}

/// Structural check on a typed ficha, via its serialized shape.
pub fn is_valid_ficha(ficha: &Ficha) -> bool {
    serde_json::to_value(ficha)
        .map(|v| is_valid(&v))
        .unwrap_or(false)
}

pub struct StateIntegrityGuardian<B: KeyValueBackend> {
    backend: B,
}

impl<B: KeyValueBackend> StateIntegrityGuardian<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Validate, then write to both slots with `stateStatus` forced to `ok`.
    ///
    /// Invalid fichas are refused with [`FichaError::StructuralInvariant`] and
    /// nothing is written. Backend failures are returned to the caller, whose
    /// in-memory copy is untouched.
    pub fn safe_persist(&self, ficha: &Ficha) -> Result<()> {
        let mut value = serde_json::to_value(ficha)?;
        let problems = validation_errors(&value);
        if !problems.is_empty() {
            error!(ficha_id = %ficha.id, ?problems, "refusing to persist invalid ficha");
            return Err(FichaError::StructuralInvariant(ficha.id.clone()));
        }

        value["stateStatus"] = serde_json::to_value(StateStatus::Ok)?;
        let serialized = serde_json::to_string(&value)?;

        self.write_slot(&record_key(&ficha.id), &serialized)?;
        self.write_slot(&last_valid_key(&ficha.id), &serialized)?;

        debug!(ficha_id = %ficha.id, version = ficha.version, "ficha persisted");
        Ok(())
    }

    fn write_slot(&self, key: &str, serialized: &str) -> Result<()> {
        self.backend.set(key, serialized).map_err(|e| {
            warn!(key, error = %e, "persist write failed; in-memory state kept");
            e
        })
    }

    /// Load a ficha through the recovery tiers. Always returns a valid ficha.
    pub fn recover_state(&self, ficha_id: &str, pozo_id: &str) -> Ficha {
        if let Some(mut ficha) = self.read_slot(ficha_id, &record_key(ficha_id)) {
            ficha.state_status = StateStatus::Ok;
            return ficha;
        }

        if let Some(mut ficha) = self.read_slot(ficha_id, &last_valid_key(ficha_id)) {
            warn!(ficha_id, version = ficha.version, "recovered ficha from last valid copy");
            ficha.state_status = StateStatus::Recovered;
            return ficha;
        }

        error!(ficha_id, pozo_id, "no valid copy found; ficha reset to base state");
        let mut ficha = base_state(ficha_id, pozo_id);
        ficha.state_status = StateStatus::Reset;
        ficha
    }

    fn read_slot(&self, ficha_id: &str, key: &str) -> Option<Ficha> {
        let raw = match self.backend.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key, "slot empty");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "slot unreadable");
                return None;
            }
        };

        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "slot holds unparsable data");
                return None;
            }
        };

        let problems = validation_errors(&value);
        if !problems.is_empty() {
            warn!(key, ?problems, "slot failed validation");
            return None;
        }

        match serde_json::from_value::<Ficha>(value) {
            Ok(ficha) if ficha.id == ficha_id => Some(ficha),
            Ok(ficha) => {
                warn!(key, found = %ficha.id, "slot holds a different ficha");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "slot does not match the ficha schema");
                None
            }
        }
    }

    /// Whether either slot holds anything for `ficha_id`, valid or not.
    pub fn has_persisted(&self, ficha_id: &str) -> Result<bool> {
        Ok(self.backend.get(&record_key(ficha_id))?.is_some()
            || self.backend.get(&last_valid_key(ficha_id))?.is_some())
    }

    /// Remove both slots for a ficha.
    pub fn discard(&self, ficha_id: &str) -> Result<()> {
        self.backend.remove(&record_key(ficha_id))?;
        self.backend.remove(&last_valid_key(ficha_id))?;
        info!(ficha_id, "persisted ficha discarded");
        Ok(())
    }

    /// Ids of fichas with a current slot, sorted.
    pub fn persisted_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .backend
            .keys()?
            .iter()
            .filter_map(|k| record_id_from_key(k))
            .map(str::to_string)
            .collect();
        ids.sort();
        Ok(ids)
    }
}
