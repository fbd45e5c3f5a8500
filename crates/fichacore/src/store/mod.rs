//! # Durable Key-Value Layer
//!
//! Everything that survives a restart goes through [`KeyValueBackend`]: a
//! synchronous string key/value capability with `get`, `set` and `remove`.
//! All fallibility funnels through this seam, so the components above it
//! only ever see [`crate::error::FichaError`].
//!
//! ## Keys
//!
//! | Key | Written by | Contents |
//! |-----|------------|----------|
//! | `record_<id>` | [`crate::integrity`] | Current ficha JSON |
//! | `record_<id>_last_valid` | [`crate::integrity`] | Last ficha JSON that passed validation |
//! | `audit_log` | [`crate::audit`] | Audit ring buffer |
//! | `logger_history` | [`crate::logging`] | Diagnostic warnings/errors |
//!
//! Each `set` replaces the whole value; there are no partial updates.
//!
//! ## Implementations
//!
//! - [`fs_backend::FsBackend`]: one file per key, atomic writes.
//! - [`mem_backend::MemBackend`]: in-memory, for tests; can simulate write
//!   failures and a size quota.

pub mod backend;
pub mod fs_backend;
pub mod mem_backend;

pub use backend::KeyValueBackend;

use crate::error::{FichaError, Result};

pub const RECORD_KEY_PREFIX: &str = "record_";
pub const LAST_VALID_SUFFIX: &str = "_last_valid";
pub const AUDIT_LOG_KEY: &str = "audit_log";
pub const LOGGER_HISTORY_KEY: &str = "logger_history";

pub fn record_key(id: &str) -> String {
    format!("{}{}", RECORD_KEY_PREFIX, id)
}

pub fn last_valid_key(id: &str) -> String {
    format!("{}{}{}", RECORD_KEY_PREFIX, id, LAST_VALID_SUFFIX)
}

/// Ids must be non-empty and must not end in `_last_valid`, otherwise the
/// current slot of one ficha would be the last-valid slot of another.
pub fn validate_record_id(id: &str) -> Result<()> {
    if id.is_empty() || id.ends_with(LAST_VALID_SUFFIX) {
        return Err(FichaError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Recover the ficha id from a `record_<id>` key. Last-valid keys return `None`.
pub fn record_id_from_key(key: &str) -> Option<&str> {
    let id = key.strip_prefix(RECORD_KEY_PREFIX)?;
    if id.is_empty() || id.ends_with(LAST_VALID_SUFFIX) {
        return None;
    }
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_that_collide_with_fallback_slots_are_rejected() {
        assert_eq!(record_key("a_last_valid"), last_valid_key("a"));
        assert!(matches!(
            validate_record_id("a_last_valid"),
            Err(FichaError::InvalidId(_))
        ));
        assert!(validate_record_id("").is_err());
        assert!(validate_record_id("a_last_valid_2").is_ok());
        assert!(validate_record_id("f-1").is_ok());
    }

    #[test]
    fn key_layout() {
        assert_eq!(record_key("42"), "record_42");
        assert_eq!(last_valid_key("42"), "record_42_last_valid");
    }

    #[test]
    fn record_id_only_from_current_slot() {
        assert_eq!(record_id_from_key("record_42"), Some("42"));
        assert_eq!(record_id_from_key("record_42_last_valid"), None);
        assert_eq!(record_id_from_key("audit_log"), None);
        assert_eq!(record_id_from_key("record_"), None);
    }
}
