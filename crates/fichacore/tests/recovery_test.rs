use fichacore::api::FichaApi;
use fichacore::config::GovernanceConfig;
use fichacore::error::FichaError;
use fichacore::history::SnapshotTrigger;
use fichacore::model::{FieldValue, Section, StateStatus};
use fichacore::resources::BinaryResourceStore;
use fichacore::status::StatusAction;
use fichacore::store::backend::KeyValueBackend;
use fichacore::store::fs_backend::FsBackend;
use fichacore::store::{last_valid_key, record_key, AUDIT_LOG_KEY};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn api_at(root: &Path) -> FichaApi<FsBackend> {
    FichaApi::new(
        FsBackend::new(root),
        BinaryResourceStore::new(),
        &GovernanceConfig::default(),
    )
}

fn saved_ficha(root: &Path) {
    let mut api = api_at(root);
    api.create_ficha("f-1", "pozo-1").unwrap();
    api.add_section(
        "f-1",
        Section::new("general", "table").with_field("cota", FieldValue::from_excel("100.5")),
    )
    .unwrap();
    api.update_field("f-1", "general", "cota", "101.0").unwrap();
    api.save("f-1", SnapshotTrigger::ManualSave).unwrap();
    api.transition("f-1", StatusAction::Complete).unwrap();
}

#[test]
fn test_reopen_in_new_session() {
    let dir = TempDir::new().unwrap();
    saved_ficha(dir.path());

    let mut api = api_at(dir.path());
    let ficha = api.open_ficha("f-1", "pozo-1").unwrap();
    assert_eq!(ficha.state_status, StateStatus::Ok);
    assert_eq!(ficha.field("general", "cota").unwrap().value, "101.0");
    assert_eq!(
        ficha.field("general", "cota").unwrap().original_value.as_deref(),
        Some("100.5")
    );
    assert_eq!(ficha.history.len(), 2);
}

#[test]
fn test_corrupt_current_slot_recovers_last_valid() {
    let dir = TempDir::new().unwrap();
    saved_ficha(dir.path());

    let backend = FsBackend::new(dir.path());
    fs::write(backend.path_for(&record_key("f-1")), "{ not json").unwrap();

    let mut api = api_at(dir.path());
    let ficha = api.open_ficha("f-1", "pozo-1").unwrap();
    assert_eq!(ficha.state_status, StateStatus::Recovered);
    assert_eq!(ficha.field("general", "cota").unwrap().value, "101.0");
    assert_eq!(api.diagnostics().len(), 1);
}

#[test]
fn test_both_slots_invalid_resets() {
    let dir = TempDir::new().unwrap();
    saved_ficha(dir.path());

    let backend = FsBackend::new(dir.path());
    backend.set(&record_key("f-1"), "{\"id\":\"f-1\"}").unwrap();
    backend.set(&last_valid_key("f-1"), "[]").unwrap();

    let mut api = api_at(dir.path());
    let ficha = api.open_ficha("f-1", "pozo-1").unwrap();
    assert_eq!(ficha.state_status, StateStatus::Reset);
    assert!(ficha.sections.is_empty());
    assert_eq!(ficha.pozo_id, "pozo-1");
}

#[test]
fn test_audit_log_survives_sessions() {
    let dir = TempDir::new().unwrap();
    saved_ficha(dir.path());

    let backend = FsBackend::new(dir.path());
    assert!(backend.get(AUDIT_LOG_KEY).unwrap().is_some());

    let api = api_at(dir.path());
    let logs = api.audit().get_logs();
    assert!(!logs.is_empty());
    assert_eq!(logs[0].source, "ficha");
}

#[test]
fn test_create_does_not_overwrite_saved_ficha() {
    let dir = TempDir::new().unwrap();
    saved_ficha(dir.path());

    let mut api = api_at(dir.path());
    let err = api.create_ficha("f-1", "pozo-1").unwrap_err();
    assert!(matches!(err, FichaError::AlreadyExists(_)));

    let ficha = api.open_ficha("f-1", "pozo-1").unwrap();
    assert_eq!(ficha.state_status, StateStatus::Ok);
    assert_eq!(ficha.field("general", "cota").unwrap().value, "101.0");
}
