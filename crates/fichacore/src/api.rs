//! # API Facade
//!
//! [`FichaApi`] is the single entry point the UI layer talks to. It wires the
//! governance components together along one data flow:
//!
//! ```text
//! edit ──> Ficha (in memory) ──save──> snapshot ──> StateIntegrityGuardian ──> backend
//!                 ^                                        │
//!                 └─────────── open (tiered recovery) ─────┘
//!
//! photo ──> limits + degraded flag ──> BinaryResourceStore ──> id kept in Ficha
//!                                             │
//!                                             └──> HashWorker ──> poll_hash_results
//! ```
//!
//! ## What the Facade Adds
//!
//! - Editing is only allowed in `draft`/`editing`; the first edit of a draft
//!   starts editing.
//! - Every save records a snapshot, keeps the undo cursor valid and persists
//!   through the guardian.
//! - Photos are refused while degraded mode is active, when too large, or when
//!   the ficha is full. Crossing the global photo ceiling turns degraded mode on.
//! - Notable events go to the audit log; problems the user should see later go
//!   to the diagnostic history.
//!
//! ## Generic Over the Backend
//!
//! `FichaApi<B: KeyValueBackend>` shares one backend between the guardian,
//! the audit log and the diagnostic history:
//! - Production: `FichaApi<FsBackend>`
//! - Testing: `FichaApi<MemBackend>`

use crate::audit::{AuditEventLog, NewEvent};
use crate::config::GovernanceConfig;
use crate::error::{FichaError, Result};
use crate::history::{create_snapshot, restore_snapshot, SnapshotTrigger, Timeline};
use crate::integrity::StateIntegrityGuardian;
use crate::limits::ResourceLimits;
use crate::logging::DiagnosticHistory;
use crate::model::{base_state, Ficha, PhotoRef, RecordStatus, Section, StateStatus};
use crate::monitor::{DegradedMode, MemorySignal, ResourceMonitor, ResourceStatus, UsageCounters};
use crate::resources::{AccessHandle, BinaryResourceStore};
use crate::status::StatusAction;
use crate::store::{validate_record_id, KeyValueBackend};
use crate::worker::{HashOptions, HashTask, HashWorker, WorkerMessage};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

struct OpenFicha {
    ficha: Ficha,
    timeline: Timeline,
}

fn open_mut<'a>(
    open: &'a mut HashMap<String, OpenFicha>,
    ficha_id: &str,
) -> Result<&'a mut OpenFicha> {
    open.get_mut(ficha_id)
        .ok_or_else(|| FichaError::FichaNotOpen(ficha_id.to_string()))
}

/// Draft fichas move to editing on their first change; complete and
/// finalized ones must be reopened first.
fn ensure_editable(ficha: &mut Ficha) -> Result<()> {
    match ficha.status {
        RecordStatus::Draft => {
            ficha.apply_action(StatusAction::StartEditing)?;
            Ok(())
        }
        RecordStatus::Editing => Ok(()),
        other => Err(FichaError::ReadOnly(other)),
    }
}

pub struct FichaApi<B: KeyValueBackend> {
    guardian: StateIntegrityGuardian<Rc<B>>,
    audit: AuditEventLog<Rc<B>>,
    diagnostics: DiagnosticHistory<Rc<B>>,
    resources: BinaryResourceStore,
    limits: ResourceLimits,
    history_cap: usize,
    degraded: DegradedMode,
    usage: UsageCounters,
    open: HashMap<String, OpenFicha>,
    hasher: Option<HashWorker>,
    pending_hashes: HashMap<String, String>,
}

impl<B: KeyValueBackend> FichaApi<B> {
    pub fn new(backend: B, resources: BinaryResourceStore, config: &GovernanceConfig) -> Self {
        let backend = Rc::new(backend);
        Self {
            guardian: StateIntegrityGuardian::new(backend.clone()),
            audit: AuditEventLog::load(backend.clone(), config.max_audit_entries),
            diagnostics: DiagnosticHistory::new(backend),
            resources,
            limits: config.limits(),
            history_cap: config.max_history_entries,
            degraded: DegradedMode::new(),
            usage: UsageCounters::new(),
            open: HashMap::new(),
            hasher: None,
            pending_hashes: HashMap::new(),
        }
    }

    /// Hash new photos on `worker`. Results are applied by [`Self::poll_hash_results`].
    pub fn enable_hashing(&mut self, worker: HashWorker) {
        self.hasher = Some(worker);
    }

    // --- Accessors ---

    pub fn ficha(&self, ficha_id: &str) -> Option<&Ficha> {
        self.open.get(ficha_id).map(|o| &o.ficha)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn audit(&self) -> &AuditEventLog<Rc<B>> {
        &self.audit
    }

    pub fn diagnostics(&self) -> &DiagnosticHistory<Rc<B>> {
        &self.diagnostics
    }

    pub fn guardian(&self) -> &StateIntegrityGuardian<Rc<B>> {
        &self.guardian
    }

    pub fn resources(&self) -> &BinaryResourceStore {
        &self.resources
    }

    pub fn degraded_mode(&self) -> DegradedMode {
        self.degraded.clone()
    }

    pub fn usage_counters(&self) -> UsageCounters {
        self.usage.clone()
    }

    /// A monitor reading this facade's counters and flipping its degraded flag.
    pub fn resource_monitor(&self) -> ResourceMonitor<UsageCounters> {
        ResourceMonitor::new(self.usage.clone(), self.degraded.clone()).with_limits(self.limits)
    }

    /// Feed the host's memory reading to the monitor. The crate cannot
    /// measure it itself; without this the status stays `normal`.
    pub fn report_memory(&self, signal: MemorySignal) -> ResourceStatus {
        self.usage.set_memory(signal);
        signal.status()
    }

    pub fn reset_degraded_mode(&mut self) {
        self.degraded.reset();
        self.audit
            .log(NewEvent::system("monitor", json!({"event": "degraded_mode_reset"})));
    }

    // --- Lifecycle ---

    /// Start a brand-new ficha and persist it.
    ///
    /// Refused with [`FichaError::AlreadyExists`] when the id is open or has
    /// anything persisted; use [`Self::open_ficha`] for those.
    pub fn create_ficha(&mut self, ficha_id: &str, pozo_id: &str) -> Result<&Ficha> {
        validate_record_id(ficha_id)?;
        if self.open.contains_key(ficha_id) || self.guardian.has_persisted(ficha_id)? {
            return Err(FichaError::AlreadyExists(ficha_id.to_string()));
        }
        self.check_can_open(ficha_id)?;
        let ficha = base_state(ficha_id, pozo_id);
        self.guardian.safe_persist(&ficha)?;
        self.audit.log(NewEvent::action(
            "ficha",
            json!({"event": "created", "fichaId": ficha_id, "pozoId": pozo_id}),
        ));
        Ok(self.insert_open(ficha))
    }

    /// Load a persisted ficha through the recovery tiers. Opening an already
    /// open ficha returns the in-memory copy.
    pub fn open_ficha(&mut self, ficha_id: &str, pozo_id: &str) -> Result<&Ficha> {
        if !self.open.contains_key(ficha_id) {
            validate_record_id(ficha_id)?;
            self.check_can_open(ficha_id)?;
            let ficha = self.guardian.recover_state(ficha_id, pozo_id);
            self.report_recovery(&ficha);
            self.insert_open(ficha);
        }
        open_mut(&mut self.open, ficha_id).map(|o| &o.ficha)
    }

    fn check_can_open(&mut self, ficha_id: &str) -> Result<()> {
        let check = self.limits.can_open_ficha(self.open.len());
        if let Some(reason) = &check.reason {
            self.diagnostics.warn(reason.clone(), Some(ficha_id));
        }
        check.into_result()
    }

    fn insert_open(&mut self, ficha: Ficha) -> &Ficha {
        let timeline = Timeline::with_cap(&ficha.history, self.history_cap);
        let id = ficha.id.clone();
        let entry = self
            .open
            .entry(id)
            .or_insert(OpenFicha { ficha, timeline });
        &entry.ficha
    }

    fn report_recovery(&mut self, ficha: &Ficha) {
        let payload = json!({
            "event": "opened",
            "fichaId": ficha.id,
            "stateStatus": ficha.state_status,
            "version": ficha.version,
        });
        match ficha.state_status {
            StateStatus::Ok => {
                self.audit.log(NewEvent::system("guardian", payload));
            }
            StateStatus::Recovered => {
                self.audit.log(NewEvent::system("guardian", payload));
                self.diagnostics.warn(
                    "Ficha restored from its last valid copy; recent changes may be missing",
                    Some(&ficha.id),
                );
            }
            StateStatus::Reset => {
                self.audit.log(NewEvent::error("guardian", payload));
                self.diagnostics.error(
                    "No valid copy of the ficha was found; it was reset to a blank draft",
                    Some(&ficha.id),
                );
            }
        }
    }

    /// Drop the in-memory ficha and release its photo payloads.
    /// Unsaved changes are lost; call [`Self::save`] first.
    pub fn close_ficha(&mut self, ficha_id: &str) -> Result<()> {
        let closed = self
            .open
            .remove(ficha_id)
            .ok_or_else(|| FichaError::FichaNotOpen(ficha_id.to_string()))?;
        for resource_id in closed.ficha.photo_ids() {
            self.resources.release(resource_id);
            self.pending_hashes.remove(resource_id);
        }
        self.refresh_usage();
        self.audit
            .log(NewEvent::action("ficha", json!({"event": "closed", "fichaId": ficha_id})));
        Ok(())
    }

    // --- Editing ---

    pub fn update_field(
        &mut self,
        ficha_id: &str,
        section_id: &str,
        key: &str,
        value: &str,
    ) -> Result<bool> {
        let entry = open_mut(&mut self.open, ficha_id)?;
        ensure_editable(&mut entry.ficha)?;
        entry.ficha.set_field(section_id, key, value)
    }

    pub fn add_section(&mut self, ficha_id: &str, section: Section) -> Result<()> {
        let entry = open_mut(&mut self.open, ficha_id)?;
        ensure_editable(&mut entry.ficha)?;
        entry.ficha.add_section(section);
        Ok(())
    }

    pub fn set_section_visible(
        &mut self,
        ficha_id: &str,
        section_id: &str,
        visible: bool,
    ) -> Result<bool> {
        let entry = open_mut(&mut self.open, ficha_id)?;
        ensure_editable(&mut entry.ficha)?;
        entry.ficha.set_section_visible(section_id, visible)
    }

    /// Apply a status action, then save with a `status_change` snapshot.
    pub fn transition(&mut self, ficha_id: &str, action: StatusAction) -> Result<RecordStatus> {
        let entry = open_mut(&mut self.open, ficha_id)?;
        let from = entry.ficha.status;
        let to = match entry.ficha.apply_action(action) {
            Ok(to) => to,
            Err(e) => {
                self.audit.log(NewEvent::error(
                    "status",
                    json!({"fichaId": ficha_id, "from": from, "action": action}),
                ));
                return Err(e);
            }
        };
        self.audit.log(NewEvent::action(
            "status",
            json!({"fichaId": ficha_id, "from": from, "action": action, "to": to}),
        ));
        self.save(ficha_id, SnapshotTrigger::StatusChange)?;
        Ok(to)
    }

    /// Snapshot the ficha and persist it.
    ///
    /// On failure the in-memory ficha (including the new snapshot) is kept so
    /// the user can retry or export by hand.
    pub fn save(&mut self, ficha_id: &str, trigger: SnapshotTrigger) -> Result<()> {
        let entry = open_mut(&mut self.open, ficha_id)?;
        let snapshot = create_snapshot(&entry.ficha, trigger);
        entry.timeline.record(&mut entry.ficha.history, snapshot);

        match self.guardian.safe_persist(&entry.ficha) {
            Ok(()) => {
                entry.ficha.state_status = StateStatus::Ok;
                self.audit.log(NewEvent::action(
                    "ficha",
                    json!({"event": "saved", "fichaId": ficha_id, "version": entry.ficha.version, "trigger": trigger}),
                ));
                Ok(())
            }
            Err(e) => {
                self.audit.log(NewEvent::error(
                    "ficha",
                    json!({"event": "save_failed", "fichaId": ficha_id, "error": e.to_string()}),
                ));
                match &e {
                    FichaError::StructuralInvariant(_) => self
                        .diagnostics
                        .error("Ficha failed validation and was not saved", Some(ficha_id)),
                    _ => self.diagnostics.warn(
                        format!("Could not save ficha; changes are kept in memory: {}", e),
                        Some(ficha_id),
                    ),
                }
                Err(e)
            }
        }
    }

    /// Step back one snapshot. Returns false when already at the oldest.
    pub fn undo(&mut self, ficha_id: &str) -> Result<bool> {
        let entry = open_mut(&mut self.open, ficha_id)?;
        if !entry.timeline.can_undo() {
            return Ok(false);
        }
        ensure_editable(&mut entry.ficha)?;
        let Some(snapshot) = entry.timeline.undo(&entry.ficha.history).cloned() else {
            return Ok(false);
        };
        restore_snapshot(&mut entry.ficha, &snapshot);
        Ok(true)
    }

    /// Step forward one snapshot. Returns false when already at the newest.
    pub fn redo(&mut self, ficha_id: &str) -> Result<bool> {
        let entry = open_mut(&mut self.open, ficha_id)?;
        if !entry.timeline.can_redo(&entry.ficha.history) {
            return Ok(false);
        }
        ensure_editable(&mut entry.ficha)?;
        let Some(snapshot) = entry.timeline.redo(&entry.ficha.history).cloned() else {
            return Ok(false);
        };
        restore_snapshot(&mut entry.ficha, &snapshot);
        Ok(true)
    }

    // --- Photos ---

    pub fn add_photo(
        &mut self,
        ficha_id: &str,
        data: Vec<u8>,
        mime_type: &str,
        caption: Option<String>,
    ) -> Result<String> {
        let entry = open_mut(&mut self.open, ficha_id)?;

        if self.degraded.is_active() {
            let reason = "Photo import is paused while resources are low".to_string();
            self.diagnostics.warn(reason.clone(), Some(ficha_id));
            return Err(FichaError::Degraded(reason));
        }

        let size = data.len() as u64;
        if !self.limits.is_photo_size_allowed(size) {
            let reason = format!(
                "Photo is {} bytes; the limit is {} bytes",
                size, self.limits.max_photo_size_bytes
            );
            self.diagnostics.warn(reason.clone(), Some(ficha_id));
            return Err(FichaError::ResourceLimit(reason));
        }

        let check = self.limits.can_add_photo(entry.ficha.photos.len());
        if let Some(reason) = &check.reason {
            self.diagnostics.warn(reason.clone(), Some(ficha_id));
        }
        check.into_result()?;
        ensure_editable(&mut entry.ficha)?;

        let payload = self.hasher.as_ref().map(|_| data.clone());
        let resource_id = self.resources.store(data, mime_type, None);
        entry.ficha.photos.push(PhotoRef {
            resource_id: resource_id.clone(),
            content_hash: None,
            caption,
            added_at: Utc::now(),
        });
        entry.ficha.touch();

        if let (Some(worker), Some(payload)) = (&self.hasher, payload) {
            let task = HashTask {
                id: resource_id.clone(),
                payload,
                options: HashOptions::default(),
            };
            match worker.submit(task) {
                Ok(()) => {
                    self.pending_hashes
                        .insert(resource_id.clone(), ficha_id.to_string());
                }
                Err(e) => self
                    .diagnostics
                    .warn(format!("Photo will not be deduplicated: {}", e), Some(ficha_id)),
            }
        }

        self.refresh_usage();
        let total = self.usage.photos();
        if self.limits.should_enter_degraded_mode(total) && self.degraded.enter() {
            self.diagnostics.warn(
                format!("{} photos loaded; heavy operations are disabled", total),
                None,
            );
        }
        Ok(resource_id)
    }

    /// Detach a photo from a ficha and release its payload.
    pub fn remove_photo(&mut self, ficha_id: &str, resource_id: &str) -> Result<bool> {
        let entry = open_mut(&mut self.open, ficha_id)?;
        if !entry.ficha.photo_ids().any(|id| id == resource_id) {
            return Ok(false);
        }
        ensure_editable(&mut entry.ficha)?;
        entry.ficha.photos.retain(|p| p.resource_id != resource_id);
        entry.ficha.touch();
        self.resources.release(resource_id);
        self.pending_hashes.remove(resource_id);
        self.refresh_usage();
        Ok(true)
    }

    pub fn photo_handle(&mut self, resource_id: &str) -> Option<AccessHandle> {
        self.resources.access_handle(resource_id)
    }

    pub fn photo_data(&mut self, resource_id: &str) -> Option<&[u8]> {
        self.resources.get(resource_id)
    }

    /// Apply finished hash results. Returns how many terminal results were applied.
    ///
    /// A photo whose hash matches another photo of the same ficha is dropped as
    /// a duplicate. Results for photos that are gone are ignored.
    pub fn poll_hash_results(&mut self) -> usize {
        let Some(worker) = &self.hasher else {
            return 0;
        };
        let messages = worker.drain();

        let mut applied = 0;
        for message in messages {
            match message {
                WorkerMessage::Progress { .. } => {}
                WorkerMessage::Success { id, result } => {
                    if self.apply_hash(&id, result.content_hash) {
                        applied += 1;
                    }
                }
                WorkerMessage::Error { id, message } => {
                    if let Some(ficha_id) = self.pending_hashes.remove(&id) {
                        if let Some(entry) = self.open.get_mut(&ficha_id) {
                            entry.ficha.push_error("photo_hash_failed", message.clone(), None);
                        }
                        self.diagnostics
                            .warn(format!("Photo {} could not be hashed: {}", id, message), Some(&ficha_id));
                        applied += 1;
                    }
                }
            }
        }
        applied
    }

    fn apply_hash(&mut self, resource_id: &str, content_hash: String) -> bool {
        let Some(ficha_id) = self.pending_hashes.remove(resource_id) else {
            debug!(resource_id, "hash result for unknown photo ignored");
            return false;
        };
        let Some(entry) = self.open.get_mut(&ficha_id) else {
            return false;
        };

        let duplicate = entry
            .ficha
            .photos
            .iter()
            .any(|p| {
                p.resource_id != resource_id
                    && p.content_hash.as_deref() == Some(content_hash.as_str())
            });

        if duplicate {
            entry.ficha.photos.retain(|p| p.resource_id != resource_id);
            entry.ficha.touch();
            self.resources.release(resource_id);
            self.refresh_usage();
            self.audit.log(NewEvent::action(
                "photos",
                json!({"event": "deduplicated", "fichaId": ficha_id, "resourceId": resource_id}),
            ));
            return true;
        }

        match entry
            .ficha
            .photos
            .iter_mut()
            .find(|p| p.resource_id == resource_id)
        {
            Some(photo) => {
                photo.content_hash = Some(content_hash);
                true
            }
            None => false,
        }
    }

    fn refresh_usage(&self) {
        self.usage.set_photo_count(self.resources.stats().count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldValue;
    use crate::store::mem_backend::MemBackend;
    use crate::store::record_key;
    use crate::worker::sha256_hex;
    use std::thread;
    use std::time::Duration;

    fn api() -> FichaApi<MemBackend> {
        FichaApi::new(
            MemBackend::new(),
            BinaryResourceStore::new(),
            &GovernanceConfig::default(),
        )
    }

    fn api_with(config: GovernanceConfig) -> FichaApi<MemBackend> {
        FichaApi::new(MemBackend::new(), BinaryResourceStore::new(), &config)
    }

    fn with_section(api: &mut FichaApi<MemBackend>) {
        api.create_ficha("f-1", "pozo-1").unwrap();
        api.add_section(
            "f-1",
            Section::new("general", "table").with_field("cota", FieldValue::from_excel("10")),
        )
        .unwrap();
    }

    #[test]
    fn create_persists_draft() {
        let mut api = api();
        let ficha = api.create_ficha("f-1", "pozo-1").unwrap();
        assert_eq!(ficha.status, RecordStatus::Draft);
        assert!(api.guardian().backend().get(&record_key("f-1")).unwrap().is_some());
    }

    #[test]
    fn first_edit_starts_editing() {
        let mut api = api();
        with_section(&mut api);
        assert_eq!(api.ficha("f-1").unwrap().status, RecordStatus::Editing);
        api.update_field("f-1", "general", "cota", "11").unwrap();
        assert_eq!(api.ficha("f-1").unwrap().field("general", "cota").unwrap().value, "11");
    }

    #[test]
    fn complete_ficha_is_read_only() {
        let mut api = api();
        with_section(&mut api);
        api.transition("f-1", StatusAction::Complete).unwrap();
        let err = api.update_field("f-1", "general", "cota", "12").unwrap_err();
        assert!(matches!(err, FichaError::ReadOnly(RecordStatus::Complete)));

        api.transition("f-1", StatusAction::Reopen).unwrap();
        assert!(api.update_field("f-1", "general", "cota", "12").unwrap());
    }

    #[test]
    fn invalid_transition_is_surfaced_and_audited() {
        let mut api = api();
        api.create_ficha("f-1", "pozo-1").unwrap();
        let err = api.transition("f-1", StatusAction::Finalize).unwrap_err();
        assert!(matches!(err, FichaError::InvalidTransition { .. }));
        assert_eq!(api.ficha("f-1").unwrap().status, RecordStatus::Draft);
        assert_eq!(api.audit().get_logs()[0].source, "status");
    }

    #[test]
    fn save_then_reopen_round_trips() {
        let mut api = api();
        with_section(&mut api);
        api.update_field("f-1", "general", "cota", "42").unwrap();
        api.save("f-1", SnapshotTrigger::ManualSave).unwrap();
        let saved = api.ficha("f-1").unwrap().clone();

        api.close_ficha("f-1").unwrap();
        let reopened = api.open_ficha("f-1", "pozo-1").unwrap();
        assert_eq!(reopened, &saved);
        assert_eq!(reopened.history.len(), 1);
    }

    #[test]
    fn failed_save_keeps_memory_state() {
        let mut api = api();
        with_section(&mut api);
        api.update_field("f-1", "general", "cota", "77").unwrap();
        api.guardian().backend().set_simulate_write_error(true);

        let err = api.save("f-1", SnapshotTrigger::AutoSave).unwrap_err();
        assert!(matches!(err, FichaError::Store(_)));
        assert_eq!(api.ficha("f-1").unwrap().field("general", "cota").unwrap().value, "77");
        assert_eq!(api.diagnostics().len(), 1);
    }

    #[test]
    fn undo_redo_restore_values() {
        let mut api = api();
        with_section(&mut api);
        for value in ["1", "2", "3"] {
            api.update_field("f-1", "general", "cota", value).unwrap();
            api.save("f-1", SnapshotTrigger::AutoSave).unwrap();
        }
        assert!(api.undo("f-1").unwrap());
        assert_eq!(api.ficha("f-1").unwrap().field("general", "cota").unwrap().value, "2");
        assert!(api.undo("f-1").unwrap());
        assert!(!api.undo("f-1").unwrap());
        assert_eq!(api.ficha("f-1").unwrap().field("general", "cota").unwrap().value, "1");

        assert!(api.redo("f-1").unwrap());
        assert!(api.redo("f-1").unwrap());
        assert!(!api.redo("f-1").unwrap());
        assert_eq!(api.ficha("f-1").unwrap().field("general", "cota").unwrap().value, "3");
    }

    #[test]
    fn history_is_capped_by_config() {
        let mut api = api_with(GovernanceConfig {
            max_history_entries: 3,
            ..Default::default()
        });
        with_section(&mut api);
        for i in 0..6 {
            api.update_field("f-1", "general", "cota", &i.to_string()).unwrap();
            api.save("f-1", SnapshotTrigger::AutoSave).unwrap();
        }
        assert_eq!(api.ficha("f-1").unwrap().history.len(), 3);
    }

    #[test]
    fn open_limit_is_enforced() {
        let mut api = api_with(GovernanceConfig {
            max_open_fichas: 2,
            ..Default::default()
        });
        api.create_ficha("a", "p").unwrap();
        api.create_ficha("b", "p").unwrap();
        let err = api.create_ficha("c", "p").unwrap_err();
        assert!(matches!(err, FichaError::ResourceLimit(_)));
        assert!(api.open_ficha("a", "p").is_ok());
    }

    #[test]
    fn opening_unknown_ficha_resets_and_reports() {
        let mut api = api();
        let ficha = api.open_ficha("ghost", "pozo-x").unwrap();
        assert_eq!(ficha.state_status, StateStatus::Reset);
        assert_eq!(api.diagnostics().len(), 1);
        assert_eq!(
            api.audit().get_logs()[0].kind,
            crate::audit::AppEventType::Error
        );
    }

    #[test]
    fn photo_is_stored_by_id_only() {
        let mut api = api();
        api.create_ficha("f-1", "pozo-1").unwrap();
        let id = api
            .add_photo("f-1", vec![1, 2, 3], "image/jpeg", Some("fachada".into()))
            .unwrap();

        let ficha = api.ficha("f-1").unwrap();
        assert_eq!(ficha.photos.len(), 1);
        assert_eq!(ficha.photos[0].resource_id, id);
        assert_eq!(api.photo_data(&id), Some(&[1u8, 2, 3][..]));
        assert_eq!(api.usage_counters().photos(), 1);
        assert_eq!(api.photo_handle(&id), api.photo_handle(&id));
    }

    #[test]
    fn photo_limits_are_enforced() {
        let mut api = api_with(GovernanceConfig {
            max_photos_per_pozo: 2,
            max_photo_size_bytes: 4,
            ..Default::default()
        });
        api.create_ficha("f-1", "pozo-1").unwrap();

        let err = api.add_photo("f-1", vec![0; 5], "image/jpeg", None).unwrap_err();
        assert!(matches!(err, FichaError::ResourceLimit(_)));

        api.add_photo("f-1", vec![0; 4], "image/jpeg", None).unwrap();
        api.add_photo("f-1", vec![1; 4], "image/jpeg", None).unwrap();
        let err = api.add_photo("f-1", vec![2; 4], "image/jpeg", None).unwrap_err();
        assert!(matches!(err, FichaError::ResourceLimit(_)));
        assert_eq!(api.resources().stats().count, 2);
    }

    #[test]
    fn crossing_global_threshold_enters_degraded_mode() {
        let mut api = api_with(GovernanceConfig {
            degraded_photo_threshold: 2,
            ..Default::default()
        });
        api.create_ficha("f-1", "pozo-1").unwrap();
        api.add_photo("f-1", vec![1], "image/jpeg", None).unwrap();
        assert!(!api.degraded_mode().is_active());
        api.add_photo("f-1", vec![2], "image/jpeg", None).unwrap();
        assert!(api.degraded_mode().is_active());

        let err = api.add_photo("f-1", vec![3], "image/jpeg", None).unwrap_err();
        assert!(matches!(err, FichaError::Degraded(_)));

        api.reset_degraded_mode();
        assert!(api.add_photo("f-1", vec![3], "image/jpeg", None).is_ok());
    }

    #[test]
    fn monitor_shares_degraded_flag() {
        let api = api();
        api.usage_counters().set_photo_count(5000);
        api.resource_monitor().check();
        assert!(api.degraded_mode().is_active());
    }

    #[test]
    fn close_releases_photos() {
        let mut api = api();
        api.create_ficha("f-1", "pozo-1").unwrap();
        let id = api.add_photo("f-1", vec![1, 2], "image/jpeg", None).unwrap();
        api.photo_handle(&id).unwrap();

        api.close_ficha("f-1").unwrap();
        assert_eq!(api.resources().stats().count, 0);
        assert_eq!(api.resources().allocator().live_count(), 0);
        assert_eq!(api.usage_counters().photos(), 0);
    }

    #[test]
    fn remove_photo_releases_payload() {
        let mut api = api();
        api.create_ficha("f-1", "pozo-1").unwrap();
        let id = api.add_photo("f-1", vec![9], "image/jpeg", None).unwrap();
        assert!(api.remove_photo("f-1", &id).unwrap());
        assert!(!api.remove_photo("f-1", &id).unwrap());
        assert_eq!(api.photo_data(&id), None);
    }

    fn wait_for_hashes(api: &mut FichaApi<MemBackend>, expected: usize) {
        let mut applied = 0;
        for _ in 0..400 {
            applied += api.poll_hash_results();
            if applied >= expected {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("only {} of {} hash results arrived", applied, expected);
    }

    #[test]
    fn identical_photos_are_deduplicated() {
        let mut api = api();
        api.enable_hashing(HashWorker::spawn());
        api.create_ficha("f-1", "pozo-1").unwrap();

        let first = api.add_photo("f-1", vec![7; 32], "image/jpeg", None).unwrap();
        wait_for_hashes(&mut api, 1);
        let second = api.add_photo("f-1", vec![7; 32], "image/jpeg", None).unwrap();
        wait_for_hashes(&mut api, 1);

        let ficha = api.ficha("f-1").unwrap();
        assert_eq!(ficha.photos.len(), 1);
        assert_eq!(ficha.photos[0].resource_id, first);
        assert_eq!(
            ficha.photos[0].content_hash.as_deref(),
            Some(sha256_hex(&[7; 32]).as_str())
        );
        assert!(!api.resources().contains(&second));
    }

    #[test]
    fn hash_failure_is_recorded_on_ficha() {
        let mut api = api();
        api.enable_hashing(HashWorker::spawn());
        api.create_ficha("f-1", "pozo-1").unwrap();
        api.add_photo("f-1", Vec::new(), "image/jpeg", None).unwrap();
        wait_for_hashes(&mut api, 1);

        let ficha = api.ficha("f-1").unwrap();
        assert_eq!(ficha.errors.len(), 1);
        assert_eq!(ficha.errors[0].code, "photo_hash_failed");
    }

    #[test]
    fn results_for_removed_photos_are_ignored() {
        let mut api = api();
        api.enable_hashing(HashWorker::spawn());
        api.create_ficha("f-1", "pozo-1").unwrap();
        let id = api.add_photo("f-1", vec![1, 2, 3], "image/jpeg", None).unwrap();
        api.remove_photo("f-1", &id).unwrap();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(api.poll_hash_results(), 0);
        assert!(api.ficha("f-1").unwrap().photos.is_empty());
    }

    #[test]
    fn create_refuses_existing_ficha() {
        let mut api = api();
        with_section(&mut api);
        api.save("f-1", SnapshotTrigger::ManualSave).unwrap();

        let err = api.create_ficha("f-1", "pozo-1").unwrap_err();
        assert!(matches!(err, FichaError::AlreadyExists(id) if id == "f-1"));

        api.close_ficha("f-1").unwrap();
        let err = api.create_ficha("f-1", "pozo-1").unwrap_err();
        assert!(matches!(err, FichaError::AlreadyExists(_)));

        let reopened = api.open_ficha("f-1", "pozo-1").unwrap();
        assert_eq!(reopened.state_status, StateStatus::Ok);
        assert_eq!(reopened.sections.len(), 1);
    }

    #[test]
    fn create_refuses_when_only_fallback_slot_remains() {
        let mut api = api();
        api.guardian()
            .backend()
            .set(&crate::store::last_valid_key("f-1"), "{}")
            .unwrap();
        let err = api.create_ficha("f-1", "pozo-1").unwrap_err();
        assert!(matches!(err, FichaError::AlreadyExists(_)));
    }

    #[test]
    fn ids_colliding_with_fallback_slots_are_refused() {
        let mut api = api();
        api.create_ficha("a", "pozo-1").unwrap();
        let err = api.create_ficha("a_last_valid", "pozo-1").unwrap_err();
        assert!(matches!(err, FichaError::InvalidId(_)));
        let err = api.open_ficha("a_last_valid", "pozo-1").unwrap_err();
        assert!(matches!(err, FichaError::InvalidId(_)));
        assert_eq!(api.open_count(), 1);
    }

    #[test]
    fn undo_refused_on_complete_ficha() {
        let mut api = api();
        with_section(&mut api);
        api.update_field("f-1", "general", "cota", "10").unwrap();
        api.save("f-1", SnapshotTrigger::ManualSave).unwrap();
        api.update_field("f-1", "general", "cota", "20").unwrap();
        api.transition("f-1", StatusAction::Complete).unwrap();

        assert!(matches!(
            api.undo("f-1").unwrap_err(),
            FichaError::ReadOnly(RecordStatus::Complete)
        ));
        let ficha = api.ficha("f-1").unwrap();
        assert_eq!(ficha.status, RecordStatus::Complete);
        assert_eq!(ficha.field("general", "cota").unwrap().value, "20");

        api.transition("f-1", StatusAction::Reopen).unwrap();
        assert!(api.undo("f-1").unwrap());
    }

    #[test]
    fn remove_photo_refused_on_finalized_ficha() {
        let mut api = api();
        api.create_ficha("f-1", "pozo-1").unwrap();
        let id = api.add_photo("f-1", vec![4, 5], "image/jpeg", None).unwrap();
        api.transition("f-1", StatusAction::Complete).unwrap();
        api.transition("f-1", StatusAction::Finalize).unwrap();

        let err = api.remove_photo("f-1", &id).unwrap_err();
        assert!(matches!(err, FichaError::ReadOnly(RecordStatus::Finalized)));
        assert_eq!(api.ficha("f-1").unwrap().photos.len(), 1);
        assert!(api.resources().contains(&id));
    }

    #[test]
    fn reported_memory_drives_monitor() {
        let api = api();
        let status = api.report_memory(MemorySignal {
            used_bytes: 950,
            limit_bytes: 1000,
        });
        assert_eq!(status, ResourceStatus::Critical);
        let reading = api.resource_monitor().check();
        assert_eq!(reading.status, ResourceStatus::Critical);
        assert!(api.degraded_mode().is_active());
    }

    #[test]
    fn unknown_ficha_is_not_open() {
        let mut api = api();
        let err = api.update_field("nope", "s", "k", "v").unwrap_err();
        assert!(matches!(err, FichaError::FichaNotOpen(_)));
    }
}
