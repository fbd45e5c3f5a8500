//! # Domain Model: Fichas, Sections and Field Provenance
//!
//! A [`Ficha`] is the editable technical data sheet for one *pozo* (the
//! surveyed subject). It is the unit of persistence, validation and recovery.
//!
//! ## Shape
//!
//! ```text
//! Ficha
//! ├── id, pozoId          identity
//! ├── status              workflow status (see crate::status)
//! ├── sections[]          ordered; each maps field key -> FieldValue
//! ├── customizations      layout settings; colors must be populated
//! ├── history[]           bounded snapshots (see crate::history)
//! ├── photos[]            resource ids only, never payload bytes
//! ├── errors[]            non-fatal problems found while editing/importing
//! ├── version             bumped on every mutation, never decreases
//! ├── lastModified
//! └── stateStatus         ok | recovered | reset
//! ```
//!
//! The JSON produced by serde is the durable format, so field names are
//! camelCase and the structural checks in [`crate::integrity`] run against it.
//!
//! ## Field Provenance
//!
//! Every [`FieldValue`] records where its value came from (`excel`, `manual`
//! or `default`). The first manual edit of an imported or defaulted value
//! keeps the pre-edit value in `originalValue` so exports can show what was
//! changed by hand.

use crate::error::{FichaError, Result};
use crate::history::Snapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Draft,
    Editing,
    Complete,
    Finalized,
}

impl Default for RecordStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Editing => "editing",
            Self::Complete => "complete",
            Self::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// How the in-memory copy of a ficha came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateStatus {
    Ok,
    Recovered,
    Reset,
}

impl Default for StateStatus {
    fn default() -> Self {
        Self::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSource {
    Excel,
    Manual,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValue {
    pub value: String,
    pub source: FieldSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl FieldValue {
    pub fn new(value: impl Into<String>, source: FieldSource) -> Self {
        Self {
            value: value.into(),
            source,
            original_value: None,
            modified_at: None,
        }
    }

    pub fn from_excel(value: impl Into<String>) -> Self {
        Self::new(value, FieldSource::Excel)
    }

    pub fn manual(value: impl Into<String>) -> Self {
        Self {
            modified_at: Some(Utc::now()),
            ..Self::new(value, FieldSource::Manual)
        }
    }

    /// Apply a manual edit. Returns false when the value is unchanged.
    ///
    /// The value that was present before the first manual edit is kept in
    /// `original_value`; later edits do not overwrite it.
    pub fn edit(&mut self, new_value: impl Into<String>) -> bool {
        let new_value = new_value.into();
        if self.value == new_value {
            return false;
        }
        let previous = std::mem::replace(&mut self.value, new_value);
        if self.source != FieldSource::Manual && self.original_value.is_none() {
            self.original_value = Some(previous);
        }
        self.source = FieldSource::Manual;
        self.modified_at = Some(Utc::now());
        true
    }

    pub fn is_modified(&self) -> bool {
        self.source == FieldSource::Manual && self.original_value.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub visible: bool,
    pub content: BTreeMap<String, FieldValue>,
}

impl Section {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            visible: true,
            content: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.content.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorPalette {
    pub primary: String,
    pub secondary: String,
    pub background: String,
    pub text: String,
    pub border: String,
}

impl Default for ColorPalette {
    fn default() -> Self {
        Self {
            primary: "#1F4E79".to_string(),
            secondary: "#2E75B6".to_string(),
            background: "#FFFFFF".to_string(),
            text: "#000000".to_string(),
            border: "#A6A6A6".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customization {
    pub colors: ColorPalette,
    pub font_family: String,
    pub font_size: u8,
    pub show_logo: bool,
    pub template: String,
}

impl Default for Customization {
    fn default() -> Self {
        Self {
            colors: ColorPalette::default(),
            font_family: "Helvetica".to_string(),
            font_size: 10,
            show_logo: true,
            template: "standard".to_string(),
        }
    }
}

/// A photo attached to a ficha. The payload lives in the resource store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRef {
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// A non-fatal problem attached to a ficha (bad import cell, missing photo...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ficha {
    pub id: String,
    pub pozo_id: String,
    pub status: RecordStatus,
    pub sections: Vec<Section>,
    pub customizations: Customization,
    #[serde(default)]
    pub history: Vec<Snapshot>,
    #[serde(default)]
    pub photos: Vec<PhotoRef>,
    #[serde(default)]
    pub errors: Vec<RecordError>,
    pub version: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub state_status: StateStatus,
}

/// Build the blank template ficha used for new documents and as the last
/// recovery tier. Every call returns a fresh value.
pub fn base_state(id: impl Into<String>, pozo_id: impl Into<String>) -> Ficha {
    Ficha {
        id: id.into(),
        pozo_id: pozo_id.into(),
        status: RecordStatus::Draft,
        sections: Vec::new(),
        customizations: Customization::default(),
        history: Vec::new(),
        photos: Vec::new(),
        errors: Vec::new(),
        version: 0,
        last_modified: Utc::now(),
        state_status: StateStatus::Ok,
    }
}

impl Ficha {
    pub fn new(id: impl Into<String>, pozo_id: impl Into<String>) -> Self {
        base_state(id, pozo_id)
    }

    /// Record that a mutation happened.
    pub fn touch(&mut self) {
        self.version += 1;
        self.last_modified = Utc::now();
    }

    pub fn section(&self, section_id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == section_id)
    }

    fn section_mut(&mut self, section_id: &str) -> Result<&mut Section> {
        self.sections
            .iter_mut()
            .find(|s| s.id == section_id)
            .ok_or_else(|| FichaError::SectionNotFound(section_id.to_string()))
    }

    pub fn field(&self, section_id: &str, key: &str) -> Option<&FieldValue> {
        self.section(section_id)?.content.get(key)
    }

    /// Append a section, replacing any existing section with the same id in place.
    pub fn add_section(&mut self, section: Section) {
        match self.sections.iter_mut().find(|s| s.id == section.id) {
            Some(existing) => *existing = section,
            None => self.sections.push(section),
        }
        self.touch();
    }

    /// Set a field value as a manual edit. Returns whether anything changed.
    pub fn set_field(
        &mut self,
        section_id: &str,
        key: &str,
        value: impl Into<String>,
    ) -> Result<bool> {
        let section = self.section_mut(section_id)?;
        let changed = match section.content.get_mut(key) {
            Some(field) => field.edit(value),
            None => {
                section
                    .content
                    .insert(key.to_string(), FieldValue::manual(value));
                true
            }
        };
        if changed {
            self.touch();
        }
        Ok(changed)
    }

    pub fn set_section_visible(&mut self, section_id: &str, visible: bool) -> Result<bool> {
        let section = self.section_mut(section_id)?;
        if section.visible == visible {
            return Ok(false);
        }
        section.visible = visible;
        self.touch();
        Ok(true)
    }

    pub fn push_error(
        &mut self,
        code: impl Into<String>,
        message: impl Into<String>,
        section_id: Option<String>,
    ) {
        self.errors.push(RecordError {
            code: code.into(),
            message: message.into(),
            section_id,
            at: Utc::now(),
        });
    }

    pub fn photo_ids(&self) -> impl Iterator<Item = &str> {
        self.photos.iter().map(|p| p.resource_id.as_str())
    }
}
