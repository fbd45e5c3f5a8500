//! # Fichacore Architecture
//!
//! Fichacore is the durable-state and resource-governance core behind a
//! site-record (*ficha*) editor. Each ficha documents one inspection site
//! (*pozo*): sections of fields, photos and a status lifecycle. The UI layer
//! is not part of this crate; it talks to [`api::FichaApi`] and renders what
//! comes back.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  API Layer (api.rs)                                         │
//! │  - One facade per session, generic over the backend         │
//! │  - Enforces editability, limits and degraded mode           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Governance Layer                                           │
//! │  - status, history, limits: pure rules over Rust types      │
//! │  - integrity: validate-before-write, tiered recovery        │
//! │  - resources, worker, monitor: photos and their cost        │
//! │  - audit, logging: what happened, for later inspection      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Storage Layer (store/)                                     │
//! │  - KeyValueBackend trait                                    │
//! │  - FsBackend (production), MemBackend (testing)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Principle: Records Never Hold Bytes
//!
//! A ficha only references photos by resource id. Payloads live in the
//! [`resources::BinaryResourceStore`], so a ficha can be serialized, validated
//! and snapshotted cheaply, and persisting it never copies image data.
//!
//! ## Key Principle: Never Persist Invalid State
//!
//! Every write goes through [`integrity::StateIntegrityGuardian`], which
//! validates first and keeps a last-valid copy. Loading never fails: a damaged
//! ficha comes back `recovered` or `reset`, and the caller decides what to tell
//! the user.
//!
//! ## Module Overview
//!
//! - [`api`]: The facade, entry point for all operations
//! - [`model`]: Core data types (`Ficha`, `Section`, `FieldValue`, `PhotoRef`)
//! - [`status`]: The draft → editing → complete → finalized lifecycle
//! - [`history`]: Snapshots, undo/redo and pruning
//! - [`limits`]: Numeric ceilings and the checks against them
//! - [`integrity`]: Validation, safe persistence and recovery
//! - [`resources`]: Binary payloads and their access handles
//! - [`worker`]: Background hashing for photo deduplication
//! - [`monitor`]: Periodic resource checks and degraded mode
//! - [`audit`]: Bounded, persisted event log
//! - [`logging`]: Tracing setup and the diagnostic history
//! - [`store`]: Key-value storage abstraction and implementations
//! - [`config`]: Configuration management
//! - [`error`]: Error types

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod history;
pub mod integrity;
pub mod limits;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod resources;
pub mod status;
pub mod store;
pub mod worker;
