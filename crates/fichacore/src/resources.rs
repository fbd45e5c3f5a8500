//! # Binary Resource Store
//!
//! Photos and other heavy payloads live here, never inside a [`crate::model::Ficha`].
//! The ficha only stores the resource id.
//!
//! ## Handles
//!
//! Rendering code gets an [`AccessHandle`] (a `blob:` style URL) instead of the
//! bytes. Creating a handle allocates a process-level resource through the
//! [`HandleAllocator`], and every allocated handle must be revoked again:
//!
//! - [`BinaryResourceStore::release`] revokes the handle for one id.
//! - [`BinaryResourceStore::purge`] revokes all of them.
//! - Replacing a payload under an existing id revokes the old handle.
//! - Dropping the store revokes whatever is still live.
//!
//! At most one handle is live per resource; repeated requests return the same
//! one.
//!
//! ## Lifetime
//!
//! Payloads stay until `release` or `purge`. Reading a resource refreshes
//! `last_accessed` but there is no eviction here; eviction policy belongs to
//! the caller.

use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResource {
    pub id: String,
    pub data: Vec<u8>,
    pub mime_type: String,
    pub size: u64,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessHandle(String);

impl AccessHandle {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Allocates and revokes the transient handles backing [`AccessHandle`]s.
pub trait HandleAllocator {
    fn allocate(&self, resource: &StoredResource) -> AccessHandle;
    fn revoke(&self, handle: &AccessHandle);
}

/// Default allocator producing `blob:fichas/<uuid>` URLs.
///
/// Tracks which URLs are live so leaks show up in [`BlobUrlAllocator::live_count`].
#[derive(Debug, Default)]
pub struct BlobUrlAllocator {
    live: RefCell<HashSet<String>>,
}

impl BlobUrlAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn is_live(&self, handle: &AccessHandle) -> bool {
        self.live.borrow().contains(handle.as_str())
    }
}

impl HandleAllocator for BlobUrlAllocator {
    fn allocate(&self, _resource: &StoredResource) -> AccessHandle {
        let url = format!("blob:fichas/{}", Uuid::new_v4());
        self.live.borrow_mut().insert(url.clone());
        AccessHandle(url)
    }

    fn revoke(&self, handle: &AccessHandle) {
        self.live.borrow_mut().remove(handle.as_str());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStats {
    pub count: usize,
    pub total_size_bytes: u64,
}

pub struct BinaryResourceStore<A: HandleAllocator = BlobUrlAllocator> {
    resources: HashMap<String, StoredResource>,
    handles: HashMap<String, AccessHandle>,
    allocator: A,
}

impl BinaryResourceStore<BlobUrlAllocator> {
    pub fn new() -> Self {
        Self::with_allocator(BlobUrlAllocator::new())
    }
}

impl Default for BinaryResourceStore<BlobUrlAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: HandleAllocator> BinaryResourceStore<A> {
    pub fn with_allocator(allocator: A) -> Self {
        Self {
            resources: HashMap::new(),
            handles: HashMap::new(),
            allocator,
        }
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Store a payload and return its id (generated when `id` is `None`).
    ///
    /// Storing under an existing id replaces the payload and revokes its handle.
    pub fn store(&mut self, data: Vec<u8>, mime_type: &str, id: Option<&str>) -> String {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.revoke_handle(&id);

        let size = data.len() as u64;
        let resource = StoredResource {
            id: id.clone(),
            data,
            mime_type: mime_type.to_string(),
            size,
            last_accessed: Utc::now(),
        };
        if self.resources.insert(id.clone(), resource).is_some() {
            debug!(resource_id = %id, size, "resource replaced");
        } else {
            debug!(resource_id = %id, size, "resource stored");
        }
        id
    }

    pub fn get(&mut self, id: &str) -> Option<&[u8]> {
        match self.resources.get_mut(id) {
            Some(resource) => {
                resource.last_accessed = Utc::now();
                Some(resource.data.as_slice())
            }
            None => {
                warn!(resource_id = id, "resource not found");
                None
            }
        }
    }

    /// Metadata view without touching `last_accessed`.
    pub fn peek(&self, id: &str) -> Option<&StoredResource> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    /// Return the live handle for `id`, allocating it on first request.
    pub fn access_handle(&mut self, id: &str) -> Option<AccessHandle> {
        let Some(resource) = self.resources.get_mut(id) else {
            warn!(resource_id = id, "handle requested for unknown resource");
            return None;
        };
        resource.last_accessed = Utc::now();

        if let Some(handle) = self.handles.get(id) {
            return Some(handle.clone());
        }
        let handle = self.allocator.allocate(resource);
        self.handles.insert(id.to_string(), handle.clone());
        Some(handle)
    }

    /// Revoke any handle and drop the payload. Unknown ids are ignored.
    pub fn release(&mut self, id: &str) {
        self.revoke_handle(id);
        if self.resources.remove(id).is_some() {
            debug!(resource_id = id, "resource released");
        }
    }

    /// Revoke every handle and drop every payload.
    pub fn purge(&mut self) {
        self.revoke_all_handles();
        let count = self.resources.len();
        self.resources.clear();
        debug!(count, "resource store purged");
    }

    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            count: self.resources.len(),
            total_size_bytes: self.resources.values().map(|r| r.size).sum(),
        }
    }

    pub fn live_handle_count(&self) -> usize {
        self.handles.len()
    }

    fn revoke_handle(&mut self, id: &str) {
        if let Some(handle) = self.handles.remove(id) {
            self.allocator.revoke(&handle);
        }
    }

    fn revoke_all_handles(&mut self) {
        for (_, handle) in self.handles.drain() {
            self.allocator.revoke(&handle);
        }
    }
}

impl<A: HandleAllocator> Drop for BinaryResourceStore<A> {
    fn drop(&mut self) {
        self.revoke_all_handles();
    }
}
