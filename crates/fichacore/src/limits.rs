//! Resource ceilings and the advisory checks built on them.
//!
//! Nothing here mutates state or refuses anything by itself. Callers decide
//! whether a failed check blocks the operation, shows a warning or flips
//! degraded mode.

use crate::error::{FichaError, Result};

pub const MAX_PHOTOS_PER_POZO: usize = 100;
pub const MAX_PHOTO_SIZE_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_TOTAL_PHOTOS: usize = 2000;
pub const MAX_CONCURRENT_IMPORTS: usize = 20;
pub const MAX_OPEN_FICHAS: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitCheck {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl LimitCheck {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }

    pub fn into_result(self) -> Result<()> {
        if self.allowed {
            Ok(())
        } else {
            Err(FichaError::ResourceLimit(
                self.reason.unwrap_or_else(|| "limit reached".to_string()),
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_photos_per_pozo: usize,
    pub max_photo_size_bytes: u64,
    pub degraded_photo_threshold: usize,
    pub max_concurrent_imports: usize,
    pub max_open_fichas: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_photos_per_pozo: MAX_PHOTOS_PER_POZO,
            max_photo_size_bytes: MAX_PHOTO_SIZE_BYTES,
            degraded_photo_threshold: MAX_TOTAL_PHOTOS,
            max_concurrent_imports: MAX_CONCURRENT_IMPORTS,
            max_open_fichas: MAX_OPEN_FICHAS,
        }
    }
}

impl ResourceLimits {
    pub fn can_add_photo(&self, current_count: usize) -> LimitCheck {
        if current_count >= self.max_photos_per_pozo {
            LimitCheck::refused(format!(
                "Photo limit reached: a pozo can hold at most {} photos",
                self.max_photos_per_pozo
            ))
        } else {
            LimitCheck::allowed()
        }
    }

    pub fn is_photo_size_allowed(&self, bytes: u64) -> bool {
        bytes <= self.max_photo_size_bytes
    }

    pub fn should_enter_degraded_mode(&self, total_photos: usize) -> bool {
        total_photos >= self.degraded_photo_threshold
    }

    pub fn can_start_import(&self, active_imports: usize) -> LimitCheck {
        if active_imports >= self.max_concurrent_imports {
            LimitCheck::refused(format!(
                "Too many imports in progress (max {})",
                self.max_concurrent_imports
            ))
        } else {
            LimitCheck::allowed()
        }
    }

    pub fn can_open_ficha(&self, open_fichas: usize) -> LimitCheck {
        if open_fichas >= self.max_open_fichas {
            LimitCheck::refused(format!(
                "Too many fichas open (max {}); close one first",
                self.max_open_fichas
            ))
        } else {
            LimitCheck::allowed()
        }
    }
}

pub fn can_add_photo(current_count: usize) -> LimitCheck {
    ResourceLimits::default().can_add_photo(current_count)
}

pub fn is_photo_size_allowed(bytes: u64) -> bool {
    ResourceLimits::default().is_photo_size_allowed(bytes)
}

pub fn should_enter_degraded_mode(total_photos: usize) -> bool {
    ResourceLimits::default().should_enter_degraded_mode(total_photos)
}
