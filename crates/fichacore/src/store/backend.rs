use crate::error::Result;
use std::rc::Rc;

/// Abstract interface for durable string storage.
///
/// Methods take `&self`; implementations handle their own interior
/// mutability (the engine is single-threaded on this side of the seam).
pub trait KeyValueBackend {
    /// Returns Ok(None) if the key does not exist.
    /// Returns Err only on actual I/O errors.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the whole value for `key`.
    /// MUST be atomic: a reader sees either the old or the new value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// List all keys currently stored.
    fn keys(&self) -> Result<Vec<String>>;
}

impl<B: KeyValueBackend + ?Sized> KeyValueBackend for &B {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        (**self).keys()
    }
}

impl<B: KeyValueBackend + ?Sized> KeyValueBackend for Rc<B> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        (**self).keys()
    }
}
