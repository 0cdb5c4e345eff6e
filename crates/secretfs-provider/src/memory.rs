//! In-memory secret store used by tests.

use crate::error::StoreError;
use crate::SecretStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use zeroize::Zeroizing;

/// A [`SecretStore`] backed by a hash map.
///
/// Supports injecting write failures so callers can exercise flush-retry
/// paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    secrets: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    write_count: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper to seed an initial value.
    pub fn with_secret(self, reference: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.secrets.lock().insert(reference.into(), value.into());
        self
    }

    /// Insert or replace a value without going through [`SecretStore::write`].
    pub fn insert(&self, reference: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.secrets.lock().insert(reference.into(), value.into());
    }

    /// Current value for a reference, if any.
    pub fn value(&self, reference: &str) -> Option<Vec<u8>> {
        self.secrets.lock().get(reference).cloned()
    }

    /// Make subsequent writes fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes observed.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }
}

impl SecretStore for MemoryStore {
    fn resolve(&self, reference: &str) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        self.secrets
            .lock()
            .get(reference)
            .cloned()
            .map(Zeroizing::new)
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))
    }

    fn write(&self, reference: &str, value: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other(
                "injected write failure",
            )));
        }
        self.secrets
            .lock()
            .insert(reference.to_string(), value.to_vec());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list(&self) -> Vec<String> {
        self.secrets.lock().keys().cloned().collect()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
