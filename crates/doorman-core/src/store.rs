//! Gallery store collaborator interface.

use crate::types::{Identity, IdentityPatch, RawIdentityRecord};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("identity not found: {0}")]
    IdentityNotFound(String),
    #[error("identity already exists: {0}")]
    IdentityExists(String),
    #[error("store corrupt: {0}")]
    Corrupt(String),
}

/// Persistent home of enrolled identities.
///
/// Calls are synchronous and carry no retry logic. Records come back raw;
/// validation happens when a [`GalleryIndex`](crate::GalleryIndex) is built.
pub trait GalleryStore: Send + Sync {
    /// Every record, in insertion order.
    fn get_all(&self) -> Result<Vec<RawIdentityRecord>, StoreError>;

    fn get(&self, id: &str) -> Result<Option<RawIdentityRecord>, StoreError>;

    /// Insert a new identity. Fails with `IdentityExists` for a taken id.
    fn put(&self, identity: &Identity) -> Result<(), StoreError>;

    /// Apply a metadata edit. Fails with `IdentityNotFound` for an unknown id.
    fn patch(&self, id: &str, patch: &IdentityPatch) -> Result<(), StoreError>;

    /// Remove an identity, returning the record as it was.
    fn delete(&self, id: &str) -> Result<RawIdentityRecord, StoreError>;
}

/// In-process gallery store.
#[derive(Debug, Default)]
pub struct MemoryGalleryStore {
    records: Mutex<Vec<RawIdentityRecord>>,
}

impl MemoryGalleryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with raw records, malformed ones included.
    pub fn with_records(records: Vec<RawIdentityRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<RawIdentityRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("gallery lock poisoned".into()))
    }
}

impl GalleryStore for MemoryGalleryStore {
    fn get_all(&self) -> Result<Vec<RawIdentityRecord>, StoreError> {
        Ok(self.lock()?.clone())
    }

    fn get(&self, id: &str) -> Result<Option<RawIdentityRecord>, StoreError> {
        Ok(self.lock()?.iter().find(|r| r.id == id).cloned())
    }

    fn put(&self, identity: &Identity) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        if records.iter().any(|r| r.id == identity.id) {
            return Err(StoreError::IdentityExists(identity.id.clone()));
        }
        records.push(identity.to_raw());
        Ok(())
    }

    fn patch(&self, id: &str, patch: &IdentityPatch) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::IdentityNotFound(id.to_string()))?;
        patch.apply_to(record);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<RawIdentityRecord, StoreError> {
        let mut records = self.lock()?;
        let pos = records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| StoreError::IdentityNotFound(id.to_string()))?;
        Ok(records.remove(pos))
    }
}
