//! In-memory credential store for tests and local development.

use super::{CredentialRecord, CredentialStore};
use anyhow::Result;
use dashmap::DashMap;

/// Credential store backed by a concurrent map. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: DashMap<String, CredentialRecord>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn upsert(&self, record: &CredentialRecord) -> Result<()> {
        self.records
            .insert(record.principal_id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, principal_id: &str) -> Result<Option<CredentialRecord>> {
        Ok(self.records.get(principal_id).map(|entry| entry.clone()))
    }

    fn delete(&self, principal_id: &str) -> Result<bool> {
        Ok(self.records.remove(principal_id).is_some())
    }
}
