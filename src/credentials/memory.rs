//! In-memory record backend.
//!
//! Transactions work on a copy of the table and swap it in on success, so a
//! failed unit of work never leaves partial changes behind. Useful for tests
//! and for embedding without a database file.

use super::backend::{RecordBackend, RecordFilter, RecordTx};
use super::CredentialRecord;
use crate::error::StoreError;
use std::sync::Mutex;

/// Volatile record backend.
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<Vec<CredentialRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows across all users.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct MemoryTx<'a> {
    records: &'a mut Vec<CredentialRecord>,
}

impl RecordTx for MemoryTx<'_> {
    fn find_one(&mut self, filter: &RecordFilter<'_>) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.records.iter().find(|r| filter.matches(r)).cloned())
    }

    fn find_all(&mut self, filter: &RecordFilter<'_>) -> Result<Vec<CredentialRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    fn count(&mut self, filter: &RecordFilter<'_>) -> Result<u64, StoreError> {
        Ok(self.records.iter().filter(|r| filter.matches(r)).count() as u64)
    }

    fn insert(&mut self, record: &CredentialRecord) -> Result<(), StoreError> {
        let key = RecordFilter::identity(&record.user_id, &record.email);
        if self.records.iter().any(|r| key.matches(r) || r.id == record.id) {
            return Err(StoreError::Duplicate {
                user_id: record.user_id.clone(),
                email: record.email.clone(),
            });
        }

        self.records.push(record.clone());
        Ok(())
    }

    fn update(&mut self, record: &CredentialRecord) -> Result<(), StoreError> {
        let slot = self
            .records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| StoreError::MissingRecord(record.id.clone()))?;

        *slot = record.clone();
        Ok(())
    }

    fn delete_where(&mut self, filter: &RecordFilter<'_>) -> Result<u64, StoreError> {
        let before = self.records.len();
        self.records.retain(|r| !filter.matches(r));
        Ok((before - self.records.len()) as u64)
    }
}

impl RecordBackend for MemoryBackend {
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn RecordTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut committed = self.records.lock().map_err(|_| StoreError::LockPoisoned)?;

        let mut working = committed.clone();
        let result = f(&mut MemoryTx {
            records: &mut working,
        })?;

        *committed = working;
        Ok(result)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
