//! Row-store abstraction behind [`CredentialStore`](super::CredentialStore).
//!
//! A backend only has to provide filtered reads and writes inside a
//! transaction it demarcates itself. The credential logic never sees the
//! transaction manager: it hands a closure to [`RecordBackend::transaction`]
//! and the backend commits on `Ok` and rolls back on `Err`.

use super::CredentialRecord;
use crate::error::StoreError;

/// Selects records by owner, optionally narrowed to one identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordFilter<'a> {
    pub user_id: &'a str,
    pub email: Option<&'a str>,
}

impl<'a> RecordFilter<'a> {
    /// Matches the single record for (user, email).
    pub fn identity(user_id: &'a str, email: &'a str) -> Self {
        Self {
            user_id,
            email: Some(email),
        }
    }

    /// Matches every record owned by `user_id`.
    pub fn user(user_id: &'a str) -> Self {
        Self {
            user_id,
            email: None,
        }
    }

    pub fn matches(&self, record: &CredentialRecord) -> bool {
        record.user_id == self.user_id && self.email.map_or(true, |e| record.email == e)
    }
}

/// Operations available inside a single transaction.
pub trait RecordTx {
    fn find_one(&mut self, filter: &RecordFilter<'_>) -> Result<Option<CredentialRecord>, StoreError>;

    /// Matching records in insertion order.
    fn find_all(&mut self, filter: &RecordFilter<'_>) -> Result<Vec<CredentialRecord>, StoreError>;

    fn count(&mut self, filter: &RecordFilter<'_>) -> Result<u64, StoreError>;

    /// Fails with [`StoreError::Duplicate`] if (user, email) is taken.
    fn insert(&mut self, record: &CredentialRecord) -> Result<(), StoreError>;

    /// Rewrites the row with `record.id`.
    fn update(&mut self, record: &CredentialRecord) -> Result<(), StoreError>;

    /// Returns the number of rows removed.
    fn delete_where(&mut self, filter: &RecordFilter<'_>) -> Result<u64, StoreError>;
}

/// A transactional store of [`CredentialRecord`] rows.
pub trait RecordBackend: Send + Sync {
    /// Runs `f` as one unit of work.
    ///
    /// Commits if `f` returns `Ok`; any `Err` (from `f` or from the commit)
    /// leaves the store exactly as it was.
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn RecordTx) -> Result<T, E>,
        E: From<StoreError>;

    /// Runs a read-only unit of work. Backends may use a cheaper lock.
    fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn RecordTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.transaction(f)
    }

    /// Name of this backend, for logs.
    fn name(&self) -> &str {
        "unknown"
    }
}

impl<B: RecordBackend> RecordBackend for std::sync::Arc<B> {
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn RecordTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        (**self).transaction(f)
    }

    fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn RecordTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        (**self).read(f)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
