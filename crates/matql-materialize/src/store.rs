//! Destination collaborator: the platform's own relational store

use chrono::{DateTime, Utc};
use matql_ir::{Dialect, QueryDocument, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Where a materialized table came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub table_name: String,
    pub schema: String,
    pub source_identity: String,
    pub source_dialect: Dialect,
    pub fingerprint: String,
    pub row_count: u64,
    pub ir: QueryDocument,
    pub created_at: DateTime<Utc>,
}

pub trait DestinationStore {
    fn dialect(&self) -> Dialect;

    /// False for stores that need values embedded as SQL literals
    fn supports_binding(&self) -> bool;

    fn begin(&mut self) -> Result<(), StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;

    fn rollback(&mut self) -> Result<(), StoreError>;

    fn execute_ddl(&mut self, sql: &str) -> Result<(), StoreError>;

    /// Returns the number of affected rows
    fn execute_dml(&mut self, sql: &str, params: &[Value]) -> Result<u64, StoreError>;

    fn record_provenance(&mut self, record: &ProvenanceRecord) -> Result<(), StoreError>;
}

/// Open transaction on a store; rolled back on drop unless committed.
pub struct StoreTransaction<'a, D: DestinationStore + ?Sized> {
    store: &'a mut D,
    finished: bool,
}

impl<'a, D: DestinationStore + ?Sized> StoreTransaction<'a, D> {
    pub fn begin(store: &'a mut D) -> Result<Self, StoreError> {
        store.begin()?;
        Ok(Self { store, finished: false })
    }

    pub fn store(&mut self) -> &mut D {
        self.store
    }

    /// A failed commit leaves the transaction open, so drop rolls it back
    pub fn commit(mut self) -> Result<(), StoreError> {
        self.store.commit()?;
        self.finished = true;
        Ok(())
    }
}

impl<D: DestinationStore + ?Sized> Drop for StoreTransaction<'_, D> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.store.rollback() {
            warn!(error = %e, "rollback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CommitFailingStore {
        commits: usize,
        rollbacks: usize,
    }

    impl DestinationStore for CommitFailingStore {
        fn dialect(&self) -> Dialect {
            Dialect::DuckDb
        }

        fn supports_binding(&self) -> bool {
            true
        }

        fn begin(&mut self) -> Result<(), StoreError> {
            Ok(())
        }

        fn commit(&mut self) -> Result<(), StoreError> {
            self.commits += 1;
            Err(StoreError::new("could not serialize access"))
        }

        fn rollback(&mut self) -> Result<(), StoreError> {
            self.rollbacks += 1;
            Ok(())
        }

        fn execute_ddl(&mut self, _sql: &str) -> Result<(), StoreError> {
            Ok(())
        }

        fn execute_dml(&mut self, _sql: &str, _params: &[Value]) -> Result<u64, StoreError> {
            Ok(0)
        }

        fn record_provenance(&mut self, _record: &ProvenanceRecord) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_commit_rolls_back() {
        let mut store = CommitFailingStore::default();
        let tx = StoreTransaction::begin(&mut store).unwrap();
        assert!(tx.commit().is_err());
        assert_eq!((store.commits, store.rollbacks), (1, 1));
    }

    #[test]
    fn test_uncommitted_transaction_rolls_back_once() {
        let mut store = CommitFailingStore::default();
        {
            let mut tx = StoreTransaction::begin(&mut store).unwrap();
            tx.store().execute_ddl("CREATE TABLE t (x INTEGER)").unwrap();
        }
        assert_eq!((store.commits, store.rollbacks), (0, 1));
    }
}
