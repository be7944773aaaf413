//! Minimal transaction hooks used while preloading into a transactional cache.

use std::fmt;

use uuid::Uuid;

use crate::error::Result;

/// Handle to a suspended transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transaction(Uuid);

impl Transaction {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Ambient transaction control for the calling task.
pub trait TransactionManager: Send + Sync {
    /// Detach the current transaction, if any.
    fn suspend(&self) -> Result<Option<Transaction>>;

    /// Re-attach a previously suspended transaction.
    fn resume(&self, transaction: Transaction) -> Result<()>;

    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;
}
