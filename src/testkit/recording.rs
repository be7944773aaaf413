//! Recording implementations of the notifier, interceptor and transaction ports.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::port::interceptor::{InterceptorChain, InterceptorKind};
use crate::port::notifier::{Notifier, PersistenceEvent};
use crate::port::transaction::{Transaction, TransactionManager};

/// Thread-safe event collector for notification assertions.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<PersistenceEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PersistenceEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Availability flips in the order they were raised.
    pub fn availability_changes(&self) -> Vec<bool> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                PersistenceEvent::AvailabilityChanged { available } => Some(*available),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: PersistenceEvent) {
        self.events.lock().push(event);
    }
}

/// Interceptor chain holding a set of kinds; records removals.
#[derive(Clone)]
pub struct RecordingInterceptorChain {
    present: Arc<Mutex<HashSet<InterceptorKind>>>,
    removed: Arc<Mutex<Vec<InterceptorKind>>>,
}

impl RecordingInterceptorChain {
    /// A chain with loader and non-transactional writer installed.
    pub fn new() -> Self {
        Self::with(&[InterceptorKind::Loader, InterceptorKind::Writer])
    }

    pub fn with(kinds: &[InterceptorKind]) -> Self {
        Self {
            present: Arc::new(Mutex::new(kinds.iter().copied().collect())),
            removed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn removed(&self) -> Vec<InterceptorKind> {
        self.removed.lock().clone()
    }
}

impl Default for RecordingInterceptorChain {
    fn default() -> Self {
        Self::new()
    }
}

impl InterceptorChain for RecordingInterceptorChain {
    fn contains(&self, kind: InterceptorKind) -> bool {
        self.present.lock().contains(&kind)
    }

    fn remove(&self, kind: InterceptorKind) -> bool {
        let removed = self.present.lock().remove(&kind);
        if removed {
            self.removed.lock().push(kind);
        }
        removed
    }
}

/// Transaction operations as observed by [`RecordingTransactionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOp {
    Suspend,
    Resume(Transaction),
    Begin,
    Commit,
    Rollback,
}

/// Transaction manager that logs every call and can hold an ambient transaction.
#[derive(Clone, Default)]
pub struct RecordingTransactionManager {
    ambient: Arc<Mutex<Option<Transaction>>>,
    ops: Arc<Mutex<Vec<TxOp>>>,
}

impl RecordingTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an ambient transaction attached.
    pub fn with_ambient(transaction: Transaction) -> Self {
        let manager = Self::default();
        *manager.ambient.lock() = Some(transaction);
        manager
    }

    pub fn ops(&self) -> Vec<TxOp> {
        self.ops.lock().clone()
    }

    pub fn ambient(&self) -> Option<Transaction> {
        *self.ambient.lock()
    }
}

impl TransactionManager for RecordingTransactionManager {
    fn suspend(&self) -> Result<Option<Transaction>> {
        self.ops.lock().push(TxOp::Suspend);
        Ok(self.ambient.lock().take())
    }

    fn resume(&self, transaction: Transaction) -> Result<()> {
        self.ops.lock().push(TxOp::Resume(transaction));
        *self.ambient.lock() = Some(transaction);
        Ok(())
    }

    fn begin(&self) -> Result<()> {
        self.ops.lock().push(TxOp::Begin);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.ops.lock().push(TxOp::Commit);
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.ops.lock().push(TxOp::Rollback);
        Ok(())
    }
}
