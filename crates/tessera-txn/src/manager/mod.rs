//! Transaction manager for coordinating transaction lifecycle.
//!
//! ```text
//! ┌───────┐    begin()    ┌────────┐
//! │ Start │──────────────▶│ Active │
//! └───────┘               └────────┘
//!                              │
//!                    ┌────────┴────────┐
//!                    │                 │
//!               commit()          rollback()
//!                    │                 │
//!                    ▼                 ▼
//!             ┌───────────┐     ┌────────────┐
//!             │ Committed │     │ RolledBack │
//!             └───────────┘     └────────────┘
//! ```
//!
//! Commit releases the transaction's on-commit locks synchronously and then
//! schedules its post-commit work; the deferred locks go away only when the
//! cleanup worker has run. Rollback releases everything and drops the
//! post-commit work.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tessera_common::config::EngineConfig;
use tessera_common::types::TxnId;

use crate::error::{TxnError, TxnResult};
use crate::lock::{LockLedger, ReleaseTrigger};

/// The state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

impl TransactionState {
    /// Returns true if the transaction can perform operations.
    pub fn is_active(&self) -> bool {
        *self == TransactionState::Active
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "Active"),
            TransactionState::Committed => write!(f, "Committed"),
            TransactionState::RolledBack => write!(f, "RolledBack"),
        }
    }
}

#[derive(Debug)]
struct Transaction {
    state: TransactionState,
    started_at: Instant,
}

/// Statistics about the transaction manager.
#[derive(Debug, Default)]
pub struct TransactionStats {
    /// Total transactions started.
    pub started: AtomicU64,
    /// Total transactions committed.
    pub committed: AtomicU64,
    /// Total transactions rolled back.
    pub rolled_back: AtomicU64,
}

/// Coordinates transaction lifecycle against the lock ledger.
pub struct TransactionManager {
    ledger: Arc<LockLedger>,
    transactions: RwLock<HashMap<TxnId, Transaction>>,
    next_txn_id: AtomicU64,
    stats: TransactionStats,
}

impl TransactionManager {
    /// Creates a transaction manager with its own ledger.
    pub fn new(config: &EngineConfig) -> TxnResult<Self> {
        let ledger = LockLedger::new(config.ledger.clone(), &config.cleanup)?;
        Ok(Self::with_ledger(Arc::new(ledger)))
    }

    /// Creates a transaction manager over an existing ledger.
    pub fn with_ledger(ledger: Arc<LockLedger>) -> Self {
        Self {
            ledger,
            transactions: RwLock::new(HashMap::new()),
            next_txn_id: AtomicU64::new(TxnId::MIN.as_u64()),
            stats: TransactionStats::default(),
        }
    }

    /// Begins a new transaction.
    pub fn begin(&self) -> TxnId {
        let txn_id = TxnId::new(self.next_txn_id.fetch_add(1, AtomicOrdering::SeqCst));
        self.transactions.write().insert(
            txn_id,
            Transaction {
                state: TransactionState::Active,
                started_at: Instant::now(),
            },
        );
        self.ledger.register_txn(txn_id);
        self.stats.started.fetch_add(1, AtomicOrdering::Relaxed);
        tracing::debug!("Began {:?}", txn_id);
        txn_id
    }

    /// Commits a transaction.
    ///
    /// Returns once on-commit locks are released and post-commit work is
    /// queued; it does not wait for that work.
    pub fn commit(&self, txn_id: TxnId) -> TxnResult<()> {
        self.finish(txn_id, TransactionState::Committed)?;
        self.ledger.release_all(txn_id, ReleaseTrigger::Commit);
        self.ledger.schedule_deferred_cleanup(txn_id);
        self.stats.committed.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
    }

    /// Rolls back a transaction, releasing all its locks.
    pub fn rollback(&self, txn_id: TxnId) -> TxnResult<()> {
        self.finish(txn_id, TransactionState::RolledBack)?;
        self.ledger.release_all(txn_id, ReleaseTrigger::Rollback);
        self.stats.rolled_back.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
    }

    fn finish(&self, txn_id: TxnId, next: TransactionState) -> TxnResult<()> {
        let mut transactions = self.transactions.write();
        let txn = transactions
            .get_mut(&txn_id)
            .filter(|t| t.state.is_active())
            .ok_or(TxnError::NotFound(txn_id))?;
        txn.state = next;
        tracing::debug!("{:?} {} after {:?}", txn_id, next, txn.started_at.elapsed());
        Ok(())
    }

    /// Fails unless the transaction is active.
    pub fn ensure_active(&self, txn_id: TxnId) -> TxnResult<()> {
        let active = self
            .transactions
            .read()
            .get(&txn_id)
            .is_some_and(|t| t.state.is_active());
        if active {
            Ok(())
        } else {
            Err(TxnError::NotFound(txn_id))
        }
    }

    /// Returns the state of a transaction this manager has begun.
    ///
    /// Finished transactions keep reporting `Committed` or `RolledBack`.
    pub fn state(&self, txn_id: TxnId) -> Option<TransactionState> {
        self.transactions.read().get(&txn_id).map(|t| t.state)
    }

    /// Returns how long an active transaction has been running.
    pub fn duration(&self, txn_id: TxnId) -> Option<Duration> {
        self.transactions
            .read()
            .get(&txn_id)
            .filter(|t| t.state.is_active())
            .map(|t| t.started_at.elapsed())
    }

    /// Number of active transactions.
    pub fn active_count(&self) -> usize {
        self.transactions
            .read()
            .values()
            .filter(|t| t.state.is_active())
            .count()
    }

    /// Blocks until all scheduled post-commit work has finished.
    pub fn wait_for_deferred_cleanup(&self) {
        self.ledger.wait_for_deferred_cleanup();
    }

    /// Returns the lock ledger.
    pub fn ledger(&self) -> &Arc<LockLedger> {
        &self.ledger
    }

    /// Returns statistics.
    pub fn stats(&self) -> &TransactionStats {
        &self.stats
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.active_count())
            .field("ledger", &self.ledger)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockMode, ResourceId};
    use tessera_common::types::{RowId, TableId};

    fn manager() -> TransactionManager {
        TransactionManager::new(&EngineConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_begin_commit() {
        let tm = manager();
        let txn = tm.begin();
        assert_eq!(tm.state(txn), Some(TransactionState::Active));
        assert_eq!(tm.active_count(), 1);

        tm.commit(txn).unwrap();
        assert_eq!(tm.state(txn), Some(TransactionState::Committed));
        assert_eq!(tm.active_count(), 0);
        assert!(tm.duration(txn).is_none());
        assert_eq!(tm.stats().committed.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn test_unknown_txn_has_no_state() {
        let tm = manager();
        assert_eq!(tm.state(TxnId::new(999)), None);
        assert!(matches!(
            tm.rollback(TxnId::new(999)),
            Err(TxnError::NotFound(_))
        ));
    }

    #[test]
    fn test_ids_are_monotonic() {
        let tm = manager();
        let a = tm.begin();
        let b = tm.begin();
        assert!(b > a);
        assert!(a.is_valid());
    }

    #[test]
    fn test_double_commit_fails() {
        let tm = manager();
        let txn = tm.begin();
        tm.commit(txn).unwrap();
        assert!(matches!(tm.commit(txn), Err(TxnError::NotFound(_))));
        assert!(tm.ensure_active(txn).is_err());
    }

    #[test]
    fn test_commit_then_barrier_clears_locks() {
        let tm = manager();
        let txn = tm.begin();
        let table = TableId::new(1);
        tm.ledger()
            .acquire(txn, ResourceId::table(table), LockMode::IntentionExclusive)
            .unwrap();
        tm.ledger()
            .acquire_deferred(txn, ResourceId::row(table, RowId::new(1)), LockMode::Exclusive)
            .unwrap();

        tm.commit(txn).unwrap();
        tm.wait_for_deferred_cleanup();
        assert_eq!(tm.ledger().count(txn), 0);
    }

    #[test]
    fn test_rollback_releases_everything() {
        let tm = manager();
        let txn = tm.begin();
        tm.ledger()
            .acquire_deferred(
                txn,
                ResourceId::row(TableId::new(1), RowId::new(1)),
                LockMode::Exclusive,
            )
            .unwrap();

        tm.rollback(txn).unwrap();
        assert_eq!(tm.state(txn), Some(TransactionState::RolledBack));
        assert!(tm.ensure_active(txn).is_err());
        assert!(matches!(tm.commit(txn), Err(TxnError::NotFound(_))));
        assert_eq!(tm.ledger().count(txn), 0);
        assert_eq!(tm.stats().rolled_back.load(AtomicOrdering::Relaxed), 1);
    }
}
