//! The lock ledger: per-transaction lock accounting.
//!
//! Supports:
//! - Table and row resources with shared (S), exclusive (X) and intention
//!   (IS, IX) modes
//! - Upgrades for a sole holder and no-op re-acquisition
//! - Blocking waits on a condition variable, bounded by the lock timeout
//! - Wait-for graph deadlock detection on every wait
//! - Release policies: locks released at commit, and locks that survive the
//!   commit until the deferred cleanup worker has run the transaction's
//!   post-commit jobs
//!
//! # Lock Compatibility Matrix
//!
//! ```text
//!          │ S  │ X  │ IS │ IX │
//! ─────────┼────┼────┼────┼────┤
//!     S    │ ✓  │ ✗  │ ✓  │ ✗  │
//!     X    │ ✗  │ ✗  │ ✗  │ ✗  │
//!     IS   │ ✓  │ ✗  │ ✓  │ ✓  │
//!     IX   │ ✗  │ ✗  │ ✓  │ ✓  │
//! ```
//!
//! # Counting After Commit
//!
//! `count(txn)` right after `release_all(txn, Commit)` still includes the
//! deferred locks. It drops to zero once `schedule_deferred_cleanup(txn)`
//! has been called and `wait_for_deferred_cleanup()` has returned.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tessera_common::config::{CleanupConfig, LedgerConfig};
use tessera_common::types::{RowId, TableId, TxnId};

use crate::cleanup::{CleanupJob, CleanupWorker};
use crate::deadlock::WaitForGraph;
use crate::error::{TxnError, TxnResult};

/// Lock mode for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared lock (read lock).
    Shared,
    /// Exclusive lock (write lock).
    Exclusive,
    /// Intention shared (table-level hint for row S locks).
    IntentionShared,
    /// Intention exclusive (table-level hint for row X locks).
    IntentionExclusive,
}

impl LockMode {
    /// Checks if this lock mode is compatible with another.
    pub fn is_compatible_with(&self, other: &LockMode) -> bool {
        use LockMode::*;
        matches!(
            (self, other),
            (Shared, Shared)
                | (Shared, IntentionShared)
                | (IntentionShared, Shared)
                | (IntentionShared, IntentionShared)
                | (IntentionShared, IntentionExclusive)
                | (IntentionExclusive, IntentionShared)
                | (IntentionExclusive, IntentionExclusive)
        )
    }

    /// Returns the weakest mode that implies both modes.
    pub fn stronger(self, other: LockMode) -> LockMode {
        use LockMode::*;
        match (self, other) {
            (Exclusive, _) | (_, Exclusive) => Exclusive,
            // S + IX has no single mode short of X.
            (Shared, IntentionExclusive) | (IntentionExclusive, Shared) => Exclusive,
            (Shared, _) | (_, Shared) => Shared,
            (IntentionExclusive, _) | (_, IntentionExclusive) => IntentionExclusive,
            (IntentionShared, IntentionShared) => IntentionShared,
        }
    }

    /// Returns true if holding `self` already grants `other`.
    pub fn covers(self, other: LockMode) -> bool {
        self.stronger(other) == self
    }

    /// Returns true for S and X (row-level) modes.
    pub fn is_row_mode(&self) -> bool {
        matches!(self, LockMode::Shared | LockMode::Exclusive)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "S"),
            LockMode::Exclusive => write!(f, "X"),
            LockMode::IntentionShared => write!(f, "IS"),
            LockMode::IntentionExclusive => write!(f, "IX"),
        }
    }
}

/// A lockable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceId {
    /// A whole table.
    Table(TableId),
    /// A single row.
    Row(TableId, RowId),
}

impl ResourceId {
    /// Creates a table resource ID.
    pub fn table(table_id: TableId) -> Self {
        ResourceId::Table(table_id)
    }

    /// Creates a row resource ID.
    pub fn row(table_id: TableId, row_id: RowId) -> Self {
        ResourceId::Row(table_id, row_id)
    }

    /// Returns the table this resource belongs to.
    pub fn table_id(&self) -> TableId {
        match self {
            ResourceId::Table(id) | ResourceId::Row(id, _) => *id,
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Table(id) => write!(f, "Table({})", id),
            ResourceId::Row(table, row) => write!(f, "Row({}, {})", table, row),
        }
    }
}

/// When a lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReleasePolicy {
    /// Released synchronously by `release_all` at commit or rollback.
    OnCommit,
    /// Survives commit; released by the deferred cleanup worker.
    Deferred,
}

/// What ended the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseTrigger {
    /// The transaction committed.
    Commit,
    /// The transaction rolled back.
    Rollback,
}

/// Outcome of a successful acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    /// A new lock was granted.
    Granted,
    /// An existing lock was strengthened.
    Upgraded,
    /// The transaction already held a covering lock.
    AlreadyHeld,
}

#[derive(Debug, Clone, Copy)]
struct HeldLock {
    mode: LockMode,
    policy: ReleasePolicy,
    /// Open read holds taken through `acquire_read_lock`.
    read_holds: u32,
}

/// Holders of one resource.
#[derive(Debug, Default)]
struct LockInfo {
    holders: HashMap<TxnId, HeldLock>,
}

impl LockInfo {
    /// Returns the transactions that prevent `txn_id` from holding `mode`.
    fn blockers(&self, txn_id: TxnId, mode: LockMode) -> Vec<TxnId> {
        let target = match self.holders.get(&txn_id) {
            Some(held) if held.mode.covers(mode) => return Vec::new(),
            Some(held) => held.mode.stronger(mode),
            None => mode,
        };
        let mut blockers: Vec<TxnId> = self
            .holders
            .iter()
            .filter(|(holder, held)| **holder != txn_id && !target.is_compatible_with(&held.mode))
            .map(|(holder, _)| *holder)
            .collect();
        blockers.sort();
        blockers
    }

    fn grant(&mut self, txn_id: TxnId, mode: LockMode, policy: ReleasePolicy, read_hold: bool) -> LockResult {
        let holds = u32::from(read_hold);
        match self.holders.get_mut(&txn_id) {
            Some(held) => {
                held.policy = held.policy.max(policy);
                held.read_holds += holds;
                if held.mode.covers(mode) {
                    LockResult::AlreadyHeld
                } else {
                    held.mode = held.mode.stronger(mode);
                    LockResult::Upgraded
                }
            }
            None => {
                self.holders.insert(
                    txn_id,
                    HeldLock {
                        mode,
                        policy,
                        read_holds: holds,
                    },
                );
                LockResult::Granted
            }
        }
    }
}

/// Statistics about the lock ledger.
#[derive(Debug, Default)]
pub struct LockStats {
    /// Total lock acquisitions.
    pub acquisitions: AtomicU64,
    /// Total lock releases.
    pub releases: AtomicU64,
    /// Total requests that had to wait.
    pub waits: AtomicU64,
    /// Total deadlocks detected.
    pub deadlocks: AtomicU64,
    /// Total lock upgrades.
    pub upgrades: AtomicU64,
    /// Total timeouts.
    pub timeouts: AtomicU64,
}

impl LockStats {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, AtomicOrdering::Relaxed);
    }
}

#[derive(Default)]
struct LedgerState {
    locks: HashMap<ResourceId, LockInfo>,
    txn_locks: HashMap<TxnId, HashSet<ResourceId>>,
    graph: WaitForGraph,
    /// Transactions chosen as deadlock victims by another waiter, with the
    /// cycle that was found.
    victims: HashMap<TxnId, Vec<TxnId>>,
    /// Post-commit jobs registered but not yet scheduled.
    deferred_work: HashMap<TxnId, Vec<CleanupJob>>,
}

impl LedgerState {
    fn try_grant(
        &mut self,
        txn_id: TxnId,
        resource: ResourceId,
        mode: LockMode,
        policy: ReleasePolicy,
        read_hold: bool,
    ) -> Result<LockResult, Vec<TxnId>> {
        let info = self.locks.entry(resource).or_default();
        let blockers = info.blockers(txn_id, mode);
        if !blockers.is_empty() {
            return Err(blockers);
        }
        let result = info.grant(txn_id, mode, policy, read_hold);
        self.txn_locks.entry(txn_id).or_default().insert(resource);
        Ok(result)
    }

    /// Releases the transaction's locks. With `keep_deferred`, deferred
    /// locks stay in place.
    fn release(&mut self, txn_id: TxnId, keep_deferred: bool) -> usize {
        let Some(resources) = self.txn_locks.remove(&txn_id) else {
            return 0;
        };

        let mut kept = HashSet::new();
        let mut released = 0;
        for resource in resources {
            let Some(info) = self.locks.get_mut(&resource) else {
                continue;
            };
            let deferred = info
                .holders
                .get(&txn_id)
                .is_some_and(|held| held.policy == ReleasePolicy::Deferred);
            if keep_deferred && deferred {
                kept.insert(resource);
                continue;
            }
            if info.holders.remove(&txn_id).is_some() {
                released += 1;
            }
            if info.holders.is_empty() {
                self.locks.remove(&resource);
            }
        }

        if !kept.is_empty() {
            self.txn_locks.insert(txn_id, kept);
        }
        released
    }
}

struct LedgerShared {
    state: Mutex<LedgerState>,
    /// Signalled whenever locks are released or a victim is chosen.
    changed: Condvar,
    config: LedgerConfig,
    stats: LockStats,
}

impl LedgerShared {
    fn release(&self, txn_id: TxnId, keep_deferred: bool) -> usize {
        let released = {
            let mut state = self.state.lock();
            state.release(txn_id, keep_deferred)
        };
        if released > 0 {
            LockStats::bump(&self.stats.releases, released as u64);
            self.changed.notify_all();
        }
        released
    }
}

/// Process-wide record of which transaction holds which lock.
pub struct LockLedger {
    shared: Arc<LedgerShared>,
    cleanup: CleanupWorker,
}

impl LockLedger {
    /// Creates a ledger and starts its cleanup worker.
    pub fn new(config: LedgerConfig, cleanup: &CleanupConfig) -> TxnResult<Self> {
        Ok(Self {
            shared: Arc::new(LedgerShared {
                state: Mutex::new(LedgerState::default()),
                changed: Condvar::new(),
                config,
                stats: LockStats::default(),
            }),
            cleanup: CleanupWorker::start(cleanup)?,
        })
    }

    /// Registers a transaction with the deadlock detector.
    pub fn register_txn(&self, txn_id: TxnId) {
        self.shared.state.lock().graph.add_txn(txn_id);
    }

    /// Acquires a lock released at commit, waiting up to the configured timeout.
    pub fn acquire(
        &self,
        txn_id: TxnId,
        resource: ResourceId,
        mode: LockMode,
    ) -> TxnResult<LockResult> {
        self.acquire_with(
            txn_id,
            resource,
            mode,
            ReleasePolicy::OnCommit,
            self.shared.config.lock_timeout(),
        )
    }

    /// Acquires a lock that survives commit until deferred cleanup runs.
    pub fn acquire_deferred(
        &self,
        txn_id: TxnId,
        resource: ResourceId,
        mode: LockMode,
    ) -> TxnResult<LockResult> {
        self.acquire_with(
            txn_id,
            resource,
            mode,
            ReleasePolicy::Deferred,
            self.shared.config.lock_timeout(),
        )
    }

    /// Acquires a shared lock on behalf of one reader of the transaction.
    ///
    /// Several readers of one transaction may hold the same row; each
    /// acquisition must be paired with a [`release_read_lock`] and the lock
    /// goes away only when the last reader releases it.
    ///
    /// [`release_read_lock`]: LockLedger::release_read_lock
    pub fn acquire_read_lock(&self, txn_id: TxnId, resource: ResourceId) -> TxnResult<LockResult> {
        self.acquire_inner(
            txn_id,
            resource,
            LockMode::Shared,
            ReleasePolicy::OnCommit,
            self.shared.config.lock_timeout(),
            true,
        )
    }

    /// Acquires a lock with an explicit policy and timeout.
    pub fn acquire_with(
        &self,
        txn_id: TxnId,
        resource: ResourceId,
        mode: LockMode,
        policy: ReleasePolicy,
        timeout: Duration,
    ) -> TxnResult<LockResult> {
        self.acquire_inner(txn_id, resource, mode, policy, timeout, false)
    }

    fn acquire_inner(
        &self,
        txn_id: TxnId,
        resource: ResourceId,
        mode: LockMode,
        policy: ReleasePolicy,
        timeout: Duration,
        read_hold: bool,
    ) -> TxnResult<LockResult> {
        let shared = &*self.shared;
        let start = Instant::now();
        let mut waited = false;
        let mut state = shared.state.lock();

        loop {
            if let Some(cycle) = state.victims.remove(&txn_id) {
                state.graph.clear_waits(txn_id);
                LockStats::bump(&shared.stats.deadlocks, 1);
                tracing::warn!(
                    "{:?} chosen as deadlock victim while waiting for {} (cycle {:?})",
                    txn_id,
                    resource,
                    cycle
                );
                return Err(TxnError::Deadlock { txn_id, cycle });
            }

            let blockers = match state.try_grant(txn_id, resource, mode, policy, read_hold) {
                Ok(result) => {
                    if waited {
                        state.graph.clear_waits(txn_id);
                    }
                    match result {
                        LockResult::Granted => LockStats::bump(&shared.stats.acquisitions, 1),
                        LockResult::Upgraded => LockStats::bump(&shared.stats.upgrades, 1),
                        LockResult::AlreadyHeld => {}
                    }
                    tracing::debug!("{:?} granted {} on {} ({:?})", txn_id, mode, resource, result);
                    return Ok(result);
                }
                Err(blockers) => blockers,
            };

            if !waited {
                waited = true;
                LockStats::bump(&shared.stats.waits, 1);
                tracing::debug!("{:?} waiting for {} on {}, held by {:?}", txn_id, mode, resource, blockers);
            }

            let held = state.txn_locks.get(&txn_id).map_or(0, HashSet::len);
            state.graph.set_waits(txn_id, &blockers, held);

            if shared.config.deadlock_detection {
                if let Some(info) = state.graph.detect_deadlock(txn_id) {
                    if info.victim == txn_id {
                        state.graph.clear_waits(txn_id);
                        LockStats::bump(&shared.stats.deadlocks, 1);
                        tracing::warn!("Deadlock detected, {:?} is the victim (cycle {:?})", txn_id, info.cycle);
                        return Err(TxnError::Deadlock {
                            txn_id,
                            cycle: info.cycle,
                        });
                    }
                    if !state.victims.contains_key(&info.victim) {
                        state.victims.insert(info.victim, info.cycle.clone());
                        tracing::debug!("Deadlock detected by {:?}, victim is {:?}", txn_id, info.victim);
                        shared.changed.notify_all();
                    }
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                state.graph.clear_waits(txn_id);
                LockStats::bump(&shared.stats.timeouts, 1);
                tracing::warn!("{:?} timed out after {:?} waiting for {} on {}", txn_id, elapsed, mode, resource);
                return Err(TxnError::LockTimeout {
                    txn_id,
                    resource: resource.to_string(),
                    waited: elapsed,
                });
            }

            let slice = (timeout - elapsed).min(shared.config.deadlock_check_interval());
            shared.changed.wait_for(&mut state, slice);
        }
    }

    /// Releases the transaction's locks.
    ///
    /// On commit, deferred locks stay until the cleanup worker releases them.
    /// On rollback everything is released and pending post-commit jobs are
    /// discarded. Returns the number of locks released.
    pub fn release_all(&self, txn_id: TxnId, trigger: ReleaseTrigger) -> usize {
        let keep_deferred = trigger == ReleaseTrigger::Commit;
        {
            let mut state = self.shared.state.lock();
            state.graph.remove_txn(txn_id);
            state.victims.remove(&txn_id);
            if trigger == ReleaseTrigger::Rollback {
                if let Some(jobs) = state.deferred_work.remove(&txn_id) {
                    tracing::debug!("Discarding {} post-commit jobs of {:?}", jobs.len(), txn_id);
                }
            }
        }
        let released = self.shared.release(txn_id, keep_deferred);
        tracing::debug!("{:?} released {} locks on {:?}", txn_id, released, trigger);
        released
    }

    /// Releases a shared lock taken for reading before the transaction ends.
    ///
    /// Drops one read hold; while other readers of the transaction still
    /// hold the row the lock stays. Only a plain S lock with the commit
    /// policy is released; a lock that was upgraded or marked deferred
    /// stays. Returns true if released.
    pub fn release_read_lock(&self, txn_id: TxnId, resource: ResourceId) -> bool {
        let released = {
            let mut state = self.shared.state.lock();
            let Some(info) = state.locks.get_mut(&resource) else {
                return false;
            };
            let Some(held) = info.holders.get_mut(&txn_id) else {
                return false;
            };
            if held.read_holds > 1 {
                held.read_holds -= 1;
                return false;
            }
            held.read_holds = 0;
            if held.mode != LockMode::Shared || held.policy != ReleasePolicy::OnCommit {
                return false;
            }
            info.holders.remove(&txn_id);
            if info.holders.is_empty() {
                state.locks.remove(&resource);
            }
            if let Some(held) = state.txn_locks.get_mut(&txn_id) {
                held.remove(&resource);
            }
            true
        };
        if released {
            LockStats::bump(&self.shared.stats.releases, 1);
            self.shared.changed.notify_all();
            tracing::trace!("{:?} released read lock on {}", txn_id, resource);
        }
        released
    }

    /// Registers post-commit work for a transaction.
    pub fn defer_work(&self, txn_id: TxnId, job: CleanupJob) {
        self.shared
            .state
            .lock()
            .deferred_work
            .entry(txn_id)
            .or_default()
            .push(job);
    }

    /// Hands the transaction's post-commit jobs and deferred locks to the
    /// cleanup worker.
    pub fn schedule_deferred_cleanup(&self, txn_id: TxnId) {
        let (jobs, holds_locks) = {
            let mut state = self.shared.state.lock();
            let jobs = state.deferred_work.remove(&txn_id).unwrap_or_default();
            let holds_locks = state.txn_locks.get(&txn_id).is_some_and(|s| !s.is_empty());
            (jobs, holds_locks)
        };
        if jobs.is_empty() && !holds_locks {
            return;
        }

        tracing::debug!("Scheduling {} post-commit jobs for {:?}", jobs.len(), txn_id);
        let shared = Arc::clone(&self.shared);
        self.cleanup.submit(
            txn_id,
            Box::new(move || {
                for job in jobs {
                    job();
                }
                let released = shared.release(txn_id, false);
                tracing::debug!("Deferred cleanup of {:?} released {} locks", txn_id, released);
            }),
        );
    }

    /// Blocks until all cleanup scheduled before this call has finished.
    pub fn wait_for_deferred_cleanup(&self) {
        self.cleanup.wait_for_idle();
    }

    /// Number of locks the transaction holds.
    pub fn count(&self, txn_id: TxnId) -> usize {
        self.shared
            .state
            .lock()
            .txn_locks
            .get(&txn_id)
            .map_or(0, HashSet::len)
    }

    /// Total number of held locks across all transactions.
    pub fn lock_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .locks
            .values()
            .map(|info| info.holders.len())
            .sum()
    }

    /// Number of post-commit jobs registered for the transaction and not yet
    /// scheduled.
    pub fn deferred_job_count(&self, txn_id: TxnId) -> usize {
        self.shared
            .state
            .lock()
            .deferred_work
            .get(&txn_id)
            .map_or(0, Vec::len)
    }

    /// Returns the mode the transaction holds on a resource.
    pub fn held_mode(&self, txn_id: TxnId, resource: &ResourceId) -> Option<LockMode> {
        self.shared
            .state
            .lock()
            .locks
            .get(resource)
            .and_then(|info| info.holders.get(&txn_id))
            .map(|held| held.mode)
    }

    /// Returns the resources held by a transaction, sorted.
    pub fn txn_locks(&self, txn_id: TxnId) -> Vec<ResourceId> {
        let mut locks: Vec<ResourceId> = self
            .shared
            .state
            .lock()
            .txn_locks
            .get(&txn_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        locks.sort();
        locks
    }

    /// Returns ledger statistics.
    pub fn stats(&self) -> &LockStats {
        &self.shared.stats
    }

    /// Returns the ledger configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.shared.config
    }
}

impl fmt::Debug for LockLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockLedger")
            .field("lock_count", &self.lock_count())
            .field("cleanup", &self.cleanup)
            .finish()
    }
}
