//! # tessera-txn
//!
//! Transaction bookkeeping for the Tessera cursor engine.
//!
//! - **Lock Ledger**: Per-transaction record of table and row locks with
//!   shared (S), exclusive (X) and intention (IS, IX) modes. Conflicting
//!   requests block on a condition variable up to the configured timeout.
//!
//! - **Deadlock Detection**: A wait-for graph is checked every time a
//!   request has to wait; one transaction in a cycle is chosen as victim.
//!
//! - **Deferred Cleanup**: Post-commit work (space reclamation and the
//!   locks that protect it) runs on a background worker. Callers that need
//!   an accurate lock count join it with `wait_for_deferred_cleanup()`.
//!
//! - **Transaction Lifecycle**: Begin, commit and rollback wired to the
//!   ledger's release rules.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 TransactionManager                   │
//! │                         │                            │
//! │                         ▼                            │
//! │   ┌──────────────────────────────────────────────┐   │
//! │   │                 LockLedger                   │   │
//! │   │   ┌──────────────┐     ┌─────────────────┐   │   │
//! │   │   │ WaitForGraph │     │  CleanupWorker  │   │   │
//! │   │   └──────────────┘     └─────────────────┘   │   │
//! │   └──────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use tessera_common::config::EngineConfig;
//! use tessera_common::types::{RowId, TableId};
//! use tessera_txn::{LockMode, ResourceId, TransactionManager};
//!
//! let tm = TransactionManager::new(&EngineConfig::for_testing()).unwrap();
//! let txn = tm.begin();
//!
//! let row = ResourceId::row(TableId::new(1), RowId::new(7));
//! tm.ledger().acquire(txn, row, LockMode::Exclusive).unwrap();
//! assert_eq!(tm.ledger().count(txn), 1);
//!
//! tm.commit(txn).unwrap();
//! tm.wait_for_deferred_cleanup();
//! assert_eq!(tm.ledger().count(txn), 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error types.
pub mod error;

/// Lock ledger.
///
/// This module provides:
/// - [`lock::LockLedger`]: Records and arbitrates all locks
/// - [`lock::LockMode`]: Shared, exclusive and intention modes
/// - [`lock::ResourceId`]: Identifies lockable tables and rows
pub mod lock;

/// Deadlock detection.
///
/// This module provides:
/// - [`deadlock::WaitForGraph`]: Tracks which transaction waits for which
/// - [`deadlock::DeadlockInfo`]: The cycle and chosen victim
pub mod deadlock;

/// Background post-commit work.
pub mod cleanup;

/// Transaction lifecycle management.
pub mod manager;

pub use cleanup::{CleanupJob, CleanupStats, CleanupWorker};
pub use deadlock::{DeadlockInfo, WaitForGraph, WfgNode};
pub use error::{TxnError, TxnResult};
pub use lock::{
    LockLedger, LockMode, LockResult, LockStats, ReleasePolicy, ReleaseTrigger, ResourceId,
};
pub use manager::{TransactionManager, TransactionState, TransactionStats};
