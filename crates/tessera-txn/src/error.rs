//! Error types for transaction and lock operations.

use std::time::Duration;

use tessera_common::types::TxnId;
use tessera_common::TesseraError;
use thiserror::Error;

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TxnError>;

/// Errors raised by the lock ledger and transaction manager.
#[derive(Debug, Error)]
pub enum TxnError {
    /// Transaction is unknown or already ended.
    #[error("transaction {0} not found")]
    NotFound(TxnId),

    /// A lock could not be granted within the timeout.
    #[error("transaction {txn_id} timed out after {waited:?} waiting for {resource}")]
    LockTimeout {
        /// The waiting transaction.
        txn_id: TxnId,
        /// The contended resource.
        resource: String,
        /// Time spent waiting.
        waited: Duration,
    },

    /// The transaction was chosen as a deadlock victim.
    #[error("deadlock detected, transaction {txn_id} chosen as victim (cycle: {cycle:?})")]
    Deadlock {
        /// The victim.
        txn_id: TxnId,
        /// Transactions in the wait-for cycle.
        cycle: Vec<TxnId>,
    },

    /// The cleanup worker could not be started.
    #[error("cleanup worker error: {0}")]
    Worker(String),
}

impl TxnError {
    /// Returns true if the transaction may retry after rolling back.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TxnError::LockTimeout { .. } | TxnError::Deadlock { .. })
    }
}

impl From<TxnError> for TesseraError {
    fn from(err: TxnError) -> Self {
        match err {
            TxnError::NotFound(txn_id) => TesseraError::TransactionNotFound { txn_id },
            TxnError::LockTimeout {
                txn_id,
                resource,
                waited,
            } => TesseraError::LockTimeout {
                txn_id,
                resource,
                waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            },
            TxnError::Deadlock { txn_id, .. } => TesseraError::Deadlock { txn_id },
            TxnError::Worker(message) => TesseraError::Internal { message },
        }
    }
}
