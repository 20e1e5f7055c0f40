//! Engine error types.
//!
//! Every error carries a stable [`ErrorCode`] whose SQLSTATE string lets
//! callers branch on the failure kind without matching on message text.

use std::fmt;
use thiserror::Error;

use crate::types::{RowId, TxnId};

/// Error codes for categorizing errors.
///
/// These codes are stable across versions; [`ErrorCode::sql_state`] maps each
/// one to the five-character state reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Internal error (bug).
    Internal = 0x0001,
    /// Operation not supported.
    NotSupported = 0x0002,
    /// Invalid argument provided.
    InvalidArgument = 0x0003,
    /// Invalid configuration value.
    InvalidConfig = 0x0004,

    // I/O errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,

    // Cursor errors (0x0200 - 0x02FF)
    /// The result set is closed.
    ResultSetClosed = 0x0200,
    /// The owning statement is closed.
    StatementClosed = 0x0201,
    /// Mutation attempted on a read-only result set.
    ResultSetNotUpdatable = 0x0202,
    /// No current row (before first, after last, or on a deleted hole).
    NoCurrentRow = 0x0203,
    /// Scroll operation on a forward-only cursor.
    NotOnForwardOnlyCursor = 0x0204,
    /// Column index out of range.
    InvalidColumnIndex = 0x0205,
    /// Value cannot be converted to the requested type.
    TypeMismatch = 0x0206,
    /// No open cursor with the given name.
    CursorNotFound = 0x0207,
    /// Cursor name already in use on the connection.
    DuplicateCursorName = 0x0208,
    /// Query does not qualify for an updatable result set.
    QueryNotUpdatable = 0x0209,
    /// The row changed underneath the cursor.
    CursorOperationConflict = 0x020A,

    // LOB and stream errors (0x0300 - 0x03FF)
    /// A stream or LOB was already retrieved for this column and row fetch.
    StreamAlreadyRetrieved = 0x0300,
    /// The LOB locator was freed or its transaction ended.
    InvalidLobState = 0x0301,
    /// Position outside the LOB value.
    LobPositionOutOfRange = 0x0302,
    /// LOB value exceeds the maximum length.
    LobTooLarge = 0x0303,

    // Transaction errors (0x0400 - 0x04FF)
    /// Lock wait timed out.
    LockTimeout = 0x0400,
    /// Deadlock detected.
    Deadlock = 0x0401,
    /// No active transaction with that id.
    TransactionNotFound = 0x0402,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the SQLSTATE reported for this code.
    #[must_use]
    pub const fn sql_state(self) -> &'static str {
        match self {
            Self::Internal => "XJ001",
            Self::NotSupported => "0A000",
            Self::InvalidArgument => "XJ081",
            Self::InvalidConfig => "XCY00",
            Self::Io => "58030",
            Self::ResultSetClosed => "XCL16",
            Self::StatementClosed => "XJ012",
            Self::ResultSetNotUpdatable => "XJ083",
            Self::NoCurrentRow => "24000",
            Self::NotOnForwardOnlyCursor => "XJ061",
            Self::InvalidColumnIndex => "S0022",
            Self::TypeMismatch => "22005",
            Self::CursorNotFound => "42X30",
            Self::DuplicateCursorName => "X0X60",
            Self::QueryNotUpdatable => "42Y90",
            Self::CursorOperationConflict => "01001",
            Self::StreamAlreadyRetrieved => "XCL18",
            Self::InvalidLobState => "XJ215",
            Self::LobPositionOutOfRange => "XJ076",
            Self::LobTooLarge => "22001",
            Self::LockTimeout => "40XL1",
            Self::Deadlock => "40001",
            Self::TransactionNotFound => "25000",
        }
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "Cursor",
            0x03 => "LOB",
            0x04 => "Transaction",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.sql_state())
    }
}

/// The main error type for Tessera.
///
/// # Example
///
/// ```rust
/// use tessera_common::error::{TesseraError, TesseraResult};
///
/// fn fetch(closed: bool) -> TesseraResult<()> {
///     if closed {
///         return Err(TesseraError::ResultSetClosed { operation: "next".into() });
///     }
///     Ok(())
/// }
///
/// let err = fetch(true).unwrap_err();
/// assert_eq!(err.sql_state(), "XCL16");
/// ```
#[derive(Debug, Error)]
pub enum TesseraError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Operation not supported.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// The unsupported operation.
        operation: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// I/O error while reading a caller-supplied stream or a config file.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    // ==========================================================================
    // Cursor Errors
    // ==========================================================================
    /// The result set is closed.
    #[error("invalid operation '{operation}': result set is closed")]
    ResultSetClosed {
        /// The operation that was attempted.
        operation: String,
    },

    /// The owning statement is closed.
    #[error("statement is closed")]
    StatementClosed,

    /// Mutation on a read-only result set.
    #[error("'{operation}' not allowed because the result set is not updatable")]
    ResultSetNotUpdatable {
        /// The operation that was attempted.
        operation: String,
    },

    /// Invalid cursor state: no current row.
    #[error("invalid cursor state - no current row")]
    NoCurrentRow,

    /// Scroll operation on a forward-only cursor.
    #[error("'{operation}' is not allowed on a forward-only result set")]
    NotOnForwardOnlyCursor {
        /// The operation that was attempted.
        operation: String,
    },

    /// Column index out of range.
    #[error("column index {index} out of range, result has {count} columns")]
    InvalidColumnIndex {
        /// The 1-based index requested.
        index: usize,
        /// Number of columns in the result.
        count: usize,
    },

    /// Type conversion failure.
    #[error("type mismatch: cannot read {actual} as {expected}")]
    TypeMismatch {
        /// Requested type.
        expected: String,
        /// Stored type.
        actual: String,
    },

    /// No open cursor with that name.
    #[error("cursor '{name}' not found")]
    CursorNotFound {
        /// The cursor name.
        name: String,
    },

    /// Cursor name already in use.
    #[error("a cursor named '{name}' already exists on this connection")]
    DuplicateCursorName {
        /// The cursor name.
        name: String,
    },

    /// The query cannot back an updatable result set.
    #[error("query is not qualified for an updatable result set: {reason}")]
    QueryNotUpdatable {
        /// Why the query does not qualify.
        reason: String,
    },

    /// The row changed since the cursor fetched it.
    #[error("row {row_id} was modified or deleted by another operation since it was fetched")]
    CursorOperationConflict {
        /// The row in conflict.
        row_id: RowId,
    },

    // ==========================================================================
    // LOB and Stream Errors
    // ==========================================================================
    /// A stream or LOB was already retrieved.
    #[error("stream or LOB value for column {column} has already been retrieved")]
    StreamAlreadyRetrieved {
        /// The 1-based column index.
        column: usize,
    },

    /// The LOB locator is no longer usable.
    #[error("LOB locator is no longer valid: {reason}")]
    InvalidLobState {
        /// Why the locator is invalid.
        reason: String,
    },

    /// Position outside the LOB value.
    #[error("position {position} is outside the LOB value of length {length}")]
    LobPositionOutOfRange {
        /// The 1-based position requested.
        position: u64,
        /// The LOB length.
        length: u64,
    },

    /// LOB value too large.
    #[error("LOB value of {size} exceeds maximum {max_size}")]
    LobTooLarge {
        /// Actual size.
        size: u64,
        /// Maximum size.
        max_size: u64,
    },

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    /// Lock wait timed out.
    #[error("transaction {txn_id} timed out after {waited_ms}ms waiting for a lock on {resource}")]
    LockTimeout {
        /// The waiting transaction.
        txn_id: TxnId,
        /// The resource it waited for.
        resource: String,
        /// How long it waited.
        waited_ms: u64,
    },

    /// Deadlock detected.
    #[error("deadlock detected, transaction {txn_id} was chosen as victim")]
    Deadlock {
        /// The victim transaction.
        txn_id: TxnId,
    },

    /// Transaction not found or no longer active.
    #[error("transaction {txn_id} is not active")]
    TransactionNotFound {
        /// The transaction.
        txn_id: TxnId,
    },
}

impl TesseraError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::NotSupported { .. } => ErrorCode::NotSupported,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::Io { .. } => ErrorCode::Io,
            Self::ResultSetClosed { .. } => ErrorCode::ResultSetClosed,
            Self::StatementClosed => ErrorCode::StatementClosed,
            Self::ResultSetNotUpdatable { .. } => ErrorCode::ResultSetNotUpdatable,
            Self::NoCurrentRow => ErrorCode::NoCurrentRow,
            Self::NotOnForwardOnlyCursor { .. } => ErrorCode::NotOnForwardOnlyCursor,
            Self::InvalidColumnIndex { .. } => ErrorCode::InvalidColumnIndex,
            Self::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            Self::CursorNotFound { .. } => ErrorCode::CursorNotFound,
            Self::DuplicateCursorName { .. } => ErrorCode::DuplicateCursorName,
            Self::QueryNotUpdatable { .. } => ErrorCode::QueryNotUpdatable,
            Self::CursorOperationConflict { .. } => ErrorCode::CursorOperationConflict,
            Self::StreamAlreadyRetrieved { .. } => ErrorCode::StreamAlreadyRetrieved,
            Self::InvalidLobState { .. } => ErrorCode::InvalidLobState,
            Self::LobPositionOutOfRange { .. } => ErrorCode::LobPositionOutOfRange,
            Self::LobTooLarge { .. } => ErrorCode::LobTooLarge,
            Self::LockTimeout { .. } => ErrorCode::LockTimeout,
            Self::Deadlock { .. } => ErrorCode::Deadlock,
            Self::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
        }
    }

    /// Returns the SQLSTATE string for this error.
    #[must_use]
    pub const fn sql_state(&self) -> &'static str {
        self.code().sql_state()
    }

    /// Returns true if the operation may succeed after rolling back and retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::Deadlock { .. } | Self::CursorOperationConflict { .. }
        )
    }

    /// Returns true if the cursor that raised this error can never be used again.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ResultSetClosed { .. } | Self::StatementClosed)
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a closed result set error for the named operation.
    #[must_use]
    pub fn closed(operation: impl Into<String>) -> Self {
        Self::ResultSetClosed {
            operation: operation.into(),
        }
    }

    /// Creates an invalid LOB state error.
    #[must_use]
    pub fn invalid_lob(reason: impl Into<String>) -> Self {
        Self::InvalidLobState {
            reason: reason.into(),
        }
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
