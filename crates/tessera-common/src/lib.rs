//! # tessera-common
//!
//! Common types, errors, and configuration for Tessera.
//!
//! This crate provides the foundational pieces shared by the lock ledger
//! and the cursor engine:
//!
//! - **Types**: Identifiers for transactions, rows, cursors and tables
//! - **Errors**: Unified error handling with `TesseraError` and stable
//!   SQLSTATE codes
//! - **Config**: Engine configuration structures, loadable from TOML
//! - **Constants**: System-wide defaults and limits
//!
//! ## Example
//!
//! ```rust
//! use tessera_common::types::{RowId, TxnId};
//! use tessera_common::error::{TesseraError, TesseraResult};
//!
//! fn example() -> TesseraResult<()> {
//!     let txn = TxnId::new(1);
//!     let row = RowId::new(42);
//!     assert!(txn.is_valid());
//!     assert_eq!(row.as_u64(), 42);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use error::{ErrorCode, TesseraError, TesseraResult};
pub use types::{CursorId, RowId, TableId, TxnId};
