//! # tessera-cursor
//!
//! Scrollable, updatable cursors for Tessera.
//!
//! This crate provides the cursor engine and everything a cursor hands out:
//!
//! - **Cursors**: Forward-only, scroll-insensitive and scroll-sensitive
//!   cursors with JDBC positioning rules, typed getters, staged updates,
//!   `update_row`, `delete_row` and positioned updates by cursor name.
//!
//! - **LOB Locators**: Handles on BLOB and CLOB values that stay valid
//!   while the cursor remains on their row and become invalid when it moves
//!   to another row, when freed, and at transaction end.
//!
//! - **Stream Gate**: A stream, reader or LOB object is handed out at most
//!   once per column per row fetch.
//!
//! - **Locking**: Mutations take intention-exclusive table locks and
//!   exclusive row locks through the lock ledger; space freed by updates
//!   and deletes is reclaimed after commit by the deferred cleanup worker.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        ResultCursor                           │
//! │                             │                                 │
//! │   ┌─────────────┬───────────┼─────────────┬───────────────┐   │
//! │   ▼             ▼           ▼             ▼               ▼   │
//! │ Materializer RowBuffer  StreamGate  LocatorCache    LockLedger│
//! │   │                                                           │
//! │   ▼                                                           │
//! │ RowSource (MemorySource)                                      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera_common::config::EngineConfig;
//! use tessera_cursor::source::{MemorySource, Query, TableDef};
//! use tessera_cursor::{Concurrency, CursorOptions, CursorType, DataType, Database, Value};
//!
//! let source = Arc::new(MemorySource::new());
//! source
//!     .create_table(
//!         TableDef::new("docs")
//!             .column("id", DataType::Int, false)
//!             .column("body", DataType::Clob, true)
//!             .primary_key(&["id"]),
//!     )
//!     .unwrap();
//! source.insert("docs", vec![Value::Int(1), Value::clob("hello")]).unwrap();
//!
//! let db = Database::open(EngineConfig::for_testing(), source).unwrap();
//! let conn = db.connect();
//! let options = CursorOptions::new(CursorType::ScrollInsensitive, Concurrency::Updatable);
//! let mut cursor = conn.open_cursor(Query::table("docs"), options).unwrap();
//!
//! assert!(cursor.last().unwrap());
//! assert_eq!(cursor.get_clob(2).unwrap().unwrap().length().unwrap(), 5);
//!
//! cursor.update_string(2, "hello, world").unwrap();
//! cursor.update_row().unwrap();
//!
//! let txn = conn.current_txn();
//! conn.commit().unwrap();
//! db.wait_for_deferred_cleanup();
//! assert_eq!(db.manager().ledger().count(txn), 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Column values and types.
pub mod value;

/// Rows produced by row sources.
pub mod row;

/// The row source contract and the in-memory source.
///
/// This module provides:
/// - [`source::RowSource`]: What the cursor engine needs from a query executor
/// - [`source::Query`]: A single-table query
/// - [`source::MemorySource`]: In-memory tables with keys and indexes
pub mod source;

/// Current-row values and staged updates.
pub mod buffer;

/// LOB locators.
///
/// This module provides:
/// - [`lob::LobLocator`]: Handle on a BLOB or CLOB value
/// - [`lob::LocatorCache`]: Per-cursor locators keyed by row and column
pub mod lob;

/// Once-per-fetch stream access.
///
/// This module provides:
/// - [`stream::StreamGate`]: Tracks which columns were streamed
/// - [`stream::BinaryStream`], [`stream::CharacterStream`]: Column readers
pub mod stream;

/// The cursor engine.
pub mod cursor;

/// Database and result metadata.
pub mod metadata;

/// Databases, connections and statements.
pub mod connection;

use tessera_common::TesseraResult;

/// Result type of cursor operations.
pub type CursorResult<T> = TesseraResult<T>;

pub use connection::{Connection, Database, Statement};
pub use cursor::{
    CloseHandle, Concurrency, CursorOptions, CursorType, FetchDirection, Holdability, Position, ResultCursor,
};
pub use lob::{LobKind, LobLocator};
pub use metadata::{DatabaseMetadata, MetadataLevel, ResultMetadata};
pub use row::Row;
pub use source::{Query, RowSource};
pub use stream::{BinaryStream, CharacterStream, StreamHandle};
pub use value::{DataType, Value};
