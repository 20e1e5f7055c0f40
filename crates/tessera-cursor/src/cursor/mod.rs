//! The scrollable, updatable cursor.
//!
//! A [`ResultCursor`] walks the rows of one query. Its behavior is fixed at
//! open time by three options:
//!
//! | Option | Values |
//! |---|---|
//! | [`CursorType`] | forward-only, scroll-insensitive, scroll-sensitive |
//! | [`Concurrency`] | read-only, updatable |
//! | [`Holdability`] | hold over commit, close at commit |
//!
//! # Positions
//!
//! ```text
//!   BeforeFirst ─► OnRow(1) ─► OnRow(2) ─► ... ─► OnRow(n) ─► AfterLast
//! ```
//!
//! A forward-only cursor closes itself when `next()` is called while it is
//! already after the last row. Scrollable cursors never close on their own.
//!
//! # Closing from another thread
//!
//! The cursor is driven through `&mut self` by its owner. A [`CloseHandle`]
//! can close it from any thread; a fetch that is in flight at that moment
//! fails with `ResultSetClosed` once the row source returns.

mod materialize;
mod state;

use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tessera_common::types::CursorId;
use tessera_common::TesseraError;

use crate::lob::LobLocator;
use crate::metadata::ResultMetadata;
use crate::stream::{BinaryStream, CharacterStream};
use crate::value::Value;
use crate::CursorResult;

pub(crate) use state::{validate_cursor_name, CursorState};

/// Scroll behavior of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorType {
    /// `next()` only, rows read as they are reached.
    ForwardOnly,
    /// Scrollable over a private snapshot of the rows.
    ScrollInsensitive,
    /// Scrollable, re-reading each row when it is reached.
    ScrollSensitive,
}

impl CursorType {
    /// Returns true for the scrollable types.
    pub fn is_scrollable(&self) -> bool {
        !matches!(self, CursorType::ForwardOnly)
    }
}

/// Whether rows can be changed through the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concurrency {
    /// Read only.
    ReadOnly,
    /// `update_row`, `delete_row` and positioned updates are allowed.
    Updatable,
}

/// What happens to the cursor at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Holdability {
    /// Stays open across commit. Its LOB locators are invalidated.
    Hold,
    /// Closed by commit and rollback.
    CloseOnCommit,
}

/// Cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    /// Before the first row.
    BeforeFirst,
    /// On the row with this 1-based number.
    OnRow(usize),
    /// After the last row.
    AfterLast,
}

/// The order in which the caller expects to process rows.
///
/// A hint only: rows are produced the same way whatever the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FetchDirection {
    /// First to last.
    #[default]
    Forward,
    /// Last to first.
    Reverse,
    /// No expected order.
    Unknown,
}

/// Options a cursor is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorOptions {
    /// Scroll behavior.
    pub cursor_type: CursorType,
    /// Read-only or updatable.
    pub concurrency: Concurrency,
    /// Behavior at commit.
    pub holdability: Holdability,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            cursor_type: CursorType::ForwardOnly,
            concurrency: Concurrency::ReadOnly,
            holdability: Holdability::CloseOnCommit,
        }
    }
}

impl CursorOptions {
    /// Creates options with the given type and concurrency, closed at commit.
    pub fn new(cursor_type: CursorType, concurrency: Concurrency) -> Self {
        Self {
            cursor_type,
            concurrency,
            ..Self::default()
        }
    }

    /// Sets the holdability.
    pub fn with_holdability(mut self, holdability: Holdability) -> Self {
        self.holdability = holdability;
        self
    }

    /// Returns true for updatable cursors.
    pub fn is_updatable(&self) -> bool {
        self.concurrency == Concurrency::Updatable
    }
}

/// State shared between a cursor, its close handles and the connection.
pub(crate) struct CursorShared {
    id: CursorId,
    holdability: Holdability,
    closed: Arc<AtomicBool>,
    state: Mutex<CursorState>,
}

impl CursorShared {
    pub(crate) fn id(&self) -> CursorId {
        self.id
    }

    pub(crate) fn holdability(&self) -> Holdability {
        self.holdability
    }

    pub(crate) fn closed_flag(&self) -> &Arc<AtomicBool> {
        &self.closed
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> parking_lot::MutexGuard<'_, CursorState> {
        self.state.lock()
    }

    /// Marks the cursor closed. Cleanup happens now if nobody is using the
    /// cursor, otherwise when its current operation returns.
    pub(crate) fn request_close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(mut state) = self.state.try_lock() {
            state.close();
        }
    }
}

/// Closes a cursor from any thread.
#[derive(Clone)]
pub struct CloseHandle {
    shared: Arc<CursorShared>,
}

impl CloseHandle {
    /// Closes the cursor. An in-flight fetch fails with `ResultSetClosed`.
    pub fn close(&self) {
        self.shared.request_close();
    }

    /// Returns true once the cursor is closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl fmt::Debug for CloseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHandle")
            .field("cursor", &self.shared.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// An open cursor over a query result.
///
/// Column indexes are 1-based. Getters return `None` for SQL NULL and
/// record it for [`ResultCursor::was_null`].
pub struct ResultCursor {
    shared: Arc<CursorShared>,
}

impl ResultCursor {
    pub(crate) fn from_state(state: CursorState) -> Arc<CursorShared> {
        Arc::new(CursorShared {
            id: state.id(),
            holdability: state.options().holdability,
            closed: Arc::clone(state.closed_flag()),
            state: Mutex::new(state),
        })
    }

    pub(crate) fn new(shared: Arc<CursorShared>) -> Self {
        Self { shared }
    }

    fn with_state<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut CursorState) -> CursorResult<T>,
    ) -> CursorResult<T> {
        let mut state = self.shared.state.lock();
        state.ensure_open(operation)?;
        f(&mut state)
    }

    /// Returns a handle that can close this cursor from another thread.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Cursor id.
    pub fn id(&self) -> CursorId {
        self.shared.id
    }

    /// Returns true once the cursor is closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Closes the cursor. Locks taken through it are kept until the
    /// transaction ends.
    pub fn close(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.state.lock().close();
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Moves to the next row. Returns false past the end.
    pub fn next(&mut self) -> CursorResult<bool> {
        self.with_state("next", CursorState::next)
    }

    /// Moves to the previous row.
    pub fn previous(&mut self) -> CursorResult<bool> {
        self.with_state("previous", CursorState::previous)
    }

    /// Moves to the first row.
    pub fn first(&mut self) -> CursorResult<bool> {
        self.with_state("first", CursorState::first)
    }

    /// Moves to the last row.
    pub fn last(&mut self) -> CursorResult<bool> {
        self.with_state("last", CursorState::last)
    }

    /// Moves to a 1-based row. Negative values count from the end, zero
    /// moves before the first row.
    pub fn absolute(&mut self, row: i64) -> CursorResult<bool> {
        self.with_state("absolute", |s| s.absolute(row))
    }

    /// Moves `rows` rows forward or backward.
    pub fn relative(&mut self, rows: i64) -> CursorResult<bool> {
        self.with_state("relative", |s| s.relative(rows))
    }

    /// Moves before the first row.
    pub fn before_first(&mut self) -> CursorResult<()> {
        self.with_state("before_first", CursorState::before_first)
    }

    /// Moves after the last row.
    pub fn after_last(&mut self) -> CursorResult<()> {
        self.with_state("after_last", CursorState::after_last)
    }

    /// Current position.
    pub fn position(&self) -> CursorResult<Position> {
        self.with_state("position", |s| Ok(s.position()))
    }

    /// Current 1-based row number, or 0 when not on a row.
    pub fn get_row(&self) -> CursorResult<usize> {
        self.with_state("get_row", |s| Ok(s.row_number()))
    }

    /// Returns true before the first row of a non-empty result.
    pub fn is_before_first(&self) -> CursorResult<bool> {
        self.with_state("is_before_first", CursorState::is_before_first)
    }

    /// Returns true after the last row of a non-empty result.
    pub fn is_after_last(&self) -> CursorResult<bool> {
        self.with_state("is_after_last", CursorState::is_after_last)
    }

    /// Returns true on the first row.
    pub fn is_first(&self) -> CursorResult<bool> {
        self.with_state("is_first", CursorState::is_first)
    }

    /// Returns true on the last row. May read one row ahead.
    pub fn is_last(&self) -> CursorResult<bool> {
        self.with_state("is_last", CursorState::is_last)
    }

    /// Sets the fetch direction hint. Forward-only cursors accept only
    /// [`FetchDirection::Forward`].
    pub fn set_fetch_direction(&mut self, direction: FetchDirection) -> CursorResult<()> {
        self.with_state("set_fetch_direction", |s| s.set_fetch_direction(direction))
    }

    /// Current fetch direction hint.
    pub fn get_fetch_direction(&self) -> CursorResult<FetchDirection> {
        self.with_state("get_fetch_direction", |s| Ok(s.fetch_direction()))
    }

    /// Sets how many rows are pulled from the source at a time. Zero keeps
    /// the current value.
    pub fn set_fetch_size(&mut self, rows: usize) -> CursorResult<()> {
        self.with_state("set_fetch_size", |s| {
            s.set_fetch_size(rows);
            Ok(())
        })
    }

    /// Current fetch size.
    pub fn get_fetch_size(&self) -> CursorResult<usize> {
        self.with_state("get_fetch_size", |s| Ok(s.fetch_size()))
    }

    // =========================================================================
    // Getters
    // =========================================================================

    /// Returns a column value, `Value::Null` included.
    pub fn get_value(&mut self, column: usize) -> CursorResult<Value> {
        self.with_state("get_value", |s| s.get_value(column))
    }

    /// Reads a column as a 32-bit integer.
    pub fn get_int(&mut self, column: usize) -> CursorResult<Option<i32>> {
        self.with_state("get_int", |s| s.get_int(column))
    }

    /// Reads a column as a 64-bit integer.
    pub fn get_long(&mut self, column: usize) -> CursorResult<Option<i64>> {
        self.with_state("get_long", |s| s.get_long(column))
    }

    /// Reads a column as a double.
    pub fn get_double(&mut self, column: usize) -> CursorResult<Option<f64>> {
        self.with_state("get_double", |s| s.get_double(column))
    }

    /// Reads a column as a boolean.
    pub fn get_boolean(&mut self, column: usize) -> CursorResult<Option<bool>> {
        self.with_state("get_boolean", |s| s.get_boolean(column))
    }

    /// Reads a column as a string.
    pub fn get_string(&mut self, column: usize) -> CursorResult<Option<String>> {
        self.with_state("get_string", |s| s.get_string(column))
    }

    /// Reads a binary column.
    pub fn get_bytes(&mut self, column: usize) -> CursorResult<Option<Bytes>> {
        self.with_state("get_bytes", |s| s.get_bytes(column))
    }

    /// Streams a binary column. Allowed once per column per row fetch.
    pub fn get_binary_stream(&mut self, column: usize) -> CursorResult<Option<BinaryStream>> {
        self.with_state("get_binary_stream", |s| s.get_binary_stream(column))
    }

    /// Streams a character column. Allowed once per column per row fetch.
    pub fn get_character_stream(&mut self, column: usize) -> CursorResult<Option<CharacterStream>> {
        self.with_state("get_character_stream", |s| s.get_character_stream(column))
    }

    /// Returns a locator for a BLOB column. Allowed once per column per row
    /// fetch.
    pub fn get_blob(&mut self, column: usize) -> CursorResult<Option<LobLocator>> {
        self.with_state("get_blob", |s| s.get_lob(column, crate::lob::LobKind::Binary))
    }

    /// Returns a locator for a CLOB column. Allowed once per column per row
    /// fetch.
    pub fn get_clob(&mut self, column: usize) -> CursorResult<Option<LobLocator>> {
        self.with_state("get_clob", |s| s.get_lob(column, crate::lob::LobKind::Character))
    }

    /// Returns true if the last column read was NULL.
    pub fn was_null(&self) -> CursorResult<bool> {
        self.with_state("was_null", |s| Ok(s.was_null()))
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Stages a value for a column of the current row.
    pub fn update_value(&mut self, column: usize, value: Value) -> CursorResult<()> {
        self.with_state("update_value", |s| s.stage("update_value", column, value))
    }

    /// Stages an integer.
    pub fn update_int(&mut self, column: usize, value: i32) -> CursorResult<()> {
        self.with_state("update_int", |s| s.stage("update_int", column, Value::Int(value)))
    }

    /// Stages a 64-bit integer.
    pub fn update_long(&mut self, column: usize, value: i64) -> CursorResult<()> {
        self.with_state("update_long", |s| s.stage("update_long", column, Value::BigInt(value)))
    }

    /// Stages a string.
    pub fn update_string(&mut self, column: usize, value: &str) -> CursorResult<()> {
        self.with_state("update_string", |s| s.stage("update_string", column, Value::string(value)))
    }

    /// Stages binary data.
    pub fn update_bytes(&mut self, column: usize, value: impl Into<Bytes>) -> CursorResult<()> {
        let value = Value::Bytes(value.into());
        self.with_state("update_bytes", |s| s.stage("update_bytes", column, value))
    }

    /// Stages NULL.
    pub fn update_null(&mut self, column: usize) -> CursorResult<()> {
        self.with_state("update_null", |s| s.stage("update_null", column, Value::Null))
    }

    /// Stages the contents of a binary stream.
    ///
    /// The reader is borrowed for the duration of the call and is never
    /// closed by the cursor. With `length`, exactly that many bytes are
    /// read.
    pub fn update_binary_stream<R: Read + ?Sized>(
        &mut self,
        column: usize,
        reader: &mut R,
        length: Option<u64>,
    ) -> CursorResult<()> {
        self.with_state("update_binary_stream", |s| s.stage_binary_stream(column, reader, length))
    }

    /// Stages the contents of a UTF-8 character stream.
    pub fn update_character_stream<R: Read + ?Sized>(
        &mut self,
        column: usize,
        reader: &mut R,
        length: Option<u64>,
    ) -> CursorResult<()> {
        self.with_state("update_character_stream", |s| {
            s.stage_character_stream(column, reader, length)
        })
    }

    /// Writes staged values to the current row.
    pub fn update_row(&mut self) -> CursorResult<()> {
        self.with_state("update_row", CursorState::update_row)
    }

    /// Discards staged values.
    pub fn cancel_row_updates(&mut self) -> CursorResult<()> {
        self.with_state("cancel_row_updates", CursorState::cancel_row_updates)
    }

    /// Deletes the current row, leaving a hole at its position.
    pub fn delete_row(&mut self) -> CursorResult<()> {
        self.with_state("delete_row", |s| s.delete_current("delete_row"))
    }

    /// Whether the current row was updated through this cursor.
    pub fn row_updated(&self) -> CursorResult<bool> {
        self.with_state("row_updated", CursorState::row_updated)
    }

    /// Whether the current row has been deleted.
    pub fn row_deleted(&self) -> CursorResult<bool> {
        self.with_state("row_deleted", CursorState::row_deleted)
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Name used by positioned updates.
    pub fn get_cursor_name(&self) -> CursorResult<String> {
        self.with_state("get_cursor_name", |s| Ok(s.name().to_string()))
    }

    /// Renames the cursor. Only allowed before the first move.
    pub fn set_cursor_name(&mut self, name: &str) -> CursorResult<()> {
        self.with_state("set_cursor_name", |s| s.set_name(name))
    }

    /// Column metadata.
    pub fn metadata(&self) -> CursorResult<ResultMetadata> {
        self.with_state("metadata", |s| Ok(s.metadata().clone()))
    }

    /// Options the cursor was opened with.
    pub fn options(&self) -> CursorOptions {
        *self.shared.state.lock().options()
    }
}

impl Drop for ResultCursor {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCursor")
            .field("id", &self.shared.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Error for operations that need a scrollable cursor.
pub(crate) fn not_scrollable(operation: &str) -> TesseraError {
    TesseraError::NotOnForwardOnlyCursor {
        operation: operation.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, Database};
    use crate::source::{MemorySource, Query, RowSource, TableDef};
    use crate::value::DataType;
    use std::io::Read;
    use tessera_common::config::EngineConfig;
    use tessera_common::types::RowId;
    use tessera_txn::{LockMode, ResourceId};

    fn setup(rows: i32) -> (Database, Arc<MemorySource>) {
        let source = Arc::new(MemorySource::new());
        source
            .create_table(
                TableDef::new("t")
                    .column("id", DataType::Int, false)
                    .column("name", DataType::Varchar, true)
                    .column("doc", DataType::Blob, true)
                    .column("note", DataType::Clob, true)
                    .primary_key(&["id"]),
            )
            .unwrap();
        for id in 1..=rows {
            source
                .insert(
                    "t",
                    vec![
                        Value::Int(id),
                        Value::string(format!("n{}", id)),
                        Value::blob(vec![id as u8; 10]),
                        Value::clob(format!("note {}", id)),
                    ],
                )
                .unwrap();
        }
        let db = Database::open(EngineConfig::for_testing(), source.clone()).unwrap();
        (db, source)
    }

    fn open(conn: &Connection, cursor_type: CursorType, concurrency: Concurrency) -> ResultCursor {
        conn.open_cursor(Query::table("t"), CursorOptions::new(cursor_type, concurrency))
            .unwrap()
    }

    #[test]
    fn test_forward_only_closes_after_exhaustion() {
        let (db, _) = setup(2);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ForwardOnly, Concurrency::ReadOnly);

        assert!(cursor.next().unwrap());
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.get_row().unwrap(), 2);
        assert!(!cursor.next().unwrap());
        assert!(!cursor.is_closed());

        assert!(!cursor.next().unwrap());
        assert!(cursor.is_closed());
        assert_eq!(cursor.next().unwrap_err().sql_state(), "XCL16");
        assert_eq!(cursor.get_int(1).unwrap_err().sql_state(), "XCL16");
    }

    #[test]
    fn test_scrollable_stays_open_past_end() {
        let (db, _) = setup(2);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ScrollInsensitive, Concurrency::ReadOnly);

        while cursor.next().unwrap() {}
        assert!(!cursor.next().unwrap());
        assert!(!cursor.next().unwrap());
        assert!(!cursor.is_closed());
        assert_eq!(cursor.position().unwrap(), Position::AfterLast);

        assert!(cursor.previous().unwrap());
        assert_eq!(cursor.get_int(1).unwrap(), Some(2));
    }

    #[test]
    fn test_absolute_and_relative() {
        let (db, _) = setup(5);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ScrollInsensitive, Concurrency::ReadOnly);

        assert!(cursor.absolute(-1).unwrap());
        assert_eq!(cursor.get_int(1).unwrap(), Some(5));
        assert!(!cursor.absolute(0).unwrap());
        assert_eq!(cursor.get_row().unwrap(), 0);
        assert_eq!(cursor.position().unwrap(), Position::BeforeFirst);

        assert!(!cursor.absolute(9).unwrap());
        assert_eq!(cursor.position().unwrap(), Position::AfterLast);
        assert!(cursor.relative(-2).unwrap());
        assert_eq!(cursor.get_row().unwrap(), 4);
        assert!(cursor.relative(0).unwrap());
        assert_eq!(cursor.get_row().unwrap(), 4);

        assert!(!cursor.relative(-10).unwrap());
        assert_eq!(cursor.position().unwrap(), Position::BeforeFirst);
        assert!(cursor.relative(2).unwrap());
        assert_eq!(cursor.get_int(1).unwrap(), Some(2));

        assert!(!cursor.absolute(-6).unwrap());
        assert_eq!(cursor.position().unwrap(), Position::BeforeFirst);
        assert!(cursor.last().unwrap());
        assert!(cursor.first().unwrap());
        assert_eq!(cursor.get_row().unwrap(), 1);
    }

    #[test]
    fn test_scroll_rejected_on_forward_only() {
        let (db, _) = setup(2);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ForwardOnly, Concurrency::ReadOnly);

        assert_eq!(cursor.first().unwrap_err().sql_state(), "XJ061");
        assert_eq!(cursor.absolute(1).unwrap_err().sql_state(), "XJ061");
        assert_eq!(cursor.before_first().unwrap_err().sql_state(), "XJ061");
        assert!(cursor.next().unwrap());
    }

    #[test]
    fn test_empty_result() {
        let (db, _) = setup(0);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ScrollSensitive, Concurrency::ReadOnly);

        assert!(!cursor.first().unwrap());
        assert!(!cursor.last().unwrap());
        cursor.after_last().unwrap();
        assert_eq!(cursor.position().unwrap(), Position::BeforeFirst);
        assert!(!cursor.next().unwrap());
    }

    #[test]
    fn test_getters() {
        let (db, source) = setup(1);
        source
            .insert("t", vec![Value::Int(2), Value::Null, Value::Null, Value::Null])
            .unwrap();
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ForwardOnly, Concurrency::ReadOnly);

        assert_eq!(cursor.get_int(1).unwrap_err().sql_state(), "24000");
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.get_int(1).unwrap(), Some(1));
        assert_eq!(cursor.get_long(1).unwrap(), Some(1));
        assert_eq!(cursor.get_string(1).unwrap().as_deref(), Some("1"));
        assert_eq!(cursor.get_string(2).unwrap().as_deref(), Some("n1"));
        assert!(!cursor.was_null().unwrap());
        assert_eq!(cursor.get_int(2).unwrap_err().sql_state(), "22005");
        assert_eq!(cursor.get_int(0).unwrap_err().sql_state(), "S0022");
        assert_eq!(cursor.get_int(5).unwrap_err().sql_state(), "S0022");

        assert!(cursor.next().unwrap());
        assert_eq!(cursor.get_string(2).unwrap(), None);
        assert!(cursor.was_null().unwrap());
        assert!(cursor.get_blob(3).unwrap().is_none());
        assert_eq!(cursor.get_value(1).unwrap(), Value::Int(2));
        assert!(!cursor.was_null().unwrap());
    }

    #[test]
    fn test_stream_once_per_fetch() {
        let (db, _) = setup(2);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ScrollInsensitive, Concurrency::ReadOnly);

        cursor.next().unwrap();
        let mut stream = cursor.get_binary_stream(3).unwrap().unwrap();
        assert_eq!(cursor.get_blob(3).unwrap_err().sql_state(), "XCL18");
        assert_eq!(cursor.get_bytes(3).unwrap_err().sql_state(), "XCL18");
        // Other columns are unaffected.
        cursor.get_clob(4).unwrap().unwrap();

        cursor.next().unwrap();
        assert!(stream.read(&mut [0u8; 4]).is_err());
        let mut data = Vec::new();
        cursor
            .get_binary_stream(3)
            .unwrap()
            .unwrap()
            .read_to_end(&mut data)
            .unwrap();
        assert_eq!(data, vec![2u8; 10]);
    }

    #[test]
    fn test_locator_survives_return_to_same_row() {
        let (db, _) = setup(1);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ScrollInsensitive, Concurrency::ReadOnly);

        cursor.last().unwrap();
        let clob = cursor.get_clob(4).unwrap().unwrap();
        cursor.first().unwrap();
        cursor.last().unwrap();
        assert!(clob.is_valid());
        assert_eq!(clob.length().unwrap(), 6);

        clob.free();
        cursor.first().unwrap();
        let again = cursor.get_clob(4).unwrap().unwrap();
        assert_eq!(again.length().unwrap(), 6);
        assert_eq!(again.sub_string(1, 4).unwrap(), "note");
    }

    #[test]
    fn test_locator_invalidated_by_other_row() {
        let (db, _) = setup(2);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ScrollSensitive, Concurrency::ReadOnly);

        cursor.next().unwrap();
        let blob = cursor.get_blob(3).unwrap().unwrap();
        assert_eq!(blob.row_id(), RowId::new(1));
        cursor.next().unwrap();
        assert!(!blob.is_valid());
        assert_eq!(blob.length().unwrap_err().sql_state(), "XJ215");
    }

    #[test]
    fn test_update_row() {
        let (db, source) = setup(3);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ScrollInsensitive, Concurrency::Updatable);

        cursor.absolute(2).unwrap();
        cursor.update_string(2, "changed").unwrap();
        assert_eq!(cursor.get_string(2).unwrap().as_deref(), Some("changed"));
        assert!(!cursor.row_updated().unwrap());
        cursor.update_row().unwrap();
        assert!(cursor.row_updated().unwrap());
        assert_eq!(
            source.get("t", RowId::new(2)).unwrap().unwrap()[1],
            Value::string("changed")
        );

        cursor.first().unwrap();
        assert!(!cursor.row_updated().unwrap());
        cursor.next().unwrap();
        assert!(cursor.row_updated().unwrap());
        assert_eq!(cursor.get_string(2).unwrap().as_deref(), Some("changed"));

        // Updating the same row again goes through.
        cursor.update_int(1, 20).unwrap();
        cursor.update_row().unwrap();
        assert_eq!(cursor.get_int(1).unwrap(), Some(20));
    }

    #[test]
    fn test_cancel_row_updates() {
        let (db, _) = setup(1);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ForwardOnly, Concurrency::Updatable);

        cursor.next().unwrap();
        cursor.update_null(2).unwrap();
        assert_eq!(cursor.get_string(2).unwrap(), None);
        cursor.cancel_row_updates().unwrap();
        assert_eq!(cursor.get_string(2).unwrap().as_deref(), Some("n1"));
        cursor.update_row().unwrap();
        assert!(!cursor.row_updated().unwrap());
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let (db, _) = setup(1);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ScrollInsensitive, Concurrency::ReadOnly);

        cursor.next().unwrap();
        assert_eq!(cursor.update_int(1, 5).unwrap_err().sql_state(), "XJ083");
        assert_eq!(cursor.update_row().unwrap_err().sql_state(), "XJ083");
        assert_eq!(cursor.delete_row().unwrap_err().sql_state(), "XJ083");
    }

    #[test]
    fn test_update_detects_concurrent_change() {
        let (db, source) = setup(1);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ScrollInsensitive, Concurrency::Updatable);

        cursor.next().unwrap();
        source
            .write_column("t", RowId::new(1), "name", Value::string("other"))
            .unwrap();
        cursor.update_string(2, "mine").unwrap();
        let err = cursor.update_row().unwrap_err();
        assert_eq!(err.sql_state(), "01001");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_delete_leaves_hole() {
        let (db, source) = setup(3);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ScrollInsensitive, Concurrency::Updatable);

        cursor.absolute(2).unwrap();
        cursor.delete_row().unwrap();
        assert!(cursor.row_deleted().unwrap());
        assert_eq!(cursor.get_int(1).unwrap_err().sql_state(), "24000");
        assert_eq!(cursor.delete_row().unwrap_err().sql_state(), "24000");
        assert_eq!(source.row_count("t").unwrap(), 2);
        assert_eq!(source.tombstone_count("t").unwrap(), 1);

        assert!(cursor.next().unwrap());
        assert_eq!(cursor.get_int(1).unwrap(), Some(3));
        assert!(cursor.previous().unwrap());
        assert!(cursor.row_deleted().unwrap());
        assert_eq!(cursor.get_row().unwrap(), 2);
    }

    #[test]
    fn test_query_not_updatable() {
        let (db, source) = setup(1);
        source
            .create_table(TableDef::new("heap").column("x", DataType::Int, true))
            .unwrap();
        let conn = db.connect();
        let options = CursorOptions::new(CursorType::ForwardOnly, Concurrency::Updatable);

        let err = conn.open_cursor(Query::table("heap"), options).unwrap_err();
        assert_eq!(err.sql_state(), "42Y90");
        let err = conn.open_cursor(Query::table("t").distinct(), options).unwrap_err();
        assert_eq!(err.sql_state(), "42Y90");
    }

    #[test]
    fn test_sensitive_sees_other_changes() {
        let (db, source) = setup(2);
        let conn = db.connect();
        let mut sensitive = open(&conn, CursorType::ScrollSensitive, Concurrency::ReadOnly);
        let mut insensitive = open(&conn, CursorType::ScrollInsensitive, Concurrency::ReadOnly);

        // Both cursors have walked the result before the other writer runs.
        for cursor in [&mut sensitive, &mut insensitive] {
            cursor.last().unwrap();
            cursor.first().unwrap();
        }
        source
            .write_column("t", RowId::new(1), "name", Value::string("fresh"))
            .unwrap();
        source.remove("t", RowId::new(2)).unwrap();

        sensitive.relative(0).unwrap();
        insensitive.relative(0).unwrap();
        assert_eq!(sensitive.get_string(2).unwrap().as_deref(), Some("fresh"));
        assert_eq!(insensitive.get_string(2).unwrap().as_deref(), Some("n1"));

        assert!(sensitive.next().unwrap());
        assert!(sensitive.row_deleted().unwrap());
        assert!(insensitive.next().unwrap());
        assert_eq!(insensitive.get_string(2).unwrap().as_deref(), Some("n2"));
    }

    #[test]
    fn test_close_handle() {
        let (db, _) = setup(2);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ScrollInsensitive, Concurrency::ReadOnly);
        cursor.next().unwrap();
        let mut stream = cursor.get_character_stream(4).unwrap().unwrap();
        let handle = cursor.close_handle();

        std::thread::spawn(move || handle.close()).join().unwrap();
        assert!(cursor.is_closed());
        assert_eq!(cursor.next().unwrap_err().sql_state(), "XCL16");
        assert!(stream.read_to_string(&mut String::new()).is_err());
    }

    #[test]
    fn test_cursor_name() {
        let (db, _) = setup(2);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ForwardOnly, Concurrency::ReadOnly);

        assert!(cursor.get_cursor_name().unwrap().starts_with("SQL_CUR"));
        cursor.set_cursor_name("mine").unwrap();
        assert_eq!(cursor.get_cursor_name().unwrap(), "mine");
        assert_eq!(cursor.set_cursor_name("").unwrap_err().sql_state(), "XJ081");

        cursor.next().unwrap();
        assert_eq!(cursor.set_cursor_name("late").unwrap_err().sql_state(), "XJ081");
    }

    #[test]
    fn test_update_from_borrowed_reader() {
        let (db, source) = setup(1);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ForwardOnly, Concurrency::Updatable);
        cursor.next().unwrap();

        let mut reader = std::io::Cursor::new(vec![5u8; 64]);
        cursor.update_binary_stream(3, &mut reader, Some(32)).unwrap();
        cursor.update_row().unwrap();
        cursor.close();

        // The reader outlives the cursor and keeps its position.
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest.len(), 32);
        assert_eq!(source.get("t", RowId::new(1)).unwrap().unwrap()[2].size(), 32);
    }

    #[test]
    fn test_forward_only_skips_rows_deleted_after_batching() {
        let (db, source) = setup(3);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ForwardOnly, Concurrency::ReadOnly);
        cursor.set_fetch_size(10).unwrap();

        assert!(cursor.next().unwrap());
        assert!(source.remove("t", RowId::new(2)).unwrap());

        assert!(cursor.next().unwrap());
        assert_eq!(cursor.get_int(1).unwrap(), Some(3));
        assert_eq!(cursor.get_row().unwrap(), 2);
        assert!(!cursor.row_deleted().unwrap());
        assert!(!cursor.next().unwrap());
    }

    #[test]
    fn test_read_lock_shared_by_two_cursors() {
        let (db, source) = setup(2);
        let conn = db.connect();
        let table = source.table_id(&Query::table("t")).unwrap();
        let row1 = ResourceId::row(table, RowId::new(1));
        let ledger = conn.manager().ledger();

        let mut a = open(&conn, CursorType::ForwardOnly, Concurrency::ReadOnly);
        let mut b = open(&conn, CursorType::ScrollSensitive, Concurrency::ReadOnly);
        assert!(a.next().unwrap());
        assert!(b.next().unwrap());

        // One cursor moving on leaves the other's row locked.
        assert!(a.next().unwrap());
        assert_eq!(b.get_row().unwrap(), 1);
        assert_eq!(ledger.held_mode(conn.current_txn(), &row1), Some(LockMode::Shared));

        assert!(b.next().unwrap());
        assert_eq!(ledger.held_mode(conn.current_txn(), &row1), None);
    }

    #[test]
    fn test_position_predicates() {
        let (db, _) = setup(3);
        let conn = db.connect();
        let mut cursor = open(&conn, CursorType::ScrollSensitive, Concurrency::ReadOnly);

        assert!(cursor.is_before_first().unwrap());
        assert!(cursor.next().unwrap());
        assert!(!cursor.is_before_first().unwrap());
        assert!(cursor.is_first().unwrap());
        assert!(!cursor.is_last().unwrap());

        assert!(cursor.last().unwrap());
        assert!(cursor.is_last().unwrap());
        assert!(!cursor.is_first().unwrap());
        cursor.after_last().unwrap();
        assert!(cursor.is_after_last().unwrap());
        assert!(!cursor.is_last().unwrap());

        // An empty result is never before the first or after the last row.
        let (db, _) = setup(0);
        let conn = db.connect();
        let mut empty = open(&conn, CursorType::ScrollInsensitive, Concurrency::ReadOnly);
        assert!(!empty.is_before_first().unwrap());
        assert!(!empty.next().unwrap());
        assert!(!empty.is_after_last().unwrap());

        let forward = open(&conn, CursorType::ForwardOnly, Concurrency::ReadOnly);
        assert_eq!(forward.is_first().unwrap_err().sql_state(), "XJ061");
    }

    #[test]
    fn test_fetch_direction_and_size() {
        let (db, _) = setup(2);
        let conn = db.connect();

        let mut forward = open(&conn, CursorType::ForwardOnly, Concurrency::ReadOnly);
        assert_eq!(forward.get_fetch_direction().unwrap(), FetchDirection::Forward);
        forward.set_fetch_direction(FetchDirection::Forward).unwrap();
        let err = forward.set_fetch_direction(FetchDirection::Reverse).unwrap_err();
        assert_eq!(err.sql_state(), "XJ061");

        let mut scroll = open(&conn, CursorType::ScrollInsensitive, Concurrency::ReadOnly);
        scroll.set_fetch_direction(FetchDirection::Reverse).unwrap();
        assert_eq!(scroll.get_fetch_direction().unwrap(), FetchDirection::Reverse);
        assert!(scroll.last().unwrap());
        assert!(scroll.previous().unwrap());

        assert_eq!(forward.get_fetch_size().unwrap(), db.config().cursor.fetch_size);
        forward.set_fetch_size(0).unwrap();
        assert_eq!(forward.get_fetch_size().unwrap(), db.config().cursor.fetch_size);
        forward.set_fetch_size(1).unwrap();
        assert_eq!(forward.get_fetch_size().unwrap(), 1);
        assert!(forward.next().unwrap());
        assert!(forward.next().unwrap());
        assert!(!forward.next().unwrap());
    }

    #[test]
    fn test_metadata() {
        let (db, _) = setup(1);
        let conn = db.connect();
        let cursor = open(&conn, CursorType::ForwardOnly, Concurrency::Updatable);
        let meta = cursor.metadata().unwrap();

        assert_eq!(meta.column_count(), 4);
        assert_eq!(meta.column_type(4).unwrap(), DataType::Clob);
        assert!(meta.is_writable(1).unwrap());
        assert!(!meta.is_nullable(1).unwrap());
    }
}
