//! Cursor state machine: positioning, getters and row mutation.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tessera_common::constants::MAX_CURSOR_NAME_LENGTH;
use tessera_common::types::{CursorId, RowId, TableId, TxnId};
use tessera_common::TesseraError;
use tessera_txn::{LockMode, ResourceId};

use super::materialize::{Fetched, Materializer, ScrollRows};
use super::{not_scrollable, Concurrency, CursorOptions, CursorType, FetchDirection, Position};
use crate::buffer::RowBuffer;
use crate::connection::Session;
use crate::lob::{LobKind, LobLocator, LocatorCache};
use crate::metadata::ResultMetadata;
use crate::source::{Query, RowSource};
use crate::stream::{drain_stream, BinaryStream, CharacterStream, StreamGate};
use crate::value::{DataType, Value};
use crate::CursorResult;

/// Everything a cursor owns. Guarded by the cursor's mutex.
pub(crate) struct CursorState {
    id: CursorId,
    name: String,
    options: CursorOptions,
    query: Query,
    source: Arc<dyn RowSource>,
    session: Arc<Session>,
    table_id: TableId,
    metadata: ResultMetadata,
    rows: Materializer,
    position: Position,
    /// Set by the first navigation call; the name is fixed from then on.
    moved: bool,
    buffer: RowBuffer,
    gate: StreamGate,
    locators: LocatorCache,
    was_null: bool,
    /// Row whose read lock is held for the current position.
    read_lock: Option<RowId>,
    fetch_direction: FetchDirection,
    fetch_size: usize,
    closed: Arc<AtomicBool>,
    finalized: bool,
}

impl CursorState {
    /// Executes the query and positions before the first row.
    pub(crate) fn open(
        session: Arc<Session>,
        source: Arc<dyn RowSource>,
        query: Query,
        options: CursorOptions,
        id: CursorId,
    ) -> CursorResult<Self> {
        let columns = source.describe(&query)?;
        if options.concurrency == Concurrency::Updatable {
            if !source.supports_positioned_update(&query) {
                return Err(TesseraError::QueryNotUpdatable {
                    reason: format!("'{}' cannot be updated in place", query),
                });
            }
            if source.key_columns(&query)?.is_empty() {
                return Err(TesseraError::QueryNotUpdatable {
                    reason: format!(
                        "table '{}' has no primary key or unique index",
                        query.table_name()
                    ),
                });
            }
        }

        let table_id = source.table_id(&query)?;
        session
            .ledger()
            .acquire(session.txn(), ResourceId::table(table_id), LockMode::IntentionShared)?;

        let stream = source.execute(&query)?;
        let config = session.config();
        let rows = match options.cursor_type {
            CursorType::ForwardOnly => Materializer::forward(stream, config.fetch_size),
            CursorType::ScrollInsensitive => Materializer::insensitive(stream),
            CursorType::ScrollSensitive => Materializer::sensitive(stream),
        };
        let name = format!("{}{}", config.cursor_name_prefix, id);
        let fetch_size = config.fetch_size;
        let closed = Arc::new(AtomicBool::new(false));

        tracing::debug!(
            "Opened cursor {} ({:?}, {:?}, {:?}) over {}",
            name,
            options.cursor_type,
            options.concurrency,
            options.holdability,
            query
        );

        Ok(Self {
            id,
            name,
            metadata: ResultMetadata::new(columns, options.is_updatable()),
            options,
            query,
            source,
            session,
            table_id,
            rows,
            position: Position::BeforeFirst,
            moved: false,
            buffer: RowBuffer::new(),
            gate: StreamGate::new(Arc::clone(&closed)),
            locators: LocatorCache::new(),
            was_null: false,
            read_lock: None,
            fetch_direction: FetchDirection::Forward,
            fetch_size,
            closed,
            finalized: false,
        })
    }

    pub(crate) fn id(&self) -> CursorId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn options(&self) -> &CursorOptions {
        &self.options
    }

    pub(crate) fn metadata(&self) -> &ResultMetadata {
        &self.metadata
    }

    pub(crate) fn closed_flag(&self) -> &Arc<AtomicBool> {
        &self.closed
    }

    pub(crate) fn position(&self) -> Position {
        self.position
    }

    pub(crate) fn was_null(&self) -> bool {
        self.was_null
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Fails if the cursor was closed, finishing a close requested from
    /// another thread.
    pub(crate) fn ensure_open(&mut self, operation: &str) -> CursorResult<()> {
        if self.closed.load(Ordering::Acquire) {
            self.close();
            return Err(TesseraError::closed(operation));
        }
        Ok(())
    }

    /// Closes the cursor: stream handles stop reading, locators are
    /// invalidated and the name is released. Locks stay with the
    /// transaction.
    pub(crate) fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.locators.invalidate_all();
        self.buffer.clear();
        self.rows.close();
        self.read_lock = None;
        self.session.registry().unregister(self.id);
        tracing::debug!("Closed cursor {}", self.name);
    }

    /// Called at transaction end for cursors that stay open.
    pub(crate) fn end_transaction(&mut self) {
        self.locators.invalidate_all();
        self.buffer.cancel();
        // The ledger dropped the transaction's locks.
        self.read_lock = None;
    }

    fn require_scrollable(&self, operation: &str) -> CursorResult<()> {
        if self.options.cursor_type.is_scrollable() {
            Ok(())
        } else {
            Err(not_scrollable(operation))
        }
    }

    fn require_updatable(&self, operation: &str) -> CursorResult<()> {
        if self.options.is_updatable() {
            Ok(())
        } else {
            Err(TesseraError::ResultSetNotUpdatable {
                operation: operation.to_string(),
            })
        }
    }

    fn txn(&self) -> TxnId {
        self.session.txn()
    }

    // =========================================================================
    // Positioning
    // =========================================================================

    fn takes_read_locks(&self) -> bool {
        self.options.cursor_type != CursorType::ScrollInsensitive
    }

    /// Holds an S lock on the row; other cursors of the connection reading
    /// the same row keep their own hold.
    fn lock_for_read(&mut self, row_id: RowId) -> CursorResult<()> {
        if self.read_lock == Some(row_id) {
            return Ok(());
        }
        self.release_read_lock();
        let resource = ResourceId::row(self.table_id, row_id);
        self.session.ledger().acquire_read_lock(self.txn(), resource)?;
        self.read_lock = Some(row_id);
        Ok(())
    }

    fn release_read_lock(&mut self) {
        if let Some(row_id) = self.read_lock.take() {
            let resource = ResourceId::row(self.table_id, row_id);
            self.session.ledger().release_read_lock(self.txn(), resource);
        }
    }

    /// Materializes a row at a 1-based position.
    fn enter_row(&mut self, index: usize, fetched: Fetched) {
        let row_id = match &fetched {
            Fetched::Row(row, _) => row.row_id(),
            Fetched::Hole(row_id, _) => *row_id,
        };
        self.gate.reset();
        self.locators.retain_row(row_id);
        match fetched {
            Fetched::Row(row, updated) => self.buffer.load(row, updated),
            Fetched::Hole(row_id, updated) => self.buffer.load_hole(row_id, updated),
        }
        self.position = Position::OnRow(index);
        tracing::trace!("Cursor {} on row {} ({:?})", self.name, index, row_id);
    }

    fn leave_rows(&mut self, position: Position) {
        self.gate.reset();
        self.buffer.clear();
        self.release_read_lock();
        self.position = position;
        tracing::trace!("Cursor {} at {:?}", self.name, position);
    }

    fn scroll_rows(&mut self, operation: &str) -> CursorResult<&mut ScrollRows> {
        match &mut self.rows {
            Materializer::Scroll(rows) => Ok(rows),
            Materializer::Forward(_) => Err(not_scrollable(operation)),
        }
    }

    fn result_len(&mut self, operation: &str) -> CursorResult<usize> {
        let len = self.scroll_rows(operation)?.len();
        self.ensure_open(operation)?;
        Ok(len)
    }

    /// Moves a scrollable cursor to a 1-based target. Targets below 1 land
    /// before the first row, targets past the end after the last.
    fn scroll_to(&mut self, target: i64, operation: &str) -> CursorResult<bool> {
        let Ok(index) = usize::try_from(target) else {
            self.leave_rows(Position::BeforeFirst);
            return Ok(false);
        };
        if index == 0 {
            self.leave_rows(Position::BeforeFirst);
            return Ok(false);
        }

        let available = self.scroll_rows(operation)?.fill_to(index);
        self.ensure_open(operation)?;
        if !available {
            self.leave_rows(Position::AfterLast);
            return Ok(false);
        }

        if self.takes_read_locks() {
            if let Some(row_id) = self.scroll_rows(operation)?.row_id(index) {
                self.lock_for_read(row_id)?;
            }
        }
        let fetched = match &self.rows {
            Materializer::Scroll(rows) => rows.fetch(index, self.source.as_ref(), &self.query)?,
            Materializer::Forward(_) => None,
        };
        self.ensure_open(operation)?;
        match fetched {
            Some(fetched) => {
                self.enter_row(index, fetched);
                Ok(true)
            }
            None => {
                self.leave_rows(Position::AfterLast);
                Ok(false)
            }
        }
    }

    pub(crate) fn next(&mut self) -> CursorResult<bool> {
        self.moved = true;
        if self.options.cursor_type.is_scrollable() {
            return match self.position {
                Position::BeforeFirst => self.scroll_to(1, "next"),
                Position::OnRow(k) => self.scroll_to(k as i64 + 1, "next"),
                Position::AfterLast => Ok(false),
            };
        }

        if self.position == Position::AfterLast {
            tracing::debug!("Forward-only cursor {} exhausted, closing", self.name);
            self.close();
            return Ok(false);
        }

        // Forward-only cursors have no holes: rows deleted after they were
        // batched are skipped.
        loop {
            let next = match &mut self.rows {
                Materializer::Forward(rows) => rows.next_row(),
                Materializer::Scroll(_) => None,
            };
            self.ensure_open("next")?;
            let Some((number, row)) = next else {
                self.leave_rows(Position::AfterLast);
                return Ok(false);
            };

            // Re-read under the read lock so the values are the committed ones.
            let row_id = row.row_id();
            self.lock_for_read(row_id)?;
            let current = self.source.fetch(&self.query, row_id)?;
            self.ensure_open("next")?;
            match current {
                Some(current) => {
                    self.enter_row(number, Fetched::Row(current, false));
                    return Ok(true);
                }
                None => {
                    tracing::trace!("Cursor {} skipping deleted {:?}", self.name, row_id);
                    self.release_read_lock();
                    if let Materializer::Forward(rows) = &mut self.rows {
                        rows.skip_deleted();
                    }
                }
            }
        }
    }

    pub(crate) fn previous(&mut self) -> CursorResult<bool> {
        self.require_scrollable("previous")?;
        self.moved = true;
        match self.position {
            Position::BeforeFirst => Ok(false),
            Position::OnRow(k) => self.scroll_to(k as i64 - 1, "previous"),
            Position::AfterLast => {
                let len = self.result_len("previous")?;
                self.scroll_to(len as i64, "previous")
            }
        }
    }

    pub(crate) fn first(&mut self) -> CursorResult<bool> {
        self.require_scrollable("first")?;
        self.moved = true;
        self.scroll_to(1, "first")
    }

    pub(crate) fn last(&mut self) -> CursorResult<bool> {
        self.require_scrollable("last")?;
        self.moved = true;
        let len = self.result_len("last")?;
        self.scroll_to(len as i64, "last")
    }

    pub(crate) fn absolute(&mut self, row: i64) -> CursorResult<bool> {
        self.require_scrollable("absolute")?;
        self.moved = true;
        if row >= 0 {
            return self.scroll_to(row, "absolute");
        }
        let len = self.result_len("absolute")? as i64;
        let target = len + 1 + row;
        if target < 1 {
            self.leave_rows(Position::BeforeFirst);
            return Ok(false);
        }
        self.scroll_to(target, "absolute")
    }

    pub(crate) fn relative(&mut self, rows: i64) -> CursorResult<bool> {
        self.require_scrollable("relative")?;
        self.moved = true;
        let base = match self.position {
            Position::BeforeFirst => 0,
            Position::OnRow(k) => k as i64,
            Position::AfterLast => self.result_len("relative")? as i64 + 1,
        };
        self.scroll_to(base.saturating_add(rows), "relative")
    }

    pub(crate) fn before_first(&mut self) -> CursorResult<()> {
        self.require_scrollable("before_first")?;
        self.moved = true;
        self.leave_rows(Position::BeforeFirst);
        Ok(())
    }

    pub(crate) fn after_last(&mut self) -> CursorResult<()> {
        self.require_scrollable("after_last")?;
        self.moved = true;
        // No effect on an empty result.
        let empty = !self.scroll_rows("after_last")?.fill_to(1);
        self.ensure_open("after_last")?;
        if !empty {
            self.leave_rows(Position::AfterLast);
        }
        Ok(())
    }

    pub(crate) fn row_number(&self) -> usize {
        match self.position {
            Position::OnRow(k) => k,
            Position::BeforeFirst | Position::AfterLast => 0,
        }
    }

    /// True if the result has at least one row.
    fn has_rows(&mut self, operation: &str) -> CursorResult<bool> {
        let any = self.scroll_rows(operation)?.fill_to(1);
        self.ensure_open(operation)?;
        Ok(any)
    }

    pub(crate) fn is_before_first(&mut self) -> CursorResult<bool> {
        self.require_scrollable("is_before_first")?;
        Ok(self.position == Position::BeforeFirst && self.has_rows("is_before_first")?)
    }

    pub(crate) fn is_after_last(&mut self) -> CursorResult<bool> {
        self.require_scrollable("is_after_last")?;
        Ok(self.position == Position::AfterLast && self.has_rows("is_after_last")?)
    }

    pub(crate) fn is_first(&mut self) -> CursorResult<bool> {
        self.require_scrollable("is_first")?;
        Ok(self.position == Position::OnRow(1))
    }

    pub(crate) fn is_last(&mut self) -> CursorResult<bool> {
        self.require_scrollable("is_last")?;
        let Position::OnRow(k) = self.position else {
            return Ok(false);
        };
        let more = self.scroll_rows("is_last")?.fill_to(k + 1);
        self.ensure_open("is_last")?;
        Ok(!more)
    }

    pub(crate) fn set_fetch_direction(&mut self, direction: FetchDirection) -> CursorResult<()> {
        if direction != FetchDirection::Forward {
            self.require_scrollable("set_fetch_direction")?;
        }
        self.fetch_direction = direction;
        Ok(())
    }

    pub(crate) fn fetch_direction(&self) -> FetchDirection {
        self.fetch_direction
    }

    pub(crate) fn set_fetch_size(&mut self, rows: usize) {
        if rows == 0 {
            return;
        }
        self.fetch_size = rows;
        self.rows.set_fetch_size(rows);
    }

    pub(crate) fn fetch_size(&self) -> usize {
        self.fetch_size
    }

    // =========================================================================
    // Getters
    // =========================================================================

    /// Converts a 1-based column to a 0-based index.
    fn column_index(&self, column: usize) -> CursorResult<usize> {
        let count = self.metadata.column_count();
        if column == 0 || column > count {
            return Err(TesseraError::InvalidColumnIndex {
                index: column,
                count,
            });
        }
        Ok(column - 1)
    }

    fn column_type(&self, index: usize) -> DataType {
        self.metadata.columns()[index].data_type
    }

    /// Reads a column of the current row and records NULL-ness.
    fn current(&mut self, column: usize) -> CursorResult<(usize, Value)> {
        let index = self.column_index(column)?;
        let value = self
            .buffer
            .value(index)
            .cloned()
            .ok_or(TesseraError::NoCurrentRow)?;
        self.was_null = value.is_null();
        Ok((index, value))
    }

    fn current_row_id(&self) -> CursorResult<RowId> {
        self.buffer.row_id().ok_or(TesseraError::NoCurrentRow)
    }

    pub(crate) fn get_value(&mut self, column: usize) -> CursorResult<Value> {
        Ok(self.current(column)?.1)
    }

    pub(crate) fn get_int(&mut self, column: usize) -> CursorResult<Option<i32>> {
        let (_, value) = self.current(column)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .to_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| TesseraError::type_mismatch("INTEGER", value.type_name()))
    }

    pub(crate) fn get_long(&mut self, column: usize) -> CursorResult<Option<i64>> {
        let (_, value) = self.current(column)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .to_i64()
            .map(Some)
            .ok_or_else(|| TesseraError::type_mismatch("BIGINT", value.type_name()))
    }

    pub(crate) fn get_double(&mut self, column: usize) -> CursorResult<Option<f64>> {
        let (_, value) = self.current(column)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .to_f64()
            .map(Some)
            .ok_or_else(|| TesseraError::type_mismatch("DOUBLE", value.type_name()))
    }

    pub(crate) fn get_boolean(&mut self, column: usize) -> CursorResult<Option<bool>> {
        let (_, value) = self.current(column)?;
        match value {
            Value::Null => Ok(None),
            Value::Boolean(b) => Ok(Some(b)),
            other => other
                .to_i64()
                .map(|v| Some(v != 0))
                .ok_or_else(|| TesseraError::type_mismatch("BOOLEAN", other.type_name())),
        }
    }

    pub(crate) fn get_string(&mut self, column: usize) -> CursorResult<Option<String>> {
        let (index, value) = self.current(column)?;
        if self.column_type(index).is_lob() {
            self.gate.check(column)?;
        }
        if value.is_null() {
            return Ok(None);
        }
        value
            .to_string_value()
            .map(Some)
            .ok_or_else(|| TesseraError::type_mismatch("VARCHAR", value.type_name()))
    }

    pub(crate) fn get_bytes(&mut self, column: usize) -> CursorResult<Option<Bytes>> {
        let (index, value) = self.current(column)?;
        if self.column_type(index).is_lob() {
            self.gate.check(column)?;
        }
        match value {
            Value::Null => Ok(None),
            Value::Bytes(bytes) | Value::Blob(bytes) => Ok(Some(bytes)),
            other => Err(TesseraError::type_mismatch("VARBINARY", other.type_name())),
        }
    }

    pub(crate) fn get_binary_stream(&mut self, column: usize) -> CursorResult<Option<BinaryStream>> {
        let (_, value) = self.current(column)?;
        let bytes = match value {
            Value::Null => None,
            Value::Bytes(bytes) | Value::Blob(bytes) => Some(bytes),
            other => return Err(TesseraError::type_mismatch("VARBINARY", other.type_name())),
        };
        let handle = self.gate.open_stream(self.current_row_id()?, column)?;
        Ok(bytes.map(|bytes| BinaryStream::new(bytes, handle)))
    }

    pub(crate) fn get_character_stream(
        &mut self,
        column: usize,
    ) -> CursorResult<Option<CharacterStream>> {
        let (_, value) = self.current(column)?;
        let text: Option<Arc<str>> = match value {
            Value::Null => None,
            Value::String(s) => Some(Arc::from(s)),
            Value::Clob(text) => Some(text),
            other => return Err(TesseraError::type_mismatch("VARCHAR", other.type_name())),
        };
        let handle = self.gate.open_stream(self.current_row_id()?, column)?;
        Ok(text.map(|text| CharacterStream::new(text, handle)))
    }

    pub(crate) fn get_lob(&mut self, column: usize, kind: LobKind) -> CursorResult<Option<LobLocator>> {
        let (index, value) = self.current(column)?;
        let matches = match (&value, kind) {
            (Value::Null, _) => true,
            (Value::Blob(_), LobKind::Binary) | (Value::Clob(_), LobKind::Character) => true,
            _ => false,
        };
        if !matches {
            return Err(TesseraError::type_mismatch(kind.to_string(), value.type_name()));
        }

        let row_id = self.current_row_id()?;
        self.gate.open_stream(row_id, column)?;
        if value.is_null() {
            return Ok(None);
        }
        let locator = if self.buffer.is_staged(index) {
            self.locators.uncached(row_id, column, &value)?
        } else {
            self.locators.materialize(row_id, column, &value)?
        };
        Ok(Some(locator))
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    fn require_row(&self) -> CursorResult<(RowId, u64)> {
        self.buffer
            .row()
            .map(|row| (row.row_id(), row.version()))
            .ok_or(TesseraError::NoCurrentRow)
    }

    pub(crate) fn stage(&mut self, operation: &str, column: usize, value: Value) -> CursorResult<()> {
        self.require_updatable(operation)?;
        let index = self.column_index(column)?;
        self.require_row()?;
        let value = value.coerce(self.column_type(index))?;
        self.buffer.stage(index, value);
        Ok(())
    }

    pub(crate) fn stage_binary_stream<R: Read + ?Sized>(
        &mut self,
        column: usize,
        reader: &mut R,
        length: Option<u64>,
    ) -> CursorResult<()> {
        let operation = "update_binary_stream";
        self.require_updatable(operation)?;
        self.column_index(column)?;
        self.require_row()?;
        let max = self.session.config().max_lob_length;
        let data = drain_stream(reader, length, max)?;
        self.stage(operation, column, Value::Blob(Bytes::from(data)))
    }

    pub(crate) fn stage_character_stream<R: Read + ?Sized>(
        &mut self,
        column: usize,
        reader: &mut R,
        length: Option<u64>,
    ) -> CursorResult<()> {
        let operation = "update_character_stream";
        self.require_updatable(operation)?;
        self.column_index(column)?;
        self.require_row()?;
        let max = self.session.config().max_lob_length;
        let data = drain_stream(reader, length, max)?;
        let text = String::from_utf8(data)
            .map_err(|e| TesseraError::invalid_argument(format!("character stream is not UTF-8: {}", e)))?;
        self.stage(operation, column, Value::clob(text))
    }

    pub(crate) fn cancel_row_updates(&mut self) -> CursorResult<()> {
        self.require_updatable("cancel_row_updates")?;
        self.buffer.cancel();
        Ok(())
    }

    pub(crate) fn row_updated(&mut self) -> CursorResult<bool> {
        self.current_row_id()?;
        Ok(self.buffer.row_updated())
    }

    pub(crate) fn row_deleted(&mut self) -> CursorResult<bool> {
        self.current_row_id()?;
        Ok(self.buffer.row_deleted())
    }

    pub(crate) fn update_row(&mut self) -> CursorResult<()> {
        self.require_updatable("update_row")?;
        let (row_id, version) = self.require_row()?;
        if !self.buffer.has_pending() {
            return Ok(());
        }
        let changes = self.buffer.pending();
        self.apply_update(row_id, version, &changes)?;
        self.buffer.cancel();
        Ok(())
    }

    /// `UPDATE ... WHERE CURRENT OF`. Changes are (1-based column, value).
    pub(crate) fn positioned_update(&mut self, changes: Vec<(usize, Value)>) -> CursorResult<()> {
        self.require_updatable("UPDATE WHERE CURRENT OF")?;
        let (row_id, version) = self.require_row()?;
        let mut resolved = Vec::with_capacity(changes.len());
        for (column, value) in changes {
            let index = self.column_index(column)?;
            resolved.push((index, value.coerce(self.column_type(index))?));
        }
        self.apply_update(row_id, version, &resolved)
    }

    /// Fails unless the source still holds the version the cursor read.
    fn check_unchanged(&self, row_id: RowId, version: u64) -> CursorResult<()> {
        match self.source.fetch(&self.query, row_id)? {
            Some(row) if row.version() == version => Ok(()),
            _ => Err(TesseraError::CursorOperationConflict { row_id }),
        }
    }

    /// Takes IX on the table and X on the row.
    fn lock_for_write(&self, row_id: RowId, deferred: bool) -> CursorResult<()> {
        let ledger = self.session.ledger();
        let txn = self.txn();
        ledger.acquire(txn, ResourceId::table(self.table_id), LockMode::IntentionExclusive)?;
        let row = ResourceId::row(self.table_id, row_id);
        if deferred {
            ledger.acquire_deferred(txn, row, LockMode::Exclusive)?;
        } else {
            ledger.acquire(txn, row, LockMode::Exclusive)?;
        }
        Ok(())
    }

    /// Registers post-commit reclamation of the row's retired space.
    fn defer_reclaim(&self, row_id: RowId) {
        let source = Arc::clone(&self.source);
        let table_id = self.table_id;
        self.session.ledger().defer_work(
            self.txn(),
            Box::new(move || match source.reclaim(table_id, row_id) {
                Ok(freed) => tracing::debug!("Reclaimed {} bytes of {:?}", freed, row_id),
                Err(e) => tracing::warn!("Reclaiming {:?} failed: {}", row_id, e),
            }),
        );
    }

    fn apply_update(&mut self, row_id: RowId, version: u64, changes: &[(usize, Value)]) -> CursorResult<()> {
        self.lock_for_write(row_id, false)?;
        self.check_unchanged(row_id, version)?;

        let outcome = self
            .source
            .update(&self.query, row_id, changes)?
            .ok_or(TesseraError::CursorOperationConflict { row_id })?;
        if outcome.retired_lob_bytes > 0 {
            // Upgrades the X lock taken above to survive commit.
            self.lock_for_write(row_id, true)?;
            self.defer_reclaim(row_id);
        }

        self.buffer.mark_updated(changes, outcome.version);
        if let Position::OnRow(index) = self.position {
            self.rows.mark_updated(index, changes, outcome.version);
        }
        self.locators
            .invalidate_columns(row_id, changes.iter().map(|(index, _)| index + 1));
        tracing::debug!(
            "Cursor {} updated {:?} ({} columns, version {})",
            self.name,
            row_id,
            changes.len(),
            outcome.version
        );
        Ok(())
    }

    /// Deletes the current row. Used by `delete_row` and
    /// `DELETE ... WHERE CURRENT OF`.
    pub(crate) fn delete_current(&mut self, operation: &str) -> CursorResult<()> {
        self.require_updatable(operation)?;
        let (row_id, version) = self.require_row()?;
        self.lock_for_write(row_id, true)?;
        self.check_unchanged(row_id, version)?;
        if !self.source.delete(&self.query, row_id)? {
            return Err(TesseraError::CursorOperationConflict { row_id });
        }
        self.defer_reclaim(row_id);

        self.locators.invalidate_row(row_id);
        self.buffer.mark_deleted();
        if let Position::OnRow(index) = self.position {
            self.rows.mark_deleted(index);
        }
        tracing::debug!("Cursor {} deleted {:?}", self.name, row_id);
        Ok(())
    }

    // =========================================================================
    // Name
    // =========================================================================

    pub(crate) fn set_name(&mut self, name: &str) -> CursorResult<()> {
        if self.moved {
            return Err(TesseraError::invalid_argument(
                "cursor name can only be set before the first fetch",
            ));
        }
        validate_cursor_name(name)?;
        self.session.registry().rename(self.id, name)?;
        tracing::debug!("Cursor {} renamed to {}", self.name, name);
        self.name = name.to_string();
        Ok(())
    }
}

/// Checks a caller-supplied cursor name.
pub(crate) fn validate_cursor_name(name: &str) -> CursorResult<()> {
    if name.trim().is_empty() {
        return Err(TesseraError::invalid_argument("cursor name cannot be empty"));
    }
    if name.chars().count() > MAX_CURSOR_NAME_LENGTH {
        return Err(TesseraError::invalid_argument(format!(
            "cursor name longer than {} characters",
            MAX_CURSOR_NAME_LENGTH
        )));
    }
    Ok(())
}
