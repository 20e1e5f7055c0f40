//! Row materialization policies.
//!
//! - Forward-only cursors pull rows from the source stream in batches of
//!   `fetch_size` and never look back.
//! - Insensitive cursors copy every row they reach into a private snapshot.
//!   Later changes made by others are invisible; changes made through the
//!   cursor are applied to the snapshot.
//! - Sensitive cursors remember only row ids (a keyset) and re-read the row
//!   from the source every time they land on it. A row that disappeared
//!   shows up as a hole.
//!
//! Scrollable results are filled lazily: the source stream is consumed
//! only as far as the cursor has scrolled.

use std::collections::VecDeque;

use tessera_common::types::RowId;
use tessera_common::TesseraResult;

use crate::row::Row;
use crate::source::{Query, RowSource, RowStream};
use crate::value::Value;

/// A row the cursor is about to position on.
#[derive(Debug)]
pub(crate) enum Fetched {
    /// A readable row, with whether it was updated through the cursor.
    Row(Row, bool),
    /// A deleted row, with whether it was updated before deletion.
    Hole(RowId, bool),
}

pub(crate) struct ForwardRows {
    stream: Option<RowStream>,
    batch: VecDeque<Row>,
    fetch_size: usize,
    fetched: usize,
}

impl ForwardRows {
    fn refill(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        for _ in 0..self.fetch_size {
            match stream.next() {
                Some(row) => self.batch.push_back(row),
                None => {
                    self.stream = None;
                    break;
                }
            }
        }
    }

    /// Returns the next row and its 1-based row number.
    pub(crate) fn next_row(&mut self) -> Option<(usize, Row)> {
        if self.batch.is_empty() {
            self.refill();
        }
        let row = self.batch.pop_front()?;
        self.fetched += 1;
        Some((self.fetched, row))
    }

    /// Takes back the number of a row that turned out to be deleted.
    pub(crate) fn skip_deleted(&mut self) {
        self.fetched = self.fetched.saturating_sub(1);
    }
}

struct Entry {
    row_id: RowId,
    /// Snapshot copy; `None` for sensitive cursors.
    row: Option<Row>,
    updated: bool,
    deleted: bool,
}

pub(crate) struct ScrollRows {
    sensitive: bool,
    entries: Vec<Entry>,
    stream: Option<RowStream>,
}

impl ScrollRows {
    fn push(&mut self, row: Row) {
        let row_id = row.row_id();
        let row = if self.sensitive { None } else { Some(row) };
        self.entries.push(Entry {
            row_id,
            row,
            updated: false,
            deleted: false,
        });
    }

    /// Pulls rows until at least `n` are known. Returns false if the result
    /// has fewer than `n` rows.
    pub(crate) fn fill_to(&mut self, n: usize) -> bool {
        while self.entries.len() < n {
            let Some(stream) = self.stream.as_mut() else {
                return false;
            };
            match stream.next() {
                Some(row) => self.push(row),
                None => self.stream = None,
            }
        }
        true
    }

    /// Pulls every remaining row and returns the result size.
    pub(crate) fn len(&mut self) -> usize {
        if let Some(stream) = self.stream.take() {
            for row in stream {
                self.push(row);
            }
        }
        self.entries.len()
    }

    /// Row id at a 1-based index already filled.
    pub(crate) fn row_id(&self, index: usize) -> Option<RowId> {
        self.entries.get(index.checked_sub(1)?).map(|e| e.row_id)
    }

    /// Reads the row at a 1-based index already filled.
    pub(crate) fn fetch(
        &self,
        index: usize,
        source: &dyn RowSource,
        query: &Query,
    ) -> TesseraResult<Option<Fetched>> {
        let Some(entry) = index.checked_sub(1).and_then(|i| self.entries.get(i)) else {
            return Ok(None);
        };
        if entry.deleted {
            return Ok(Some(Fetched::Hole(entry.row_id, entry.updated)));
        }
        let fetched = match &entry.row {
            Some(row) => Fetched::Row(row.clone(), entry.updated),
            None => match source.fetch(query, entry.row_id)? {
                Some(row) => Fetched::Row(row, entry.updated),
                None => Fetched::Hole(entry.row_id, entry.updated),
            },
        };
        Ok(Some(fetched))
    }

    fn entry_mut(&mut self, index: usize) -> Option<&mut Entry> {
        self.entries.get_mut(index.checked_sub(1)?)
    }
}

/// How a cursor obtains its rows.
pub(crate) enum Materializer {
    Forward(ForwardRows),
    Scroll(ScrollRows),
}

impl Materializer {
    pub(crate) fn forward(stream: RowStream, fetch_size: usize) -> Self {
        Materializer::Forward(ForwardRows {
            stream: Some(stream),
            batch: VecDeque::new(),
            fetch_size: fetch_size.max(1),
            fetched: 0,
        })
    }

    pub(crate) fn insensitive(stream: RowStream) -> Self {
        Materializer::Scroll(ScrollRows {
            sensitive: false,
            entries: Vec::new(),
            stream: Some(stream),
        })
    }

    pub(crate) fn sensitive(stream: RowStream) -> Self {
        Materializer::Scroll(ScrollRows {
            sensitive: true,
            entries: Vec::new(),
            stream: Some(stream),
        })
    }

    /// Records changes applied through the cursor to the row at `index`.
    pub(crate) fn mark_updated(&mut self, index: usize, changes: &[(usize, Value)], version: u64) {
        if let Materializer::Scroll(rows) = self {
            if let Some(entry) = rows.entry_mut(index) {
                entry.updated = true;
                if let Some(row) = entry.row.as_mut() {
                    row.apply(changes, version);
                }
            }
        }
    }

    /// Records that the row at `index` was deleted through the cursor.
    pub(crate) fn mark_deleted(&mut self, index: usize) {
        if let Materializer::Scroll(rows) = self {
            if let Some(entry) = rows.entry_mut(index) {
                entry.deleted = true;
                entry.row = None;
            }
        }
    }

    /// Changes how many rows a forward-only cursor pulls per batch.
    pub(crate) fn set_fetch_size(&mut self, rows: usize) {
        if let Materializer::Forward(forward) = self {
            forward.fetch_size = rows.max(1);
        }
    }

    /// Drops the source stream and any buffered rows.
    pub(crate) fn close(&mut self) {
        match self {
            Materializer::Forward(rows) => {
                rows.stream = None;
                rows.batch.clear();
            }
            Materializer::Scroll(rows) => {
                rows.stream = None;
                rows.entries.clear();
            }
        }
    }
}
