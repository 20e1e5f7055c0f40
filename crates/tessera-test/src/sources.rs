use std::collections::BTreeSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_common::types::{RowId, TableId};
use tessera_common::TesseraResult;
use tessera_cursor::source::{ColumnInfo, MemorySource, RowStream, UpdateOutcome};
use tessera_cursor::{MetadataLevel, Query, Row, RowSource, Value};

struct Gate {
    entered: Sender<()>,
    release: Receiver<()>,
}

/// Wraps a [`MemorySource`]; once armed, the next query's first row pull
/// signals that it started and then blocks until released.
pub struct GatedSource {
    inner: Arc<MemorySource>,
    gate: Mutex<Option<Gate>>,
}

impl GatedSource {
    /// Wraps a source.
    pub fn new(inner: Arc<MemorySource>) -> Self {
        Self {
            inner,
            gate: Mutex::new(None),
        }
    }

    /// Arms the gate for the next executed query. Returns a receiver that
    /// fires when a pull is blocked, and a sender that lets it continue.
    pub fn arm(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock() = Some(Gate {
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }
}

struct GatedStream {
    inner: RowStream,
    gate: Option<Gate>,
}

impl Iterator for GatedStream {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        if let Some(gate) = self.gate.take() {
            tracing::debug!("Gated stream holding its first pull");
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
        }
        self.inner.next()
    }
}

impl RowSource for GatedSource {
    fn describe(&self, query: &Query) -> TesseraResult<Vec<ColumnInfo>> {
        self.inner.describe(query)
    }

    fn execute(&self, query: &Query) -> TesseraResult<RowStream> {
        let inner = self.inner.execute(query)?;
        Ok(Box::new(GatedStream {
            inner,
            gate: self.gate.lock().take(),
        }))
    }

    fn supports_positioned_update(&self, query: &Query) -> bool {
        self.inner.supports_positioned_update(query)
    }

    fn key_columns(&self, query: &Query) -> TesseraResult<BTreeSet<usize>> {
        self.inner.key_columns(query)
    }

    fn table_id(&self, query: &Query) -> TesseraResult<TableId> {
        self.inner.table_id(query)
    }

    fn fetch(&self, query: &Query, row_id: RowId) -> TesseraResult<Option<Row>> {
        self.inner.fetch(query, row_id)
    }

    fn update(
        &self,
        query: &Query,
        row_id: RowId,
        changes: &[(usize, Value)],
    ) -> TesseraResult<Option<UpdateOutcome>> {
        self.inner.update(query, row_id, changes)
    }

    fn delete(&self, query: &Query, row_id: RowId) -> TesseraResult<bool> {
        self.inner.delete(query, row_id)
    }

    fn reclaim(&self, table: TableId, row_id: RowId) -> TesseraResult<usize> {
        self.inner.reclaim(table, row_id)
    }

    fn metadata_level(&self) -> MetadataLevel {
        self.inner.metadata_level()
    }
}
