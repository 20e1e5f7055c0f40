//! The row buffer: one materialized row plus staged updates.

use std::collections::BTreeMap;

use tessera_common::types::RowId;

use crate::row::Row;
use crate::value::Value;

/// What the cursor is positioned on.
#[derive(Debug, Clone, Default)]
enum Slot {
    /// Not on a row.
    #[default]
    Empty,
    /// A readable row.
    Row(Row),
    /// A row that was deleted after the result was produced.
    Hole(RowId),
}

/// Values of the row at the current cursor position.
///
/// Updates are staged here column by column and only reach the row source
/// when the cursor applies them. Getters see staged values.
#[derive(Debug, Default)]
pub struct RowBuffer {
    slot: Slot,
    pending: BTreeMap<usize, Value>,
    updated: bool,
    deleted: bool,
}

impl RowBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a row. `updated` records a change made through this cursor.
    pub fn load(&mut self, row: Row, updated: bool) {
        self.slot = Slot::Row(row);
        self.pending.clear();
        self.updated = updated;
        self.deleted = false;
    }

    /// Positions on a deleted row.
    pub fn load_hole(&mut self, row_id: RowId, updated: bool) {
        self.slot = Slot::Hole(row_id);
        self.pending.clear();
        self.updated = updated;
        self.deleted = true;
    }

    /// Clears the buffer when the cursor leaves the rows.
    pub fn clear(&mut self) {
        self.slot = Slot::Empty;
        self.pending.clear();
        self.updated = false;
        self.deleted = false;
    }

    /// Returns the readable row, if any.
    pub fn row(&self) -> Option<&Row> {
        match &self.slot {
            Slot::Row(row) => Some(row),
            _ => None,
        }
    }

    /// Returns the id of the row or hole under the cursor.
    pub fn row_id(&self) -> Option<RowId> {
        match &self.slot {
            Slot::Row(row) => Some(row.row_id()),
            Slot::Hole(row_id) => Some(*row_id),
            Slot::Empty => None,
        }
    }

    /// Returns the value of a 0-based column, staged value first.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.pending
            .get(&index)
            .or_else(|| self.row().and_then(|r| r.get(index)))
    }

    /// Returns true if the column's value comes from a staged update.
    pub fn is_staged(&self, index: usize) -> bool {
        self.pending.contains_key(&index)
    }

    /// Stages a new value for a 0-based column.
    pub fn stage(&mut self, index: usize, value: Value) {
        self.pending.insert(index, value);
    }

    /// Returns true if there are staged values.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Returns the staged changes in column order.
    pub fn pending(&self) -> Vec<(usize, Value)> {
        self.pending
            .iter()
            .map(|(index, value)| (*index, value.clone()))
            .collect()
    }

    /// Discards staged values.
    pub fn cancel(&mut self) {
        self.pending.clear();
    }

    /// Records that changes were written to the source. Staged values are
    /// left alone.
    pub fn mark_updated(&mut self, changes: &[(usize, Value)], version: u64) {
        if let Slot::Row(row) = &mut self.slot {
            row.apply(changes, version);
        }
        self.updated = true;
    }

    /// Records that the row was deleted, leaving a hole.
    pub fn mark_deleted(&mut self) {
        if let Some(row_id) = self.row_id() {
            self.slot = Slot::Hole(row_id);
        }
        self.pending.clear();
        self.deleted = true;
    }

    /// Whether the current row was updated through this cursor.
    pub fn row_updated(&self) -> bool {
        self.updated
    }

    /// Whether the current row has been deleted.
    pub fn row_deleted(&self) -> bool {
        self.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        Row::new(RowId::new(7), 1, vec![Value::Int(1), Value::string("a")])
    }

    #[test]
    fn test_staged_values_shadow_row() {
        let mut buffer = RowBuffer::new();
        buffer.load(row(), false);
        buffer.stage(1, Value::string("b"));

        assert_eq!(buffer.value(1), Some(&Value::string("b")));
        assert!(buffer.is_staged(1));
        assert_eq!(buffer.pending(), vec![(1, Value::string("b"))]);

        buffer.cancel();
        assert_eq!(buffer.value(1), Some(&Value::string("a")));
        assert!(!buffer.has_pending());
    }

    #[test]
    fn test_mark_updated_applies_changes() {
        let mut buffer = RowBuffer::new();
        buffer.load(row(), false);
        let changes = vec![(0, Value::Int(9))];
        buffer.stage(1, Value::string("z"));
        buffer.mark_updated(&changes, 5);

        assert!(buffer.row_updated());
        assert!(buffer.has_pending());
        assert_eq!(buffer.row().unwrap().version(), 5);
        assert_eq!(buffer.value(0), Some(&Value::Int(9)));
    }

    #[test]
    fn test_delete_leaves_hole() {
        let mut buffer = RowBuffer::new();
        buffer.load(row(), false);
        buffer.mark_deleted();

        assert!(buffer.row_deleted());
        assert!(buffer.row().is_none());
        assert_eq!(buffer.row_id(), Some(RowId::new(7)));
        assert_eq!(buffer.value(0), None);

        buffer.clear();
        assert_eq!(buffer.row_id(), None);
        assert!(!buffer.row_deleted());
    }
}
