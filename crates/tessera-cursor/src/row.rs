//! Rows as produced by a row source.

use tessera_common::types::RowId;

use crate::value::Value;

/// A row of a query result.
///
/// `row_id` is stable for the lifetime of the underlying row. `version`
/// changes on every update so that a cursor can tell whether the row was
/// modified since it was fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    row_id: RowId,
    version: u64,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row.
    pub fn new(row_id: RowId, version: u64, values: Vec<Value>) -> Self {
        Self {
            row_id,
            version,
            values,
        }
    }

    /// Returns the row id.
    pub fn row_id(&self) -> RowId {
        self.row_id
    }

    /// Returns the row version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the number of columns.
    pub fn num_columns(&self) -> usize {
        self.values.len()
    }

    /// Returns the value at a 0-based index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Returns the values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Applies changes (0-based column, value) and records the new version.
    pub fn apply(&mut self, changes: &[(usize, Value)], version: u64) {
        for (index, value) in changes {
            if let Some(slot) = self.values.get_mut(*index) {
                *slot = value.clone();
            }
        }
        self.version = version;
    }
}
