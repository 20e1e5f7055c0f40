//! The row source contract.
//!
//! A row source is the query executor the cursor engine pulls rows from. It
//! is an external collaborator: the engine only needs to run a query, look
//! up a single row by id for sensitive re-fetches, and apply changes to a
//! row identified by id.

mod memory;

use std::collections::BTreeSet;
use std::fmt;

use tessera_common::types::{RowId, TableId};
use tessera_common::TesseraResult;

use crate::metadata::MetadataLevel;
use crate::row::Row;
use crate::value::{DataType, Value};

pub use memory::{IndexDef, MemorySource, TableDef};

/// Rows produced by executing a query. Rows deleted after execution
/// started are skipped.
pub type RowStream = Box<dyn Iterator<Item = Row> + Send>;

/// Description of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Column type.
    pub data_type: DataType,
    /// Whether NULL is allowed.
    pub nullable: bool,
}

impl ColumnInfo {
    /// Creates a column description.
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// A single-table query.
///
/// ```rust
/// use tessera_cursor::source::Query;
///
/// let query = Query::table("docs").select(&["id", "body"]).using_index("docs_pk");
/// assert_eq!(query.to_string(), "SELECT id, body FROM docs --USING INDEX docs_pk");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: String,
    columns: Option<Vec<String>>,
    index: Option<String>,
    distinct: bool,
}

impl Query {
    /// Selects every column of a table.
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table: name.into(),
            columns: None,
            index: None,
            distinct: false,
        }
    }

    /// Restricts the projection to the named columns.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| (*c).to_string()).collect());
        self
    }

    /// Scans through the named index, returning rows in index order.
    pub fn using_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Makes the query `SELECT DISTINCT`, which cannot be updated.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Returns the table name.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Returns the projected column names, if restricted.
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// Returns the index hint.
    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    /// Returns true for `SELECT DISTINCT`.
    pub fn is_distinct(&self) -> bool {
        self.distinct
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        match &self.columns {
            Some(columns) => write!(f, "{}", columns.join(", "))?,
            None => write!(f, "*")?,
        }
        write!(f, " FROM {}", self.table)?;
        if let Some(index) = &self.index {
            write!(f, " --USING INDEX {}", index)?;
        }
        Ok(())
    }
}

/// Result of applying changes to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// The row's new version.
    pub version: u64,
    /// Bytes of replaced LOB values awaiting post-commit reclamation.
    pub retired_lob_bytes: usize,
}

/// The query executor consumed by the cursor engine.
pub trait RowSource: Send + Sync {
    /// Describes the columns a query returns.
    fn describe(&self, query: &Query) -> TesseraResult<Vec<ColumnInfo>>;

    /// Runs a query.
    fn execute(&self, query: &Query) -> TesseraResult<RowStream>;

    /// Returns true if rows of this query can be updated in place.
    fn supports_positioned_update(&self, query: &Query) -> bool;

    /// Returns the table columns forming the unique key the query's rows
    /// are identified by. Empty when the table has no primary key or
    /// unique index.
    fn key_columns(&self, query: &Query) -> TesseraResult<BTreeSet<usize>>;

    /// Returns the table the query reads.
    fn table_id(&self, query: &Query) -> TesseraResult<TableId>;

    /// Reads the current state of one row, projected like the query.
    /// Returns `None` if the row no longer exists.
    fn fetch(&self, query: &Query, row_id: RowId) -> TesseraResult<Option<Row>>;

    /// Applies changes given as (0-based result column, value). Returns
    /// `None` if the row no longer exists.
    fn update(
        &self,
        query: &Query,
        row_id: RowId,
        changes: &[(usize, Value)],
    ) -> TesseraResult<Option<UpdateOutcome>>;

    /// Deletes a row. Its space is reclaimed later by [`RowSource::reclaim`].
    fn delete(&self, query: &Query, row_id: RowId) -> TesseraResult<bool>;

    /// Post-commit space reclamation for a row. Returns the bytes freed.
    fn reclaim(&self, _table: TableId, _row_id: RowId) -> TesseraResult<usize> {
        Ok(0)
    }

    /// Capability level of the metadata this source can answer.
    fn metadata_level(&self) -> MetadataLevel {
        MetadataLevel::Base
    }
}
