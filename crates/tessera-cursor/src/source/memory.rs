//! In-memory row source with primary keys and secondary indexes.
//!
//! Deleted rows become tombstones that stay in the table until
//! [`RowSource::reclaim`] purges them, and replaced LOB values are
//! accounted as retired space until the same call. This mirrors a storage
//! engine whose space reclamation runs after commit.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::RwLock;
use tessera_common::types::{RowId, TableId};
use tessera_common::{TesseraError, TesseraResult};

use super::{ColumnInfo, Query, RowSource, RowStream, UpdateOutcome};
use crate::metadata::MetadataLevel;
use crate::row::Row;
use crate::value::{DataType, Value};

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Index name.
    pub name: String,
    /// Indexed column names, in key order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// A table definition.
///
/// ```rust
/// use tessera_cursor::source::TableDef;
/// use tessera_cursor::DataType;
///
/// let def = TableDef::new("docs")
///     .column("id", DataType::Int, false)
///     .column("body", DataType::Clob, true)
///     .primary_key(&["id"]);
/// assert_eq!(def.columns().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    name: String,
    columns: Vec<ColumnInfo>,
    primary_key: Vec<String>,
    indexes: Vec<IndexDef>,
}

impl TableDef {
    /// Starts a table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Adds a column.
    pub fn column(mut self, name: &str, data_type: DataType, nullable: bool) -> Self {
        self.columns.push(ColumnInfo::new(name, data_type, nullable));
        self
    }

    /// Declares the primary key.
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Adds a secondary index.
    pub fn index(mut self, name: &str, columns: &[&str], unique: bool) -> Self {
        self.indexes.push(IndexDef {
            name: name.to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            unique,
        });
        self
    }

    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the columns.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }
}

#[derive(Debug)]
struct StoredRow {
    version: u64,
    values: Vec<Value>,
    deleted: bool,
}

#[derive(Debug)]
struct ResolvedIndex {
    name: String,
    columns: Vec<usize>,
    unique: bool,
}

#[derive(Debug)]
struct MemoryTable {
    id: TableId,
    def: TableDef,
    primary_key: Vec<usize>,
    indexes: Vec<ResolvedIndex>,
    rows: RwLock<BTreeMap<RowId, StoredRow>>,
    next_row_id: AtomicU64,
    /// Bytes of replaced or deleted LOB values per row, awaiting reclamation.
    retired: RwLock<HashMap<RowId, usize>>,
}

impl MemoryTable {
    fn column_index(&self, name: &str) -> TesseraResult<usize> {
        self.def
            .columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                TesseraError::invalid_argument(format!(
                    "column '{}' is not in table '{}'",
                    name, self.def.name
                ))
            })
    }

    fn projection(&self, query: &Query) -> TesseraResult<Vec<usize>> {
        match query.columns() {
            Some(names) => names.iter().map(|n| self.column_index(n)).collect(),
            None => Ok((0..self.def.columns.len()).collect()),
        }
    }

    fn unique_key(&self) -> Option<&[usize]> {
        if !self.primary_key.is_empty() {
            return Some(&self.primary_key);
        }
        self.indexes
            .iter()
            .find(|i| i.unique)
            .map(|i| i.columns.as_slice())
    }

    fn index(&self, name: &str) -> TesseraResult<&ResolvedIndex> {
        self.indexes
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                TesseraError::invalid_argument(format!(
                    "index '{}' does not exist on table '{}'",
                    name, self.def.name
                ))
            })
    }

    /// Rejects `values` if they duplicate a unique key of another live row.
    fn check_unique(
        &self,
        rows: &BTreeMap<RowId, StoredRow>,
        values: &[Value],
        skip: Option<RowId>,
    ) -> TesseraResult<()> {
        let keys = std::iter::once(self.primary_key.as_slice())
            .filter(|k| !k.is_empty())
            .chain(self.indexes.iter().filter(|i| i.unique).map(|i| i.columns.as_slice()));

        for key in keys {
            if key.iter().any(|c| values[*c].is_null()) {
                continue;
            }
            let clash = rows.iter().any(|(id, row)| {
                Some(*id) != skip
                    && !row.deleted
                    && key.iter().all(|c| row.values[*c] == values[*c])
            });
            if clash {
                return Err(TesseraError::invalid_argument(format!(
                    "duplicate key in unique index on table '{}'",
                    self.def.name
                )));
            }
        }
        Ok(())
    }

    fn coerce_row(&self, values: Vec<Value>) -> TesseraResult<Vec<Value>> {
        if values.len() != self.def.columns.len() {
            return Err(TesseraError::invalid_argument(format!(
                "table '{}' has {} columns, {} values given",
                self.def.name,
                self.def.columns.len(),
                values.len()
            )));
        }
        values
            .into_iter()
            .zip(&self.def.columns)
            .map(|(value, column)| {
                if value.is_null() && !column.nullable {
                    return Err(TesseraError::invalid_argument(format!(
                        "column '{}' cannot be NULL",
                        column.name
                    )));
                }
                value.coerce(column.data_type)
            })
            .collect()
    }

    fn project(&self, row_id: RowId, stored: &StoredRow, projection: &[usize]) -> Row {
        let values = projection
            .iter()
            .map(|c| stored.values[*c].clone())
            .collect();
        Row::new(row_id, stored.version, values)
    }
}

struct MemoryStream {
    table: Arc<MemoryTable>,
    projection: Vec<usize>,
    row_ids: std::vec::IntoIter<RowId>,
}

impl Iterator for MemoryStream {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        let rows = self.table.rows.read();
        for row_id in self.row_ids.by_ref() {
            match rows.get(&row_id) {
                Some(stored) if !stored.deleted => {
                    return Some(self.table.project(row_id, stored, &self.projection));
                }
                _ => continue,
            }
        }
        None
    }
}

/// Ordering used for index scans. NULLs sort first.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Clob(x), Value::Clob(y)) => x.cmp(y),
        (Value::Bytes(x) | Value::Blob(x), Value::Bytes(y) | Value::Blob(y)) => x.cmp(y),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        _ => match (a.to_i64(), b.to_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => a
                .to_f64()
                .partial_cmp(&b.to_f64())
                .unwrap_or(Ordering::Equal),
        },
    }
}

/// An in-memory [`RowSource`].
#[derive(Debug, Default)]
pub struct MemorySource {
    tables: RwLock<HashMap<String, Arc<MemoryTable>>>,
    next_table_id: AtomicU64,
    next_version: AtomicU64,
}

impl MemorySource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table.
    pub fn create_table(&self, def: TableDef) -> TesseraResult<TableId> {
        let key = def.name.to_ascii_lowercase();
        let mut tables = self.tables.write();
        if tables.contains_key(&key) {
            return Err(TesseraError::invalid_argument(format!(
                "table '{}' already exists",
                def.name
            )));
        }

        let id = TableId::new(self.next_table_id.fetch_add(1, AtomicOrdering::Relaxed) + 1);
        let mut table = MemoryTable {
            id,
            primary_key: Vec::new(),
            indexes: Vec::new(),
            def,
            rows: RwLock::new(BTreeMap::new()),
            next_row_id: AtomicU64::new(1),
            retired: RwLock::new(HashMap::new()),
        };
        table.primary_key = table
            .def
            .primary_key
            .iter()
            .map(|c| table.column_index(c))
            .collect::<TesseraResult<_>>()?;
        table.indexes = table
            .def
            .indexes
            .iter()
            .map(|i| {
                Ok(ResolvedIndex {
                    name: i.name.clone(),
                    columns: i
                        .columns
                        .iter()
                        .map(|c| table.column_index(c))
                        .collect::<TesseraResult<_>>()?,
                    unique: i.unique,
                })
            })
            .collect::<TesseraResult<_>>()?;

        tracing::debug!("Created table '{}' as {:?}", table.def.name, id);
        tables.insert(key, Arc::new(table));
        Ok(id)
    }

    fn table(&self, name: &str) -> TesseraResult<Arc<MemoryTable>> {
        self.tables
            .read()
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| TesseraError::invalid_argument(format!("table '{}' does not exist", name)))
    }

    fn table_by_id(&self, id: TableId) -> Option<Arc<MemoryTable>> {
        self.tables.read().values().find(|t| t.id == id).cloned()
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, AtomicOrdering::Relaxed) + 1
    }

    /// Inserts a row and returns its id.
    pub fn insert(&self, table: &str, values: Vec<Value>) -> TesseraResult<RowId> {
        let table = self.table(table)?;
        let values = table.coerce_row(values)?;
        let mut rows = table.rows.write();
        table.check_unique(&rows, &values, None)?;

        let row_id = RowId::new(table.next_row_id.fetch_add(1, AtomicOrdering::Relaxed));
        rows.insert(
            row_id,
            StoredRow {
                version: self.bump_version(),
                values,
                deleted: false,
            },
        );
        Ok(row_id)
    }

    /// Overwrites one column outside of any cursor, as another writer would.
    pub fn write_column(
        &self,
        table: &str,
        row_id: RowId,
        column: &str,
        value: Value,
    ) -> TesseraResult<bool> {
        let table = self.table(table)?;
        let index = table.column_index(column)?;
        let value = value.coerce(table.def.columns[index].data_type)?;
        let version = self.bump_version();
        let mut rows = table.rows.write();
        match rows.get_mut(&row_id) {
            Some(row) if !row.deleted => {
                row.values[index] = value;
                row.version = version;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Removes a row outright, as another writer would.
    pub fn remove(&self, table: &str, row_id: RowId) -> TesseraResult<bool> {
        let table = self.table(table)?;
        let removed = table.rows.write().remove(&row_id).is_some();
        Ok(removed)
    }

    /// Returns the current values of a live row.
    pub fn get(&self, table: &str, row_id: RowId) -> TesseraResult<Option<Vec<Value>>> {
        let table = self.table(table)?;
        let rows = table.rows.read();
        Ok(rows
            .get(&row_id)
            .filter(|r| !r.deleted)
            .map(|r| r.values.clone()))
    }

    /// Number of live rows.
    pub fn row_count(&self, table: &str) -> TesseraResult<usize> {
        let table = self.table(table)?;
        let rows = table.rows.read();
        Ok(rows.values().filter(|r| !r.deleted).count())
    }

    /// Number of deleted rows not yet reclaimed.
    pub fn tombstone_count(&self, table: &str) -> TesseraResult<usize> {
        let table = self.table(table)?;
        let rows = table.rows.read();
        Ok(rows.values().filter(|r| r.deleted).count())
    }

    /// Bytes of LOB data awaiting reclamation.
    pub fn retired_lob_bytes(&self, table: &str) -> TesseraResult<usize> {
        let table = self.table(table)?;
        let retired = table.retired.read();
        Ok(retired.values().sum())
    }
}

impl RowSource for MemorySource {
    fn describe(&self, query: &Query) -> TesseraResult<Vec<ColumnInfo>> {
        let table = self.table(query.table_name())?;
        let projection = table.projection(query)?;
        Ok(projection
            .iter()
            .map(|c| table.def.columns[*c].clone())
            .collect())
    }

    fn execute(&self, query: &Query) -> TesseraResult<RowStream> {
        let table = self.table(query.table_name())?;
        let projection = table.projection(query)?;

        let row_ids: Vec<RowId> = {
            let rows = table.rows.read();
            let mut live: Vec<(&RowId, &StoredRow)> =
                rows.iter().filter(|(_, r)| !r.deleted).collect();

            if let Some(name) = query.index() {
                let index = table.index(name)?;
                live.sort_by(|(a_id, a), (b_id, b)| {
                    index
                        .columns
                        .iter()
                        .map(|c| compare_values(&a.values[*c], &b.values[*c]))
                        .find(|o| *o != Ordering::Equal)
                        .unwrap_or(Ordering::Equal)
                        .then(a_id.cmp(b_id))
                });
            }

            let mut seen = Vec::new();
            let mut ids = Vec::with_capacity(live.len());
            for (id, row) in live {
                if query.is_distinct() {
                    let projected: Vec<&Value> = projection.iter().map(|c| &row.values[*c]).collect();
                    if seen.contains(&projected) {
                        continue;
                    }
                    seen.push(projected);
                }
                ids.push(*id);
            }
            ids
        };

        tracing::trace!("Executing {} over {} rows", query, row_ids.len());
        Ok(Box::new(MemoryStream {
            table,
            projection,
            row_ids: row_ids.into_iter(),
        }))
    }

    fn supports_positioned_update(&self, query: &Query) -> bool {
        !query.is_distinct() && self.table(query.table_name()).is_ok()
    }

    fn key_columns(&self, query: &Query) -> TesseraResult<BTreeSet<usize>> {
        let table = self.table(query.table_name())?;
        Ok(table
            .unique_key()
            .map(|k| k.iter().copied().collect())
            .unwrap_or_default())
    }

    fn table_id(&self, query: &Query) -> TesseraResult<TableId> {
        Ok(self.table(query.table_name())?.id)
    }

    fn fetch(&self, query: &Query, row_id: RowId) -> TesseraResult<Option<Row>> {
        let table = self.table(query.table_name())?;
        let projection = table.projection(query)?;
        let rows = table.rows.read();
        Ok(rows
            .get(&row_id)
            .filter(|r| !r.deleted)
            .map(|r| table.project(row_id, r, &projection)))
    }

    fn update(
        &self,
        query: &Query,
        row_id: RowId,
        changes: &[(usize, Value)],
    ) -> TesseraResult<Option<UpdateOutcome>> {
        let table = self.table(query.table_name())?;
        let projection = table.projection(query)?;

        let mut resolved = Vec::with_capacity(changes.len());
        for (index, value) in changes {
            let column = *projection.get(*index).ok_or(TesseraError::InvalidColumnIndex {
                index: index + 1,
                count: projection.len(),
            })?;
            let info = &table.def.columns[column];
            if value.is_null() && !info.nullable {
                return Err(TesseraError::invalid_argument(format!(
                    "column '{}' cannot be NULL",
                    info.name
                )));
            }
            resolved.push((column, value.clone().coerce(info.data_type)?));
        }

        let mut rows = table.rows.write();
        let Some(current) = rows.get(&row_id).filter(|r| !r.deleted) else {
            return Ok(None);
        };

        let mut candidate = current.values.clone();
        let mut retired = 0;
        for (column, value) in &resolved {
            let old = &candidate[*column];
            if old.is_lob() && old != value {
                retired += old.size();
            }
            candidate[*column] = value.clone();
        }
        table.check_unique(&rows, &candidate, Some(row_id))?;

        let version = self.bump_version();
        if let Some(row) = rows.get_mut(&row_id) {
            row.values = candidate;
            row.version = version;
        }
        drop(rows);

        if retired > 0 {
            *table.retired.write().entry(row_id).or_default() += retired;
        }
        Ok(Some(UpdateOutcome {
            version,
            retired_lob_bytes: retired,
        }))
    }

    fn delete(&self, query: &Query, row_id: RowId) -> TesseraResult<bool> {
        let table = self.table(query.table_name())?;
        let version = self.bump_version();
        let mut rows = table.rows.write();
        match rows.get_mut(&row_id) {
            Some(row) if !row.deleted => {
                row.deleted = true;
                row.version = version;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn reclaim(&self, table: TableId, row_id: RowId) -> TesseraResult<usize> {
        let Some(table) = self.table_by_id(table) else {
            return Ok(0);
        };

        let mut freed = table.retired.write().remove(&row_id).unwrap_or(0);
        let mut rows = table.rows.write();
        if rows.get(&row_id).is_some_and(|r| r.deleted) {
            if let Some(row) = rows.remove(&row_id) {
                freed += row.values.iter().map(Value::size).sum::<usize>();
            }
        }
        Ok(freed)
    }

    fn metadata_level(&self) -> MetadataLevel {
        MetadataLevel::Extended
    }
}
