//! Database and result metadata.
//!
//! Database metadata is answered by a [`MetadataBackend`]. Backends differ
//! in which optional capabilities they implement; callers ask the
//! [`DatabaseMetadata`] front, which dispatches on the backend's
//! [`MetadataLevel`] instead of probing for methods at runtime.
//!
//! ```text
//!   DatabaseMetadata ──level()──► Base     ──► BaseMetadata
//!                               └► Extended ──► ExtendedMetadata
//! ```

use std::fmt;

use tessera_common::constants::{MAX_CURSOR_NAME_LENGTH, MAX_LOB_LENGTH};
use tessera_common::{TesseraError, TesseraResult};

use crate::cursor::{Concurrency, CursorType, Holdability};
use crate::source::ColumnInfo;
use crate::value::DataType;

/// Capability level of a metadata backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetadataLevel {
    /// Core capabilities only.
    Base,
    /// Core capabilities plus LOB size limits and ref cursors.
    Extended,
}

impl fmt::Display for MetadataLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataLevel::Base => write!(f, "base"),
            MetadataLevel::Extended => write!(f, "extended"),
        }
    }
}

fn not_supported(operation: &str) -> TesseraError {
    TesseraError::NotSupported {
        operation: operation.to_string(),
    }
}

/// A source of database metadata.
///
/// Methods with a default body are optional capabilities; a backend that
/// does not implement one answers with `NotSupported`.
pub trait MetadataBackend: Send + Sync + fmt::Debug {
    /// The level this backend implements.
    fn level(&self) -> MetadataLevel;

    /// Product name reported to callers.
    fn product_name(&self) -> &str;

    /// Returns true if cursors of this type can be opened.
    fn supports_cursor_type(&self, cursor_type: CursorType) -> bool;

    /// Returns true if the type/concurrency combination can be opened.
    fn supports_concurrency(&self, cursor_type: CursorType, concurrency: Concurrency) -> bool;

    /// Returns true if cursors may use this holdability.
    fn supports_holdability(&self, holdability: Holdability) -> bool;

    /// Returns true for positioned `UPDATE ... WHERE CURRENT OF`.
    fn supports_positioned_update(&self) -> bool;

    /// Maximum cursor name length.
    fn max_cursor_name_length(&self) -> usize {
        MAX_CURSOR_NAME_LENGTH
    }

    /// Largest LOB value in bytes.
    fn max_logical_lob_size(&self) -> TesseraResult<u64> {
        Err(not_supported("max_logical_lob_size"))
    }

    /// Returns true if procedures may return cursors.
    fn supports_ref_cursors(&self) -> TesseraResult<bool> {
        Err(not_supported("supports_ref_cursors"))
    }
}

/// Backend with the core capability set.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseMetadata;

impl MetadataBackend for BaseMetadata {
    fn level(&self) -> MetadataLevel {
        MetadataLevel::Base
    }

    fn product_name(&self) -> &str {
        "Tessera"
    }

    fn supports_cursor_type(&self, _cursor_type: CursorType) -> bool {
        true
    }

    fn supports_concurrency(&self, _cursor_type: CursorType, _concurrency: Concurrency) -> bool {
        true
    }

    fn supports_holdability(&self, _holdability: Holdability) -> bool {
        true
    }

    fn supports_positioned_update(&self) -> bool {
        true
    }
}

/// Backend with every optional capability.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtendedMetadata;

impl MetadataBackend for ExtendedMetadata {
    fn level(&self) -> MetadataLevel {
        MetadataLevel::Extended
    }

    fn product_name(&self) -> &str {
        BaseMetadata.product_name()
    }

    fn supports_cursor_type(&self, cursor_type: CursorType) -> bool {
        BaseMetadata.supports_cursor_type(cursor_type)
    }

    fn supports_concurrency(&self, cursor_type: CursorType, concurrency: Concurrency) -> bool {
        BaseMetadata.supports_concurrency(cursor_type, concurrency)
    }

    fn supports_holdability(&self, holdability: Holdability) -> bool {
        BaseMetadata.supports_holdability(holdability)
    }

    fn supports_positioned_update(&self) -> bool {
        true
    }

    fn max_logical_lob_size(&self) -> TesseraResult<u64> {
        Ok(MAX_LOB_LENGTH)
    }

    fn supports_ref_cursors(&self) -> TesseraResult<bool> {
        Ok(false)
    }
}

/// Database metadata handed to callers.
#[derive(Debug)]
pub struct DatabaseMetadata {
    backend: Box<dyn MetadataBackend>,
}

impl DatabaseMetadata {
    /// Selects the backend for a capability level.
    pub fn for_level(level: MetadataLevel) -> Self {
        let backend: Box<dyn MetadataBackend> = match level {
            MetadataLevel::Base => Box::new(BaseMetadata),
            MetadataLevel::Extended => Box::new(ExtendedMetadata),
        };
        Self { backend }
    }

    /// Wraps a custom backend.
    pub fn with_backend(backend: Box<dyn MetadataBackend>) -> Self {
        Self { backend }
    }

    /// The backend's capability level.
    pub fn level(&self) -> MetadataLevel {
        self.backend.level()
    }

    /// Returns true if the backend implements `level`.
    pub fn supports_level(&self, level: MetadataLevel) -> bool {
        self.level() >= level
    }

    fn require(&self, level: MetadataLevel, operation: &str) -> TesseraResult<()> {
        if self.supports_level(level) {
            Ok(())
        } else {
            Err(not_supported(operation))
        }
    }

    /// Product name.
    pub fn product_name(&self) -> &str {
        self.backend.product_name()
    }

    /// See [`MetadataBackend::supports_cursor_type`].
    pub fn supports_cursor_type(&self, cursor_type: CursorType) -> bool {
        self.backend.supports_cursor_type(cursor_type)
    }

    /// See [`MetadataBackend::supports_concurrency`].
    pub fn supports_concurrency(&self, cursor_type: CursorType, concurrency: Concurrency) -> bool {
        self.backend.supports_concurrency(cursor_type, concurrency)
    }

    /// See [`MetadataBackend::supports_holdability`].
    pub fn supports_holdability(&self, holdability: Holdability) -> bool {
        self.backend.supports_holdability(holdability)
    }

    /// See [`MetadataBackend::supports_positioned_update`].
    pub fn supports_positioned_update(&self) -> bool {
        self.backend.supports_positioned_update()
    }

    /// See [`MetadataBackend::max_cursor_name_length`].
    pub fn max_cursor_name_length(&self) -> usize {
        self.backend.max_cursor_name_length()
    }

    /// Largest LOB value in bytes. Requires [`MetadataLevel::Extended`].
    pub fn max_logical_lob_size(&self) -> TesseraResult<u64> {
        self.require(MetadataLevel::Extended, "max_logical_lob_size")?;
        self.backend.max_logical_lob_size()
    }

    /// Whether procedures may return cursors. Requires
    /// [`MetadataLevel::Extended`].
    pub fn supports_ref_cursors(&self) -> TesseraResult<bool> {
        self.require(MetadataLevel::Extended, "supports_ref_cursors")?;
        self.backend.supports_ref_cursors()
    }
}

/// Column metadata of an open cursor. Column indexes are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultMetadata {
    columns: Vec<ColumnInfo>,
    updatable: bool,
}

impl ResultMetadata {
    pub(crate) fn new(columns: Vec<ColumnInfo>, updatable: bool) -> Self {
        Self { columns, updatable }
    }

    fn column(&self, index: usize) -> TesseraResult<&ColumnInfo> {
        index
            .checked_sub(1)
            .and_then(|i| self.columns.get(i))
            .ok_or(TesseraError::InvalidColumnIndex {
                index,
                count: self.columns.len(),
            })
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// All columns in order.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Column name.
    pub fn column_name(&self, index: usize) -> TesseraResult<&str> {
        Ok(&self.column(index)?.name)
    }

    /// Column type.
    pub fn column_type(&self, index: usize) -> TesseraResult<DataType> {
        Ok(self.column(index)?.data_type)
    }

    /// Whether the column accepts NULL.
    pub fn is_nullable(&self, index: usize) -> TesseraResult<bool> {
        Ok(self.column(index)?.nullable)
    }

    /// Whether the column can be changed through the cursor.
    pub fn is_writable(&self, index: usize) -> TesseraResult<bool> {
        self.column(index)?;
        Ok(self.updatable)
    }

    /// Finds a column by name, case-insensitively. Returns a 1-based index.
    pub fn find_column(&self, name: &str) -> TesseraResult<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .map(|i| i + 1)
            .ok_or_else(|| TesseraError::invalid_argument(format!("column '{}' not found", name)))
    }
}
