//! LOB locators and the per-cursor locator cache.
//!
//! A locator is a handle on one LOB value of one row. Clones share a single
//! validity flag, so invalidating the cached copy also invalidates every
//! handle a caller is holding.
//!
//! Validity rules:
//!
//! - Repositioning onto the row the locator belongs to keeps it valid.
//! - Materializing a different row invalidates it.
//! - `free()`, an update of its column, cursor close and transaction end
//!   invalidate it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tessera_common::types::RowId;
use tessera_common::{TesseraError, TesseraResult};

use crate::stream::{BinaryStream, CharacterStream, StreamHandle};
use crate::value::Value;

/// Kind of large object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LobKind {
    /// BLOB, measured in bytes.
    Binary,
    /// CLOB, measured in characters.
    Character,
}

impl fmt::Display for LobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LobKind::Binary => write!(f, "BLOB"),
            LobKind::Character => write!(f, "CLOB"),
        }
    }
}

#[derive(Debug)]
enum LobData {
    Binary(Bytes),
    Character(Arc<str>),
}

#[derive(Debug)]
struct LocatorInner {
    row_id: RowId,
    column: usize,
    data: LobData,
    valid: Arc<AtomicBool>,
}

/// A handle on a LOB column value.
#[derive(Debug, Clone)]
pub struct LobLocator {
    inner: Arc<LocatorInner>,
}

impl LobLocator {
    /// Creates a locator for a LOB value. Returns `None` for other values.
    pub(crate) fn from_value(row_id: RowId, column: usize, value: &Value) -> Option<Self> {
        let data = match value {
            Value::Blob(bytes) => LobData::Binary(bytes.clone()),
            Value::Clob(text) => LobData::Character(Arc::clone(text)),
            _ => return None,
        };
        Some(Self {
            inner: Arc::new(LocatorInner {
                row_id,
                column,
                data,
                valid: Arc::new(AtomicBool::new(true)),
            }),
        })
    }

    fn ensure_valid(&self) -> TesseraResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(TesseraError::invalid_lob(format!(
                "locator for row {} column {} was freed or released",
                self.inner.row_id, self.inner.column
            )))
        }
    }

    /// The row the locator belongs to.
    pub fn row_id(&self) -> RowId {
        self.inner.row_id
    }

    /// The 1-based column the locator belongs to.
    pub fn column(&self) -> usize {
        self.inner.column
    }

    /// BLOB or CLOB.
    pub fn kind(&self) -> LobKind {
        match self.inner.data {
            LobData::Binary(_) => LobKind::Binary,
            LobData::Character(_) => LobKind::Character,
        }
    }

    /// Returns true until the locator is freed or invalidated.
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    /// Length in bytes for a BLOB, in characters for a CLOB.
    ///
    /// # Errors
    ///
    /// `InvalidLobState` once the locator is no longer valid.
    pub fn length(&self) -> TesseraResult<u64> {
        self.ensure_valid()?;
        Ok(match &self.inner.data {
            LobData::Binary(bytes) => bytes.len() as u64,
            LobData::Character(text) => text.chars().count() as u64,
        })
    }

    /// Invalidates the locator. Calling it again has no effect.
    pub fn free(&self) {
        if self.inner.valid.swap(false, Ordering::AcqRel) {
            tracing::trace!("Freed locator for row {} column {}", self.inner.row_id, self.inner.column);
        }
    }

    fn check_range(position: u64, length: u64) -> TesseraResult<usize> {
        if position == 0 || position > length + 1 {
            return Err(TesseraError::LobPositionOutOfRange { position, length });
        }
        usize::try_from(position - 1).map_err(|_| TesseraError::LobPositionOutOfRange { position, length })
    }

    /// Reads up to `len` bytes starting at 1-based `position` of a BLOB.
    pub fn bytes(&self, position: u64, len: usize) -> TesseraResult<Bytes> {
        self.ensure_valid()?;
        match &self.inner.data {
            LobData::Binary(bytes) => {
                let start = Self::check_range(position, bytes.len() as u64)?;
                let end = start.saturating_add(len).min(bytes.len());
                Ok(bytes.slice(start..end))
            }
            LobData::Character(_) => Err(TesseraError::type_mismatch("BLOB", "CLOB")),
        }
    }

    /// Reads up to `len` characters starting at 1-based `position` of a CLOB.
    pub fn sub_string(&self, position: u64, len: usize) -> TesseraResult<String> {
        self.ensure_valid()?;
        match &self.inner.data {
            LobData::Character(text) => {
                let start = Self::check_range(position, text.chars().count() as u64)?;
                Ok(text.chars().skip(start).take(len).collect())
            }
            LobData::Binary(_) => Err(TesseraError::type_mismatch("CLOB", "BLOB")),
        }
    }

    fn handle(&self) -> StreamHandle {
        StreamHandle::for_locator(self.inner.row_id, self.inner.column, Arc::clone(&self.inner.valid))
    }

    /// Streams a BLOB. The stream stops reading once the locator is invalid.
    pub fn binary_stream(&self) -> TesseraResult<BinaryStream> {
        self.ensure_valid()?;
        match &self.inner.data {
            LobData::Binary(bytes) => Ok(BinaryStream::new(bytes.clone(), self.handle())),
            LobData::Character(_) => Err(TesseraError::type_mismatch("BLOB", "CLOB")),
        }
    }

    /// Streams a CLOB. The stream stops reading once the locator is invalid.
    pub fn character_stream(&self) -> TesseraResult<CharacterStream> {
        self.ensure_valid()?;
        match &self.inner.data {
            LobData::Character(text) => Ok(CharacterStream::new(Arc::clone(text), self.handle())),
            LobData::Binary(_) => Err(TesseraError::type_mismatch("CLOB", "BLOB")),
        }
    }
}

/// Locators minted by one cursor, keyed by (row, column).
#[derive(Debug, Default)]
pub struct LocatorCache {
    locators: HashMap<(RowId, usize), LobLocator>,
    minted: u64,
}

impl LocatorCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached locator for (row, column) if it is still valid,
    /// otherwise mints and caches a new one.
    pub fn materialize(&mut self, row_id: RowId, column: usize, value: &Value) -> TesseraResult<LobLocator> {
        if let Some(locator) = self.locators.get(&(row_id, column)) {
            if locator.is_valid() {
                return Ok(locator.clone());
            }
        }
        let locator = self.uncached(row_id, column, value)?;
        self.locators.insert((row_id, column), locator.clone());
        Ok(locator)
    }

    /// Mints a locator that is not cached, for staged values.
    pub fn uncached(&mut self, row_id: RowId, column: usize, value: &Value) -> TesseraResult<LobLocator> {
        let locator = LobLocator::from_value(row_id, column, value)
            .ok_or_else(|| TesseraError::type_mismatch("BLOB or CLOB", value.type_name()))?;
        self.minted += 1;
        Ok(locator)
    }

    /// Invalidates and drops locators of every row except `row_id`.
    pub fn retain_row(&mut self, row_id: RowId) {
        self.locators.retain(|(row, _), locator| {
            if *row == row_id {
                return true;
            }
            locator.free();
            false
        });
    }

    /// Invalidates locators of the given 1-based columns of a row.
    pub fn invalidate_columns(&mut self, row_id: RowId, columns: impl IntoIterator<Item = usize>) {
        for column in columns {
            if let Some(locator) = self.locators.remove(&(row_id, column)) {
                locator.free();
            }
        }
    }

    /// Invalidates every locator of a row.
    pub fn invalidate_row(&mut self, row_id: RowId) {
        self.locators.retain(|(row, _), locator| {
            if *row != row_id {
                return true;
            }
            locator.free();
            false
        });
    }

    /// Invalidates every locator.
    pub fn invalidate_all(&mut self) {
        for (_, locator) in self.locators.drain() {
            locator.free();
        }
    }

    /// Number of cached locators.
    pub fn len(&self) -> usize {
        self.locators.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    /// Total locators minted over the cache's lifetime.
    pub fn minted(&self) -> u64 {
        self.minted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn clob() -> Value {
        Value::clob("héllo wörld")
    }

    #[test]
    fn test_length_and_free() {
        let locator = LobLocator::from_value(RowId::new(1), 1, &clob()).unwrap();
        assert_eq!(locator.kind(), LobKind::Character);
        assert_eq!(locator.length().unwrap(), 11);

        let copy = locator.clone();
        locator.free();
        locator.free();
        assert!(!copy.is_valid());
        assert_eq!(copy.length().unwrap_err().sql_state(), "XJ215");
    }

    #[test]
    fn test_positions_are_one_based() {
        let blob = Value::blob(vec![1u8, 2, 3, 4, 5]);
        let locator = LobLocator::from_value(RowId::new(1), 1, &blob).unwrap();
        assert_eq!(&locator.bytes(2, 3).unwrap()[..], &[2, 3, 4]);
        assert_eq!(locator.bytes(6, 10).unwrap().len(), 0);
        assert_eq!(locator.bytes(0, 1).unwrap_err().sql_state(), "XJ076");
        assert_eq!(locator.bytes(7, 1).unwrap_err().sql_state(), "XJ076");
        assert_eq!(locator.sub_string(1, 1).unwrap_err().sql_state(), "22005");

        let locator = LobLocator::from_value(RowId::new(1), 2, &clob()).unwrap();
        assert_eq!(locator.sub_string(2, 4).unwrap(), "éllo");
    }

    #[test]
    fn test_cache_reuses_locator_for_same_row() {
        let mut cache = LocatorCache::new();
        let row = RowId::new(1);
        let first = cache.materialize(row, 1, &clob()).unwrap();
        cache.retain_row(row);
        let again = cache.materialize(row, 1, &clob()).unwrap();

        assert!(Arc::ptr_eq(&first.inner, &again.inner));
        assert_eq!(cache.minted(), 1);
    }

    #[test]
    fn test_freed_locator_is_replaced() {
        let mut cache = LocatorCache::new();
        let row = RowId::new(1);
        cache.materialize(row, 1, &clob()).unwrap().free();

        let fresh = cache.materialize(row, 1, &clob()).unwrap();
        assert!(fresh.is_valid());
        assert_eq!(fresh.length().unwrap(), 11);
        assert_eq!(cache.minted(), 2);
    }

    #[test]
    fn test_other_rows_are_invalidated() {
        let mut cache = LocatorCache::new();
        let old = cache.materialize(RowId::new(1), 1, &clob()).unwrap();
        let kept = cache.materialize(RowId::new(2), 1, &clob()).unwrap();

        cache.retain_row(RowId::new(2));
        assert!(!old.is_valid());
        assert!(kept.is_valid());
        assert_eq!(cache.len(), 1);

        cache.invalidate_columns(RowId::new(2), [1]);
        assert!(!kept.is_valid());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stream_follows_locator_validity() {
        let blob = Value::blob(vec![9u8; 64]);
        let locator = LobLocator::from_value(RowId::new(1), 1, &blob).unwrap();
        let mut stream = locator.binary_stream().unwrap();
        let mut buf = [0u8; 16];
        stream.read_exact(&mut buf).unwrap();

        locator.free();
        assert!(stream.read(&mut buf).is_err());
        assert!(locator.binary_stream().is_err());
    }

    #[test]
    fn test_non_lob_rejected() {
        let mut cache = LocatorCache::new();
        let err = cache.materialize(RowId::new(1), 1, &Value::Int(1)).unwrap_err();
        assert_eq!(err.sql_state(), "22005");
    }
}
