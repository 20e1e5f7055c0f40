//! Databases, connections and statements.
//!
//! A [`Database`] pairs a row source with a transaction manager. Each
//! [`Connection`] runs one transaction at a time: `commit` and `rollback`
//! end it and immediately begin the next. Cursors opened on a connection
//! are registered by name so that positioned updates
//! (`UPDATE ... WHERE CURRENT OF <name>`) can find them.
//!
//! ```text
//!   Database ──► Connection ──► Statement ──► ResultCursor
//!      │              │                            │
//!      │              └──── CursorRegistry ◄───────┘ (by name)
//!      └──► TransactionManager ──► LockLedger
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tessera_common::config::{CursorConfig, DataSourceConfig, EngineConfig};
use tessera_common::types::{CursorId, TxnId};
use tessera_common::TesseraError;
use tessera_txn::{LockLedger, ReleaseTrigger, TransactionManager};

use crate::cursor::{CloseHandle, CursorOptions, CursorShared, CursorState, Holdability, ResultCursor};
use crate::metadata::DatabaseMetadata;
use crate::source::{Query, RowSource};
use crate::value::Value;
use crate::CursorResult;

// =============================================================================
// Cursor Registry
// =============================================================================

struct RegistryEntry {
    name: String,
    closed: Arc<AtomicBool>,
    cursor: Weak<CursorShared>,
}

impl RegistryEntry {
    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.cursor.strong_count() > 0
    }
}

/// Open cursors of one connection, by id and name.
#[derive(Default)]
pub(crate) struct CursorRegistry {
    entries: Mutex<HashMap<CursorId, RegistryEntry>>,
}

impl CursorRegistry {
    fn check_unique(entries: &HashMap<CursorId, RegistryEntry>, id: CursorId, name: &str) -> CursorResult<()> {
        let taken = entries
            .iter()
            .any(|(other, entry)| *other != id && entry.is_live() && entry.name == name);
        if taken {
            return Err(TesseraError::DuplicateCursorName {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn register(&self, cursor: &Arc<CursorShared>, name: &str) -> CursorResult<()> {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.is_live());
        Self::check_unique(&entries, cursor.id(), name)?;
        entries.insert(
            cursor.id(),
            RegistryEntry {
                name: name.to_string(),
                closed: Arc::clone(cursor.closed_flag()),
                cursor: Arc::downgrade(cursor),
            },
        );
        Ok(())
    }

    pub(crate) fn rename(&self, id: CursorId, name: &str) -> CursorResult<()> {
        let mut entries = self.entries.lock();
        Self::check_unique(&entries, id, name)?;
        if let Some(entry) = entries.get_mut(&id) {
            entry.name = name.to_string();
        }
        Ok(())
    }

    pub(crate) fn unregister(&self, id: CursorId) {
        self.entries.lock().remove(&id);
    }

    pub(crate) fn find(&self, name: &str) -> Option<Arc<CursorShared>> {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.is_live() && entry.name == name)
            .find_map(|entry| entry.cursor.upgrade())
    }

    pub(crate) fn live(&self) -> Vec<Arc<CursorShared>> {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.is_live())
            .filter_map(|entry| entry.cursor.upgrade())
            .collect()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .lock()
            .values()
            .filter(|entry| entry.is_live())
            .map(|entry| entry.name.clone())
            .collect();
        names.sort();
        names
    }
}

// =============================================================================
// Session
// =============================================================================

/// Per-connection state shared with the connection's cursors.
pub(crate) struct Session {
    manager: Arc<TransactionManager>,
    source: Arc<dyn RowSource>,
    next_cursor_id: Arc<AtomicU64>,
    config: CursorConfig,
    txn: Mutex<TxnId>,
    registry: CursorRegistry,
}

impl Session {
    /// The connection's current transaction.
    pub(crate) fn txn(&self) -> TxnId {
        *self.txn.lock()
    }

    pub(crate) fn ledger(&self) -> &LockLedger {
        self.manager.ledger()
    }

    pub(crate) fn config(&self) -> &CursorConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &CursorRegistry {
        &self.registry
    }

    pub(crate) fn open_cursor(
        self: &Arc<Self>,
        query: Query,
        options: CursorOptions,
        name: Option<&str>,
    ) -> CursorResult<ResultCursor> {
        let id = CursorId::new(self.next_cursor_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut state = CursorState::open(Arc::clone(self), Arc::clone(&self.source), query, options, id)?;
        if let Some(name) = name {
            state.set_name(name)?;
        }
        let name = state.name().to_string();

        let shared = ResultCursor::from_state(state);
        if let Err(e) = self.registry.register(&shared, &name) {
            shared.request_close();
            return Err(e);
        }
        Ok(ResultCursor::new(shared))
    }

    /// Ends the current transaction and begins the next one.
    fn end_transaction(&self, trigger: ReleaseTrigger) -> CursorResult<()> {
        for cursor in self.registry.live() {
            match cursor.holdability() {
                Holdability::CloseOnCommit => cursor.request_close(),
                Holdability::Hold => cursor.state().end_transaction(),
            }
            // A close that could not take the cursor's lock finishes here.
            if cursor.is_closed() {
                cursor.state().close();
            }
        }

        let mut txn = self.txn.lock();
        let result = match trigger {
            ReleaseTrigger::Commit => self.manager.commit(*txn),
            ReleaseTrigger::Rollback => self.manager.rollback(*txn),
        };
        let previous = *txn;
        *txn = self.manager.begin();
        tracing::debug!("{:?} ended by {:?}, now running {:?}", previous, trigger, *txn);
        result.map_err(Into::into)
    }
}

// =============================================================================
// Database
// =============================================================================

/// A row source with its transaction manager.
pub struct Database {
    config: EngineConfig,
    manager: Arc<TransactionManager>,
    source: Arc<dyn RowSource>,
    next_cursor_id: Arc<AtomicU64>,
}

impl Database {
    /// Opens a database over a row source.
    pub fn open(config: EngineConfig, source: Arc<dyn RowSource>) -> CursorResult<Self> {
        config.validate()?;
        let manager = Arc::new(TransactionManager::new(&config)?);
        tracing::info!(
            "Opened database {} (lock timeout {:?})",
            config.data_source.database_name.as_deref().unwrap_or("<unnamed>"),
            config.ledger.lock_timeout()
        );
        Ok(Self {
            config,
            manager,
            source,
            next_cursor_id: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Opens a connection with a new transaction.
    pub fn connect(&self) -> Connection {
        let session = Session {
            manager: Arc::clone(&self.manager),
            source: Arc::clone(&self.source),
            next_cursor_id: Arc::clone(&self.next_cursor_id),
            config: self.config.cursor.clone(),
            txn: Mutex::new(self.manager.begin()),
            registry: CursorRegistry::default(),
        };
        Connection {
            session: Arc::new(session),
        }
    }

    /// The transaction manager.
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// The row source.
    pub fn source(&self) -> &Arc<dyn RowSource> {
        &self.source
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Data source properties the database was opened with.
    pub fn data_source(&self) -> &DataSourceConfig {
        &self.config.data_source
    }

    /// Metadata for the row source's capability level.
    pub fn metadata(&self) -> DatabaseMetadata {
        DatabaseMetadata::for_level(self.source.metadata_level())
    }

    /// Blocks until post-commit work scheduled so far has finished.
    pub fn wait_for_deferred_cleanup(&self) {
        self.manager.wait_for_deferred_cleanup();
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("active_transactions", &self.manager.active_count())
            .field("ledger", self.manager.ledger())
            .finish()
    }
}

// =============================================================================
// Connection
// =============================================================================

/// A connection: one running transaction and the cursors opened under it.
///
/// Dropping a connection closes its cursors and rolls back.
pub struct Connection {
    session: Arc<Session>,
}

impl Connection {
    /// Opens a cursor over a query.
    pub fn open_cursor(&self, query: Query, options: CursorOptions) -> CursorResult<ResultCursor> {
        self.session.open_cursor(query, options, None)
    }

    /// Creates a statement whose cursors use `options`.
    pub fn create_statement(&self, options: CursorOptions) -> Statement {
        Statement {
            session: Arc::clone(&self.session),
            options,
            cursor_name: None,
            current: None,
            closed: false,
        }
    }

    /// Commits. Close-on-commit cursors close; held cursors stay open with
    /// their LOB locators invalidated.
    pub fn commit(&self) -> CursorResult<()> {
        self.session.end_transaction(ReleaseTrigger::Commit)
    }

    /// Rolls back, closing close-on-commit cursors.
    pub fn rollback(&self) -> CursorResult<()> {
        self.session.end_transaction(ReleaseTrigger::Rollback)
    }

    /// The running transaction.
    pub fn current_txn(&self) -> TxnId {
        self.session.txn()
    }

    /// Locks held by the running transaction.
    pub fn lock_count(&self) -> usize {
        self.session.ledger().count(self.session.txn())
    }

    /// The transaction manager.
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.session.manager
    }

    /// `UPDATE ... SET <column> = <value>, ... WHERE CURRENT OF <cursor>`.
    pub fn update_current_of(&self, cursor: &str, changes: &[(&str, Value)]) -> CursorResult<()> {
        let operation = "UPDATE WHERE CURRENT OF";
        let shared = self.find_cursor(cursor)?;
        let mut state = shared.state();
        state.ensure_open(operation)?;
        let resolved = changes
            .iter()
            .map(|(column, value)| Ok((state.metadata().find_column(column)?, value.clone())))
            .collect::<CursorResult<Vec<_>>>()?;
        state.positioned_update(resolved)
    }

    /// `DELETE ... WHERE CURRENT OF <cursor>`.
    pub fn delete_current_of(&self, cursor: &str) -> CursorResult<()> {
        let operation = "DELETE WHERE CURRENT OF";
        let shared = self.find_cursor(cursor)?;
        let mut state = shared.state();
        state.ensure_open(operation)?;
        state.delete_current(operation)
    }

    fn find_cursor(&self, name: &str) -> CursorResult<Arc<CursorShared>> {
        self.session
            .registry
            .find(name)
            .ok_or_else(|| TesseraError::CursorNotFound {
                name: name.to_string(),
            })
    }

    /// Names of the open cursors, sorted.
    pub fn cursor_names(&self) -> Vec<String> {
        self.session.registry.names()
    }

    /// Metadata for the row source's capability level.
    pub fn metadata(&self) -> DatabaseMetadata {
        DatabaseMetadata::for_level(self.session.source.metadata_level())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for cursor in self.session.registry.live() {
            cursor.request_close();
            cursor.state().close();
        }
        let txn = self.session.txn();
        if let Err(e) = self.session.manager.rollback(txn) {
            tracing::warn!("Rolling back {:?} on connection close failed: {}", txn, e);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("txn", &self.session.txn())
            .field("cursors", &self.cursor_names())
            .finish()
    }
}

// =============================================================================
// Statement
// =============================================================================

/// Executes queries. Each execution closes the cursor of the previous one.
pub struct Statement {
    session: Arc<Session>,
    options: CursorOptions,
    cursor_name: Option<String>,
    current: Option<CloseHandle>,
    closed: bool,
}

impl Statement {
    fn ensure_open(&self) -> CursorResult<()> {
        if self.closed {
            return Err(TesseraError::StatementClosed);
        }
        Ok(())
    }

    /// Runs a query and returns its cursor.
    pub fn execute_query(&mut self, query: Query) -> CursorResult<ResultCursor> {
        self.ensure_open()?;
        if let Some(previous) = self.current.take() {
            previous.close();
        }
        let cursor = self
            .session
            .open_cursor(query, self.options, self.cursor_name.as_deref())?;
        self.current = Some(cursor.close_handle());
        Ok(cursor)
    }

    /// Names the cursors this statement opens from now on.
    pub fn set_cursor_name(&mut self, name: &str) -> CursorResult<()> {
        self.ensure_open()?;
        crate::cursor::validate_cursor_name(name)?;
        self.cursor_name = Some(name.to_string());
        Ok(())
    }

    /// Options used for cursors of this statement.
    pub fn options(&self) -> CursorOptions {
        self.options
    }

    /// Closes the statement and its current cursor.
    pub fn close(&mut self) {
        if let Some(cursor) = self.current.take() {
            cursor.close();
        }
        self.closed = true;
    }

    /// Returns true once closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("options", &self.options)
            .field("cursor_name", &self.cursor_name)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{Concurrency, CursorType};
    use crate::metadata::MetadataLevel;
    use crate::source::{MemorySource, TableDef};
    use crate::value::DataType;
    use tessera_common::types::RowId;

    fn setup(rows: i32) -> (Database, Arc<MemorySource>) {
        let source = Arc::new(MemorySource::new());
        source
            .create_table(
                TableDef::new("docs")
                    .column("id", DataType::Int, false)
                    .column("title", DataType::Varchar, true)
                    .column("body", DataType::Blob, true)
                    .primary_key(&["id"]),
            )
            .unwrap();
        for id in 1..=rows {
            source
                .insert(
                    "docs",
                    vec![
                        Value::Int(id),
                        Value::string(format!("doc {}", id)),
                        Value::blob(vec![0xAB; 100]),
                    ],
                )
                .unwrap();
        }
        let db = Database::open(EngineConfig::for_testing(), source.clone()).unwrap();
        (db, source)
    }

    fn updatable() -> CursorOptions {
        CursorOptions::new(CursorType::ScrollInsensitive, Concurrency::Updatable)
    }

    #[test]
    fn test_commit_closes_cursors() {
        let (db, _) = setup(3);
        let conn = db.connect();
        let mut closing = conn.open_cursor(Query::table("docs"), updatable()).unwrap();
        let mut held = conn
            .open_cursor(
                Query::table("docs"),
                updatable().with_holdability(Holdability::Hold),
            )
            .unwrap();

        closing.next().unwrap();
        held.next().unwrap();
        let blob = held.get_blob(3).unwrap().unwrap();
        let txn = conn.current_txn();
        assert!(conn.lock_count() > 0);

        conn.commit().unwrap();
        assert!(closing.is_closed());
        assert_eq!(closing.next().unwrap_err().sql_state(), "XCL16");
        assert!(!held.is_closed());
        assert!(!blob.is_valid());
        assert_eq!(db.manager().ledger().count(txn), 0);
        assert_ne!(conn.current_txn(), txn);

        assert!(held.next().unwrap());
        assert_eq!(held.get_int(1).unwrap(), Some(2));
        assert_eq!(conn.cursor_names().len(), 1);
    }

    #[test]
    fn test_rollback_keeps_held_cursor() {
        let (db, _) = setup(2);
        let conn = db.connect();
        let mut held = conn
            .open_cursor(
                Query::table("docs"),
                updatable().with_holdability(Holdability::Hold),
            )
            .unwrap();

        held.next().unwrap();
        held.update_string(2, "draft").unwrap();
        conn.rollback().unwrap();

        // Staged changes do not survive the transaction.
        assert!(!held.is_closed());
        assert_eq!(held.get_string(2).unwrap().as_deref(), Some("doc 1"));
        assert_eq!(conn.lock_count(), 0);
    }

    #[test]
    fn test_positioned_update_by_name() {
        let (db, source) = setup(2);
        let conn = db.connect();
        let mut stmt = conn.create_statement(updatable());
        stmt.set_cursor_name("editor").unwrap();
        let mut cursor = stmt.execute_query(Query::table("docs")).unwrap();
        assert_eq!(conn.cursor_names(), vec!["editor".to_string()]);

        assert_eq!(
            conn.update_current_of("editor", &[("title", Value::string("x"))])
                .unwrap_err()
                .sql_state(),
            "24000"
        );

        cursor.next().unwrap();
        conn.update_current_of("editor", &[("TITLE", Value::string("renamed"))])
            .unwrap();
        assert!(cursor.row_updated().unwrap());
        assert_eq!(cursor.get_string(2).unwrap().as_deref(), Some("renamed"));
        assert_eq!(
            source.get("docs", RowId::new(1)).unwrap().unwrap()[1],
            Value::string("renamed")
        );

        let err = conn
            .update_current_of("editor", &[("missing", Value::Null)])
            .unwrap_err();
        assert_eq!(err.sql_state(), "XJ081");

        conn.delete_current_of("editor").unwrap();
        assert!(cursor.row_deleted().unwrap());
        assert_eq!(source.row_count("docs").unwrap(), 1);
    }

    #[test]
    fn test_unknown_cursor_name() {
        let (db, _) = setup(1);
        let conn = db.connect();
        let err = conn.delete_current_of("nobody").unwrap_err();
        assert_eq!(err.sql_state(), "42X30");

        let mut stmt = conn.create_statement(updatable());
        stmt.set_cursor_name("gone").unwrap();
        let mut cursor = stmt.execute_query(Query::table("docs")).unwrap();
        cursor.next().unwrap();
        cursor.close();
        assert_eq!(conn.delete_current_of("gone").unwrap_err().sql_state(), "42X30");
    }

    #[test]
    fn test_duplicate_cursor_name() {
        let (db, _) = setup(1);
        let conn = db.connect();
        let mut first = conn.create_statement(CursorOptions::default());
        let mut second = conn.create_statement(CursorOptions::default());
        first.set_cursor_name("dup").unwrap();
        second.set_cursor_name("dup").unwrap();

        let cursor = first.execute_query(Query::table("docs")).unwrap();
        let err = second.execute_query(Query::table("docs")).unwrap_err();
        assert_eq!(err.sql_state(), "X0X60");

        drop(cursor);
        second.execute_query(Query::table("docs")).unwrap();

        // Names are per connection.
        let other = db.connect();
        let mut third = other.create_statement(CursorOptions::default());
        third.set_cursor_name("dup").unwrap();
        third.execute_query(Query::table("docs")).unwrap();
    }

    #[test]
    fn test_statement_reexecute() {
        let (db, _) = setup(2);
        let conn = db.connect();
        let mut stmt = conn.create_statement(CursorOptions::default());

        let mut first = stmt.execute_query(Query::table("docs")).unwrap();
        first.next().unwrap();
        let mut second = stmt.execute_query(Query::table("docs")).unwrap();
        assert!(first.is_closed());
        assert!(second.next().unwrap());

        stmt.close();
        assert!(stmt.is_closed());
        assert!(second.is_closed());
        let err = stmt.execute_query(Query::table("docs")).unwrap_err();
        assert_eq!(err.sql_state(), "XJ012");
    }

    #[test]
    fn test_reclaim_runs_after_commit() {
        let (db, source) = setup(3);
        let conn = db.connect();
        let mut cursor = conn.open_cursor(Query::table("docs"), updatable()).unwrap();

        cursor.next().unwrap();
        cursor.update_bytes(3, vec![1u8; 10]).unwrap();
        cursor.update_row().unwrap();
        cursor.next().unwrap();
        cursor.delete_row().unwrap();
        assert_eq!(source.retired_lob_bytes("docs").unwrap(), 100);
        assert_eq!(source.tombstone_count("docs").unwrap(), 1);

        conn.commit().unwrap();
        db.wait_for_deferred_cleanup();
        assert_eq!(source.retired_lob_bytes("docs").unwrap(), 0);
        assert_eq!(source.tombstone_count("docs").unwrap(), 0);
    }

    #[test]
    fn test_rollback_discards_deferred_work() {
        let (db, source) = setup(2);
        let conn = db.connect();
        let mut cursor = conn.open_cursor(Query::table("docs"), updatable()).unwrap();

        cursor.next().unwrap();
        cursor.delete_row().unwrap();
        conn.rollback().unwrap();
        db.wait_for_deferred_cleanup();
        assert_eq!(source.tombstone_count("docs").unwrap(), 1);
        assert_eq!(conn.lock_count(), 0);
    }

    #[test]
    fn test_drop_connection() {
        let (db, _) = setup(2);
        let conn = db.connect();
        let txn = conn.current_txn();
        let mut cursor = conn.open_cursor(Query::table("docs"), updatable()).unwrap();
        cursor.next().unwrap();
        assert!(db.manager().ledger().count(txn) > 0);

        drop(conn);
        assert!(cursor.is_closed());
        assert_eq!(db.manager().ledger().count(txn), 0);
    }

    #[test]
    fn test_metadata_level() {
        let (db, _) = setup(0);
        let conn = db.connect();
        assert_eq!(conn.metadata().level(), MetadataLevel::Extended);
        assert!(db.metadata().supports_level(MetadataLevel::Base));
    }

    #[test]
    fn test_invalid_config() {
        let mut config = EngineConfig::for_testing();
        config.cursor.cursor_name_prefix = String::new();
        let err = Database::open(config, Arc::new(MemorySource::new())).unwrap_err();
        assert_eq!(err.sql_state(), "XCY00");
    }
}
