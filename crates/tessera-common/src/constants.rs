//! System-wide constants for Tessera.
//!
//! Defaults here are the values used when a configuration file omits a
//! setting.

// =============================================================================
// Lock Constants
// =============================================================================

/// Default time a lock request waits before failing with a lock timeout (60 s).
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 60_000;

/// Default interval between wait-for graph checks while a request is blocked.
pub const DEFAULT_DEADLOCK_CHECK_INTERVAL_MS: u64 = 100;

// =============================================================================
// Deferred Cleanup Constants
// =============================================================================

/// Name given to the background post-commit worker thread.
pub const DEFAULT_CLEANUP_THREAD_NAME: &str = "tessera-cleanup";

/// Maximum number of queued transactions the worker drains per wake-up.
pub const DEFAULT_CLEANUP_MAX_BATCH: usize = 64;

// =============================================================================
// Cursor Constants
// =============================================================================

/// Default number of rows a forward-only cursor pulls from its source per batch.
pub const DEFAULT_FETCH_SIZE: usize = 16;

/// Prefix of generated cursor names (`SQL_CUR1`, `SQL_CUR2`, ...).
pub const DEFAULT_CURSOR_NAME_PREFIX: &str = "SQL_CUR";

/// Maximum cursor name length in characters.
pub const MAX_CURSOR_NAME_LENGTH: usize = 128;

/// Largest LOB value accepted by the engine (2 GiB - 1).
pub const MAX_LOB_LENGTH: u64 = i32::MAX as u64;

/// Chunk size used when draining a caller-supplied stream into a LOB value.
pub const STREAM_COPY_CHUNK: usize = 32 * 1024;
