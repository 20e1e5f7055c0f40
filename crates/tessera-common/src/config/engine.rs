//! Engine configuration structures.
//!
//! Every field has a serde default so a partial TOML file is valid; missing
//! sections fall back to the constants in [`crate::constants`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::data_source::DataSourceConfig;
use crate::constants::{
    DEFAULT_CLEANUP_MAX_BATCH, DEFAULT_CLEANUP_THREAD_NAME, DEFAULT_CURSOR_NAME_PREFIX,
    DEFAULT_DEADLOCK_CHECK_INTERVAL_MS, DEFAULT_FETCH_SIZE, DEFAULT_LOCK_TIMEOUT_MS,
    MAX_CURSOR_NAME_LENGTH, MAX_LOB_LENGTH,
};
use crate::error::{TesseraError, TesseraResult};

/// Top-level engine configuration.
///
/// # Example
///
/// ```rust
/// use tessera_common::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.ledger.lock_timeout_ms, 60_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Lock ledger configuration.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Deferred cleanup worker configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Cursor engine configuration.
    #[serde(default)]
    pub cursor: CursorConfig,

    /// Data source the engine is bootstrapped from.
    #[serde(default)]
    pub data_source: DataSourceConfig,
}

impl EngineConfig {
    /// Creates a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration with short timeouts for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            ledger: LedgerConfig {
                lock_timeout_ms: 2_000,
                deadlock_check_interval_ms: 10,
                ..LedgerConfig::default()
            },
            ..Self::default()
        }
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> TesseraResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> TesseraResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| TesseraError::InvalidConfig {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a file, creating parent directories.
    pub fn save(&self, path: &Path) -> TesseraResult<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Converts configuration to a TOML string.
    pub fn to_toml(&self) -> TesseraResult<String> {
        toml::to_string_pretty(self).map_err(|e| TesseraError::InvalidConfig {
            message: e.to_string(),
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> TesseraResult<()> {
        if self.ledger.lock_timeout_ms == 0 {
            return Err(invalid("ledger.lock_timeout_ms must be greater than 0"));
        }
        if self.ledger.deadlock_check_interval_ms == 0 {
            return Err(invalid(
                "ledger.deadlock_check_interval_ms must be greater than 0",
            ));
        }
        if self.cleanup.thread_name.is_empty() {
            return Err(invalid("cleanup.thread_name must not be empty"));
        }
        if self.cleanup.max_batch == 0 {
            return Err(invalid("cleanup.max_batch must be greater than 0"));
        }
        if self.cursor.fetch_size == 0 {
            return Err(invalid("cursor.fetch_size must be greater than 0"));
        }
        if self.cursor.cursor_name_prefix.is_empty()
            || self.cursor.cursor_name_prefix.len() >= MAX_CURSOR_NAME_LENGTH
        {
            return Err(invalid(
                "cursor.cursor_name_prefix must be non-empty and shorter than the name limit",
            ));
        }
        if self.cursor.max_lob_length == 0 || self.cursor.max_lob_length > MAX_LOB_LENGTH {
            return Err(invalid(format!(
                "cursor.max_lob_length must be in 1..={MAX_LOB_LENGTH}"
            )));
        }
        Ok(())
    }

    /// Creates a builder for configuration.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

fn invalid(message: impl Into<String>) -> TesseraError {
    TesseraError::InvalidConfig {
        message: message.into(),
    }
}

/// Lock ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    /// How long a lock request waits before failing with a lock timeout.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Whether blocked requests check the wait-for graph for cycles.
    #[serde(default = "default_true")]
    pub deadlock_detection: bool,

    /// How often a blocked request wakes up to re-check for deadlock.
    #[serde(default = "default_deadlock_check_interval_ms")]
    pub deadlock_check_interval_ms: u64,
}

impl LedgerConfig {
    /// Returns the lock timeout as a duration.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Returns the deadlock check interval as a duration.
    #[must_use]
    pub fn deadlock_check_interval(&self) -> Duration {
        Duration::from_millis(self.deadlock_check_interval_ms)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            deadlock_detection: true,
            deadlock_check_interval_ms: default_deadlock_check_interval_ms(),
        }
    }
}

/// Deferred post-commit cleanup worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupConfig {
    /// Name of the worker thread.
    #[serde(default = "default_cleanup_thread_name")]
    pub thread_name: String,

    /// Maximum number of queued transactions drained per wake-up.
    #[serde(default = "default_cleanup_max_batch")]
    pub max_batch: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            thread_name: default_cleanup_thread_name(),
            max_batch: default_cleanup_max_batch(),
        }
    }
}

/// Cursor engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorConfig {
    /// Rows pulled from the source per batch by forward-only cursors.
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,

    /// Prefix used for generated cursor names.
    #[serde(default = "default_cursor_name_prefix")]
    pub cursor_name_prefix: String,

    /// Largest LOB value accepted from a caller-supplied stream.
    #[serde(default = "default_max_lob_length")]
    pub max_lob_length: u64,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            fetch_size: default_fetch_size(),
            cursor_name_prefix: default_cursor_name_prefix(),
            max_lob_length: default_max_lob_length(),
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_deadlock_check_interval_ms() -> u64 {
    DEFAULT_DEADLOCK_CHECK_INTERVAL_MS
}

fn default_cleanup_thread_name() -> String {
    DEFAULT_CLEANUP_THREAD_NAME.to_string()
}

fn default_cleanup_max_batch() -> usize {
    DEFAULT_CLEANUP_MAX_BATCH
}

fn default_fetch_size() -> usize {
    DEFAULT_FETCH_SIZE
}

fn default_cursor_name_prefix() -> String {
    DEFAULT_CURSOR_NAME_PREFIX.to_string()
}

fn default_max_lob_length() -> u64 {
    MAX_LOB_LENGTH
}

/// Builder for engine configuration.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock timeout.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.ledger.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enables or disables deadlock detection.
    #[must_use]
    pub fn deadlock_detection(mut self, enabled: bool) -> Self {
        self.config.ledger.deadlock_detection = enabled;
        self
    }

    /// Sets the deadlock check interval.
    #[must_use]
    pub fn deadlock_check_interval(mut self, interval: Duration) -> Self {
        self.config.ledger.deadlock_check_interval_ms =
            u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the forward-only fetch size.
    #[must_use]
    pub fn fetch_size(mut self, rows: usize) -> Self {
        self.config.cursor.fetch_size = rows;
        self
    }

    /// Sets the generated cursor name prefix.
    #[must_use]
    pub fn cursor_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.cursor.cursor_name_prefix = prefix.into();
        self
    }

    /// Sets the maximum LOB length.
    #[must_use]
    pub fn max_lob_length(mut self, max: u64) -> Self {
        self.config.cursor.max_lob_length = max;
        self
    }

    /// Sets the data source.
    #[must_use]
    pub fn data_source(mut self, data_source: DataSourceConfig) -> Self {
        self.config.data_source = data_source;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> EngineConfig {
        self.config
    }
}
