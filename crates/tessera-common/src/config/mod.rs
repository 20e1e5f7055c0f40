//! Configuration for Tessera.
//!
//! This module provides configuration structures for the lock ledger, the
//! deferred cleanup worker, the cursor engine and the data source.

mod data_source;
mod engine;

pub use data_source::{DataSourceConfig, PropertyDescriptor, PropertyValue};
pub use engine::{CleanupConfig, CursorConfig, EngineConfig, EngineConfigBuilder, LedgerConfig};
