//! # tessera-test
//!
//! Integration tests for Tessera.
//!
//! This crate contains:
//! - Fixtures: seeded databases and deterministic LOB payloads
//! - Row sources that misbehave on purpose (slow or gated fetches)
//! - Cross-crate tests under `tests/` covering cursor navigation, LOB
//!   lengths, stream gating, locking across connections and deferred
//!   cleanup

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Seeded databases and payload generators.
///
/// This module provides:
/// - [`fixtures::Fixture`]: a database over an in-memory source
/// - [`fixtures::init_tracing`]: installs the test log subscriber once
/// - [`fixtures::payload`] and [`fixtures::text`]: seeded LOB contents
pub mod fixtures;

/// Row sources for fault and timing tests.
///
/// This module provides:
/// - [`sources::GatedSource`]: blocks the first row pull until released
pub mod sources;

pub use fixtures::{init_tracing, payload, text, Fixture};
pub use sources::GatedSource;
