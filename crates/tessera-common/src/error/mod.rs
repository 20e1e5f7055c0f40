//! Error handling for Tessera.
//!
//! This module provides a unified error type and result alias used
//! across all Tessera components.

mod engine;

pub use engine::{ErrorCode, TesseraError};

/// Result type alias for Tessera operations.
pub type TesseraResult<T> = std::result::Result<T, TesseraError>;
