//! Type definitions for Tessera.
//!
//! This module contains the identifier types shared by every crate.

mod ids;

pub use ids::{CursorId, RowId, TableId, TxnId};
