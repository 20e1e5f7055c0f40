//! Core identifier types for Tessera.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types (a row id can never be
//! passed where a transaction id is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new identifier from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            /// Returns the next identifier.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                Self(self.0.saturating_add(1))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            #[inline]
            fn from(id: u64) -> Self {
                Self::new(id)
            }
        }

        impl From<$name> for u64 {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Transaction identifier.
    ///
    /// Transaction IDs are handed out monotonically by the transaction
    /// manager and own every lock recorded in the ledger. `0` is reserved as
    /// the invalid sentinel.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tessera_common::types::TxnId;
    ///
    /// let txn = TxnId::new(1);
    /// assert!(txn.is_valid());
    /// assert!(!TxnId::INVALID.is_valid());
    /// ```
    TxnId,
    "TxnId"
);

impl TxnId {
    /// Invalid transaction ID, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Minimum valid transaction ID.
    pub const MIN: Self = Self(1);

    /// Checks if this is a valid transaction ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

define_id!(
    /// Stable row identifier within a table.
    ///
    /// Row IDs survive updates of the row's column values, which is what
    /// lets a cursor recognise that it has been repositioned onto the row it
    /// already materialized.
    RowId,
    "RowId"
);

define_id!(
    /// Identifies one open cursor within the process.
    CursorId,
    "CursorId"
);

define_id!(
    /// Identifies a table known to a row source.
    TableId,
    "TableId"
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_txn_id() {
        let txn = TxnId::new(1);
        assert!(txn.is_valid());
        assert_eq!(txn.next().as_u64(), 2);
        assert!(!TxnId::INVALID.is_valid());
        assert_eq!(TxnId::MIN, TxnId::new(1));
    }

    #[test]
    fn test_row_id_formatting() {
        let row = RowId::new(42);
        assert_eq!(format!("{row}"), "42");
        assert_eq!(format!("{row:?}"), "RowId(42)");
    }

    #[test]
    fn test_conversions() {
        let cursor: CursorId = 7u64.into();
        let raw: u64 = cursor.into();
        assert_eq!(raw, 7);
        assert_eq!(TableId::new(u64::MAX).next(), TableId::new(u64::MAX));
    }

    #[test]
    fn test_ordering_and_hashing() {
        assert!(RowId::new(1) < RowId::new(2));
        let set: HashSet<_> = [RowId::new(1), RowId::new(1), RowId::new(2)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }
}
