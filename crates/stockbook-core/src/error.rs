//! # Error Types
//!
//! Domain-specific error types for stockbook-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockbook-core errors (this file)                                     │
//! │  ├── ValidationError  - Input shape failures (empty name, qty <= 0)    │
//! │  └── CoreError        - Business rule violations                       │
//! │                                                                         │
//! │  stockbook-db errors                                                   │
//! │  └── DbError          - Storage failures + Domain(CoreError)           │
//! │                                                                         │
//! │  stockbook-sync errors                                                 │
//! │  └── SyncError / RemoteError - Replay and transport failures           │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → RemoteError             │
//! │                                                                         │
//! │  Every layer answers `kind()` with the same ErrorKind so a boundary    │
//! │  can hand callers a machine-distinguishable failure.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Error Kind
// =============================================================================

/// Machine-distinguishable failure kind shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InsufficientWarehouseStock,
    InsufficientStoreStock,
    OutOfStock,
    UnbalancedEntry,
    DuplicatePendingChange,
    NotPending,
    NotFound,
    SequenceAllocationConflict,
    TransactionIdConflict,
    Validation,
    Conflict,
    Internal,
}

impl ErrorKind {
    /// Business-rule failures are surfaced to a person and never retried
    /// automatically. Everything else may succeed on a later attempt.
    pub fn is_business_rule(&self) -> bool {
        !matches!(
            self,
            ErrorKind::SequenceAllocationConflict | ErrorKind::Internal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InsufficientWarehouseStock => "insufficient_warehouse_stock",
            ErrorKind::InsufficientStoreStock => "insufficient_store_stock",
            ErrorKind::OutOfStock => "out_of_stock",
            ErrorKind::UnbalancedEntry => "unbalanced_entry",
            ErrorKind::DuplicatePendingChange => "duplicate_pending_change",
            ErrorKind::NotPending => "not_pending",
            ErrorKind::NotFound => "not_found",
            ErrorKind::SequenceAllocationConflict => "sequence_allocation_conflict",
            ErrorKind::TransactionIdConflict => "transaction_id_conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Where a stock shortfall was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockLocation {
    Warehouse,
    Store,
}

impl fmt::Display for StockLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockLocation::Warehouse => f.write_str("warehouse"),
            StockLocation::Store => f.write_str("store"),
        }
    }
}

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations.
///
/// All of these abort the enclosing atomic unit: no partial posting, no
/// partial stock movement, no partially created transaction.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Not enough stock at the source of a movement.
    ///
    /// ## When This Occurs
    /// - Warehouse → store move (approval of `add`, transfer confirm,
    ///   upward `adjust`) with `warehouse_stock < qty`
    /// - Store → warehouse move or store-only decrement with `stock < qty`
    ///   (or no inventory row at all, reported as available 0)
    #[error("Insufficient {location} stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        location: StockLocation,
        product: String,
        available: i64,
        requested: i64,
    },

    /// A checkout line asks for more than the store holds.
    ///
    /// ## User Workflow
    /// ```text
    /// Checkout "Cola" × 12 at Store S
    ///      │
    ///      ▼
    /// Store S inventory: 10
    ///      │
    ///      ▼
    /// OutOfStock { item: "Cola", available: 10, requested: 12 }
    ///      │
    ///      ▼
    /// Whole checkout aborted, nothing written
    /// ```
    #[error("Out of stock: {item} (available {available}, requested {requested})")]
    OutOfStock {
        item: String,
        available: i64,
        requested: i64,
    },

    /// Σdebit != Σcredit for a journal entry.
    #[error("Unbalanced journal entry: debits {debits} != credits {credits}")]
    UnbalancedEntry { debits: Money, credits: Money },

    /// A pending change already exists for this (product, store) pair.
    #[error("Product {product_id} already has pending change {existing_id} at store {store_id}")]
    DuplicatePendingChange {
        product_id: i64,
        store_id: i64,
        existing_id: i64,
    },

    /// The entity was already resolved (approved, rejected, confirmed, ...).
    #[error("{entity} {id} is {status}, not pending")]
    NotPending {
        entity: String,
        id: String,
        status: String,
    },

    /// Sequence allocation kept colliding with concurrent writers.
    #[error("Could not allocate next {sequence} after {attempts} attempts")]
    SequenceAllocationConflict { sequence: String, attempts: u32 },

    /// A replayed sale reuses a transaction id already held by a different
    /// sale. The stored sale is left alone and the replay is refused.
    #[error("Transaction {transaction_id} already belongs to a different sale")]
    TransactionIdConflict { transaction_id: i64 },

    /// Account code is not numeric or lies outside its type's prefix block.
    #[error("Invalid account code '{code}': {reason}")]
    InvalidAccountCode { code: String, reason: String },

    /// Every code in the type's thousand-block is taken.
    #[error("No free account codes left in the {prefix}xxx block")]
    AccountCodeSpaceExhausted { prefix: u32 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns the machine-distinguishable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InsufficientStock {
                location: StockLocation::Warehouse,
                ..
            } => ErrorKind::InsufficientWarehouseStock,
            CoreError::InsufficientStock {
                location: StockLocation::Store,
                ..
            } => ErrorKind::InsufficientStoreStock,
            CoreError::OutOfStock { .. } => ErrorKind::OutOfStock,
            CoreError::UnbalancedEntry { .. } => ErrorKind::UnbalancedEntry,
            CoreError::DuplicatePendingChange { .. } => ErrorKind::DuplicatePendingChange,
            CoreError::NotPending { .. } => ErrorKind::NotPending,
            CoreError::SequenceAllocationConflict { .. } => ErrorKind::SequenceAllocationConflict,
            CoreError::TransactionIdConflict { .. } => ErrorKind::TransactionIdConflict,
            CoreError::InvalidAccountCode { .. }
            | CoreError::AccountCodeSpaceExhausted { .. }
            | CoreError::Validation(_) => ErrorKind::Validation,
        }
    }

    /// True for every flavour of "not enough stock", checkout included.
    pub fn is_insufficient_stock(&self) -> bool {
        matches!(
            self,
            CoreError::InsufficientStock { .. } | CoreError::OutOfStock { .. }
        )
    }

    pub fn not_pending(
        entity: impl Into<String>,
        id: impl fmt::Display,
        status: impl fmt::Display,
    ) -> Self {
        CoreError::NotPending {
            entity: entity.into(),
            id: id.to_string(),
            status: status.to_string(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors, raised before any business rule runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_message_names_location() {
        let err = CoreError::InsufficientStock {
            location: StockLocation::Warehouse,
            product: "Cola 330ml".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient warehouse stock for Cola 330ml: available 3, requested 5"
        );
        assert_eq!(err.kind(), ErrorKind::InsufficientWarehouseStock);
        assert!(err.is_insufficient_stock());
    }

    #[test]
    fn test_kinds_for_store_and_checkout_shortfalls() {
        let store = CoreError::InsufficientStock {
            location: StockLocation::Store,
            product: "Cola".into(),
            available: 0,
            requested: 1,
        };
        assert_eq!(store.kind(), ErrorKind::InsufficientStoreStock);

        let checkout = CoreError::OutOfStock {
            item: "Cola".into(),
            available: 10,
            requested: 12,
        };
        assert_eq!(checkout.kind(), ErrorKind::OutOfStock);
        assert!(checkout.is_insufficient_stock());
    }

    #[test]
    fn test_not_pending_carries_status() {
        let err = CoreError::not_pending("PendingInventoryChange", 7, "approved");
        assert_eq!(err.to_string(), "PendingInventoryChange 7 is approved, not pending");
        assert_eq!(err.kind(), ErrorKind::NotPending);
    }

    #[test]
    fn test_business_rule_classification() {
        assert!(ErrorKind::OutOfStock.is_business_rule());
        assert!(ErrorKind::NotPending.is_business_rule());
        assert!(!ErrorKind::SequenceAllocationConflict.is_business_rule());
        assert!(!ErrorKind::Internal.is_business_rule());
        assert!(ErrorKind::TransactionIdConflict.is_business_rule());
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let err: CoreError = ValidationError::Required {
            field: "name".to_string(),
        }
        .into();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
