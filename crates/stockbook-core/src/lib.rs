//! # stockbook-core: Pure Rules for the Stockbook Engine
//!
//! Everything that can be decided without touching storage: money and tax,
//! double-entry rules, workflow states, sale pricing, report aggregation,
//! identifier shapes and the sync intent vocabulary.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Stockbook Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  stockbook-sync (offline client)                │   │
//! │  │   local apply ──► queue ──► drain ──► sweep ──► pull            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ SyncServer                             │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  stockbook-db (engines, SQLite)                 │   │
//! │  │   ledger • stock • approvals • transfers • checkout • reports   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ stockbook-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌──────────┐ ┌───────┐  │   │
//! │  │   │  money  │ │ ledger  │ │ workflow │ │ checkout │ │ sync  │  │   │
//! │  │   └─────────┘ └─────────┘ └──────────┘ └──────────┘ └───────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • NO CLOCK                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - `Money` in minor units, tax rounding
//! - [`types`] - Catalog, stock and sale entities
//! - [`ledger`] - Accounts, journal entries, balance law, code allocation
//! - [`workflow`] - Pending changes and stock transfers
//! - [`checkout`] - Sale totals and journal drafts
//! - [`reports`] - Trial balance, P&L, balance sheet
//! - [`numbering`] - Sequential identifier shapes
//! - [`sync`] - Queue intents, item states, mirror snapshot
//! - [`validation`] - Input shape checks
//! - [`error`] - Domain errors and the shared `ErrorKind`
//!
//! ## Example Usage
//!
//! ```rust
//! use stockbook_core::money::Money;
//! use stockbook_core::SALES_TAX;
//!
//! let subtotal = Money::from_cents(10000);
//! assert_eq!(subtotal.calculate_tax(SALES_TAX).cents(), 1250);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod checkout;
pub mod error;
pub mod ledger;
pub mod money;
pub mod numbering;
pub mod reports;
pub mod sync;
pub mod types;
pub mod validation;
pub mod workflow;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorKind, StockLocation, ValidationError};
pub use ledger::{Account, AccountType, DateRange, JournalEntry, JournalLine};
pub use money::Money;
pub use types::*;
pub use workflow::{
    ChangeAction, ChangeStatus, ChangeType, PendingInventoryChange, StockTransfer, TransferStatus,
};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Fixed sales tax, 12.5% of subtotal.
pub const TAX_RATE_BPS: u32 = 1250;

pub const SALES_TAX: TaxRate = TaxRate::from_bps(TAX_RATE_BPS);

/// Attempts at an atomic unit that allocates a sequence value before
/// giving up with `SequenceAllocationConflict`.
pub const MAX_SEQUENCE_ATTEMPTS: u32 = 5;

/// Upper bound for any single quantity or stock level. Keeps stock columns
/// integral and `price × qty` far from `i64` overflow.
pub const MAX_QUANTITY: i64 = 1_000_000;

/// Upper bound for product, store and identity strings.
pub const MAX_NAME_LENGTH: usize = 200;
