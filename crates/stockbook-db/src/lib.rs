//! # stockbook-db: Persistence Engines for Stockbook
//!
//! SQLite storage for the server-side engines and the offline client's
//! local arenas, on top of sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockbook Data Flow                              │
//! │                                                                         │
//! │  Caller (HTTP handler, CLI, SyncServer impl)                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   stockbook-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐   │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │   │   │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)  │   │   │
//! │  │   │               │    │ ledger, stock  │   │              │   │   │
//! │  │   │ SqlitePool    │◄───│ pending, xfer  │   │ 001_server   │   │   │
//! │  │   │               │    │ checkout, ...  │   │ 002_client   │   │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘   │   │
//! │  │            │                                                    │   │
//! │  │            ▼                                                    │   │
//! │  │   sequence.rs: next-id allocation with bounded retry           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL)                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and the [`Database`] handle
//! - [`migrations`] - Embedded schema migrations
//! - [`error`] - Database error types
//! - [`sequence`] - Sequential identifier allocation
//! - [`repository`] - One repository per engine
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockbook_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/stockbook.db")).await?;
//!
//! let sale = db.checkout().checkout(&request).await?;
//! let tb = db.reports().trial_balance(DateRange::all_time()).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod sequence;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::catalog::CatalogRepository;
pub use repository::checkout::CheckoutRepository;
pub use repository::ledger::{BalanceMismatch, LedgerRepository};
pub use repository::local_tx::{LocalTransaction, LocalTransactionRepository};
pub use repository::mirror::MirrorRepository;
pub use repository::pending::PendingChangeRepository;
pub use repository::report::ReportRepository;
pub use repository::stock::{StockLedger, StockLevels};
pub use repository::sync_queue::SyncQueueRepository;
pub use repository::transfer::TransferRepository;
