//! # Repository Module
//!
//! One repository per engine. Each public method is one atomic unit.
//!
//! ## Composition
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Engines and their `_in` helpers                      │
//! │                                                                         │
//! │  Public method                     Transaction-scoped helper            │
//! │  ─────────────                     ─────────────────────────            │
//! │  PendingChangeRepository::approve ─┬─► stock::move_*_in                 │
//! │                                    └─► catalog::set_pricing_in          │
//! │  TransferRepository::confirm ─────────► stock::move_warehouse_to_store_in│
//! │  CheckoutRepository::checkout ─────┬─► stock::try_decrement_store_in    │
//! │                                    └─► ledger::post_entry_in            │
//! │  LocalTransactionRepository ───────┬─► mirror::decrement_inventory_in   │
//! │                                    └─► sync_queue::enqueue_in           │
//! │                                                                         │
//! │  `_in` helpers take `&mut SqliteConnection` and never begin or commit. │
//! │  The public method owns the transaction, so the composed work commits  │
//! │  or rolls back as one.                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Server Engines
//!
//! - [`ledger::LedgerRepository`] - Chart of accounts, journal posting
//! - [`catalog::CatalogRepository`] - Products, stores, inventory reads
//! - [`stock::StockLedger`] - Warehouse/store movements, receipts
//! - [`pending::PendingChangeRepository`] - Approval workflow
//! - [`transfer::TransferRepository`] - Warehouse → store transfers
//! - [`checkout::CheckoutRepository`] - Sales
//! - [`report::ReportRepository`] - Trial balance, P&L, balance sheet
//!
//! ## Client Arenas
//!
//! - [`sync_queue::SyncQueueRepository`] - FIFO of unacknowledged intents
//! - [`mirror::MirrorRepository`] - Last pulled server state
//! - [`local_tx::LocalTransactionRepository`] - Offline sales

pub mod catalog;
pub mod checkout;
pub mod ledger;
pub mod local_tx;
pub mod mirror;
pub mod pending;
pub mod report;
pub mod stock;
pub mod sync_queue;
pub mod transfer;
