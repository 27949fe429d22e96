//! # Domain Types
//!
//! Catalog, stock and sale types shared by every Stockbook crate.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │      Store      │   │   Inventory     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (item id)   │   │  id             │   │  store_id  ─┐   │       │
//! │  │  name (unique)  │   │  name (unique)  │   │  product_id ┴PK │       │
//! │  │  cost / price   │   └─────────────────┘   │  stock >= 0     │       │
//! │  │  warehouse_stock│                         └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────┐  ┌──────────────────┐      │
//! │  │  Transaction    │   │ TransactionItem  │  │InventoryAddition │      │
//! │  │  ─────────────  │   │  ──────────────  │  │ ──────────────── │      │
//! │  │  transaction_id │◄──│  name/price/cost │  │ addition_id      │      │
//! │  │  (from 10001)   │   │  snapshots, qty  │  │ INV-YYYYMM-NNN   │      │
//! │  └─────────────────┘   └──────────────────┘  └──────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ledger types live in [`crate::ledger`], approval and transfer types in
//! [`crate::workflow`], sync intents in [`crate::sync`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate in basis points (1250 bps = 12.5%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// A catalog item. `warehouse_stock` is only ever mutated by the stock ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    /// Sequential item id.
    pub id: i64,
    pub name: String,
    pub cost: Money,
    pub price: Money,
    pub warehouse_stock: i64,
    /// Reorder hint, not enforced.
    pub restock_qty: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// True when warehouse stock has fallen to the reorder hint.
    pub fn needs_restock(&self) -> bool {
        self.restock_qty > 0 && self.warehouse_stock <= self.restock_qty
    }
}

/// Input for creating a product, also one row of a bulk import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub cost: Money,
    pub price: Money,
    #[serde(default)]
    pub warehouse_stock: i64,
    #[serde(default)]
    pub restock_qty: i64,
}

/// One rejected row of a bulk import (1-based row number).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ImportRowError {
    pub row: usize,
    pub name: String,
    pub message: String,
}

/// Outcome of a bulk product import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<ImportRowError>,
}

impl ImportReport {
    /// Rows that reached the catalog (created or updated).
    pub fn applied(&self) -> usize {
        self.created + self.updated
    }
}

/// A named sales/stock location, created lazily on first reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Store {
    pub id: i64,
    pub name: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Per-(store, product) stock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Inventory {
    pub store_id: i64,
    pub product_id: i64,
    pub stock: i64,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Warehouse Receipts
// =============================================================================

/// Input for `receive_into_warehouse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestockRequest {
    pub product_id: i64,
    pub qty: i64,
    /// New unit cost; replaces the product's cost.
    pub cost: Money,
    /// New unit price; replaces the product's price.
    pub price: Money,
    pub received_by: String,
}

/// Record of stock received into the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InventoryAddition {
    /// Sequential, starting at 1001.
    pub addition_id: i64,
    /// `INV-YYYYMM-NNN`
    pub reference: String,
    pub product_id: i64,
    pub qty: i64,
    pub cost: Money,
    pub price: Money,
    pub received_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Sales
// =============================================================================

/// One requested checkout line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLine {
    pub product_id: i64,
    pub qty: i64,
}

/// Input for checkout.
///
/// `transaction_id` is set by offline clients replaying a sale; the server
/// treats an id it already holds as a no-op returning the stored sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub transaction_id: Option<i64>,
    pub store_name: String,
    pub lines: Vec<CheckoutLine>,
}

/// A completed sale. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Transaction {
    pub transaction_id: i64,
    pub store_id: i64,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    #[serde(default)]
    pub items: Vec<TransactionItem>,
}

impl Transaction {
    /// Σ cost × qty over the snapshotted items.
    pub fn cost_of_goods(&self) -> Money {
        self.items.iter().map(TransactionItem::line_cost).sum()
    }
}

/// A sale line with price and cost frozen at the time of sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct TransactionItem {
    pub transaction_id: i64,
    pub line_no: i64,
    pub product_id: i64,
    pub item_name: String,
    pub item_price: Money,
    pub item_cost: Money,
    pub qty: i64,
}

impl TransactionItem {
    #[inline]
    pub fn line_total(&self) -> Money {
        self.item_price.multiply_quantity(self.qty)
    }

    #[inline]
    pub fn line_cost(&self) -> Money {
        self.item_cost.multiply_quantity(self.qty)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
