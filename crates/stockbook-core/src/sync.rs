//! # Sync Intents
//!
//! What an offline client records and replays.
//!
//! ## Two Arenas
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sync_queue (append-only)             mirror (overwritable)             │
//! │  ────────────────────────             ─────────────────────             │
//! │  SyncIntent rows, FIFO by seq         ServerSnapshot, kind by kind      │
//! │  removed only on server ack           replaced wholesale on pull        │
//! │  source of truth for unacked writes   source of truth for reads         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::types::{
    CheckoutRequest, Inventory, InventoryAddition, Product, RestockRequest, Store, Transaction,
};
use crate::workflow::{NewPendingChange, NewTransfer, PendingInventoryChange, StockTransfer};

// =============================================================================
// Intents
// =============================================================================

/// Server table an intent mutates, recorded on the queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTable {
    Transactions,
    InventoryAdditions,
    PendingInventoryChanges,
    StockTransfers,
}

impl SyncTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTable::Transactions => "transactions",
            SyncTable::InventoryAdditions => "inventory_additions",
            SyncTable::PendingInventoryChanges => "pending_inventory_changes",
            SyncTable::StockTransfers => "stock_transfers",
        }
    }
}

impl fmt::Display for SyncTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One replayable mutation.
///
/// Serialized as `{"action": "checkout", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum SyncIntent {
    Checkout(CheckoutRequest),
    Restock(RestockRequest),
    RequestChange(NewPendingChange),
    ApproveChange {
        change_id: i64,
        reviewed_by: String,
    },
    RejectChange {
        change_id: i64,
        reviewed_by: String,
        reason: String,
    },
    AcknowledgeReturn {
        product_id: i64,
        store_name: String,
    },
    CreateTransfer(NewTransfer),
    ConfirmTransfer {
        transfer_id: i64,
        confirmed_by: String,
    },
    CancelTransfer {
        transfer_id: i64,
        reason: String,
        cancelled_by: String,
    },
}

impl SyncIntent {
    pub fn table(&self) -> SyncTable {
        match self {
            SyncIntent::Checkout(_) => SyncTable::Transactions,
            SyncIntent::Restock(_) => SyncTable::InventoryAdditions,
            SyncIntent::RequestChange(_)
            | SyncIntent::ApproveChange { .. }
            | SyncIntent::RejectChange { .. }
            | SyncIntent::AcknowledgeReturn { .. } => SyncTable::PendingInventoryChanges,
            SyncIntent::CreateTransfer(_)
            | SyncIntent::ConfirmTransfer { .. }
            | SyncIntent::CancelTransfer { .. } => SyncTable::StockTransfers,
        }
    }

    /// Verb recorded next to the table.
    pub fn action(&self) -> &'static str {
        match self {
            SyncIntent::Checkout(_)
            | SyncIntent::Restock(_)
            | SyncIntent::RequestChange(_)
            | SyncIntent::CreateTransfer(_) => "create",
            SyncIntent::ApproveChange { .. } => "approve",
            SyncIntent::RejectChange { .. } => "reject",
            SyncIntent::AcknowledgeReturn { .. } => "acknowledge",
            SyncIntent::ConfirmTransfer { .. } => "confirm",
            SyncIntent::CancelTransfer { .. } => "cancel",
        }
    }
}

// =============================================================================
// Queue Items
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemState {
    /// Never attempted.
    Pending,
    /// Failed transiently, retried on the next cycle.
    Retrying,
    /// Rejected by a business rule or undecodable; skipped until an
    /// operator retries or discards it.
    NeedsAttention,
}

impl QueueItemState {
    pub fn is_drainable(&self) -> bool {
        !matches!(self, QueueItemState::NeedsAttention)
    }
}

impl fmt::Display for QueueItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueueItemState::Pending => "pending",
            QueueItemState::Retrying => "retrying",
            QueueItemState::NeedsAttention => "needs_attention",
        };
        f.write_str(s)
    }
}

/// A queued intent as stored on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SyncQueueItem {
    /// Uuid, stable across retries.
    pub id: String,
    /// FIFO position.
    pub seq: i64,
    pub table_name: String,
    pub action: String,
    /// JSON of the [`SyncIntent`].
    pub data: String,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
    pub attempts: i64,
    pub state: QueueItemState,
    pub last_error: Option<String>,
    #[ts(as = "Option<String>")]
    pub attempted_at: Option<DateTime<Utc>>,
}

impl SyncQueueItem {
    pub fn intent(&self) -> Result<SyncIntent, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

/// Totals per state, for the status view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueueCounts {
    pub pending: i64,
    pub retrying: i64,
    pub needs_attention: i64,
}

impl QueueCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.retrying + self.needs_attention
    }
}

// =============================================================================
// Mirror
// =============================================================================

/// Entity families held in the client mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorKind {
    Product,
    Store,
    Inventory,
    PendingChange,
    Transfer,
    Addition,
    Transaction,
}

impl MirrorKind {
    pub const ALL: [MirrorKind; 7] = [
        MirrorKind::Product,
        MirrorKind::Store,
        MirrorKind::Inventory,
        MirrorKind::PendingChange,
        MirrorKind::Transfer,
        MirrorKind::Addition,
        MirrorKind::Transaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorKind::Product => "product",
            MirrorKind::Store => "store",
            MirrorKind::Inventory => "inventory",
            MirrorKind::PendingChange => "pending_change",
            MirrorKind::Transfer => "transfer",
            MirrorKind::Addition => "addition",
            MirrorKind::Transaction => "transaction",
        }
    }
}

impl FromStr for MirrorKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MirrorKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "mirror kind".into(),
                reason: format!("unknown kind '{}'", s),
            })
    }
}

/// Authoritative read state returned by a pull.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub products: Vec<Product>,
    pub stores: Vec<Store>,
    pub inventories: Vec<Inventory>,
    /// Only changes still pending.
    pub pending_changes: Vec<PendingInventoryChange>,
    pub transfers: Vec<StockTransfer>,
    pub additions: Vec<InventoryAddition>,
    pub recent_transactions: Vec<Transaction>,
}

// =============================================================================
// Unit Tests
// =============================================================================
