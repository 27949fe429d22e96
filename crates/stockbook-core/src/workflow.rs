//! # Workflow Types
//!
//! State for the two stock workflows that sit above the stock ledger.
//!
//! ## Pending Change Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   request ──► PENDING ──approve──► APPROVED ──acknowledge──► COMPLETED │
//! │                  │                   (return only, no stock effect)     │
//! │                  └────reject─────► REJECTED                             │
//! │                                                                         │
//! │   At most one PENDING row per (product, store).                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transfer Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   create ──► PENDING ──confirm──► CONFIRMED   (stock moves here)        │
//! │                 └─────cancel───► CANCELLED   (nothing to reverse)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreResult, ValidationError};
use crate::money::Money;
use crate::validation::{validate_identity, validate_quantity, validate_stock_level};

// =============================================================================
// Pending Inventory Changes
// =============================================================================

/// Stored discriminant of a requested change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Add,
    Remove,
    Adjust,
    Return,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Add => "add",
            ChangeType::Remove => "remove",
            ChangeType::Adjust => "adjust",
            ChangeType::Return => "return",
        };
        f.write_str(s)
    }
}

/// A change with its quantity attached, dispatched by exhaustive match.
///
/// `Adjust` carries the target store level, the others carry a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeAction {
    Add { qty: i64 },
    Remove { qty: i64 },
    Adjust { level: i64 },
    Return { qty: i64 },
}

impl ChangeAction {
    pub fn from_parts(change_type: ChangeType, qty: i64) -> Self {
        match change_type {
            ChangeType::Add => ChangeAction::Add { qty },
            ChangeType::Remove => ChangeAction::Remove { qty },
            ChangeType::Adjust => ChangeAction::Adjust { level: qty },
            ChangeType::Return => ChangeAction::Return { qty },
        }
    }

    pub fn change_type(&self) -> ChangeType {
        match self {
            ChangeAction::Add { .. } => ChangeType::Add,
            ChangeAction::Remove { .. } => ChangeType::Remove,
            ChangeAction::Adjust { .. } => ChangeType::Adjust,
            ChangeAction::Return { .. } => ChangeType::Return,
        }
    }

    /// The stored `qty` column.
    pub fn qty(&self) -> i64 {
        match *self {
            ChangeAction::Add { qty } | ChangeAction::Remove { qty } | ChangeAction::Return { qty } => {
                qty
            }
            ChangeAction::Adjust { level } => level,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        match *self {
            ChangeAction::Adjust { level } => validate_stock_level("level", level)?,
            ChangeAction::Add { qty } | ChangeAction::Remove { qty } | ChangeAction::Return { qty } => {
                validate_quantity(qty)?
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Approved => "approved",
            ChangeStatus::Rejected => "rejected",
            ChangeStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// A store-initiated inventory change awaiting (or past) warehouse review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PendingInventoryChange {
    pub id: i64,
    pub product_id: i64,
    pub store_id: i64,
    pub change_type: ChangeType,
    pub qty: i64,
    pub new_cost: Option<Money>,
    pub new_price: Option<Money>,
    pub reason: String,
    pub requested_by: String,
    pub status: ChangeStatus,
    pub reviewed_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_note: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl PendingInventoryChange {
    pub fn action(&self) -> ChangeAction {
        ChangeAction::from_parts(self.change_type, self.qty)
    }

    pub fn is_pending(&self) -> bool {
        self.status == ChangeStatus::Pending
    }
}

/// Input for `request`. The store is addressed by name and created lazily.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPendingChange {
    pub product_id: i64,
    pub store_name: String,
    pub action: ChangeAction,
    #[serde(default)]
    pub new_cost: Option<Money>,
    #[serde(default)]
    pub new_price: Option<Money>,
    #[serde(default)]
    pub reason: String,
    pub requested_by: String,
}

impl NewPendingChange {
    pub fn validate(&self) -> CoreResult<()> {
        self.action.validate()?;
        validate_identity("requested_by", &self.requested_by)?;
        for (field, amount) in [("new_cost", self.new_cost), ("new_price", self.new_price)] {
            if amount.is_some_and(|a| a.is_negative()) {
                return Err(ValidationError::MustNotBeNegative {
                    field: field.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

// =============================================================================
// Stock Transfers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Confirmed => "confirmed",
            TransferStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Warehouse → store movement record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockTransfer {
    pub transfer_id: i64,
    /// `None` means the warehouse.
    pub from_store: Option<String>,
    pub to_store_id: i64,
    pub status: TransferStatus,
    pub requested_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_reason: Option<String>,
    pub cancelled_by: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    #[serde(default)]
    pub items: Vec<StockTransferItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockTransferItem {
    pub transfer_id: i64,
    pub line_no: i64,
    pub product_id: i64,
    /// Name at the time the transfer was created.
    pub item_name: String,
    pub qty: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub product_id: i64,
    pub qty: i64,
}

/// Input for `create_transfer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransfer {
    pub to_store: String,
    #[serde(default)]
    pub from_store: Option<String>,
    pub items: Vec<TransferLine>,
    pub requested_by: String,
}

impl NewTransfer {
    pub fn validate(&self) -> CoreResult<()> {
        if self.items.is_empty() {
            return Err(ValidationError::Required {
                field: "items".into(),
            }
            .into());
        }
        for line in &self.items {
            validate_quantity(line.qty)?;
        }
        for line in self.totals_by_product() {
            validate_quantity(line.qty)?;
        }
        validate_identity("requested_by", &self.requested_by)?;
        Ok(())
    }

    /// Quantities per product with duplicate lines summed, in first-seen
    /// order.
    pub fn totals_by_product(&self) -> Vec<TransferLine> {
        merge_lines(self.items.iter().map(|l| (l.product_id, l.qty)))
            .into_iter()
            .map(|(product_id, qty)| TransferLine { product_id, qty })
            .collect()
    }
}

/// Sums quantities per product, keeping first-seen order.
pub fn merge_lines<I>(lines: I) -> Vec<(i64, i64)>
where
    I: IntoIterator<Item = (i64, i64)>,
{
    let mut order = Vec::new();
    let mut totals: BTreeMap<i64, i64> = BTreeMap::new();
    for (product_id, qty) in lines {
        let entry = totals.entry(product_id).or_insert_with(|| {
            order.push(product_id);
            0
        });
        *entry = entry.saturating_add(qty);
    }
    order.into_iter().map(|id| (id, totals[&id])).collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_action_round_trips_columns() {
        let action = ChangeAction::from_parts(ChangeType::Adjust, 12);
        assert_eq!(action, ChangeAction::Adjust { level: 12 });
        assert_eq!(action.change_type(), ChangeType::Adjust);
        assert_eq!(action.qty(), 12);
    }

    #[test]
    fn test_adjust_allows_zero_level_but_moves_need_positive_qty() {
        assert!(ChangeAction::Adjust { level: 0 }.validate().is_ok());
        assert!(ChangeAction::Adjust { level: -1 }.validate().is_err());
        assert!(ChangeAction::Return { qty: 0 }.validate().is_err());
        assert!(ChangeAction::Add { qty: 3 }.validate().is_ok());
    }

    #[test]
    fn test_change_action_serde_shape() {
        let json = serde_json::to_string(&ChangeAction::Return { qty: 5 }).unwrap();
        assert_eq!(json, r#"{"type":"return","qty":5}"#);
    }

    #[test]
    fn test_new_change_rejects_negative_price() {
        let req = NewPendingChange {
            product_id: 1,
            store_name: "Main".into(),
            action: ChangeAction::Add { qty: 1 },
            new_cost: None,
            new_price: Some(Money::from_cents(-5)),
            reason: String::new(),
            requested_by: "clerk".into(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_transfer_totals_merge_duplicate_lines() {
        let t = NewTransfer {
            to_store: "North".into(),
            from_store: None,
            items: vec![
                TransferLine { product_id: 2, qty: 5 },
                TransferLine { product_id: 1, qty: 3 },
                TransferLine { product_id: 2, qty: 4 },
            ],
            requested_by: "lead".into(),
        };
        assert_eq!(
            t.totals_by_product(),
            vec![
                TransferLine { product_id: 2, qty: 9 },
                TransferLine { product_id: 1, qty: 3 },
            ]
        );
    }

    #[test]
    fn test_empty_transfer_rejected() {
        let t = NewTransfer {
            to_store: "North".into(),
            from_store: None,
            items: vec![],
            requested_by: "lead".into(),
        };
        assert!(t.validate().is_err());
    }
}
