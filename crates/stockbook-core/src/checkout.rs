//! # Sale Pricing
//!
//! Pure half of checkout: line merging, totals, and the journal drafts a
//! sale posts. The database engine supplies product snapshots and ids.
//!
//! ## Posting Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Entry A (always)         Dr Cash            total                      │
//! │                           Cr Sales Revenue   total                      │
//! │                                                                         │
//! │  Entry B (cost > 0)       Dr COGS            Σ cost × qty               │
//! │                           Cr Inventory       Σ cost × qty               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, ValidationError};
use crate::ledger::{NewJournalEntry, NewJournalLine};
use crate::money::Money;
use crate::types::{CheckoutLine, CheckoutRequest, TaxRate};
use crate::validation::{validate_quantity, validate_store_name};
use crate::workflow::merge_lines;

/// A checkout line with the product's price and cost frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: i64,
    pub item_name: String,
    pub item_price: Money,
    pub item_cost: Money,
    pub qty: i64,
}

/// Totals of one sale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleTotals {
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    /// Σ cost × qty, drives Entry B.
    pub cost_of_goods: Money,
}

impl CheckoutRequest {
    /// Shape checks plus duplicate-line merging.
    ///
    /// Two lines for the same product become one so the stock check sees the
    /// real requested quantity.
    pub fn normalized_lines(&self) -> CoreResult<Vec<CheckoutLine>> {
        validate_store_name(&self.store_name)?;
        if self.lines.is_empty() {
            return Err(ValidationError::Required {
                field: "lines".into(),
            }
            .into());
        }
        for line in &self.lines {
            validate_quantity(line.qty)?;
        }
        let merged: Vec<CheckoutLine> = merge_lines(self.lines.iter().map(|l| (l.product_id, l.qty)))
            .into_iter()
            .map(|(product_id, qty)| CheckoutLine { product_id, qty })
            .collect();
        for line in &merged {
            validate_quantity(line.qty)?;
        }
        Ok(merged)
    }
}

/// Computes subtotal, tax (rounded half up once), total and cost of goods.
///
/// ## Example
/// ```rust
/// use stockbook_core::checkout::{price_sale, PricedLine};
/// use stockbook_core::money::Money;
/// use stockbook_core::SALES_TAX;
///
/// let lines = [PricedLine {
///     product_id: 1,
///     item_name: "Lamp".into(),
///     item_price: Money::from_cents(5000),
///     item_cost: Money::from_cents(3000),
///     qty: 2,
/// }];
/// let totals = price_sale(&lines, SALES_TAX);
/// assert_eq!(totals.total.cents(), 11250);
/// assert_eq!(totals.cost_of_goods.cents(), 6000);
/// ```
pub fn price_sale(lines: &[PricedLine], rate: TaxRate) -> SaleTotals {
    let subtotal: Money = lines
        .iter()
        .map(|l| l.item_price.multiply_quantity(l.qty))
        .sum();
    let cost_of_goods: Money = lines
        .iter()
        .map(|l| l.item_cost.multiply_quantity(l.qty))
        .sum();
    let tax = subtotal.calculate_tax(rate);
    SaleTotals {
        subtotal,
        tax,
        total: subtotal + tax,
        cost_of_goods,
    }
}

/// Ledger accounts a sale touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleAccounts {
    pub cash: i64,
    pub sales_revenue: i64,
    pub cost_of_goods_sold: i64,
    pub inventory: i64,
}

/// Drafts Entry A and, when the goods had a cost, Entry B.
pub fn sale_journal_entries(
    transaction_id: i64,
    date: NaiveDate,
    totals: &SaleTotals,
    accounts: SaleAccounts,
) -> Vec<NewJournalEntry> {
    let source = Some(format!("sale:{}", transaction_id));
    let mut entries = vec![NewJournalEntry {
        date,
        description: format!("Sale #{}", transaction_id),
        source: source.clone(),
        lines: vec![
            NewJournalLine::debit(accounts.cash, totals.total, "Cash received"),
            NewJournalLine::credit(accounts.sales_revenue, totals.total, "Sales revenue"),
        ],
    }];

    if totals.cost_of_goods.is_positive() {
        entries.push(NewJournalEntry {
            date,
            description: format!("Cost of goods for sale #{}", transaction_id),
            source,
            lines: vec![
                NewJournalLine::debit(
                    accounts.cost_of_goods_sold,
                    totals.cost_of_goods,
                    "Cost of goods sold",
                ),
                NewJournalLine::credit(accounts.inventory, totals.cost_of_goods, "Inventory out"),
            ],
        });
    }

    entries
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::{MAX_QUANTITY, SALES_TAX};

    fn line(price: i64, cost: i64, qty: i64) -> PricedLine {
        PricedLine {
            product_id: 1,
            item_name: "P".into(),
            item_price: Money::from_cents(price),
            item_cost: Money::from_cents(cost),
            qty,
        }
    }

    fn accounts() -> SaleAccounts {
        SaleAccounts {
            cash: 1,
            sales_revenue: 5,
            cost_of_goods_sold: 6,
            inventory: 2,
        }
    }

    #[test]
    fn test_scenario_c_totals() {
        let totals = price_sale(&[line(5000, 3000, 2)], SALES_TAX);
        assert_eq!(totals.subtotal.cents(), 10000);
        assert_eq!(totals.tax.cents(), 1250);
        assert_eq!(totals.total.cents(), 11250);
        assert_eq!(totals.cost_of_goods.cents(), 6000);
    }

    #[test]
    fn test_two_entries_when_cost_positive() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        let totals = price_sale(&[line(5000, 3000, 2)], SALES_TAX);
        let entries = sale_journal_entries(10001, date, &totals, accounts());
        assert_eq!(entries.len(), 2);
        for e in &entries {
            e.validate().unwrap();
        }
        assert_eq!(entries[0].lines[0].debit.cents(), 11250);
        assert_eq!(entries[1].lines[1].credit.cents(), 6000);
        assert_eq!(entries[0].source.as_deref(), Some("sale:10001"));
    }

    #[test]
    fn test_zero_cost_sale_posts_only_entry_a() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        let totals = price_sale(&[line(500, 0, 1)], SALES_TAX);
        let entries = sale_journal_entries(10002, date, &totals, accounts());
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_normalized_lines_merge_duplicates() {
        let req = CheckoutRequest {
            transaction_id: None,
            store_name: "Main".into(),
            lines: vec![
                CheckoutLine { product_id: 7, qty: 2 },
                CheckoutLine { product_id: 7, qty: 3 },
            ],
        };
        assert_eq!(
            req.normalized_lines().unwrap(),
            vec![CheckoutLine { product_id: 7, qty: 5 }]
        );
    }

    #[test]
    fn test_normalized_lines_bound_merged_quantity() {
        let req = CheckoutRequest {
            transaction_id: None,
            store_name: "Main".into(),
            lines: vec![
                CheckoutLine { product_id: 7, qty: MAX_QUANTITY },
                CheckoutLine { product_id: 7, qty: 1 },
            ],
        };
        assert!(matches!(
            req.normalized_lines(),
            Err(CoreError::Validation(ValidationError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn test_normalized_lines_rejects_empty_cart() {
        let req = CheckoutRequest {
            transaction_id: None,
            store_name: "Main".into(),
            lines: vec![],
        };
        assert!(req.normalized_lines().is_err());
    }
}
