//! # Financial Reports
//!
//! Pure aggregation over per-account line sums. The database layer sums
//! journal lines for the requested period; nothing here reads the cached
//! running balance, so a narrowed period is always exact.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ledger::{Account, AccountType, NormalBalance};
use crate::money::Money;

/// Σdebit and Σcredit of one account's lines over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountActivity {
    pub account: Account,
    pub debit: Money,
    pub credit: Money,
}

impl AccountActivity {
    /// Signed change on the account's normal side.
    pub fn net(&self) -> Money {
        self.account
            .account_type
            .balance_delta(self.debit, self.credit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReportLine {
    pub code: String,
    pub name: String,
    pub amount: Money,
}

impl ReportLine {
    fn from_activity(activity: &AccountActivity) -> Self {
        ReportLine {
            code: activity.account.code.clone(),
            name: activity.account.name.clone(),
            amount: activity.net(),
        }
    }
}

// =============================================================================
// Trial Balance
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TrialBalanceRow {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub debit: Money,
    pub credit: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TrialBalance {
    pub rows: Vec<TrialBalanceRow>,
    pub total_debit: Money,
    pub total_credit: Money,
    /// Totals differ by less than one minor unit.
    pub is_balanced: bool,
}

/// Places each account's net in its debit or credit column.
///
/// A debit-normal account with a negative net shows in the credit column
/// and vice versa. Accounts with no activity are omitted.
pub fn trial_balance(activity: &[AccountActivity]) -> TrialBalance {
    let mut rows = Vec::new();
    for a in activity {
        let net = a.net();
        if net.is_zero() {
            continue;
        }
        let debit_side = match a.account.account_type.normal_balance() {
            NormalBalance::Debit => net.is_positive(),
            NormalBalance::Credit => net.is_negative(),
        };
        let (debit, credit) = if debit_side {
            (net.abs(), Money::zero())
        } else {
            (Money::zero(), net.abs())
        };
        rows.push(TrialBalanceRow {
            code: a.account.code.clone(),
            name: a.account.name.clone(),
            account_type: a.account.account_type,
            debit,
            credit,
        });
    }

    let total_debit: Money = rows.iter().map(|r| r.debit).sum();
    let total_credit: Money = rows.iter().map(|r| r.credit).sum();
    TrialBalance {
        is_balanced: (total_debit - total_credit).abs().cents() < 1,
        rows,
        total_debit,
        total_credit,
    }
}

// =============================================================================
// Profit & Loss
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProfitAndLoss {
    pub revenue: Vec<ReportLine>,
    pub expenses: Vec<ReportLine>,
    pub total_revenue: Money,
    pub total_expenses: Money,
    pub net_income: Money,
}

pub fn profit_and_loss(activity: &[AccountActivity]) -> ProfitAndLoss {
    let section = |ty: AccountType| -> Vec<ReportLine> {
        activity
            .iter()
            .filter(|a| a.account.account_type == ty)
            .map(ReportLine::from_activity)
            .filter(|l| !l.amount.is_zero())
            .collect()
    };
    let revenue = section(AccountType::Revenue);
    let expenses = section(AccountType::Expense);
    let total_revenue: Money = revenue.iter().map(|l| l.amount).sum();
    let total_expenses: Money = expenses.iter().map(|l| l.amount).sum();
    ProfitAndLoss {
        net_income: total_revenue - total_expenses,
        revenue,
        expenses,
        total_revenue,
        total_expenses,
    }
}

// =============================================================================
// Balance Sheet
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BalanceSheet {
    pub assets: Vec<ReportLine>,
    pub liabilities: Vec<ReportLine>,
    pub equity: Vec<ReportLine>,
    /// Revenue minus expenses not yet closed to equity.
    pub current_earnings: Money,
    pub total_assets: Money,
    pub total_liabilities: Money,
    /// Equity accounts plus current earnings.
    pub total_equity: Money,
    pub is_balanced: bool,
}

/// Builds a balance sheet from cumulative activity up to the as-of date.
pub fn balance_sheet(activity: &[AccountActivity]) -> BalanceSheet {
    let section = |ty: AccountType| -> Vec<ReportLine> {
        activity
            .iter()
            .filter(|a| a.account.account_type == ty)
            .map(ReportLine::from_activity)
            .filter(|l| !l.amount.is_zero())
            .collect()
    };
    let assets = section(AccountType::Asset);
    let liabilities = section(AccountType::Liability);
    let equity = section(AccountType::Equity);
    let current_earnings = profit_and_loss(activity).net_income;

    let total_assets: Money = assets.iter().map(|l| l.amount).sum();
    let total_liabilities: Money = liabilities.iter().map(|l| l.amount).sum();
    let total_equity = equity.iter().map(|l| l.amount).sum::<Money>() + current_earnings;

    BalanceSheet {
        is_balanced: total_assets == total_liabilities + total_equity,
        assets,
        liabilities,
        equity,
        current_earnings,
        total_assets,
        total_liabilities,
        total_equity,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
