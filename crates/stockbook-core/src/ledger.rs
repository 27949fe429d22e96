//! # Ledger Rules
//!
//! Pure double-entry bookkeeping: account types and their normal side, the
//! balance law, entry numbering and account-code allocation.
//!
//! ## Running Balance Semantics
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Account type      Normal side     balance += ...                       │
//! │  ─────────────     ───────────     ───────────────                      │
//! │  ASSET      (1xxx)  debit          debit - credit                       │
//! │  LIABILITY  (2xxx)  credit         credit - debit                       │
//! │  EQUITY     (3xxx)  credit         credit - debit                       │
//! │  REVENUE    (4xxx)  credit         credit - debit                       │
//! │  EXPENSE    (5xxx)  debit          debit - credit                       │
//! │                                                                         │
//! │  Invariant: cached balance == Σ balance_delta(line) over all lines.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;

// =============================================================================
// Account Type
// =============================================================================

/// The five account classes. The numeric code prefix is the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

/// Which side of a line increases an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalBalance {
    Debit,
    Credit,
}

impl AccountType {
    pub const ALL: [AccountType; 5] = [
        AccountType::Asset,
        AccountType::Liability,
        AccountType::Equity,
        AccountType::Revenue,
        AccountType::Expense,
    ];

    /// Leading digit of every code in this class.
    pub const fn code_prefix(&self) -> u32 {
        match self {
            AccountType::Asset => 1,
            AccountType::Liability => 2,
            AccountType::Equity => 3,
            AccountType::Revenue => 4,
            AccountType::Expense => 5,
        }
    }

    pub const fn normal_balance(&self) -> NormalBalance {
        match self {
            AccountType::Asset | AccountType::Expense => NormalBalance::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Revenue => {
                NormalBalance::Credit
            }
        }
    }

    /// Infers the class from a code's leading digit.
    pub fn from_code(code: &str) -> Option<AccountType> {
        match code.chars().next()? {
            '1' => Some(AccountType::Asset),
            '2' => Some(AccountType::Liability),
            '3' => Some(AccountType::Equity),
            '4' => Some(AccountType::Revenue),
            '5' => Some(AccountType::Expense),
            _ => None,
        }
    }

    /// Signed change applied to the running balance by one line.
    pub fn balance_delta(&self, debit: Money, credit: Money) -> Money {
        match self.normal_balance() {
            NormalBalance::Debit => debit - credit,
            NormalBalance::Credit => credit - debit,
        }
    }

    /// Inclusive code range `prefix000..=prefix999`.
    pub fn code_block(&self) -> (u32, u32) {
        let base = self.code_prefix() * 1000;
        (base, base + 999)
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Equity => "EQUITY",
            AccountType::Revenue => "REVENUE",
            AccountType::Expense => "EXPENSE",
        };
        f.write_str(s)
    }
}

impl FromStr for AccountType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asset" => Ok(AccountType::Asset),
            "liability" => Ok(AccountType::Liability),
            "equity" => Ok(AccountType::Equity),
            "revenue" => Ok(AccountType::Revenue),
            "expense" => Ok(AccountType::Expense),
            other => Err(ValidationError::InvalidFormat {
                field: "account_type".into(),
                reason: format!("unknown account type '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Accounts
// =============================================================================

/// A ledger account. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Account {
    pub id: i64,
    /// Stable identifier, e.g. "1010".
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub sub_type: String,
    /// Running all-time total, see module docs.
    pub balance: Money,
    pub main_account_id: Option<i64>,
    pub category_id: Option<i64>,
}

/// Lookup key and creation template for `resolve_or_create_account`.
///
/// With `code` set the code is the key; otherwise the name is, and a new
/// account receives the next free code in its type's block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSpec {
    pub code: Option<String>,
    pub name: String,
    pub account_type: AccountType,
    #[serde(default)]
    pub sub_type: String,
}

impl AccountSpec {
    pub fn new(code: Option<&str>, name: &str, account_type: AccountType, sub_type: &str) -> Self {
        AccountSpec {
            code: code.map(str::to_string),
            name: name.to_string(),
            account_type,
            sub_type: sub_type.to_string(),
        }
    }

    /// Checks that an explicit code belongs to the declared type's block.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "account name".into(),
            }
            .into());
        }
        if let Some(code) = &self.code {
            check_code_in_block(code, self.account_type)?;
        }
        Ok(())
    }
}

/// The accounts checkout posts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardAccount {
    Cash,
    Inventory,
    AccountsPayable,
    OwnersEquity,
    SalesRevenue,
    CostOfGoodsSold,
}

impl StandardAccount {
    pub fn spec(&self) -> AccountSpec {
        match self {
            StandardAccount::Cash => {
                AccountSpec::new(Some("1010"), "Cash", AccountType::Asset, "current_asset")
            }
            StandardAccount::Inventory => {
                AccountSpec::new(Some("1200"), "Inventory", AccountType::Asset, "current_asset")
            }
            StandardAccount::AccountsPayable => AccountSpec::new(
                Some("2010"),
                "Accounts Payable",
                AccountType::Liability,
                "current_liability",
            ),
            StandardAccount::OwnersEquity => AccountSpec::new(
                Some("3010"),
                "Owner's Equity",
                AccountType::Equity,
                "capital",
            ),
            StandardAccount::SalesRevenue => AccountSpec::new(
                Some("4010"),
                "Sales Revenue",
                AccountType::Revenue,
                "operating_revenue",
            ),
            StandardAccount::CostOfGoodsSold => AccountSpec::new(
                Some("5010"),
                "Cost of Goods Sold",
                AccountType::Expense,
                "cost_of_sales",
            ),
        }
    }
}

fn check_code_in_block(code: &str, account_type: AccountType) -> CoreResult<u32> {
    let value: u32 = code.parse().map_err(|_| CoreError::InvalidAccountCode {
        code: code.to_string(),
        reason: "must be numeric".into(),
    })?;
    let (lo, hi) = account_type.code_block();
    if code.len() != 4 || value < lo || value > hi {
        return Err(CoreError::InvalidAccountCode {
            code: code.to_string(),
            reason: format!("{} accounts use {}..={}", account_type, lo, hi),
        });
    }
    Ok(value)
}

/// Picks the code for a new account: one past the highest code already used
/// in the type's block, or `prefix001` for an empty block.
///
/// ## Example
/// ```rust
/// use stockbook_core::ledger::{next_account_code, AccountType};
///
/// let used = ["1010", "1200", "4010"];
/// assert_eq!(next_account_code(AccountType::Asset, used).unwrap(), "1201");
/// assert_eq!(next_account_code(AccountType::Liability, used).unwrap(), "2001");
/// ```
pub fn next_account_code<'a, I>(account_type: AccountType, used: I) -> CoreResult<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let (lo, hi) = account_type.code_block();
    let highest = used
        .into_iter()
        .filter_map(|c| c.parse::<u32>().ok())
        .filter(|v| (lo..=hi).contains(v))
        .max();
    let next = match highest {
        Some(v) if v >= hi => {
            return Err(CoreError::AccountCodeSpaceExhausted {
                prefix: account_type.code_prefix(),
            })
        }
        Some(v) => v + 1,
        None => lo + 1,
    };
    Ok(next.to_string())
}

// =============================================================================
// Journal Entries
// =============================================================================

/// One posted accounting event. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct JournalEntry {
    pub id: i64,
    /// `JE` followed by six digits.
    pub entry_number: String,
    #[ts(as = "String")]
    pub entry_date: NaiveDate,
    pub description: String,
    /// Free-form origin tag, e.g. `sale:10001`.
    pub source: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    #[serde(default)]
    pub lines: Vec<JournalLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct JournalLine {
    pub entry_id: i64,
    pub line_no: i64,
    pub account_id: i64,
    pub debit: Money,
    pub credit: Money,
    pub description: String,
}

/// Input for `post_entry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub date: NaiveDate,
    pub description: String,
    #[serde(default)]
    pub source: Option<String>,
    pub lines: Vec<NewJournalLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJournalLine {
    pub account_id: i64,
    pub debit: Money,
    pub credit: Money,
    #[serde(default)]
    pub description: String,
}

impl NewJournalLine {
    pub fn debit(account_id: i64, amount: Money, description: impl Into<String>) -> Self {
        NewJournalLine {
            account_id,
            debit: amount,
            credit: Money::zero(),
            description: description.into(),
        }
    }

    pub fn credit(account_id: i64, amount: Money, description: impl Into<String>) -> Self {
        NewJournalLine {
            account_id,
            debit: Money::zero(),
            credit: amount,
            description: description.into(),
        }
    }
}

impl NewJournalEntry {
    /// Checks line shape and the double-entry law.
    ///
    /// Each line carries exactly one positive side; Σdebit must equal
    /// Σcredit exactly and be non-zero. Returns the (equal) totals.
    pub fn validate(&self) -> CoreResult<Money> {
        if self.description.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "description".into(),
            }
            .into());
        }
        if self.lines.len() < 2 {
            return Err(ValidationError::InvalidFormat {
                field: "lines".into(),
                reason: "a journal entry needs at least two lines".into(),
            }
            .into());
        }
        for (i, line) in self.lines.iter().enumerate() {
            if line.debit.is_negative() || line.credit.is_negative() {
                return Err(ValidationError::MustNotBeNegative {
                    field: format!("lines[{}] amount", i),
                }
                .into());
            }
            if line.debit.is_positive() == line.credit.is_positive() {
                return Err(ValidationError::InvalidFormat {
                    field: format!("lines[{}]", i),
                    reason: "exactly one of debit or credit must be positive".into(),
                }
                .into());
            }
        }

        let debits: Money = self.lines.iter().map(|l| l.debit).sum();
        let credits: Money = self.lines.iter().map(|l| l.credit).sum();
        if debits != credits {
            return Err(CoreError::UnbalancedEntry { debits, credits });
        }
        Ok(debits)
    }
}

/// Formats an entry sequence value as `JE000042`.
pub fn format_entry_number(seq: i64) -> String {
    format!("JE{:06}", seq)
}

/// Parses `JE000042` back to 42.
pub fn parse_entry_number(number: &str) -> Option<i64> {
    let digits = number.strip_prefix("JE")?;
    if digits.len() < 6 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

// =============================================================================
// Date Range
// =============================================================================

/// Inclusive reporting period; open ends mean unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn all_time() -> Self {
        DateRange::default()
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        DateRange {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn until(to: NaiveDate) -> Self {
        DateRange {
            from: None,
            to: Some(to),
        }
    }

    pub fn is_all_time(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |f| date >= f) && self.to.map_or(true, |t| date <= t)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(lines: Vec<NewJournalLine>) -> NewJournalEntry {
        NewJournalEntry {
            date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            description: "test".into(),
            source: None,
            lines,
        }
    }

    #[test]
    fn test_balance_delta_by_normal_side() {
        let d = Money::from_cents(11250);
        let z = Money::zero();
        assert_eq!(AccountType::Asset.balance_delta(d, z), d);
        assert_eq!(AccountType::Asset.balance_delta(z, d), -d);
        assert_eq!(AccountType::Revenue.balance_delta(z, d), d);
        assert_eq!(AccountType::Expense.balance_delta(d, z), d);
        assert_eq!(AccountType::Liability.balance_delta(d, z), -d);
    }

    #[test]
    fn test_balanced_entry_validates() {
        let e = entry(vec![
            NewJournalLine::debit(1, Money::from_cents(11250), "cash"),
            NewJournalLine::credit(2, Money::from_cents(11250), "revenue"),
        ]);
        assert_eq!(e.validate().unwrap(), Money::from_cents(11250));
    }

    #[test]
    fn test_unbalanced_entry_rejected() {
        let e = entry(vec![
            NewJournalLine::debit(1, Money::from_cents(11250), ""),
            NewJournalLine::credit(2, Money::from_cents(11249), ""),
        ]);
        let err = e.validate().unwrap_err();
        assert!(matches!(err, CoreError::UnbalancedEntry { .. }));
    }

    #[test]
    fn test_line_with_both_sides_rejected() {
        let e = entry(vec![
            NewJournalLine {
                account_id: 1,
                debit: Money::from_cents(100),
                credit: Money::from_cents(100),
                description: String::new(),
            },
            NewJournalLine::credit(2, Money::zero(), ""),
        ]);
        assert!(matches!(e.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_single_line_rejected() {
        let e = entry(vec![NewJournalLine::debit(1, Money::from_cents(1), "")]);
        assert!(matches!(e.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_entry_number_format() {
        assert_eq!(format_entry_number(1), "JE000001");
        assert_eq!(format_entry_number(1234567), "JE1234567");
        assert_eq!(parse_entry_number("JE000042"), Some(42));
        assert_eq!(parse_entry_number("JX000042"), None);
        assert_eq!(parse_entry_number("JE42"), None);
    }

    #[test]
    fn test_next_account_code_within_block() {
        let used = ["1010", "1200", "2010", "4010"];
        assert_eq!(next_account_code(AccountType::Asset, used).unwrap(), "1201");
        assert_eq!(next_account_code(AccountType::Expense, used).unwrap(), "5001");
    }

    #[test]
    fn test_next_account_code_exhausted() {
        let err = next_account_code(AccountType::Equity, ["3999"]).unwrap_err();
        assert!(matches!(err, CoreError::AccountCodeSpaceExhausted { prefix: 3 }));
    }

    #[test]
    fn test_account_spec_rejects_code_outside_block() {
        let spec = AccountSpec::new(Some("4010"), "Cash", AccountType::Asset, "");
        assert!(matches!(
            spec.validate(),
            Err(CoreError::InvalidAccountCode { .. })
        ));
        assert!(StandardAccount::Cash.spec().validate().is_ok());
    }

    #[test]
    fn test_account_type_from_code_and_str() {
        assert_eq!(AccountType::from_code("5010"), Some(AccountType::Expense));
        assert_eq!(AccountType::from_code("9000"), None);
        assert_eq!("REVENUE".parse::<AccountType>().unwrap(), AccountType::Revenue);
    }

    #[test]
    fn test_date_range_contains() {
        let d = |day| NaiveDate::from_ymd_opt(2026, 10, day).unwrap();
        let range = DateRange::between(d(5), d(10));
        assert!(range.contains(d(5)));
        assert!(range.contains(d(10)));
        assert!(!range.contains(d(11)));
        assert!(DateRange::all_time().contains(d(1)));
        assert!(DateRange::all_time().is_all_time());
    }
}
