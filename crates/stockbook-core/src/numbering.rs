//! # Business Identifiers
//!
//! Starting values and printed shapes of the sequential identifiers that
//! appear on receipts and reports.
//!
//! ```text
//! ┌───────────────────┬──────────────┬──────────────────┐
//! │ Identifier        │ First value  │ Printed as       │
//! ├───────────────────┼──────────────┼──────────────────┤
//! │ entry number      │ 1            │ JE000001         │
//! │ transaction id    │ 10001        │ 10001            │
//! │ transfer id       │ 1            │ 1                │
//! │ addition id       │ 1001         │ 1001             │
//! │ addition ref      │ 1 per month  │ INV-202610-001   │
//! └───────────────────┴──────────────┴──────────────────┘
//! ```

use chrono::{Datelike, NaiveDate};

pub const FIRST_ENTRY_SEQ: i64 = 1;
pub const FIRST_TRANSACTION_ID: i64 = 10001;
pub const FIRST_TRANSFER_ID: i64 = 1;
pub const FIRST_ADDITION_ID: i64 = 1001;

/// `INV-YYYYMM-` for the month containing `date`.
pub fn addition_reference_prefix(date: NaiveDate) -> String {
    format!("INV-{:04}{:02}-", date.year(), date.month())
}

/// `INV-YYYYMM-NNN`; the suffix widens past 999 rather than wrapping.
///
/// ## Example
/// ```rust
/// use chrono::NaiveDate;
/// use stockbook_core::numbering::format_addition_reference;
///
/// let d = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
/// assert_eq!(format_addition_reference(d, 7), "INV-202603-007");
/// ```
pub fn format_addition_reference(date: NaiveDate, suffix: i64) -> String {
    format!("{}{:03}", addition_reference_prefix(date), suffix)
}

/// Extracts the monthly suffix from a reference.
pub fn parse_addition_suffix(reference: &str) -> Option<i64> {
    let rest = reference.strip_prefix("INV-")?;
    let (month, suffix) = rest.split_once('-')?;
    if month.len() != 6 || !month.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}
