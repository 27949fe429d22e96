//! # Money Module
//!
//! The `Money` type carries every currency amount in Stockbook: product cost
//! and price, sale totals, journal line debits and credits, account balances.
//!
//! ## Minor Units Only
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DOUBLE-ENTRY NEEDS EXACT EQUALITY                                      │
//! │                                                                         │
//! │  A journal entry is valid only when Σdebit == Σcredit.                  │
//! │                                                                         │
//! │  With floats:   112.5 + 60.0 - 60.0 - 112.5  may be  1.4e-14  ❌        │
//! │  With cents:    11250 + 6000 - 6000 - 11250  is      0        ✅        │
//! │                                                                         │
//! │  Amounts are rounded to the minor unit exactly once (tax), then        │
//! │  compared with `==`. No epsilon anywhere.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockbook_core::money::Money;
//!
//! let price = Money::from_cents(5000); // 50.00
//! let line = price * 2;             // 100.00
//! assert_eq!(line.cents(), 10000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

use crate::types::TaxRate;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary amount in the smallest currency unit.
///
/// Signed: account balances and balance deltas go negative (a credit to a
/// debit-normal account), sale amounts never do.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    ///
    /// ## Example
    /// ```rust
    /// use stockbook_core::money::Money;
    ///
    /// let total = Money::from_cents(11250); // 112.50
    /// assert_eq!(total.cents(), 11250);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// For negative amounts only the major part carries the sign:
    /// `from_major_minor(-5, 50)` is -5.50.
    ///
    /// ## Example
    /// ```rust
    /// use stockbook_core::money::Money;
    ///
    /// assert_eq!(Money::from_major_minor(112, 50).cents(), 11250);
    /// assert_eq!(Money::from_major_minor(-5, 50).cents(), -550);
    /// ```
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion (truncated toward zero).
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion, always 0-99.
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Calculates tax on this amount, rounded half up to the minor unit.
    ///
    /// ## Implementation
    /// Integer math in i128: `(amount * bps + 5000) / 10000`.
    ///
    /// ## Example
    /// ```rust
    /// use stockbook_core::money::Money;
    /// use stockbook_core::types::TaxRate;
    ///
    /// // 100.00 at 12.5% = 12.50
    /// let tax = Money::from_cents(10000).calculate_tax(TaxRate::from_bps(1250));
    /// assert_eq!(tax.cents(), 1250);
    ///
    /// // 0.99 at 12.5% = 0.12375 → 0.12
    /// let tax = Money::from_cents(99).calculate_tax(TaxRate::from_bps(1250));
    /// assert_eq!(tax.cents(), 12);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        let tax_cents = (self.0 as i128 * rate.bps() as i128 + 5000) / 10000;
        Money::from_cents(tax_cents as i64)
    }

    /// Multiplies a unit amount by a quantity, saturating at the `i64`
    /// bounds.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0.saturating_mul(qty))
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain decimal rendering (`112.50`, `-5.50`). Currency symbols belong to
/// the presentation layer.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor())
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        self.multiply_quantity(qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents_parts() {
        let money = Money::from_cents(11250);
        assert_eq!(money.major(), 112);
        assert_eq!(money.minor(), 50);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(11250).to_string(), "112.50");
        assert_eq!(Money::from_cents(6000).to_string(), "60.00");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
        assert_eq!(Money::zero().to_string(), "0.00");
    }

    #[test]
    fn test_fixed_rate_tax_on_scenario_subtotal() {
        let subtotal = Money::from_cents(10000);
        let tax = subtotal.calculate_tax(TaxRate::from_bps(1250));
        assert_eq!(tax, Money::from_cents(1250));
        assert_eq!(subtotal + tax, Money::from_major_minor(112, 50));
    }

    #[test]
    fn test_tax_rounds_half_up_to_minor_unit() {
        // 0.04 * 12.5% = 0.005 → 0.01
        let tax = Money::from_cents(4).calculate_tax(TaxRate::from_bps(1250));
        assert_eq!(tax.cents(), 1);
        // 0.03 * 12.5% = 0.00375 → 0.00
        let tax = Money::from_cents(3).calculate_tax(TaxRate::from_bps(1250));
        assert_eq!(tax.cents(), 0);
    }

    #[test]
    fn test_sum_and_negation() {
        let lines = [Money::from_cents(6000), Money::from_cents(5250)];
        let total: Money = lines.iter().sum();
        assert_eq!(total.cents(), 11250);
        assert_eq!((-total).cents(), -11250);
        assert!((-total).is_negative());
    }

    #[test]
    fn test_multiply_quantity() {
        assert_eq!(Money::from_cents(3000).multiply_quantity(2).cents(), 6000);
        assert_eq!((Money::from_cents(5000) * 2).cents(), 10000);
        assert_eq!(Money::from_cents(i64::MAX / 2).multiply_quantity(3).cents(), i64::MAX);
    }
}
