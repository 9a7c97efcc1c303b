//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Minor Units?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Minor Units                                      │
//! │    The caller declares how many decimal places its currency uses       │
//! │    (0 for JPY, 2 for USD, 3 for BHD). Every amount is an i64 count     │
//! │    of the smallest unit. The kernel never interprets the currency.     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use titan_core::money::Money;
//!
//! // Create from minor units (the only way in)
//! let price = Money::from_minor(399); // 3.99 in a 2-decimal currency
//!
//! // Checked arithmetic: overflow is an error, never a wrap
//! let line_total = price.checked_mul_quantity(2).unwrap();
//! assert_eq!(line_total.minor(), 798);
//!
//! // NEVER do this:
//! // let bad = Money::from_float(3.99); // NO SUCH METHOD EXISTS!
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in the smallest currency unit.
///
/// ## Design Decisions
/// - **i64 (signed)**: Allows negative values for void and reversal entries
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **No scale inside**: the owning transaction carries the decimal places,
///   so two amounts in one transaction always share a scale
///
/// ## Where Money is Used
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  Line.unit_price ──► Line.total() ──┐                                   │
/// │                                     ├──► total_due ──┐                  │
/// │  Line.unit_price ──► Line.total() ──┘                ├──► change        │
/// │                                                      │                  │
/// │  Tender.amount ──────────────────────► total_tendered┘                  │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    ///
    /// ## Example
    /// ```rust
    /// use titan_core::money::Money;
    ///
    /// let price = Money::from_minor(1099);
    /// assert_eq!(price.minor(), 1099);
    /// ```
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies a unit price by a (possibly negative) quantity.
    ///
    /// ## User Workflow
    /// ```text
    /// Product: COFFEE 399
    /// Quantity: 2
    ///      │
    ///      ▼
    /// checked_mul_quantity(2) ← THIS FUNCTION
    ///      │
    ///      ▼
    /// Line Total: 798
    /// ```
    ///
    /// ## Errors
    /// `CoreError::AmountOverflow` when the product does not fit in i64.
    pub fn checked_mul_quantity(&self, qty: i64) -> CoreResult<Money> {
        self.0
            .checked_mul(qty)
            .map(Money)
            .ok_or(CoreError::AmountOverflow)
    }

    /// Adds two amounts, failing instead of wrapping.
    pub fn checked_add(&self, other: Money) -> CoreResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or(CoreError::AmountOverflow)
    }

    /// Subtracts two amounts, failing instead of wrapping.
    pub fn checked_sub(&self, other: Money) -> CoreResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or(CoreError::AmountOverflow)
    }

    /// Sums an iterator of amounts with overflow detection.
    pub fn checked_sum<I>(amounts: I) -> CoreResult<Money>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |acc, m| acc.checked_add(m))
    }

    /// Renders the amount scaled by `decimal_places` (e.g. `798` at 2 → `"7.98"`).
    ///
    /// ## Note
    /// This is plain integer scaling for logs and audit lines. Currency
    /// symbols, grouping and locale rules belong to the formatting service.
    pub fn to_scaled_string(&self, decimal_places: u8) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        if decimal_places == 0 {
            return format!("{}{}", sign, abs);
        }
        let divisor = 10u64.pow(decimal_places as u32);
        format!(
            "{}{}.{:0width$}",
            sign,
            abs / divisor,
            abs % divisor,
            width = decimal_places as usize
        )
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display shows the raw minor-unit count.
///
/// ## Note
/// The kernel does not know the currency symbol or the scale of a bare
/// amount; use [`Money::to_scaled_string`] when the scale is known.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Default money is zero.
impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

/// Addition of two Money values.
///
/// Only used on amounts already bounded by validation; totals go through
/// the checked variants.
impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

/// Addition assignment (+=).
impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

/// Subtraction of two Money values.
impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

/// Negation (for reversal entries).
impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_minor() {
        let money = Money::from_minor(1099);
        assert_eq!(money.minor(), 1099);
    }

    #[test]
    fn test_checked_mul_quantity() {
        let unit_price = Money::from_minor(399);
        assert_eq!(unit_price.checked_mul_quantity(2).unwrap().minor(), 798);
        assert_eq!(unit_price.checked_mul_quantity(-2).unwrap().minor(), -798);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let huge = Money::from_minor(i64::MAX / 2 + 1);
        assert!(matches!(
            huge.checked_mul_quantity(2),
            Err(CoreError::AmountOverflow)
        ));
        assert!(matches!(
            Money::checked_sum(vec![huge, huge]),
            Err(CoreError::AmountOverflow)
        ));
    }

    #[test]
    fn test_scaled_string() {
        assert_eq!(Money::from_minor(798).to_scaled_string(2), "7.98");
        assert_eq!(Money::from_minor(5).to_scaled_string(2), "0.05");
        assert_eq!(Money::from_minor(-550).to_scaled_string(2), "-5.50");
        assert_eq!(Money::from_minor(1500).to_scaled_string(0), "1500");
        assert_eq!(Money::from_minor(1234).to_scaled_string(3), "1.234");
        assert_eq!(Money::from_minor(7).to_scaled_string(1), "0.7");
    }

    #[test]
    fn test_zero_and_checks() {
        let zero = Money::zero();
        assert!(zero.is_zero());
        assert!(!zero.is_positive());
        assert!(!zero.is_negative());

        let negative = -Money::from_minor(100);
        assert!(negative.is_negative());
        assert_eq!(negative.minor(), -100);
    }

    #[test]
    fn test_serializes_as_plain_integer() {
        let json = serde_json::to_string(&Money::from_minor(798)).unwrap();
        assert_eq!(json, "798");
    }
}
