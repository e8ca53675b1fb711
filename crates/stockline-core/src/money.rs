//! # Money Module
//!
//! Fixed-point monetary values in minor units (satang, cents, ...).
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Sale total = Σ (unit − discount) × qty + Σ adjustments − bill discount │
//! │                                                                         │
//! │  Every term is an integer number of minor units, so the total of a     │
//! │  basket is exact and the same on every terminal and in every report.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockline_core::money::Money;
//!
//! let unit = Money::from_cents(10_000);
//! let line = unit.line_total(Money::zero(), 5);
//! assert_eq!(line.cents(), 50_000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use ts_rs::TS;

/// A monetary amount in minor units.
///
/// Signed: adjustments can be negative (e.g. a manual markdown line).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Whole units plus minor units, e.g. `(530, 0)` for 530.00.
    ///
    /// ```rust
    /// use stockline_core::money::Money;
    /// assert_eq!(Money::from_major(530, 25).cents(), 53_025);
    /// assert_eq!(Money::from_major(-2, 50).cents(), -250);
    /// ```
    #[inline]
    pub const fn from_major(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
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
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// `(self − discount) × qty`, the net value of one sale line.
    #[inline]
    pub const fn line_total(&self, discount: Money, qty: i64) -> Money {
        Money((self.0 - discount.0) * qty)
    }

    /// [`line_total`](Self::line_total) for untrusted input; `None` on overflow.
    #[inline]
    pub fn checked_line_total(self, discount: Money, qty: i64) -> Option<Money> {
        self.0
            .checked_sub(discount.0)
            .and_then(|net| net.checked_mul(qty))
            .map(Money)
    }

    /// Checked addition for totals built from untrusted input.
    #[inline]
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }
}

/// Two decimals, no currency symbol; the UI owns locale formatting.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
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

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}
