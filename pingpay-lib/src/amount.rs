//! Ledger amounts in the smallest on-chain unit.
//!
//! **NEVER use f64 for financial calculations!** Prices entered in display
//! units (e.g. `"19.99"`) are converted once, exactly, into integral smallest
//! units and all further arithmetic is checked.
//!
//! # Security
//!
//! - Uses `Decimal` internally (28-29 significant digits)
//! - Values are always integral and non-negative
//! - Checked operations only on paths that grant spending power
//! - Serializes as string (preserves precision)

use crate::{PingPayError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of fractional digits a display price may carry.
pub const MAX_DECIMALS: u32 = 28;

/// An integral amount of the ledger's smallest unit.
///
/// # Examples
///
/// ```rust
/// use pingpay_lib::Amount;
///
/// let price = Amount::from_display("19.99", 2).unwrap();
/// assert_eq!(price.to_string(), "1999");
///
/// let total = price.checked_mul(12).unwrap();
/// assert_eq!(total, Amount::from_units(23988));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount {
    value: Decimal,
}

impl Amount {
    /// Create from a count of smallest units.
    pub fn from_units(units: u64) -> Self {
        Self {
            value: Decimal::from(units),
        }
    }

    /// Zero amount.
    pub fn zero() -> Self {
        Self {
            value: Decimal::ZERO,
        }
    }

    /// Create from an integral decimal string of smallest units (e.g. `"1200"`).
    ///
    /// # Errors
    ///
    /// Fails if the string is not a number, is negative, or has a fractional part.
    pub fn from_str_checked(s: &str) -> Result<Self> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| PingPayError::invalid_data("amount", e.to_string()))?;
        Self::try_from(value)
    }

    /// Convert a display price into smallest units.
    ///
    /// `decimals` is the number of fractional digits of the display unit
    /// (2 for cents, 24 for yoctoNEAR). A price carrying more precision than
    /// the unit allows is rejected rather than rounded.
    ///
    /// ```rust
    /// use pingpay_lib::Amount;
    ///
    /// assert_eq!(Amount::from_display("5", 2).unwrap(), Amount::from_units(500));
    /// assert!(Amount::from_display("19.999", 2).is_err());
    /// assert!(Amount::from_display("-1", 2).is_err());
    /// ```
    pub fn from_display(price: &str, decimals: u32) -> Result<Self> {
        if decimals > MAX_DECIMALS {
            return Err(PingPayError::invalid_data(
                "decimals",
                format!("at most {} supported", MAX_DECIMALS),
            ));
        }
        let display = Decimal::from_str(price.trim())
            .map_err(|e| PingPayError::invalid_data("price", e.to_string()))?;
        if display.is_sign_negative() && !display.is_zero() {
            return Err(PingPayError::invalid_data("price", "must not be negative"));
        }
        if display.normalize().scale() > decimals {
            return Err(PingPayError::invalid_data(
                "price",
                format!("'{}' has more than {} fractional digits", price, decimals),
            ));
        }

        let factor = Decimal::from_i128_with_scale(10i128.pow(decimals), 0);
        let units = display
            .checked_mul(factor)
            .ok_or_else(|| PingPayError::Overflow(format!("{} x 10^{}", price, decimals)))?;
        Self::try_from(units)
    }

    /// Render in display units with exactly `decimals` fractional digits.
    ///
    /// ```rust
    /// use pingpay_lib::Amount;
    /// assert_eq!(Amount::from_units(1999).to_display(2), "19.99");
    /// assert_eq!(Amount::from_units(500).to_display(2), "5.00");
    /// ```
    pub fn to_display(&self, decimals: u32) -> String {
        let mut shifted = self.value;
        if shifted.set_scale(decimals.min(MAX_DECIMALS)).is_err() {
            return self.value.to_string();
        }
        shifted.to_string()
    }

    /// Checked addition (returns None on overflow).
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        self.value
            .checked_add(other.value)
            .map(|value| Self { value })
    }

    /// Checked subtraction (returns None if the result would be negative).
    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        self.value
            .checked_sub(other.value)
            .filter(|v| !v.is_sign_negative() || v.is_zero())
            .map(|value| Self { value })
    }

    /// Checked multiplication by a count (returns None on overflow).
    pub fn checked_mul(&self, count: u32) -> Option<Self> {
        self.value
            .checked_mul(Decimal::from(count))
            .map(|value| Self { value })
    }

    /// Check if this amount is less than or equal to another.
    pub fn is_within_limit(&self, limit: &Self) -> bool {
        self.value <= limit.value
    }

    /// Check if amount is zero.
    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Check if amount is strictly positive.
    pub fn is_positive(&self) -> bool {
        !self.value.is_zero()
    }

    /// Get the internal Decimal value.
    pub fn as_decimal(&self) -> Decimal {
        self.value
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PingPayError;

    fn try_from(value: Decimal) -> Result<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(PingPayError::invalid_data("amount", "must not be negative"));
        }
        if !value.fract().is_zero() {
            return Err(PingPayError::invalid_data(
                "amount",
                format!("'{}' is not an integral number of smallest units", value),
            ));
        }
        Ok(Self {
            value: value.trunc(),
        })
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.value
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for Amount {
    type Err = PingPayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_str_checked(s)
    }
}
