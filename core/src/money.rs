//! Exact money arithmetic.
//!
//! RULE: Amounts are integer minor units (cents). No floating point
//! ever touches an amount, including when a rate is applied.

use crate::error::{ReconError, ReconResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ISO-4217 style three-letter currency code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode([u8; 3]);

impl CurrencyCode {
    pub const EUR: CurrencyCode = CurrencyCode(*b"EUR");
    pub const USD: CurrencyCode = CurrencyCode(*b"USD");
    pub const BRL: CurrencyCode = CurrencyCode(*b"BRL");

    pub fn as_str(&self) -> &str {
        // Constructed only from validated ASCII.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for CurrencyCode {
    type Err = ReconError;

    fn from_str(s: &str) -> ReconResult<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(ReconError::InvalidConfig(format!(
                "currency code must be three upper-case letters, got {s:?}"
            )));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = ReconError;
    fn try_from(s: String) -> ReconResult<Self> {
        s.parse()
    }
}

impl From<CurrencyCode> for String {
    fn from(c: CurrencyCode) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An applied rate in basis points: 1100 = 11%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate(u32);

impl Rate {
    pub const fn from_basis_points(bps: u32) -> Self {
        Self(bps)
    }

    pub fn basis_points(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonetaryAmount {
    pub minor_units: i64,
    pub currency: CurrencyCode,
}

impl MonetaryAmount {
    pub fn new(minor_units: i64, currency: CurrencyCode) -> Self {
        Self { minor_units, currency }
    }

    pub fn zero(currency: CurrencyCode) -> Self {
        Self::new(0, currency)
    }

    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    pub fn checked_add(&self, other: &Self) -> ReconResult<Self> {
        self.same_currency(other)?;
        let sum = self
            .minor_units
            .checked_add(other.minor_units)
            .ok_or(ReconError::AmountOverflow)?;
        Ok(Self::new(sum, self.currency))
    }

    pub fn checked_sub(&self, other: &Self) -> ReconResult<Self> {
        self.same_currency(other)?;
        let diff = self
            .minor_units
            .checked_sub(other.minor_units)
            .ok_or(ReconError::AmountOverflow)?;
        Ok(Self::new(diff, self.currency))
    }

    /// `|self - other|` in minor units. Computed wide so it cannot overflow.
    pub fn abs_diff(&self, other: &Self) -> ReconResult<u64> {
        self.same_currency(other)?;
        Ok(self.minor_units.abs_diff(other.minor_units))
    }

    /// Multiply by a rate, rounding half away from zero to the minor unit.
    pub fn apply_rate(&self, rate: Rate) -> ReconResult<Self> {
        let product = i128::from(self.minor_units) * i128::from(rate.basis_points());
        let quotient = product / 10_000;
        let remainder = product % 10_000;
        let rounded = if remainder.abs() * 2 >= 10_000 {
            quotient + product.signum()
        } else {
            quotient
        };
        let minor = i64::try_from(rounded).map_err(|_| ReconError::AmountOverflow)?;
        Ok(Self::new(minor, self.currency))
    }

    fn same_currency(&self, other: &Self) -> ReconResult<()> {
        if self.currency != other.currency {
            return Err(ReconError::CurrencyMismatch {
                expected: self.currency.to_string(),
                actual: other.currency.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for MonetaryAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.minor_units < 0 { "-" } else { "" };
        let abs = self.minor_units.unsigned_abs();
        write!(f, "{sign}{}.{:02} {}", abs / 100, abs % 100, self.currency)
    }
}
