use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Money in minor units (cents), stored as a signed integer.
///
/// Balances are never negative, but a signed representation lets a lose be
/// expressed as a negative delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

/// Reasons a decimal string is not a valid amount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount '{0}' is not a decimal number")]
    Malformed(String),
    #[error("amount '{0}' is negative")]
    Negative(String),
    #[error("amount '{0}' has more than {max} fractional digits", max = Amount::FRACTION_DIGITS)]
    TooPrecise(String),
    #[error("amount '{0}' is out of range")]
    Overflow(String),
}

impl Amount {
    const SCALE: i64 = 100;
    const FRACTION_DIGITS: usize = 2;

    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: i64) -> Self {
        Amount(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    /// Parse a non-negative decimal such as `"27.99"`, `"5"` or `"0.5"`.
    ///
    /// Parsing is exact: the string is split on the decimal point and never
    /// goes through a float.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(AmountError::Empty);
        }
        if s.starts_with('-') {
            return Err(AmountError::Negative(raw.to_string()));
        }
        let s = s.strip_prefix('+').unwrap_or(s);

        let (whole, frac) = match s.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (s, ""),
        };

        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        // ".50" is fine, "." is not
        if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
            return Err(AmountError::Malformed(raw.to_string()));
        }
        if frac.len() > Self::FRACTION_DIGITS {
            return Err(AmountError::TooPrecise(raw.to_string()));
        }

        let overflow = || AmountError::Overflow(raw.to_string());
        let whole: i64 = match whole {
            "" => 0,
            digits => digits.parse().map_err(|_| overflow())?,
        };
        // "5.3" is 5 whole and 30 cents
        let frac: i64 = format!("{frac:0<width$}", width = Self::FRACTION_DIGITS)
            .parse()
            .map_err(|_| AmountError::Malformed(raw.to_string()))?;

        whole
            .checked_mul(Self::SCALE)
            .and_then(|cents| cents.checked_add(frac))
            .map(Amount)
            .ok_or_else(overflow)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = Self::SCALE.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / scale, abs % scale)
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Neg for Amount {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Amount(-self.0)
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}
