//! Rupee amounts held in paise.

use core::fmt;
use core::iter::Sum;
use core::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// Non-negative amount in the smallest currency unit (paise).
///
/// On the wire an amount is a decimal string with two places (`"249.50"`);
/// plain JSON numbers are accepted on input as well.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(u64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_paise(paise: u64) -> Self {
        Self(paise)
    }

    pub const fn from_rupees(rupees: u64) -> Self {
        Self(rupees * 100)
    }

    pub const fn paise(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn saturating_add(self, other: Money) -> Money {
        Money(self.0.saturating_add(other.0))
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }

    pub fn checked_mul(self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(u64::from(quantity)).map(Money)
    }

    /// Parses `"12"`, `"12.5"` or `"12.50"`. More than two decimals, signs and
    /// thousands separators are rejected.
    pub fn parse(input: &str) -> Result<Money, DomainError> {
        let s = input.trim();
        let invalid = || DomainError::validation(format!("invalid amount: '{input}'"));
        if s.is_empty() {
            return Err(invalid());
        }

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac.len() > 2 {
            return Err(DomainError::validation(format!(
                "amount '{input}' has more than two decimal places"
            )));
        }

        let rupees: u64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
        let paise: u64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };

        rupees
            .checked_mul(100)
            .and_then(|v| v.checked_add(paise))
            .map(Money)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Money {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        Money(iter.map(|m| m.0).fold(0u64, u64::saturating_add))
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MoneyVisitor)
    }
}

struct MoneyVisitor;

impl Visitor<'_> for MoneyVisitor {
    type Value = Money;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative amount as a decimal string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Money, E> {
        Money::parse(v).map_err(|e| E::custom(e.message()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Money, E> {
        v.checked_mul(100)
            .map(Money)
            .ok_or_else(|| E::custom("amount out of range"))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Money, E> {
        if v < 0 {
            return Err(E::custom("amount must not be negative"));
        }
        self.visit_u64(v as u64)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Money, E> {
        if !v.is_finite() || v < 0.0 {
            return Err(E::custom("amount must be a non-negative number"));
        }
        // Round through the two-decimal text form so 0.1 + 0.2 style noise disappears.
        Money::parse(&format!("{v:.2}")).map_err(|e| E::custom(e.message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_common_forms() {
        assert_eq!(Money::parse("12").unwrap().paise(), 1200);
        assert_eq!(Money::parse("12.5").unwrap().paise(), 1250);
        assert_eq!(Money::parse("12.05").unwrap().paise(), 1205);
        assert_eq!(Money::parse(".5").unwrap().paise(), 50);
        assert_eq!(Money::parse(" 0.00 ").unwrap(), Money::ZERO);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Money::parse("").is_err());
        assert!(Money::parse("-1").is_err());
        assert!(Money::parse("1,200").is_err());
        assert!(Money::parse("1.234").is_err());
        assert!(Money::parse(".").is_err());
    }

    #[test]
    fn serde_accepts_strings_and_numbers() {
        let m: Money = serde_json::from_str("\"99.90\"").unwrap();
        assert_eq!(m.paise(), 9990);
        let m: Money = serde_json::from_str("150").unwrap();
        assert_eq!(m.paise(), 15000);
        let m: Money = serde_json::from_str("19.99").unwrap();
        assert_eq!(m.paise(), 1999);
        assert!(serde_json::from_str::<Money>("-3").is_err());
        assert_eq!(serde_json::to_string(&Money::from_paise(705)).unwrap(), "\"7.05\"");
    }

    #[test]
    fn saturating_sub_clamps() {
        assert_eq!(Money::from_rupees(5).saturating_sub(Money::from_rupees(9)), Money::ZERO);
    }

    proptest! {
        #[test]
        fn display_parse_is_lossless(paise in 0u64..10_000_000_000) {
            let m = Money::from_paise(paise);
            prop_assert_eq!(Money::parse(&m.to_string()).unwrap(), m);
        }
    }
}
