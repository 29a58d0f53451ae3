//! Storage quantities in the cluster's `2Gi` / `500M` notation.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use thiserror::Error;

const KI: u64 = 1 << 10;
const MI: u64 = 1 << 20;
const GI: u64 = 1 << 30;
const TI: u64 = 1 << 40;
const PI: u64 = 1 << 50;

const BINARY_SUFFIXES: [(&str, u64); 5] = [("Pi", PI), ("Ti", TI), ("Gi", GI), ("Mi", MI), ("Ki", KI)];
const DECIMAL_SUFFIXES: [(&str, u64); 6] = [
    ("P", 1_000_000_000_000_000),
    ("T", 1_000_000_000_000),
    ("G", 1_000_000_000),
    ("M", 1_000_000),
    ("K", 1_000),
    ("k", 1_000),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid quantity '{0}'")]
    Invalid(String),

    #[error("quantity '{0}' overflows 64 bits")]
    Overflow(String),
}

/// A byte count. Parses binary (`Ki`..`Pi`) and decimal (`k`..`P`) suffixes;
/// always renders with the largest binary suffix that divides it evenly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(u64);

impl Quantity {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn from_gib(gib: u64) -> Self {
        Self(gib * GI)
    }

    pub const fn bytes(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (number, multiplier) = BINARY_SUFFIXES
            .iter()
            .chain(DECIMAL_SUFFIXES.iter())
            .find_map(|(suffix, mult)| trimmed.strip_suffix(suffix).map(|n| (n, *mult)))
            .unwrap_or((trimmed, 1));

        let number = number.trim();
        if number.is_empty() {
            return Err(QuantityError::Invalid(s.to_string()));
        }

        if let Ok(whole) = number.parse::<u64>() {
            return whole
                .checked_mul(multiplier)
                .map(Quantity)
                .ok_or_else(|| QuantityError::Overflow(s.to_string()));
        }

        // Fractional values such as "1.5Gi" round up to the next whole byte.
        let value: f64 = number
            .parse()
            .map_err(|_| QuantityError::Invalid(s.to_string()))?;
        if !value.is_finite() || value < 0.0 {
            return Err(QuantityError::Invalid(s.to_string()));
        }
        let bytes = (value * multiplier as f64).ceil();
        if bytes > u64::MAX as f64 {
            return Err(QuantityError::Overflow(s.to_string()));
        }
        Ok(Quantity(bytes as u64))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "0");
        }
        for (suffix, mult) in BINARY_SUFFIXES {
            if self.0 % mult == 0 {
                return write!(f, "{}{}", self.0 / mult, suffix);
            }
        }
        write!(f, "{}", self.0)
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Self) -> Self::Output {
        Quantity(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Self) -> Self::Output {
        Quantity(self.0.saturating_sub(rhs.0))
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QuantityVisitor;

        impl Visitor<'_> for QuantityVisitor {
            type Value = Quantity;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a storage quantity such as \"2Gi\" or a byte count")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
                Ok(Quantity(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
                u64::try_from(v)
                    .map(Quantity)
                    .map_err(|_| E::custom(format!("negative quantity {}", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(QuantityVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binary_suffixes() {
        assert_eq!("2Gi".parse::<Quantity>().unwrap(), Quantity::from_gib(2));
        assert_eq!("512Mi".parse::<Quantity>().unwrap().bytes(), 512 * MI);
        assert_eq!("1Ti".parse::<Quantity>().unwrap().bytes(), TI);
    }

    #[test]
    fn parses_decimal_suffixes_and_plain_bytes() {
        assert_eq!("5G".parse::<Quantity>().unwrap().bytes(), 5_000_000_000);
        assert_eq!("100k".parse::<Quantity>().unwrap().bytes(), 100_000);
        assert_eq!("4096".parse::<Quantity>().unwrap().bytes(), 4096);
    }

    #[test]
    fn fractional_values_round_up() {
        assert_eq!("1.5Gi".parse::<Quantity>().unwrap().bytes(), GI + GI / 2);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!("".parse::<Quantity>(), Err(QuantityError::Empty));
        assert!(matches!("Gi".parse::<Quantity>(), Err(QuantityError::Invalid(_))));
        assert!(matches!("ten".parse::<Quantity>(), Err(QuantityError::Invalid(_))));
        assert!(matches!("-1Gi".parse::<Quantity>(), Err(QuantityError::Invalid(_))));
    }

    #[test]
    fn display_uses_largest_even_suffix() {
        assert_eq!(Quantity::from_gib(3).to_string(), "3Gi");
        assert_eq!(Quantity::from_bytes(1536 * MI).to_string(), "1536Mi");
        assert_eq!(Quantity::from_bytes(1000).to_string(), "1000");
        assert_eq!(Quantity::default().to_string(), "0");
    }

    #[test]
    fn adding_one_gib() {
        let resized = Quantity::from_gib(2) + Quantity::from_gib(1);
        assert_eq!(resized, Quantity::from_gib(3));
        assert_eq!(resized - Quantity::from_gib(2), Quantity::from_gib(1));
    }

    #[test]
    fn deserializes_strings_and_integers() {
        let q: Quantity = serde_json::from_str("\"10Gi\"").unwrap();
        assert_eq!(q, Quantity::from_gib(10));
        let q: Quantity = serde_json::from_str("2048").unwrap();
        assert_eq!(q.bytes(), 2048);
        assert_eq!(serde_json::to_string(&Quantity::from_gib(1)).unwrap(), "\"1Gi\"");
    }
}
