//! Big-endian byte strings with a declared digit width.

use crate::error::ConfigError;
use serde::{Serialize, Serializer};
use std::fmt;

/// Immutable big-endian byte string.
///
/// The digit count is always `2 * len`, so every value is an even number of
/// hex digits. Equality and hashing go through the normalized bytes, which
/// makes `HexValue::parse("0x0303")` equal to `HexValue::from_bytes(&[3, 3])`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HexValue {
    bytes: Vec<u8>,
}

impl HexValue {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        Self { bytes: vec![byte] }
    }

    pub fn from_u16(value: u16) -> Self {
        Self {
            bytes: value.to_be_bytes().to_vec(),
        }
    }

    /// Parses a literal such as `c02b`, `0xC02B` or `c0, 2b`.
    ///
    /// Odd digit counts are left-padded with a single `0`.
    pub fn parse(literal: &str) -> Result<Self, ConfigError> {
        let digits = normalize(literal);
        if digits.is_empty() {
            return Err(ConfigError::InvalidHex(literal.to_string()));
        }
        let padded = if digits.len() % 2 == 1 {
            format!("0{digits}")
        } else {
            digits
        };
        let bytes = hex::decode(&padded).map_err(|_| ConfigError::InvalidHex(literal.to_string()))?;
        Ok(Self { bytes })
    }

    /// Parses a literal that must have exactly `digits` hex digits.
    pub fn parse_exact(literal: &str, digits: usize) -> Result<Self, ConfigError> {
        let normalized = normalize(literal);
        if !normalized.chars().all(|c| c.is_ascii_hexdigit()) || normalized.is_empty() {
            return Err(ConfigError::InvalidHex(literal.to_string()));
        }
        if normalized.len() != digits {
            return Err(ConfigError::HexWidth {
                value: literal.to_string(),
                digits,
            });
        }
        Self::parse(&normalized)
    }

    /// Concatenation; `self` stays untouched.
    pub fn join(&self, other: &HexValue) -> HexValue {
        let mut bytes = self.bytes.clone();
        bytes.extend_from_slice(&other.bytes);
        HexValue { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn digits(&self) -> usize {
        self.bytes.len() * 2
    }

    /// Numeric value, for values of at most eight bytes.
    pub fn to_u64(&self) -> Option<u64> {
        if self.bytes.len() > 8 {
            return None;
        }
        Some(self.bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// `0x`-prefixed form used in report messages.
    pub fn to_human(&self) -> String {
        format!("0x{self}")
    }
}

fn normalize(literal: &str) -> String {
    literal
        .replace(',', "")
        .replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase()
}

impl fmt::Display for HexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.bytes))
    }
}

impl Serialize for HexValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn parse_normalizes_prefix_separators_and_case() {
        let a = HexValue::parse("0xC0, 2B").unwrap();
        let b = HexValue::from_bytes(&[0xc0, 0x2b]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "c02b");
        assert_eq!(a.to_human(), "0xc02b");
    }

    #[test]
    fn odd_digit_count_is_left_padded() {
        let value = HexValue::parse("301").unwrap();
        assert_eq!(value.to_string(), "0301");
        assert_eq!(value.digits(), 4);
    }

    #[test]
    fn exact_width_is_enforced() {
        assert!(HexValue::parse_exact("c02b", 4).is_ok());
        assert!(matches!(
            HexValue::parse_exact("c02", 4),
            Err(ConfigError::HexWidth { .. })
        ));
        assert!(matches!(
            HexValue::parse_exact("zz2b", 4),
            Err(ConfigError::InvalidHex(_))
        ));
    }

    #[test]
    fn join_concatenates_without_mutating() {
        let hi = HexValue::from_byte(0x03);
        let lo = HexValue::from_byte(0x01);
        let joined = hi.join(&lo);
        assert_eq!(joined, HexValue::from_u16(0x0301));
        assert_eq!(hi.to_string(), "03");
    }

    #[test]
    fn equal_values_hash_identically() {
        let mut set = HashSet::new();
        set.insert(HexValue::parse("5600").unwrap());
        assert!(set.contains(&HexValue::from_u16(0x5600)));
    }

    #[test]
    fn numeric_value_is_big_endian() {
        assert_eq!(HexValue::from_u16(0x0303).to_u64(), Some(0x0303));
        assert_eq!(HexValue::from_bytes(&[0; 9]).to_u64(), None);
    }

    #[test]
    fn empty_literal_is_rejected() {
        assert!(HexValue::parse("0x").is_err());
    }
}
