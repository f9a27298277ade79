//! Canonical E.164 phone numbers, the identity key for every session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::ValidationError;

/// Maximum number of digits in an E.164 number.
const MAX_DIGITS: usize = 15;
/// Minimum number of digits accepted (country code + one digit).
const MIN_DIGITS: usize = 2;

/// A phone number in canonical E.164 form: a single leading `+`, 2–15 digits,
/// no separators, first digit non-zero.
///
/// All external inputs are normalized through [`PhoneNumber::parse`] (or
/// [`PhoneNumber::from_numeric`]) before they are used as a map key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Normalize and validate a textual phone number.
    ///
    /// Whitespace and `-` separators are stripped; the rest must match
    /// `^\+?[1-9]\d{1,14}$`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let compact: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();
        let digits = compact.strip_prefix('+').unwrap_or(&compact);

        let valid = (MIN_DIGITS..=MAX_DIGITS).contains(&digits.len())
            && digits.bytes().all(|b| b.is_ascii_digit())
            && !digits.starts_with('0');
        if !valid {
            return Err(ValidationError::Phone(input.to_string()));
        }
        Ok(Self(format!("+{digits}")))
    }

    /// Normalize a phone number supplied as an integer (e.g. a JSON number).
    pub fn from_numeric(n: u64) -> Result<Self, ValidationError> {
        Self::parse(&n.to_string())
    }

    /// The canonical `+`-prefixed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The digits without the leading `+`.
    pub fn digits(&self) -> &str {
        &self.0[1..]
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PhoneNumber {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl AsRef<str> for PhoneNumber {
    fn as_ref(&self) -> &str { &self.0 }
}

impl Serialize for PhoneNumber {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PhoneNumber {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }
        let parsed = match Raw::deserialize(d)? {
            Raw::Text(s)   => Self::parse(&s),
            Raw::Number(n) => Self::from_numeric(n),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_equivalent_forms() {
        let a = PhoneNumber::parse("+15551234567").unwrap();
        let b = PhoneNumber::parse("15551234567").unwrap();
        let c = PhoneNumber::parse("+1 555-123-4567").unwrap();
        let d = PhoneNumber::from_numeric(15551234567).unwrap();
        assert_eq!(a.as_str(), "+15551234567");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a, d);
        assert_eq!(a.digits(), "15551234567");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["+44 20 7946 0958", "4915112345678", "+7-999-000-11-22"] {
            let once  = PhoneNumber::parse(raw).unwrap();
            let twice = PhoneNumber::parse(once.as_str()).unwrap();
            assert_eq!(once, twice, "{raw}");
        }
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "+", "+0123456", "1", "++15551234567", "+1555abc4567", "+1234567890123456", "(555) 123"] {
            assert!(PhoneNumber::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn length_bounds() {
        assert!(PhoneNumber::parse("+12").is_ok());
        assert!(PhoneNumber::parse("+123456789012345").is_ok());
        assert!(PhoneNumber::parse("+1234567890123456").is_err());
    }

    #[test]
    fn deserializes_string_or_number() {
        let s: PhoneNumber = serde_json::from_str("\"+1 555 123 4567\"").unwrap();
        let n: PhoneNumber = serde_json::from_str("15551234567").unwrap();
        assert_eq!(s, n);
        assert!(serde_json::from_str::<PhoneNumber>("\"nope\"").is_err());
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"+15551234567\"");
    }
}
