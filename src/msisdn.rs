//! MSISDN Normalization
//!
//! Canonicalizes the many ways users type a phone number into the single
//! 12-digit form the settlement gateway addresses subscribers by
//! (`<country code><national number>`, e.g. `233267781294`).
//!
//! # Accepted Shapes (after stripping non-digits)
//!
//! ```text
//! 0XXXXXXXXX      (10, trunk prefix)   → 233XXXXXXXXX
//! XXXXXXXXXX      (10, no trunk)       → 233XXXXXXXXXX  (must still be 12 digits)
//! XXXXXXXXX       (9, trunk lost)      → 233XXXXXXXXX
//! 233XXXXXXXXX    (12, international)  → as-is
//! 0233XXXXXXXXX   (13, trunk + intl)   → 233XXXXXXXXX
//! ```
//!
//! Anything else fails closed. The carrier prefix check is advisory only:
//! the gateway is authoritative on whether an address is live.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::MsisdnConfig;

/// Canonical length of a normalized MSISDN
pub const MSISDN_LEN: usize = 12;

/// Number of leading digits compared against the carrier prefix list
const CARRIER_PREFIX_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MsisdnError {
    #[error("Phone number is empty")]
    Empty,

    #[error(
        "Unsupported phone number shape ({digits} digits): expected 0XXXXXXXXX, XXXXXXXXX, \
         {country_code}XXXXXXXXX or 0{country_code}XXXXXXXXX"
    )]
    UnsupportedShape { digits: usize, country_code: String },
}

/// A normalized 12-digit subscriber address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Msisdn(String);

impl Msisdn {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild from a stored value without re-normalizing
    pub(crate) fn from_trusted(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Msisdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Phone number normalizer
///
/// Pure and cheap to clone; holds only the dialing plan from config.
#[derive(Debug, Clone)]
pub struct PhoneNormalizer {
    country_code: String,
    trunk_prefix: char,
    carrier_prefixes: Vec<String>,
}

impl PhoneNormalizer {
    pub fn new(config: &MsisdnConfig) -> Self {
        Self {
            country_code: config.country_code.clone(),
            trunk_prefix: config.trunk_prefix,
            carrier_prefixes: config.carrier_prefixes.clone(),
        }
    }

    /// Normalize an arbitrary user-supplied string
    ///
    /// Cases are tried in a fixed order; the first matching shape wins.
    pub fn normalize(&self, raw: &str) -> Result<Msisdn, MsisdnError> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(MsisdnError::Empty);
        }

        let cc = self.country_code.as_str();
        let starts_with_trunk = digits.starts_with(self.trunk_prefix);

        let candidate = match digits.len() {
            10 if starts_with_trunk => format!("{}{}", cc, &digits[1..]),
            10 => format!("{}{}", cc, digits),
            // Lossy: assume the lost leading digit was the trunk prefix.
            9 => format!("{}{}", cc, digits),
            12 if digits.starts_with(cc) => digits.clone(),
            13 if starts_with_trunk && digits[1..].starts_with(cc) => digits[1..].to_string(),
            _ => return Err(self.unsupported(digits.len())),
        };

        // Post-condition: exactly 12 digits led by the country code, or nothing.
        if candidate.len() != MSISDN_LEN || !candidate.starts_with(cc) {
            return Err(self.unsupported(digits.len()));
        }

        let msisdn = Msisdn(candidate);
        if !self.is_known_carrier(&msisdn) {
            warn!(msisdn = %msisdn, "MSISDN prefix not in known carrier list");
        }
        Ok(msisdn)
    }

    /// Advisory: does the number start with a known carrier prefix?
    pub fn is_known_carrier(&self, msisdn: &Msisdn) -> bool {
        let head = &msisdn.as_str()[..CARRIER_PREFIX_LEN.min(msisdn.as_str().len())];
        self.carrier_prefixes.iter().any(|p| p == head)
    }

    fn unsupported(&self, digits: usize) -> MsisdnError {
        MsisdnError::UnsupportedShape {
            digits,
            country_code: self.country_code.clone(),
        }
    }
}

impl Default for PhoneNormalizer {
    fn default() -> Self {
        Self::new(&MsisdnConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(raw: &str) -> Result<String, MsisdnError> {
        PhoneNormalizer::default()
            .normalize(raw)
            .map(|m| m.as_str().to_string())
    }

    #[test]
    fn test_trunk_prefixed_local() {
        assert_eq!(normalize("0267781294").unwrap(), "233267781294");
        assert_eq!(normalize("024 123 4567").unwrap(), "233241234567");
    }

    #[test]
    fn test_nine_digits_assumes_lost_trunk() {
        assert_eq!(normalize("267781294").unwrap(), "233267781294");
    }

    #[test]
    fn test_international_forms() {
        assert_eq!(normalize("233267781294").unwrap(), "233267781294");
        assert_eq!(normalize("+233 26 778 1294").unwrap(), "233267781294");
        assert_eq!(normalize("0233267781294").unwrap(), "233267781294");
    }

    #[test]
    fn test_ten_digits_without_trunk_fails_closed() {
        // Prepending the country code yields 13 digits, which breaks the post-condition.
        assert!(matches!(
            normalize("2677812945"),
            Err(MsisdnError::UnsupportedShape { digits: 10, .. })
        ));
    }

    #[test]
    fn test_rejects_other_shapes() {
        assert!(normalize("12345").is_err());
        assert!(normalize("441234567890").is_err()); // 12 digits, foreign country code
        assert!(normalize("1233267781294").is_err()); // 13 digits, no trunk
        assert_eq!(normalize("abc"), Err(MsisdnError::Empty));
        assert_eq!(normalize(""), Err(MsisdnError::Empty));
    }

    #[test]
    fn test_error_names_accepted_shapes() {
        let err = normalize("12345").unwrap_err().to_string();
        assert!(err.contains("5 digits"));
        assert!(err.contains("0233XXXXXXXXX"));
    }

    #[test]
    fn test_carrier_check_is_advisory() {
        let normalizer = PhoneNormalizer::default();
        let known = normalizer.normalize("0241234567").unwrap();
        assert!(normalizer.is_known_carrier(&known));

        // Unknown prefix still normalizes.
        let unknown = normalizer.normalize("0211234567").unwrap();
        assert_eq!(unknown.as_str(), "233211234567");
        assert!(!normalizer.is_known_carrier(&unknown));
    }
}
