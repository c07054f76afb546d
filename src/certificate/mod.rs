//! Certificate records and the per-student version chain
//!
//! Records live on the ledger and are content-addressed: the hash is a pure
//! function of the record's own fields.

pub mod chain;
pub mod hash;
pub mod signer;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CertLedgerError;

pub use chain::{CertificateDraft, CertificateVersionChain, PreparedIssuance, StateChange};
pub use hash::certificate_hash;
pub use signer::{IssuerKey, SignatureManager};

/// Grade point average in fixed-point hundredths (3.75 is stored as 375)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cgpa(u16);

impl Cgpa {
    pub const MAX_HUNDREDTHS: u16 = 1000;

    pub fn from_hundredths(hundredths: u16) -> Result<Self, CertLedgerError> {
        if hundredths > Self::MAX_HUNDREDTHS {
            return Err(CertLedgerError::ValidationError(format!(
                "CGPA {}.{:02} exceeds 10.00",
                hundredths / 100,
                hundredths % 100
            )));
        }
        Ok(Self(hundredths))
    }

    pub fn hundredths(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Cgpa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Cgpa {
    type Err = CertLedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CertLedgerError::ValidationError(format!("Invalid CGPA: {:?}", s));
        let s = s.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (s, ""),
        };
        if whole.is_empty() || frac.len() > 2 {
            return Err(invalid());
        }
        if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let whole: u16 = whole.parse().map_err(|_| invalid())?;
        let frac: u16 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u16>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        let hundredths = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(invalid)?;
        Self::from_hundredths(hundredths)
    }
}

impl TryFrom<String> for Cgpa {
    type Error = CertLedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cgpa> for String {
    fn from(value: Cgpa) -> Self {
        value.to_string()
    }
}

/// Ledger-resident certificate; immutable except for `is_revoked`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub hash: String,
    pub student_id: String,
    pub student_name: String,
    pub degree: String,
    pub program: String,
    pub cgpa: Cgpa,
    pub issuing_authority: String,
    pub version: u32,
    /// Hex compressed public key of the signing key; what `signature` verifies against
    pub issuer: String,
    pub signature: String,
    /// Authenticated actor who requested the issuance; the ISSUED event's actor
    pub issued_by: String,
    /// Unix seconds
    pub issuance_timestamp: i64,
    pub is_revoked: bool,
}

impl CertificateRecord {
    pub fn recompute_hash(&self) -> String {
        certificate_hash(
            &self.student_id,
            &self.student_name,
            &self.degree,
            &self.program,
            self.cgpa,
            self.version,
            self.issuance_timestamp,
        )
    }

    /// Whether the stored hash still matches the record's fields.
    pub fn is_intact(&self) -> bool {
        self.hash == self.recompute_hash()
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.issuance_timestamp, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cgpa_parsing() {
        assert_eq!("3.75".parse::<Cgpa>().unwrap().hundredths(), 375);
        assert_eq!("3.7".parse::<Cgpa>().unwrap().hundredths(), 370);
        assert_eq!("4".parse::<Cgpa>().unwrap().hundredths(), 400);
        assert_eq!("0.05".parse::<Cgpa>().unwrap().to_string(), "0.05");
        assert!("3.755".parse::<Cgpa>().is_err());
        assert!("10.01".parse::<Cgpa>().is_err());
        assert!("-1".parse::<Cgpa>().is_err());
        assert!(".5".parse::<Cgpa>().is_err());
        assert!("abc".parse::<Cgpa>().is_err());
    }

    #[test]
    fn test_cgpa_serializes_as_two_decimals() {
        let cgpa = Cgpa::from_hundredths(350).unwrap();
        assert_eq!(serde_json::to_string(&cgpa).unwrap(), "\"3.50\"");
        let back: Cgpa = serde_json::from_str("\"3.5\"").unwrap();
        assert_eq!(back, cgpa);
    }
}
