//! Content-addressed certificate hash derivation

use sha2::{Digest, Sha256};

use super::Cgpa;
use crate::error::{CertLedgerError, Result};

/// Canonical pre-image: `student_id|student_name|degree|program|cgpa|version|issuance_timestamp`.
///
/// Drafts reject `|` in every text field, so the join is unambiguous.
pub fn canonical_string(
    student_id: &str,
    student_name: &str,
    degree: &str,
    program: &str,
    cgpa: Cgpa,
    version: u32,
    issuance_timestamp: i64,
) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}|{}",
        student_id, student_name, degree, program, cgpa, version, issuance_timestamp
    )
}

/// SHA-256 of the canonical string, `0x`-prefixed hex.
pub fn certificate_hash(
    student_id: &str,
    student_name: &str,
    degree: &str,
    program: &str,
    cgpa: Cgpa,
    version: u32,
    issuance_timestamp: i64,
) -> String {
    let canonical = canonical_string(
        student_id,
        student_name,
        degree,
        program,
        cgpa,
        version,
        issuance_timestamp,
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// Decode a `0x`-prefixed certificate hash into its 32 raw bytes.
pub fn hash_bytes(hash: &str) -> Result<[u8; 32]> {
    let stripped = hash.strip_prefix("0x").unwrap_or(hash);
    let bytes = hex::decode(stripped)
        .map_err(|e| CertLedgerError::ValidationError(format!("Invalid certificate hash {}: {}", hash, e)))?;
    bytes.try_into().map_err(|_| {
        CertLedgerError::ValidationError(format!("Certificate hash {} is not 32 bytes", hash))
    })
}

pub fn is_valid_hash(hash: &str) -> bool {
    hash.starts_with("0x") && hash_bytes(hash).is_ok()
}
