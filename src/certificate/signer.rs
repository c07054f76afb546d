use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use std::path::Path;
use tracing::debug;

use super::hash::hash_bytes;
use super::CertificateRecord;
use crate::error::{CertLedgerError, Result};

/// An issuing actor's signing key. The actor identity is the hex-encoded
/// compressed public key.
#[derive(Clone)]
pub struct IssuerKey {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl IssuerKey {
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut rand::rngs::OsRng);
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| CertLedgerError::CryptoError(format!("Invalid secret key hex: {}", e)))?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| CertLedgerError::CryptoError(format!("Invalid secret key: {}", e)))?;
        let public_key = PublicKey::from_secret_key(&Secp256k1::new(), &secret_key);
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CertLedgerError::ConfigError(format!("Failed to read issuer key {:?}: {}", path, e))
        })?;
        Self::from_hex(&contents)
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    pub fn actor_id(&self) -> String {
        hex::encode(self.public_key.serialize())
    }
}

impl std::fmt::Debug for IssuerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerKey")
            .field("actor_id", &self.actor_id())
            .finish_non_exhaustive()
    }
}

pub struct SignatureManager {
    secp: Secp256k1<secp256k1::All>,
}

impl SignatureManager {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }

    /// Sign a certificate hash; returns the compact signature as hex.
    pub fn sign_hash(&self, hash: &str, key: &IssuerKey) -> Result<String> {
        let message = Message::from_digest_slice(&hash_bytes(hash)?)
            .map_err(|e| CertLedgerError::CryptoError(format!("Invalid message hash: {}", e)))?;
        let signature = self.secp.sign_ecdsa(&message, &key.secret_key);
        Ok(hex::encode(signature.serialize_compact()))
    }

    pub fn verify_hash_signature(&self, hash: &str, signature: &str, issuer: &str) -> Result<bool> {
        let message = Message::from_digest_slice(&hash_bytes(hash)?)
            .map_err(|e| CertLedgerError::CryptoError(format!("Invalid message hash: {}", e)))?;

        let signature_bytes = hex::decode(signature)
            .map_err(|e| CertLedgerError::CryptoError(format!("Invalid signature hex: {}", e)))?;
        let signature = Signature::from_compact(&signature_bytes)
            .map_err(|e| CertLedgerError::CryptoError(format!("Invalid signature format: {}", e)))?;

        let public_key_bytes = hex::decode(issuer)
            .map_err(|e| CertLedgerError::CryptoError(format!("Invalid public key hex: {}", e)))?;
        let public_key = PublicKey::from_slice(&public_key_bytes)
            .map_err(|e| CertLedgerError::CryptoError(format!("Invalid public key format: {}", e)))?;

        Ok(self.secp.verify_ecdsa(&message, &signature, &public_key).is_ok())
    }

    /// Check a fetched record end to end: hash re-derivation and issuer signature.
    /// An issuer or signature that does not decode as secp256k1 counts as not intact.
    pub fn verify_record(&self, record: &CertificateRecord) -> Result<bool> {
        if !record.is_intact() {
            return Ok(false);
        }
        match self.verify_hash_signature(&record.hash, &record.signature, &record.issuer) {
            Err(CertLedgerError::CryptoError(reason)) => {
                debug!("Certificate {} signature unverifiable: {}", record.hash, reason);
                Ok(false)
            }
            other => other,
        }
    }
}

impl Default for SignatureManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::certificate_hash;

    #[test]
    fn test_sign_and_verify() {
        let manager = SignatureManager::new();
        let key = IssuerKey::generate();
        let hash = certificate_hash("S1", "Ada", "BSc", "CS", "3.50".parse().unwrap(), 1, 1);

        let signature = manager.sign_hash(&hash, &key).unwrap();
        assert!(manager
            .verify_hash_signature(&hash, &signature, &key.actor_id())
            .unwrap());

        let other = IssuerKey::generate();
        assert!(!manager
            .verify_hash_signature(&hash, &signature, &other.actor_id())
            .unwrap());
    }

    fn signed_record(key: &IssuerKey) -> CertificateRecord {
        let cgpa = "3.50".parse().unwrap();
        let hash = certificate_hash("S1", "Ada", "BSc", "CS", cgpa, 1, 1);
        CertificateRecord {
            signature: SignatureManager::new().sign_hash(&hash, key).unwrap(),
            hash,
            student_id: "S1".to_string(),
            student_name: "Ada".to_string(),
            degree: "BSc".to_string(),
            program: "CS".to_string(),
            cgpa,
            issuing_authority: "Registrar".to_string(),
            version: 1,
            issuer: key.actor_id(),
            issued_by: "staff-1".to_string(),
            issuance_timestamp: 1,
            is_revoked: false,
        }
    }

    #[test]
    fn test_verify_record() {
        let manager = SignatureManager::new();
        let key = IssuerKey::generate();
        let record = signed_record(&key);
        assert!(manager.verify_record(&record).unwrap());

        let mut shifted = record.clone();
        shifted.degree = "B".to_string();
        shifted.program = "Sc CS".to_string();
        assert!(!manager.verify_record(&shifted).unwrap());
    }

    #[test]
    fn test_undecodable_issuer_or_signature_is_not_intact() {
        let manager = SignatureManager::new();
        let record = signed_record(&IssuerKey::generate());

        let mut evm_issuer = record.clone();
        evm_issuer.issuer = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".to_string();
        assert!(!manager.verify_record(&evm_issuer).unwrap());

        let mut garbled = record.clone();
        garbled.signature = "not-a-signature".to_string();
        assert!(!manager.verify_record(&garbled).unwrap());

        let mut short = record;
        short.signature = "abcd".to_string();
        assert!(!manager.verify_record(&short).unwrap());
    }

    #[test]
    fn test_key_hex_round_trip() {
        let key = IssuerKey::generate();
        let restored = IssuerKey::from_hex(&key.secret_hex()).unwrap();
        assert_eq!(key.actor_id(), restored.actor_id());
        assert!(IssuerKey::from_hex("zz").is_err());
    }
}
