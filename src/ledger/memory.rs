//! In-process ledger
//!
//! Append-only, single linearization point for writes. Enforces the same
//! preconditions the certificate contract does, so races and invalid state
//! flips are rejected rather than silently applied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{EventFilter, EventKind, LedgerClient, LedgerTxn, RawEvent, Receipt};
use crate::certificate::CertificateRecord;
use crate::error::{CertLedgerError, Result};

#[derive(Debug, Default)]
struct LedgerState {
    records: HashMap<String, CertificateRecord>,
    student_heads: HashMap<String, u32>,
    events: Vec<RawEvent>,
    block_times: HashMap<u64, DateTime<Utc>>,
    last_block: u64,
    submissions: u64,
    unavailable: bool,
    broken_timestamps: HashSet<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accepted write transactions.
    pub async fn submission_count(&self) -> u64 {
        self.state.read().await.submissions
    }

    /// Simulate a transport outage; every call fails with `LedgerUnavailable`.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Make the block-timestamp lookup fail for one block.
    pub async fn break_block_timestamp(&self, block_ordinal: u64) {
        self.state.write().await.broken_timestamps.insert(block_ordinal);
    }

    /// Append a raw event directly to the log, as if mined in its own block.
    pub async fn inject_event(&self, event: RawEvent, timestamp: Option<DateTime<Utc>>) {
        let mut state = self.state.write().await;
        state.last_block = state.last_block.max(event.block_ordinal);
        if let Some(ts) = timestamp {
            state.block_times.insert(event.block_ordinal, ts);
        }
        state.events.push(event);
    }

    fn check_available(state: &LedgerState) -> Result<()> {
        if state.unavailable {
            return Err(CertLedgerError::LedgerUnavailable(
                "ledger endpoint unreachable".to_string(),
            ));
        }
        Ok(())
    }

    fn apply(state: &mut LedgerState, txn: &LedgerTxn) -> Result<(EventKind, Option<(String, u32)>)> {
        match txn {
            LedgerTxn::IssueCertificate { record } => {
                if record.hash != record.recompute_hash() {
                    return Err(CertLedgerError::RejectedByLedger(
                        "certificate hash does not match its fields".to_string(),
                    ));
                }
                if state.records.contains_key(&record.hash) {
                    return Err(CertLedgerError::RejectedByLedger(format!(
                        "certificate {} already exists",
                        record.hash
                    )));
                }
                let head = state.student_heads.get(&record.student_id).copied().unwrap_or(0);
                if record.version != head + 1 {
                    return Err(CertLedgerError::RejectedByLedger(format!(
                        "version {} for student {} is out of sequence (head is {})",
                        record.version, record.student_id, head
                    )));
                }
                state.student_heads.insert(record.student_id.clone(), record.version);
                let mut stored = record.clone();
                stored.is_revoked = false;
                state.records.insert(record.hash.clone(), stored);
                Ok((
                    EventKind::Issued,
                    Some((record.student_id.clone(), record.version)),
                ))
            }
            LedgerTxn::RevokeCertificate { cert_hash, .. } => {
                let record = state.records.get_mut(cert_hash).ok_or_else(|| {
                    CertLedgerError::RejectedByLedger(format!("certificate {} does not exist", cert_hash))
                })?;
                if record.is_revoked {
                    return Err(CertLedgerError::RejectedByLedger(format!(
                        "certificate {} is already revoked",
                        cert_hash
                    )));
                }
                record.is_revoked = true;
                Ok((EventKind::Revoked, None))
            }
            LedgerTxn::ReactivateCertificate { cert_hash, .. } => {
                let record = state.records.get_mut(cert_hash).ok_or_else(|| {
                    CertLedgerError::RejectedByLedger(format!("certificate {} does not exist", cert_hash))
                })?;
                if !record.is_revoked {
                    return Err(CertLedgerError::RejectedByLedger(format!(
                        "certificate {} is not revoked",
                        cert_hash
                    )));
                }
                record.is_revoked = false;
                Ok((EventKind::Reactivated, None))
            }
        }
    }

    fn tx_id(block_ordinal: u64, txn: &LedgerTxn) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(block_ordinal.to_be_bytes());
        hasher.update(serde_json::to_vec(txn)?);
        Ok(format!("0x{}", hex::encode(hasher.finalize())))
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn submit(&self, txn: LedgerTxn) -> Result<Receipt> {
        let mut state = self.state.write().await;
        Self::check_available(&state)?;

        let (kind, issued) = Self::apply(&mut state, &txn)?;

        state.last_block += 1;
        state.submissions += 1;
        let block_ordinal = state.last_block;
        let tx_id = Self::tx_id(block_ordinal, &txn)?;
        let actor = match &txn {
            LedgerTxn::IssueCertificate { record } => record.issued_by.clone(),
            LedgerTxn::RevokeCertificate { actor, .. } => actor.clone(),
            LedgerTxn::ReactivateCertificate { actor, .. } => actor.clone(),
        };
        let (student_id, version) = match issued {
            Some((student_id, version)) => (Some(student_id), Some(version)),
            None => (None, None),
        };

        state.block_times.insert(block_ordinal, Utc::now());
        state.events.push(RawEvent {
            kind,
            cert_hash: txn.cert_hash().to_string(),
            actor,
            block_ordinal,
            tx_id: tx_id.clone(),
            student_id,
            version,
        });

        debug!("Ledger block {}: {} {}", block_ordinal, kind.as_str(), txn.cert_hash());
        Ok(Receipt {
            tx_id,
            block_ordinal,
        })
    }

    async fn get_record(&self, hash: &str) -> Result<Option<CertificateRecord>> {
        let state = self.state.read().await;
        Self::check_available(&state)?;
        Ok(state.records.get(hash).cloned())
    }

    async fn query_events(&self, kind: EventKind, filter: &EventFilter) -> Result<Vec<RawEvent>> {
        let state = self.state.read().await;
        Self::check_available(&state)?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.kind == kind && filter.matches(e))
            .cloned()
            .collect())
    }

    async fn get_block_timestamp(&self, block_ordinal: u64) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.read().await;
        Self::check_available(&state)?;
        if state.broken_timestamps.contains(&block_ordinal) {
            return Err(CertLedgerError::LedgerUnavailable(format!(
                "block {} header lookup failed",
                block_ordinal
            )));
        }
        Ok(state.block_times.get(&block_ordinal).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{certificate_hash, Cgpa};

    fn record(student_id: &str, version: u32) -> CertificateRecord {
        let cgpa: Cgpa = "3.20".parse().unwrap();
        CertificateRecord {
            hash: certificate_hash(student_id, "Ada", "BSc", "CS", cgpa, version, 100),
            student_id: student_id.to_string(),
            student_name: "Ada".to_string(),
            degree: "BSc".to_string(),
            program: "CS".to_string(),
            cgpa,
            issuing_authority: "Registrar".to_string(),
            version,
            issuer: "issuer".to_string(),
            signature: "sig".to_string(),
            issued_by: "staff-1".to_string(),
            issuance_timestamp: 100,
            is_revoked: false,
        }
    }

    #[tokio::test]
    async fn test_rejects_out_of_sequence_version() {
        let ledger = MemoryLedger::new();
        let result = ledger
            .submit(LedgerTxn::IssueCertificate { record: record("S1", 2) })
            .await;
        assert!(matches!(result, Err(CertLedgerError::RejectedByLedger(_))));

        let receipt = ledger
            .submit(LedgerTxn::IssueCertificate { record: record("S1", 1) })
            .await
            .unwrap();
        assert_eq!(receipt.block_ordinal, 1);
        assert!(ledger.get_block_timestamp(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rejects_tampered_hash() {
        let ledger = MemoryLedger::new();
        let mut tampered = record("S1", 1);
        tampered.student_name = "Mallory".to_string();
        let result = ledger
            .submit(LedgerTxn::IssueCertificate { record: tampered })
            .await;
        assert!(matches!(result, Err(CertLedgerError::RejectedByLedger(_))));
        assert_eq!(ledger.submission_count().await, 0);
    }

    #[tokio::test]
    async fn test_revoke_requires_active_certificate() {
        let ledger = MemoryLedger::new();
        let rec = record("S1", 1);
        ledger
            .submit(LedgerTxn::IssueCertificate { record: rec.clone() })
            .await
            .unwrap();
        let revoke = LedgerTxn::RevokeCertificate {
            cert_hash: rec.hash.clone(),
            actor: "admin".to_string(),
        };
        ledger.submit(revoke.clone()).await.unwrap();
        assert!(matches!(
            ledger.submit(revoke).await,
            Err(CertLedgerError::RejectedByLedger(_))
        ));

        let events = ledger
            .query_events(EventKind::Revoked, &EventFilter::actor("admin"))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].block_ordinal, 2);
    }

    #[tokio::test]
    async fn test_unavailable_ledger() {
        let ledger = MemoryLedger::new();
        ledger.set_unavailable(true).await;
        let err = ledger.get_record("0x00").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
