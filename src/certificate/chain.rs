//! Certificate version chain
//!
//! Version assignment is read-then-write against the ledger. The ledger is the
//! linearization point: a concurrent issuance that lands first causes ours to
//! be rejected, which is surfaced as `Conflict` for the caller to retry.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::{certificate_hash, CertificateRecord, Cgpa, IssuerKey, SignatureManager};
use crate::actor::Actor;
use crate::error::{CertLedgerError, Result};
use crate::ledger::{EventFilter, EventKind, LedgerClient, LedgerTxn, Receipt};

/// Fields supplied by the issuing staff member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDraft {
    pub student_id: String,
    pub student_name: String,
    pub degree: String,
    pub program: String,
    pub cgpa: Cgpa,
    pub issuing_authority: String,
}

impl CertificateDraft {
    fn validate(&self) -> Result<()> {
        let fields = [
            ("student_id", &self.student_id),
            ("student_name", &self.student_name),
            ("degree", &self.degree),
            ("program", &self.program),
            ("issuing_authority", &self.issuing_authority),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(CertLedgerError::ValidationError(format!(
                    "{} must not be empty",
                    name
                )));
            }
            if value.contains('|') {
                return Err(CertLedgerError::ValidationError(format!(
                    "{} must not contain '|'",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// A signed record whose version was computed from the head observed at prepare time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedIssuance {
    pub record: CertificateRecord,
    pub observed_head: u32,
}

/// Outcome of an idempotent revoke/reactivate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StateChange {
    Changed(Receipt),
    Unchanged,
}

impl StateChange {
    pub fn changed(&self) -> bool {
        matches!(self, StateChange::Changed(_))
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        match self {
            StateChange::Changed(receipt) => Some(receipt),
            StateChange::Unchanged => None,
        }
    }
}

pub struct CertificateVersionChain {
    ledger: Arc<dyn LedgerClient>,
    signatures: SignatureManager,
}

impl CertificateVersionChain {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger,
            signatures: SignatureManager::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    /// Highest version issued for a student, 0 when none.
    pub async fn current_version(&self, student_id: &str) -> Result<u32> {
        let issued = self
            .ledger
            .query_events(EventKind::Issued, &EventFilter::student(student_id))
            .await?;
        Ok(issued.iter().filter_map(|e| e.version).max().unwrap_or(0))
    }

    /// Read the chain head and build the next record, signed with `key` and
    /// attributed to `actor`. Nothing is written.
    pub async fn prepare_issue(
        &self,
        draft: &CertificateDraft,
        key: &IssuerKey,
        actor: &Actor,
    ) -> Result<PreparedIssuance> {
        draft.validate()?;
        if actor.id.trim().is_empty() {
            return Err(CertLedgerError::ValidationError(
                "Issuing actor must be identified".to_string(),
            ));
        }

        let observed_head = self.current_version(&draft.student_id).await?;
        let version = observed_head + 1;
        let issuance_timestamp = Utc::now().timestamp();
        let hash = certificate_hash(
            &draft.student_id,
            &draft.student_name,
            &draft.degree,
            &draft.program,
            draft.cgpa,
            version,
            issuance_timestamp,
        );
        let signature = self.signatures.sign_hash(&hash, key)?;

        Ok(PreparedIssuance {
            record: CertificateRecord {
                hash,
                student_id: draft.student_id.clone(),
                student_name: draft.student_name.clone(),
                degree: draft.degree.clone(),
                program: draft.program.clone(),
                cgpa: draft.cgpa,
                issuing_authority: draft.issuing_authority.clone(),
                version,
                issuer: key.actor_id(),
                signature,
                issued_by: actor.id.clone(),
                issuance_timestamp,
                is_revoked: false,
            },
            observed_head,
        })
    }

    /// Submit a prepared record. A ledger refusal means the head moved (or the
    /// hash already exists) and is reported as `Conflict`.
    pub async fn submit_issuance(&self, prepared: PreparedIssuance) -> Result<CertificateRecord> {
        let record = prepared.record;
        let txn = LedgerTxn::IssueCertificate {
            record: record.clone(),
        };

        match self.ledger.submit(txn).await {
            Ok(receipt) => {
                info!(
                    "{} issued certificate {} (student {}, version {}) in tx {} at block {}",
                    record.issued_by,
                    record.hash,
                    record.student_id,
                    record.version,
                    receipt.tx_id,
                    receipt.block_ordinal
                );
                Ok(record)
            }
            Err(CertLedgerError::RejectedByLedger(reason)) => {
                warn!(
                    "Issuance of version {} for student {} rejected: {}",
                    record.version, record.student_id, reason
                );
                Err(CertLedgerError::Conflict(format!(
                    "Version {} for student {} could not be issued (observed head {}): {}",
                    record.version, record.student_id, prepared.observed_head, reason
                )))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn issue(
        &self,
        draft: &CertificateDraft,
        key: &IssuerKey,
        actor: &Actor,
    ) -> Result<CertificateRecord> {
        let prepared = self.prepare_issue(draft, key, actor).await?;
        self.submit_issuance(prepared).await
    }

    /// Retry on `Conflict` only, re-reading the chain head before every attempt.
    pub async fn issue_with_retry(
        &self,
        draft: &CertificateDraft,
        key: &IssuerKey,
        actor: &Actor,
        max_attempts: u32,
    ) -> Result<CertificateRecord> {
        let mut attempt = 1;
        loop {
            match self.issue(draft, key, actor).await {
                Err(CertLedgerError::Conflict(reason)) if attempt < max_attempts => {
                    info!(
                        "Issuance conflict for student {} (attempt {}/{}): {}",
                        draft.student_id, attempt, max_attempts, reason
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn verify(&self, hash: &str) -> Result<CertificateRecord> {
        self.ledger
            .get_record(hash)
            .await?
            .ok_or_else(|| CertLedgerError::certificate_not_found(hash))
    }

    /// Hash re-derivation plus issuer signature check.
    pub fn verify_integrity(&self, record: &CertificateRecord) -> Result<bool> {
        self.signatures.verify_record(record)
    }

    pub async fn revoke(&self, hash: &str, actor: &str) -> Result<StateChange> {
        self.flip(hash, actor, true).await
    }

    pub async fn reactivate(&self, hash: &str, actor: &str) -> Result<StateChange> {
        self.flip(hash, actor, false).await
    }

    async fn flip(&self, hash: &str, actor: &str, revoke: bool) -> Result<StateChange> {
        let action = if revoke { "revoke" } else { "reactivate" };
        let record = self.verify(hash).await?;
        if record.is_revoked == revoke {
            info!("Certificate {} already in requested state, {} is a no-op", hash, action);
            return Ok(StateChange::Unchanged);
        }

        let txn = if revoke {
            LedgerTxn::RevokeCertificate {
                cert_hash: hash.to_string(),
                actor: actor.to_string(),
            }
        } else {
            LedgerTxn::ReactivateCertificate {
                cert_hash: hash.to_string(),
                actor: actor.to_string(),
            }
        };

        match self.ledger.submit(txn).await {
            Ok(receipt) => {
                info!(
                    "Certificate {} {}d by {} in tx {}",
                    hash, action, actor, receipt.tx_id
                );
                Ok(StateChange::Changed(receipt))
            }
            Err(CertLedgerError::RejectedByLedger(reason)) => {
                // A concurrent flip may have landed between our read and write.
                let current = self.verify(hash).await?;
                if current.is_revoked == revoke {
                    info!("Certificate {} was {}d concurrently", hash, action);
                    Ok(StateChange::Unchanged)
                } else {
                    Err(CertLedgerError::RejectedByLedger(reason))
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Every version issued to a student, ascending.
    pub async fn all_versions(&self, student_id: &str) -> Result<Vec<CertificateRecord>> {
        let issued = self
            .ledger
            .query_events(EventKind::Issued, &EventFilter::student(student_id))
            .await?;

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(issued.len());
        for event in issued {
            if !seen.insert(event.cert_hash.clone()) {
                continue;
            }
            match self.ledger.get_record(&event.cert_hash).await? {
                Some(record) => records.push(record),
                None => warn!(
                    "Issued event at block {} references missing certificate {}",
                    event.block_ordinal, event.cert_hash
                ),
            }
        }

        if records.is_empty() {
            return Err(CertLedgerError::student_not_found(student_id));
        }
        records.sort_by_key(|r| r.version);
        Ok(records)
    }

    /// The highest version; what a plain lookup by student resolves to.
    pub async fn active_version(&self, student_id: &str) -> Result<CertificateRecord> {
        self.all_versions(student_id)
            .await?
            .pop()
            .ok_or_else(|| CertLedgerError::student_not_found(student_id))
    }
}
