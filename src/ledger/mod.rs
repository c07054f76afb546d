//! Ledger client façade
//!
//! The ledger is the system of record for certificates. Every call is a
//! potentially slow network operation, so the client is async and shared.

pub mod memory;
pub mod rpc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::certificate::CertificateRecord;
use crate::error::Result;

pub use memory::MemoryLedger;
pub use rpc::RpcLedgerClient;

/// Write transaction submitted to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum LedgerTxn {
    IssueCertificate { record: CertificateRecord },
    RevokeCertificate { cert_hash: String, actor: String },
    ReactivateCertificate { cert_hash: String, actor: String },
}

impl LedgerTxn {
    pub fn cert_hash(&self) -> &str {
        match self {
            LedgerTxn::IssueCertificate { record } => &record.hash,
            LedgerTxn::RevokeCertificate { cert_hash, .. } => cert_hash,
            LedgerTxn::ReactivateCertificate { cert_hash, .. } => cert_hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_id: String,
    pub block_ordinal: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Issued,
    Revoked,
    Reactivated,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Issued, EventKind::Revoked, EventKind::Reactivated];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Issued => "ISSUED",
            EventKind::Revoked => "REVOKED",
            EventKind::Reactivated => "REACTIVATED",
        }
    }
}

/// Event log filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn certificate(cert_hash: impl Into<String>) -> Self {
        Self {
            cert_hash: Some(cert_hash.into()),
            ..Self::default()
        }
    }

    pub fn actor(actor: impl Into<String>) -> Self {
        Self {
            actor: Some(actor.into()),
            ..Self::default()
        }
    }

    pub fn student(student_id: impl Into<String>) -> Self {
        Self {
            student_id: Some(student_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &RawEvent) -> bool {
        self.cert_hash.as_ref().map_or(true, |h| h == &event.cert_hash)
            && self.actor.as_ref().map_or(true, |a| a == &event.actor)
            && self
                .student_id
                .as_ref()
                .map_or(true, |s| event.student_id.as_ref() == Some(s))
    }
}

/// Event as emitted by the ledger's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub kind: EventKind,
    pub cert_hash: String,
    pub actor: String,
    pub block_ordinal: u64,
    pub tx_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a write. Contract-level refusals surface as `RejectedByLedger`,
    /// transport failures as `LedgerUnavailable`.
    async fn submit(&self, txn: LedgerTxn) -> Result<Receipt>;

    async fn get_record(&self, hash: &str) -> Result<Option<CertificateRecord>>;

    async fn query_events(&self, kind: EventKind, filter: &EventFilter) -> Result<Vec<RawEvent>>;

    async fn get_block_timestamp(&self, block_ordinal: u64) -> Result<Option<DateTime<Utc>>>;
}
