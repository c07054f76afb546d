use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CertLedgerError, Result};
use crate::ledger::{EventKind, RawEvent};

/// Fields every audit event carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBase {
    pub cert_hash: String,
    pub actor: String,
    pub block_ordinal: u64,
    pub tx_id: String,
    /// `None` when the block header lookup failed
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    Issued {
        #[serde(flatten)]
        base: EventBase,
        student_id: String,
        version: u32,
    },
    Revoked {
        #[serde(flatten)]
        base: EventBase,
    },
    Reactivated {
        #[serde(flatten)]
        base: EventBase,
    },
}

impl AuditEvent {
    /// Normalize a raw ledger event. ISSUED events must carry student and version.
    pub fn from_raw(raw: RawEvent, timestamp: Option<DateTime<Utc>>) -> Result<Self> {
        let base = EventBase {
            cert_hash: raw.cert_hash,
            actor: raw.actor,
            block_ordinal: raw.block_ordinal,
            tx_id: raw.tx_id,
            timestamp,
        };
        match raw.kind {
            EventKind::Issued => {
                let (student_id, version) = raw.student_id.zip(raw.version).ok_or_else(|| {
                    CertLedgerError::ValidationError(format!(
                        "ISSUED event at block {} is missing student_id or version",
                        base.block_ordinal
                    ))
                })?;
                Ok(AuditEvent::Issued {
                    base,
                    student_id,
                    version,
                })
            }
            EventKind::Revoked => Ok(AuditEvent::Revoked { base }),
            EventKind::Reactivated => Ok(AuditEvent::Reactivated { base }),
        }
    }

    pub fn base(&self) -> &EventBase {
        match self {
            AuditEvent::Issued { base, .. } => base,
            AuditEvent::Revoked { base } => base,
            AuditEvent::Reactivated { base } => base,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            AuditEvent::Issued { .. } => EventKind::Issued,
            AuditEvent::Revoked { .. } => EventKind::Revoked,
            AuditEvent::Reactivated { .. } => EventKind::Reactivated,
        }
    }

    pub fn block_ordinal(&self) -> u64 {
        self.base().block_ordinal
    }

    pub fn cert_hash(&self) -> &str {
        &self.base().cert_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: EventKind) -> RawEvent {
        RawEvent {
            kind,
            cert_hash: "0xabc".to_string(),
            actor: "admin".to_string(),
            block_ordinal: 4,
            tx_id: "0xtx".to_string(),
            student_id: None,
            version: None,
        }
    }

    #[test]
    fn test_issued_requires_student_and_version() {
        assert!(AuditEvent::from_raw(raw(EventKind::Issued), None).is_err());

        let mut issued = raw(EventKind::Issued);
        issued.student_id = Some("S1".to_string());
        issued.version = Some(2);
        let event = AuditEvent::from_raw(issued, None).unwrap();
        assert_eq!(event.kind(), EventKind::Issued);
        assert_eq!(event.block_ordinal(), 4);
    }

    #[test]
    fn test_serialized_shape_is_flat() {
        let event = AuditEvent::from_raw(raw(EventKind::Revoked), None).unwrap();
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "REVOKED");
        assert_eq!(value["cert_hash"], "0xabc");
        assert!(value["timestamp"].is_null());
    }
}
