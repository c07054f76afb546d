//! Audit trail
//!
//! A read-only projection of the ledger's event log. Nothing here is stored;
//! every query re-reads and re-merges the ISSUED, REVOKED and REACTIVATED streams.

pub mod aggregator;
pub mod event;

pub use aggregator::{AuditScope, AuditTrailAggregator};
pub use event::{AuditEvent, EventBase};
