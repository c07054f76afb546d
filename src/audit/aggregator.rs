//! Audit Trail Aggregator
//!
//! Queries the three event streams in parallel, resolves block timestamps,
//! merges newest-first and paginates only the merged sequence.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::event::AuditEvent;
use crate::error::Result;
use crate::ledger::{EventFilter, EventKind, LedgerClient, RawEvent};
use crate::pagination::{Listing, PageRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditScope {
    Certificate(String),
    Actor(String),
    Global,
}

impl AuditScope {
    fn filter(&self) -> EventFilter {
        match self {
            AuditScope::Certificate(hash) => EventFilter::certificate(hash.clone()),
            AuditScope::Actor(actor) => EventFilter::actor(actor.clone()),
            AuditScope::Global => EventFilter::all(),
        }
    }
}

#[derive(Clone)]
pub struct AuditTrailAggregator {
    ledger: Arc<dyn LedgerClient>,
}

impl AuditTrailAggregator {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    pub async fn certificate_history(&self, cert_hash: &str, page: Option<PageRequest>) -> Result<Listing<AuditEvent>> {
        self.query(AuditScope::Certificate(cert_hash.to_string()), page).await
    }

    pub async fn actor_activity(&self, actor: &str, page: Option<PageRequest>) -> Result<Listing<AuditEvent>> {
        self.query(AuditScope::Actor(actor.to_string()), page).await
    }

    pub async fn global(&self, page: Option<PageRequest>) -> Result<Listing<AuditEvent>> {
        self.query(AuditScope::Global, page).await
    }

    pub async fn query(&self, scope: AuditScope, page: Option<PageRequest>) -> Result<Listing<AuditEvent>> {
        let merged = self.timeline(&scope).await?;
        Ok(Listing::from_vec(merged, page))
    }

    /// Full merged timeline for a scope, sorted by block ordinal descending.
    pub async fn timeline(&self, scope: &AuditScope) -> Result<Vec<AuditEvent>> {
        let filter = scope.filter();
        let (issued, revoked, reactivated) = tokio::try_join!(
            self.ledger.query_events(EventKind::Issued, &filter),
            self.ledger.query_events(EventKind::Revoked, &filter),
            self.ledger.query_events(EventKind::Reactivated, &filter),
        )?;

        let raw: Vec<RawEvent> = issued
            .into_iter()
            .chain(revoked)
            .chain(reactivated)
            .collect();
        let timestamps = self.resolve_timestamps(&raw).await;

        let mut seen = HashSet::new();
        let mut events = Vec::with_capacity(raw.len());
        for event in raw {
            if !seen.insert((event.kind, event.tx_id.clone(), event.cert_hash.clone())) {
                continue;
            }
            let timestamp = timestamps.get(&event.block_ordinal).copied().flatten();
            match AuditEvent::from_raw(event, timestamp) {
                Ok(normalized) => events.push(normalized),
                Err(e) => warn!("Skipping malformed ledger event: {}", e),
            }
        }

        events.sort_by(|a, b| b.block_ordinal().cmp(&a.block_ordinal()));
        debug!("Audit timeline for {:?}: {} events", scope, events.len());
        Ok(events)
    }

    /// Look up each distinct block once, concurrently. Failures degrade to `None`.
    async fn resolve_timestamps(&self, events: &[RawEvent]) -> HashMap<u64, Option<DateTime<Utc>>> {
        let blocks: HashSet<u64> = events.iter().map(|e| e.block_ordinal).collect();

        let mut lookups = JoinSet::new();
        for block in blocks {
            let ledger = Arc::clone(&self.ledger);
            lookups.spawn(async move { (block, ledger.get_block_timestamp(block).await) });
        }

        let mut resolved = HashMap::new();
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok((block, Ok(timestamp))) => {
                    resolved.insert(block, timestamp);
                }
                Ok((block, Err(e))) => {
                    debug!("Timestamp lookup for block {} failed: {}", block, e);
                    resolved.insert(block, None);
                }
                Err(e) => warn!("Timestamp lookup task failed: {}", e),
            }
        }
        resolved
    }
}
