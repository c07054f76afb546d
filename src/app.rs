//! Service wiring shared by the HTTP service, the admin CLI and tests

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::audit::AuditTrailAggregator;
use crate::certificate::CertificateVersionChain;
use crate::config::AppConfig;
use crate::database::Database;
use crate::error::Result;
use crate::ledger::{LedgerClient, MemoryLedger, RpcLedgerClient};
use crate::ratelimit::{AbuseRateLimiter, BlockList, MemoryAttemptStore, RateLimitPolicy};
use crate::requests::ActionRequestWorkflow;
use crate::verification::VerificationLogService;

#[derive(Clone)]
pub struct CertLedger {
    pub database: Database,
    pub chain: Arc<CertificateVersionChain>,
    pub audit: AuditTrailAggregator,
    pub requests: Arc<ActionRequestWorkflow>,
    pub limiter: Arc<AbuseRateLimiter>,
    pub verification: Arc<VerificationLogService>,
}

impl CertLedger {
    pub fn new(database: Database, ledger: Arc<dyn LedgerClient>, policy: RateLimitPolicy) -> Self {
        let chain = Arc::new(CertificateVersionChain::new(Arc::clone(&ledger)));
        let audit = AuditTrailAggregator::new(ledger);
        let requests = Arc::new(ActionRequestWorkflow::new(
            database.pool().clone(),
            Arc::clone(&chain),
        ));
        let limiter = Arc::new(AbuseRateLimiter::new(
            BlockList::new(database.pool().clone()),
            Arc::new(MemoryAttemptStore::new()),
            policy,
        ));
        let verification = Arc::new(VerificationLogService::new(
            database.pool().clone(),
            Arc::clone(&limiter),
        ));

        Self {
            database,
            chain,
            audit,
            requests,
            limiter,
            verification,
        }
    }

    /// Connect the store, apply migrations and pick the ledger backend.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let database = Database::new(&config.database_url).await?;
        database.run_migrations().await?;
        info!("Database migrations completed");

        let ledger: Arc<dyn LedgerClient> = match &config.ledger.rpc_url {
            Some(url) => {
                info!("Using ledger RPC endpoint {}", url);
                Arc::new(RpcLedgerClient::new(
                    url.clone(),
                    Duration::from_secs(config.ledger.timeout_secs),
                )?)
            }
            None => {
                warn!("No ledger RPC endpoint configured, using in-process ledger");
                Arc::new(MemoryLedger::new())
            }
        };

        Ok(Self::new(
            database,
            ledger,
            RateLimitPolicy::from_config(&config.rate_limit),
        ))
    }
}
