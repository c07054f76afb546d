use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::blocklist::BlockList;
use super::window::{AttemptKey, AttemptWindowStore};
use crate::actor::Actor;
use crate::config::RateLimitConfig;
use crate::database::models::BlockedClient;
use crate::error::{CertLedgerError, Result};

pub const SYSTEM_BLOCKER: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Attempts allowed per (ip, certificate) inside one window
    pub max_attempts: u32,
    pub window: Duration,
    pub block_duration: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

impl RateLimitPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            window: Duration::seconds(config.window_secs),
            block_duration: Duration::seconds(config.block_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AttemptDecision {
    Allowed { remaining: u32 },
    Blocked { until: DateTime<Utc>, reason: String },
}

impl AttemptDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AttemptDecision::Allowed { .. })
    }

    /// Convert a rejection into `RateLimited`, returning the remaining budget otherwise.
    pub fn into_result(self) -> Result<u32> {
        match self {
            AttemptDecision::Allowed { remaining } => Ok(remaining),
            AttemptDecision::Blocked { until, reason } => Err(CertLedgerError::RateLimited {
                reason,
                blocked_until: until,
            }),
        }
    }
}

pub struct AbuseRateLimiter {
    blocks: BlockList,
    windows: Arc<dyn AttemptWindowStore>,
    policy: RateLimitPolicy,
}

impl AbuseRateLimiter {
    pub fn new(blocks: BlockList, windows: Arc<dyn AttemptWindowStore>, policy: RateLimitPolicy) -> Self {
        Self {
            blocks,
            windows,
            policy,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub async fn check(&self, ip: &str, cert_hash: &str) -> Result<AttemptDecision> {
        self.check_at(ip, cert_hash, Utc::now()).await
    }

    /// Count one verification attempt at `now`.
    pub async fn check_at(&self, ip: &str, cert_hash: &str, now: DateTime<Utc>) -> Result<AttemptDecision> {
        if let Some(block) = self.blocks.active_block(ip, now).await? {
            return Ok(AttemptDecision::Blocked {
                until: block.blocked_until,
                reason: block.reason,
            });
        }

        let key = AttemptKey::new(ip, cert_hash);
        let count = self.windows.record(&key, now, self.policy.window).await;
        if count <= self.policy.max_attempts {
            return Ok(AttemptDecision::Allowed {
                remaining: self.policy.max_attempts - count,
            });
        }

        let reason = format!(
            "Exceeded {} verification attempts for {} within {} minutes",
            self.policy.max_attempts,
            cert_hash,
            self.policy.window.num_minutes()
        );
        let block = self
            .blocks
            .block(ip, now + self.policy.block_duration, &reason, SYSTEM_BLOCKER, now)
            .await?;
        self.windows.clear_ip(ip).await;
        warn!("Rate limit breached by {} on {}; blocked until {}", ip, cert_hash, block.blocked_until);

        Ok(AttemptDecision::Blocked {
            until: block.blocked_until,
            reason: block.reason,
        })
    }

    /// Attempts left for a pair without counting a new one.
    pub async fn remaining_at(&self, ip: &str, cert_hash: &str, now: DateTime<Utc>) -> u32 {
        let count = self
            .windows
            .count(&AttemptKey::new(ip, cert_hash), now, self.policy.window)
            .await;
        self.policy.max_attempts.saturating_sub(count)
    }

    pub async fn block_client(
        &self,
        ip: &str,
        duration: Duration,
        reason: &str,
        admin: &Actor,
    ) -> Result<BlockedClient> {
        admin.require_admin()?;
        if duration <= Duration::zero() {
            return Err(CertLedgerError::ValidationError(
                "Block duration must be positive".to_string(),
            ));
        }
        let now = Utc::now();
        self.blocks.block(ip, now + duration, reason, &admin.id, now).await
    }

    /// Remove the block and any residual counters so the client starts clean.
    pub async fn unblock_client(&self, ip: &str, admin: &Actor) -> Result<bool> {
        admin.require_admin()?;
        let removed = self.blocks.unblock(ip).await?;
        self.windows.clear_ip(ip).await;
        info!("{} unblocked {} (block existed: {})", admin.id, ip, removed);
        Ok(removed)
    }

    pub async fn list_blocked(&self) -> Result<Vec<BlockedClient>> {
        self.blocks.list_active(Utc::now()).await
    }

    /// Drop expired blocks and idle counters. Returns the number of blocks removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let removed = self.blocks.sweep_expired(now).await?;
        self.windows.purge_expired(now, self.policy.window).await;
        Ok(removed)
    }
}
