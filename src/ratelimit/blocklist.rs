//! Durable client block list
//!
//! Shared across processes through the relational store; every write is a
//! single statement so concurrent breaches for the same IP merge cleanly.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::database::models::BlockedClient;
use crate::error::Result;

#[derive(Clone)]
pub struct BlockList {
    pool: SqlitePool,
}

impl BlockList {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Active block for `ip`. An expired row is deleted on the way out.
    pub async fn active_block(&self, ip: &str, now: DateTime<Utc>) -> Result<Option<BlockedClient>> {
        let block = sqlx::query_as::<_, BlockedClient>("SELECT * FROM blocked_clients WHERE ip = ?")
            .bind(ip)
            .fetch_optional(&self.pool)
            .await?;

        match block {
            Some(block) if block.is_active(now) => Ok(Some(block)),
            Some(expired) => {
                sqlx::query("DELETE FROM blocked_clients WHERE ip = ? AND blocked_until <= ?")
                    .bind(ip)
                    .bind(now.timestamp_millis())
                    .execute(&self.pool)
                    .await?;
                debug!("Removed expired block for {} (ended {})", ip, expired.blocked_until);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Create a block, or extend an existing one; a block never shrinks.
    pub async fn block(
        &self,
        ip: &str,
        until: DateTime<Utc>,
        reason: &str,
        blocked_by: &str,
        now: DateTime<Utc>,
    ) -> Result<BlockedClient> {
        sqlx::query(
            r#"
            INSERT INTO blocked_clients (ip, blocked_until, reason, blocked_by, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (ip) DO UPDATE SET
                blocked_until = MAX(blocked_clients.blocked_until, excluded.blocked_until),
                reason = excluded.reason,
                blocked_by = excluded.blocked_by
            "#,
        )
        .bind(ip)
        .bind(until.timestamp_millis())
        .bind(reason)
        .bind(blocked_by)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        let block = sqlx::query_as::<_, BlockedClient>("SELECT * FROM blocked_clients WHERE ip = ?")
            .bind(ip)
            .fetch_one(&self.pool)
            .await?;
        info!(
            "Blocked {} until {} by {}: {}",
            ip, block.blocked_until, blocked_by, reason
        );
        Ok(block)
    }

    /// Returns whether a row was removed.
    pub async fn unblock(&self, ip: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blocked_clients WHERE ip = ?")
            .bind(ip)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM blocked_clients WHERE blocked_until <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            debug!("Swept {} expired blocks", result.rows_affected());
        }
        Ok(result.rows_affected())
    }

    /// Active blocks, soonest expiry last.
    pub async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<BlockedClient>> {
        self.sweep_expired(now).await?;
        let blocks = sqlx::query_as::<_, BlockedClient>(
            "SELECT * FROM blocked_clients WHERE blocked_until > ? ORDER BY blocked_until DESC",
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(blocks)
    }
}
