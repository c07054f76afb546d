//! Public verification logging
//!
//! Verifiers (employers, other institutions) record that they checked a
//! certificate. The path is unauthenticated, so the rate limiter is consulted
//! before anything is persisted.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::certificate::hash::is_valid_hash;
use crate::database::models::VerificationLog;
use crate::error::{CertLedgerError, Result};
use crate::pagination::{Listing, PageMeta, PageRequest, Paginated};
use crate::ratelimit::AbuseRateLimiter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSubmission {
    pub cert_hash: String,
    pub verifier_ip: String,
    pub verifier_name: Option<String>,
    pub verifier_organization: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub accepted: bool,
    pub remaining_attempts: u32,
    pub log_id: String,
}

pub struct VerificationLogService {
    pool: SqlitePool,
    limiter: Arc<AbuseRateLimiter>,
}

impl VerificationLogService {
    pub fn new(pool: SqlitePool, limiter: Arc<AbuseRateLimiter>) -> Self {
        Self { pool, limiter }
    }

    pub fn limiter(&self) -> &Arc<AbuseRateLimiter> {
        &self.limiter
    }

    pub async fn submit(&self, submission: VerificationSubmission) -> Result<SubmissionReceipt> {
        if !is_valid_hash(&submission.cert_hash) {
            return Err(CertLedgerError::ValidationError(format!(
                "Invalid certificate hash: {}",
                submission.cert_hash
            )));
        }

        let remaining = self
            .limiter
            .check(&submission.verifier_ip, &submission.cert_hash)
            .await?
            .into_result()?;

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO verification_logs
            (id, cert_hash, verifier_ip, verifier_name, verifier_organization, user_agent, verified_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&submission.cert_hash)
        .bind(&submission.verifier_ip)
        .bind(&submission.verifier_name)
        .bind(&submission.verifier_organization)
        .bind(&submission.user_agent)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(
            "Logged verification of {} from {} ({} attempts left)",
            submission.cert_hash, submission.verifier_ip, remaining
        );
        Ok(SubmissionReceipt {
            accepted: true,
            remaining_attempts: remaining,
            log_id: id,
        })
    }

    /// Newest first, optionally for one certificate.
    pub async fn list_logs(
        &self,
        cert_hash: Option<&str>,
        page: Option<PageRequest>,
    ) -> Result<Listing<VerificationLog>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM verification_logs");
        if let Some(hash) = cert_hash {
            query.push(" WHERE cert_hash = ").push_bind(hash.to_string());
        }
        query.push(" ORDER BY verified_at DESC, rowid DESC");

        let Some(request) = page else {
            let logs = query
                .build_query_as::<VerificationLog>()
                .fetch_all(&self.pool)
                .await?;
            return Ok(Listing::All(logs));
        };

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM verification_logs");
        if let Some(hash) = cert_hash {
            count.push(" WHERE cert_hash = ").push_bind(hash.to_string());
        }
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        query
            .push(" LIMIT ")
            .push_bind(request.limit as i64)
            .push(" OFFSET ")
            .push_bind(request.offset() as i64);
        let logs = query
            .build_query_as::<VerificationLog>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Listing::Page(Paginated {
            data: logs,
            meta: PageMeta::new(request, total as u64),
        }))
    }
}
