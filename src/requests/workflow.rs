//! Action Request Workflow
//!
//! Every guarded write is a single conditional statement: the row is only
//! touched if it is still in the state (and held by the actor) that the guard
//! saw. Zero affected rows means another caller won the race.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;
use tracing::{info, warn};

use super::transitions::{Outcome, RequestEvent, Transition};
use crate::actor::Actor;
use crate::certificate::{CertificateVersionChain, StateChange};
use crate::database::models::{ActionRequest, ActionType, RequestStatus};
use crate::error::{CertLedgerError, Result};
use crate::pagination::{Listing, PageMeta, PageRequest, Paginated};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewActionRequest {
    pub cert_hash: String,
    pub action_type: ActionType,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    /// Requests filed by the actor (staff) or claimed by the actor (admins)
    #[serde(default)]
    pub mine: bool,
}

pub struct ActionRequestWorkflow {
    pool: SqlitePool,
    chain: Arc<CertificateVersionChain>,
}

impl ActionRequestWorkflow {
    pub fn new(pool: SqlitePool, chain: Arc<CertificateVersionChain>) -> Self {
        Self { pool, chain }
    }

    pub async fn create(&self, new: NewActionRequest, requester: &Actor) -> Result<ActionRequest> {
        if new.reason.trim().is_empty() {
            return Err(CertLedgerError::ValidationError(
                "A reason is required".to_string(),
            ));
        }

        let certificate = self.chain.verify(&new.cert_hash).await?;

        if let Some(open) = self.open_request_for(&new.cert_hash).await? {
            return Err(CertLedgerError::Conflict(format!(
                "Certificate {} already has an open {} request (#{}, {})",
                new.cert_hash,
                open.action_type.as_str(),
                open.id,
                open.status.as_str()
            )));
        }

        match (new.action_type, certificate.is_revoked) {
            (ActionType::Revoke, true) => {
                return Err(CertLedgerError::Conflict(format!(
                    "Certificate {} is already revoked",
                    new.cert_hash
                )))
            }
            (ActionType::Reactivate, false) => {
                return Err(CertLedgerError::Conflict(format!(
                    "Certificate {} is already active",
                    new.cert_hash
                )))
            }
            _ => {}
        }

        let now = Utc::now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO action_requests
            (cert_hash, student_id, action_type, reason, status, requested_by,
             requested_by_name, requested_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.cert_hash)
        .bind(&certificate.student_id)
        .bind(new.action_type.as_str())
        .bind(new.reason.trim())
        .bind(RequestStatus::Pending.as_str())
        .bind(&requester.id)
        .bind(&requester.name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        let id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(CertLedgerError::Conflict(format!(
                    "Certificate {} already has an open request",
                    new.cert_hash
                )))
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "{} filed {} request #{} for certificate {}",
            requester.id,
            new.action_type.as_str(),
            id,
            new.cert_hash
        );
        self.get(id).await
    }

    pub async fn get(&self, id: i64) -> Result<ActionRequest> {
        sqlx::query_as::<_, ActionRequest>("SELECT * FROM action_requests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CertLedgerError::request_not_found(id))
    }

    async fn open_request_for(&self, cert_hash: &str) -> Result<Option<ActionRequest>> {
        let request = sqlx::query_as::<_, ActionRequest>(
            "SELECT * FROM action_requests WHERE cert_hash = ? AND status IN ('pending', 'processing')",
        )
        .bind(cert_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(request)
    }

    pub async fn take(&self, id: i64, admin: &Actor) -> Result<ActionRequest> {
        self.transition(id, RequestEvent::Take, admin, None).await
    }

    pub async fn release(&self, id: i64, admin: &Actor) -> Result<ActionRequest> {
        self.transition(id, RequestEvent::Release, admin, None).await
    }

    /// Record approval. Called only after the ledger transaction has succeeded.
    pub async fn complete(&self, id: i64, admin: &Actor) -> Result<ActionRequest> {
        self.transition(id, RequestEvent::Complete, admin, None).await
    }

    pub async fn reject(&self, id: i64, admin: &Actor, reason: &str) -> Result<ActionRequest> {
        if reason.trim().is_empty() {
            return Err(CertLedgerError::ValidationError(
                "A rejection reason is required".to_string(),
            ));
        }
        self.transition(id, RequestEvent::Reject, admin, Some(reason.trim()))
            .await
    }

    pub async fn cancel(&self, id: i64, requester: &Actor) -> Result<()> {
        let request = self.get(id).await?;
        Transition::check(&request, RequestEvent::Cancel, requester)?;

        let result = sqlx::query(
            "DELETE FROM action_requests WHERE id = ? AND status = ? AND requested_by = ?",
        )
        .bind(id)
        .bind(RequestStatus::Pending.as_str())
        .bind(&requester.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.lost_race(id, RequestEvent::Cancel, requester).await);
        }
        info!("{} cancelled request #{}", requester.id, id);
        Ok(())
    }

    /// Run the ledger write for a claimed request, then complete it.
    pub async fn execute(&self, id: i64, admin: &Actor) -> Result<(ActionRequest, StateChange)> {
        let request = self.get(id).await?;
        Transition::check(&request, RequestEvent::Complete, admin)?;

        let change = match request.action_type {
            ActionType::Revoke => self.chain.revoke(&request.cert_hash, &admin.id).await?,
            ActionType::Reactivate => self.chain.reactivate(&request.cert_hash, &admin.id).await?,
        };
        if !change.changed() {
            warn!(
                "Request #{}: certificate {} was already in the requested state",
                id, request.cert_hash
            );
        }

        match self.complete(id, admin).await {
            Ok(completed) => Ok((completed, change)),
            Err(e) => {
                // The ledger write stands; re-running execute completes via `Unchanged`.
                match change.receipt() {
                    Some(receipt) => warn!(
                        "Request #{}: ledger tx {} (block {}) applied but completion failed: {}",
                        id, receipt.tx_id, receipt.block_ordinal, e
                    ),
                    None => warn!("Request #{}: completion failed: {}", id, e),
                }
                Err(e)
            }
        }
    }

    async fn transition(
        &self,
        id: i64,
        event: RequestEvent,
        actor: &Actor,
        rejection_reason: Option<&str>,
    ) -> Result<ActionRequest> {
        let request = self.get(id).await?;
        let transition = Transition::check(&request, event, actor)?;
        let target = match transition.outcome {
            Outcome::Move(status) => status,
            Outcome::Delete => {
                return Err(CertLedgerError::InvalidTransition(format!(
                    "{} deletes the request",
                    event.as_str()
                )))
            }
        };
        let now = Utc::now();

        let result = match event {
            RequestEvent::Take => {
                sqlx::query(
                    r#"
                    UPDATE action_requests SET status = ?, taken_by = ?, updated_at = ?
                    WHERE id = ? AND status = ?
                    "#,
                )
                .bind(target.as_str())
                .bind(&actor.id)
                .bind(now)
                .bind(id)
                .bind(transition.from.as_str())
                .execute(&self.pool)
                .await?
            }
            RequestEvent::Release => {
                sqlx::query(
                    r#"
                    UPDATE action_requests SET status = ?, taken_by = NULL, updated_at = ?
                    WHERE id = ? AND status = ? AND taken_by = ?
                    "#,
                )
                .bind(target.as_str())
                .bind(now)
                .bind(id)
                .bind(transition.from.as_str())
                .bind(&actor.id)
                .execute(&self.pool)
                .await?
            }
            RequestEvent::Complete | RequestEvent::Reject => {
                sqlx::query(
                    r#"
                    UPDATE action_requests SET status = ?, rejection_reason = ?, updated_at = ?
                    WHERE id = ? AND status = ? AND taken_by = ?
                    "#,
                )
                .bind(target.as_str())
                .bind(rejection_reason)
                .bind(now)
                .bind(id)
                .bind(transition.from.as_str())
                .bind(&actor.id)
                .execute(&self.pool)
                .await?
            }
            RequestEvent::Cancel => unreachable!("cancel resolves to Outcome::Delete"),
        };

        if result.rows_affected() == 0 {
            return Err(self.lost_race(id, event, actor).await);
        }

        info!(
            "{} {} request #{}: {} -> {}",
            actor.id,
            event.as_str(),
            id,
            transition.from.as_str(),
            target.as_str()
        );
        self.get(id).await
    }

    /// Explain a conditional write that matched nothing by re-checking the fresh row.
    async fn lost_race(&self, id: i64, event: RequestEvent, actor: &Actor) -> CertLedgerError {
        match self.get(id).await {
            Ok(current) => match Transition::check(&current, event, actor) {
                Err(e) => e,
                Ok(_) => CertLedgerError::Conflict(format!(
                    "Request {} changed concurrently, retry {}",
                    id,
                    event.as_str()
                )),
            },
            Err(e) => e,
        }
    }

    pub async fn list(
        &self,
        filter: &RequestFilter,
        actor: &Actor,
        page: Option<PageRequest>,
    ) -> Result<Listing<ActionRequest>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM action_requests");
        push_filters(&mut query, filter, actor);
        query.push(" ORDER BY id DESC");

        let Some(request) = page else {
            let rows = query
                .build_query_as::<ActionRequest>()
                .fetch_all(&self.pool)
                .await?;
            return Ok(Listing::All(rows));
        };

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM action_requests");
        push_filters(&mut count, filter, actor);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        query
            .push(" LIMIT ")
            .push_bind(request.limit as i64)
            .push(" OFFSET ")
            .push_bind(request.offset() as i64);
        let rows = query
            .build_query_as::<ActionRequest>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Listing::Page(Paginated {
            data: rows,
            meta: PageMeta::new(request, total as u64),
        }))
    }
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &RequestFilter, actor: &Actor) {
    query.push(" WHERE 1 = 1");
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if filter.mine {
        let column = if actor.is_admin() { "taken_by" } else { "requested_by" };
        query
            .push(format!(" AND {} = ", column))
            .push_bind(actor.id.clone());
    }
}
