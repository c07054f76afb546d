//! HTTP adapter
//!
//! Thin routing layer over the core services. Authentication happens upstream;
//! the caller's identity arrives in `x-actor-id`, `x-actor-name` and `x-actor-role`.

use axum::{
    extract::{ConnectInfo, FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Duration;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use crate::actor::{Actor, Role};
use crate::app::CertLedger;
use crate::audit::AuditEvent;
use crate::certificate::{CertificateDraft, CertificateRecord, Cgpa, IssuerKey};
use crate::database::models::{ActionRequest, BlockedClient, RequestStatus, VerificationLog};
use crate::error::CertLedgerError;
use crate::pagination::{Listing, PageRequest};
use crate::requests::{NewActionRequest, RequestFilter};
use crate::verification::{SubmissionReceipt, VerificationSubmission};

#[derive(Clone)]
pub struct AppState {
    pub app: CertLedger,
    pub issuer: Option<Arc<IssuerKey>>,
    pub issuing_authority: String,
}

pub struct ApiError(CertLedgerError);

impl From<CertLedgerError> for ApiError {
    fn from(err: CertLedgerError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            CertLedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            CertLedgerError::Conflict(_) => StatusCode::CONFLICT,
            CertLedgerError::InvalidTransition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CertLedgerError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            CertLedgerError::Forbidden(_) => StatusCode::FORBIDDEN,
            CertLedgerError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CertLedgerError::LedgerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CertLedgerError::RejectedByLedger(_) => StatusCode::BAD_GATEWAY,
            CertLedgerError::ValidationError(_) => StatusCode::BAD_REQUEST,
            CertLedgerError::DatabaseError(_)
            | CertLedgerError::ConfigError(_)
            | CertLedgerError::CryptoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let mut body = json!({
            "error": {
                "kind": self.0.kind(),
                "message": self.0.to_string(),
                "retryable": self.0.is_retryable(),
            }
        });
        if let CertLedgerError::RateLimited { blocked_until, .. } = &self.0 {
            body["error"]["blocked_until"] = json!(blocked_until);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Caller identity forwarded by the authenticating gateway
pub struct AuthenticatedActor(pub Actor);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(&parts.headers, "x-actor-id").ok_or_else(|| {
            CertLedgerError::Unauthenticated("Missing x-actor-id header".to_string())
        })?;
        let role = header(&parts.headers, "x-actor-role")
            .and_then(Role::from_str)
            .ok_or_else(|| {
                CertLedgerError::Unauthenticated("Missing or unknown x-actor-role".to_string())
            })?;
        Ok(AuthenticatedActor(Actor {
            id: id.to_string(),
            name: header(&parts.headers, "x-actor-name").map(str::to_string),
            role,
        }))
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    fn request(&self) -> Result<Option<PageRequest>, CertLedgerError> {
        PageRequest::from_query(self.page, self.limit)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/certificates", post(issue_certificate))
        .route("/certificates/:hash", get(verify_certificate))
        .route("/students/:student_id/certificates", get(all_versions))
        .route("/students/:student_id/certificates/active", get(active_version))
        .route("/audit", get(global_audit))
        .route("/audit/certificates/:hash", get(certificate_audit))
        .route("/audit/actors/:actor", get(actor_audit))
        .route("/requests", post(create_request).get(list_requests))
        .route("/requests/:id", get(get_request).delete(cancel_request))
        .route("/requests/:id/take", post(take_request))
        .route("/requests/:id/release", post(release_request))
        .route("/requests/:id/complete", post(complete_request))
        .route("/requests/:id/reject", post(reject_request))
        .route("/requests/:id/execute", post(execute_request))
        .route("/verifications", post(submit_verification))
        .route("/admin/verifications", get(list_verification_logs))
        .route("/admin/blocked", get(list_blocked).post(block_client))
        .route("/admin/blocked/:ip", axum::routing::delete(unblock_client))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "cert-ledger",
        "timestamp": chrono::Utc::now()
    }))
}

#[derive(Debug, Deserialize)]
pub struct IssueBody {
    pub student_id: String,
    pub student_name: String,
    pub degree: String,
    pub program: String,
    pub cgpa: Cgpa,
}

async fn issue_certificate(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(body): Json<IssueBody>,
) -> ApiResult<CertificateRecord> {
    let key = state.issuer.as_ref().ok_or_else(|| {
        CertLedgerError::ConfigError("No issuer key configured".to_string())
    })?;
    let draft = CertificateDraft {
        student_id: body.student_id,
        student_name: body.student_name,
        degree: body.degree,
        program: body.program,
        cgpa: body.cgpa,
        issuing_authority: state.issuing_authority.clone(),
    };
    info!("{} issuing certificate for student {}", actor.id, draft.student_id);
    Ok(Json(state.app.chain.issue(&draft, key, &actor).await?))
}

async fn verify_certificate(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Value> {
    let record = state.app.chain.verify(&hash).await?;
    let intact = state.app.chain.verify_integrity(&record)?;
    Ok(Json(json!({ "certificate": record, "intact": intact })))
}

async fn all_versions(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> ApiResult<Vec<CertificateRecord>> {
    Ok(Json(state.app.chain.all_versions(&student_id).await?))
}

async fn active_version(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> ApiResult<CertificateRecord> {
    Ok(Json(state.app.chain.active_version(&student_id).await?))
}

async fn global_audit(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Listing<AuditEvent>> {
    Ok(Json(state.app.audit.global(page.request()?).await?))
}

async fn certificate_audit(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Listing<AuditEvent>> {
    Ok(Json(state.app.audit.certificate_history(&hash, page.request()?).await?))
}

async fn actor_audit(
    State(state): State<AppState>,
    Path(actor): Path<String>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Listing<AuditEvent>> {
    Ok(Json(state.app.audit.actor_activity(&actor, page.request()?).await?))
}

async fn create_request(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(body): Json<NewActionRequest>,
) -> Result<(StatusCode, Json<ActionRequest>), ApiError> {
    let request = state.app.requests.create(body, &actor).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

#[derive(Debug, Deserialize)]
pub struct RequestListQuery {
    pub status: Option<String>,
    pub mine: Option<bool>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

async fn list_requests(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(query): Query<RequestListQuery>,
) -> ApiResult<Listing<ActionRequest>> {
    let status = match query.status.as_deref() {
        None => None,
        Some(s) => Some(RequestStatus::from_str(s).ok_or_else(|| {
            CertLedgerError::ValidationError(format!("Unknown status filter: {}", s))
        })?),
    };
    let filter = RequestFilter {
        status,
        mine: query.mine.unwrap_or(false),
    };
    let page = PageRequest::from_query(query.page, query.limit)?;
    Ok(Json(state.app.requests.list(&filter, &actor, page).await?))
}

async fn get_request(
    State(state): State<AppState>,
    AuthenticatedActor(_actor): AuthenticatedActor,
    Path(id): Path<i64>,
) -> ApiResult<ActionRequest> {
    Ok(Json(state.app.requests.get(id).await?))
}

async fn cancel_request(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.app.requests.cancel(id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn take_request(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<i64>,
) -> ApiResult<ActionRequest> {
    Ok(Json(state.app.requests.take(id, &actor).await?))
}

async fn release_request(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<i64>,
) -> ApiResult<ActionRequest> {
    Ok(Json(state.app.requests.release(id, &actor).await?))
}

async fn complete_request(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<i64>,
) -> ApiResult<ActionRequest> {
    Ok(Json(state.app.requests.complete(id, &actor).await?))
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub reason: String,
}

async fn reject_request(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<i64>,
    Json(body): Json<RejectBody>,
) -> ApiResult<ActionRequest> {
    Ok(Json(state.app.requests.reject(id, &actor, &body.reason).await?))
}

async fn execute_request(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<i64>,
) -> ApiResult<Value> {
    let (request, change) = state.app.requests.execute(id, &actor).await?;
    Ok(Json(json!({
        "request": request,
        "changed": change.changed(),
        "receipt": change.receipt(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct VerificationBody {
    pub cert_hash: String,
    pub verifier_name: Option<String>,
    pub verifier_organization: Option<String>,
}

async fn submit_verification(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<VerificationBody>,
) -> ApiResult<SubmissionReceipt> {
    let submission = VerificationSubmission {
        cert_hash: body.cert_hash,
        verifier_ip: peer.ip().to_string(),
        verifier_name: body.verifier_name,
        verifier_organization: body.verifier_organization,
        user_agent: header(&headers, "user-agent").map(str::to_string),
    };
    Ok(Json(state.app.verification.submit(submission).await?))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub cert_hash: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

async fn list_verification_logs(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(query): Query<LogQuery>,
) -> ApiResult<Listing<VerificationLog>> {
    actor.require_admin()?;
    let page = PageRequest::from_query(query.page, query.limit)?;
    Ok(Json(
        state
            .app
            .verification
            .list_logs(query.cert_hash.as_deref(), page)
            .await?,
    ))
}

async fn list_blocked(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> ApiResult<Vec<BlockedClient>> {
    actor.require_admin()?;
    Ok(Json(state.app.limiter.list_blocked().await?))
}

#[derive(Debug, Deserialize)]
pub struct BlockBody {
    pub ip: String,
    pub duration_secs: i64,
    pub reason: String,
}

async fn block_client(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(body): Json<BlockBody>,
) -> ApiResult<BlockedClient> {
    let block = state
        .app
        .limiter
        .block_client(&body.ip, Duration::seconds(body.duration_secs), &body.reason, &actor)
        .await?;
    Ok(Json(block))
}

async fn unblock_client(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(ip): Path<String>,
) -> ApiResult<Value> {
    let removed = state.app.limiter.unblock_client(&ip, &actor).await?;
    Ok(Json(json!({ "ip": ip, "removed": removed })))
}
