use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Revoke,
    Reactivate,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Revoke => "revoke",
            ActionType::Reactivate => "reactivate",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "revoke" => Some(ActionType::Revoke),
            "reactivate" => Some(ActionType::Reactivate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "processing" => Some(RequestStatus::Processing),
            "completed" => Some(RequestStatus::Completed),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: i64,
    pub cert_hash: String,
    pub student_id: String,
    pub action_type: ActionType,
    pub reason: String,
    pub status: RequestStatus,
    pub requested_by: String,
    pub requested_by_name: Option<String>,
    pub taken_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn decode_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::Decode(format!("invalid {} value: {}", column, value).into())
}

impl<'r> FromRow<'r, SqliteRow> for ActionRequest {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let action_type: String = row.try_get("action_type")?;
        let status: String = row.try_get("status")?;
        Ok(ActionRequest {
            id: row.try_get("id")?,
            cert_hash: row.try_get("cert_hash")?,
            student_id: row.try_get("student_id")?,
            action_type: ActionType::from_str(&action_type)
                .ok_or_else(|| decode_error("action_type", &action_type))?,
            reason: row.try_get("reason")?,
            status: RequestStatus::from_str(&status).ok_or_else(|| decode_error("status", &status))?,
            requested_by: row.try_get("requested_by")?,
            requested_by_name: row.try_get("requested_by_name")?,
            taken_by: row.try_get("taken_by")?,
            rejection_reason: row.try_get("rejection_reason")?,
            requested_at: row.try_get("requested_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Durable block record; outlives the volatile attempt counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedClient {
    pub ip: String,
    pub blocked_until: DateTime<Utc>,
    pub reason: String,
    pub blocked_by: String,
    pub created_at: DateTime<Utc>,
}

impl BlockedClient {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until > now
    }
}

fn millis_to_datetime(column: &str, millis: i64) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| decode_error(column, &millis.to_string()))
}

impl<'r> FromRow<'r, SqliteRow> for BlockedClient {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(BlockedClient {
            ip: row.try_get("ip")?,
            blocked_until: millis_to_datetime("blocked_until", row.try_get("blocked_until")?)?,
            reason: row.try_get("reason")?,
            blocked_by: row.try_get("blocked_by")?,
            created_at: millis_to_datetime("created_at", row.try_get("created_at")?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct VerificationLog {
    pub id: String,
    pub cert_hash: String,
    pub verifier_ip: String,
    pub verifier_name: Option<String>,
    pub verifier_organization: Option<String>,
    pub user_agent: Option<String>,
    pub verified_at: DateTime<Utc>,
}
