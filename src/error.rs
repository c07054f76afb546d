use chrono::{DateTime, Utc};
use thiserror::Error;

impl From<serde_json::Error> for CertLedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::ValidationError(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for CertLedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(format!("Database error: {}", err))
    }
}

impl From<config::ConfigError> for CertLedgerError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for CertLedgerError {
    fn from(err: reqwest::Error) -> Self {
        Self::LedgerUnavailable(format!("Ledger transport error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum CertLedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// No usable caller identity; distinct from `Forbidden`, which is a known actor lacking rights
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limited until {blocked_until}: {reason}")]
    RateLimited {
        reason: String,
        blocked_until: DateTime<Utc>,
    },

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Rejected by ledger: {0}")]
    RejectedByLedger(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, CertLedgerError>;

impl CertLedgerError {
    /// Stable machine-readable kind, rendered next to the human message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::RateLimited { .. } => "rate_limited",
            Self::LedgerUnavailable(_) => "ledger_unavailable",
            Self::RejectedByLedger(_) => "rejected_by_ledger",
            Self::DatabaseError(_) => "database_error",
            Self::ConfigError(_) => "config_error",
            Self::CryptoError(_) => "crypto_error",
            Self::ValidationError(_) => "validation_error",
        }
    }

    /// Only transport-level ledger failures may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LedgerUnavailable(_))
    }

    pub fn certificate_not_found(hash: &str) -> Self {
        Self::NotFound(format!("Certificate {} does not exist", hash))
    }

    pub fn request_not_found(id: i64) -> Self {
        Self::NotFound(format!("Action request {} does not exist", id))
    }

    pub fn student_not_found(student_id: &str) -> Self {
        Self::NotFound(format!("No certificates issued for student {}", student_id))
    }
}
