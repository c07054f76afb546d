#![allow(dead_code)]

use std::sync::Arc;

use cert_ledger::actor::Actor;
use cert_ledger::certificate::{CertificateDraft, CertificateRecord, IssuerKey};
use cert_ledger::database::Database;
use cert_ledger::ledger::MemoryLedger;
use cert_ledger::ratelimit::RateLimitPolicy;
use cert_ledger::CertLedger;

/// Setup an in-memory SQLite database for testing
pub async fn setup_test_db() -> Database {
    Database::new_in_memory()
        .await
        .expect("Failed to create test database")
}

/// Full service graph over an in-memory store and an in-process ledger
pub async fn setup_app() -> (CertLedger, MemoryLedger) {
    let ledger = MemoryLedger::new();
    let app = CertLedger::new(
        setup_test_db().await,
        Arc::new(ledger.clone()),
        RateLimitPolicy::default(),
    );
    (app, ledger)
}

pub fn draft(student_id: &str) -> CertificateDraft {
    CertificateDraft {
        student_id: student_id.to_string(),
        student_name: format!("Student {}", student_id),
        degree: "BSc".to_string(),
        program: "Computer Science".to_string(),
        cgpa: "3.75".parse().unwrap(),
        issuing_authority: "Office of the Registrar".to_string(),
    }
}

pub const REGISTRAR: &str = "registrar-1";

pub fn registrar() -> Actor {
    Actor::staff(REGISTRAR)
}

pub async fn issue(app: &CertLedger, key: &IssuerKey, student_id: &str) -> CertificateRecord {
    issue_as(app, key, student_id, &registrar()).await
}

pub async fn issue_as(
    app: &CertLedger,
    key: &IssuerKey,
    student_id: &str,
    actor: &Actor,
) -> CertificateRecord {
    app.chain
        .issue(&draft(student_id), key, actor)
        .await
        .expect("issuance failed")
}
