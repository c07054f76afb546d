//! Action request workflow tests

use cert_ledger::actor::Actor;
use cert_ledger::certificate::{IssuerKey, StateChange};
use cert_ledger::error::CertLedgerError;
use cert_ledger::pagination::PageRequest;
use cert_ledger::requests::{ActionType, NewActionRequest, RequestFilter, RequestStatus};
use cert_ledger::CertLedger;

mod common;
use common::*;

fn revoke_request(cert_hash: &str) -> NewActionRequest {
    NewActionRequest {
        cert_hash: cert_hash.to_string(),
        action_type: ActionType::Revoke,
        reason: "Transcript discrepancy".to_string(),
    }
}

async fn app_with_certificate() -> (CertLedger, String) {
    let (app, _ledger) = setup_app().await;
    let record = issue(&app, &IssuerKey::generate(), "S1").await;
    (app, record.hash)
}

#[tokio::test]
async fn test_create_request() {
    let (app, hash) = app_with_certificate().await;
    let staff = Actor::staff("staff-1").with_name("Dana");

    let request = app.requests.create(revoke_request(&hash), &staff).await.unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.student_id, "S1");
    assert_eq!(request.requested_by, "staff-1");
    assert_eq!(request.requested_by_name.as_deref(), Some("Dana"));
    assert!(request.taken_by.is_none());
}

#[tokio::test]
async fn test_second_open_request_conflicts() {
    let (app, hash) = app_with_certificate().await;

    app.requests
        .create(revoke_request(&hash), &Actor::staff("staff-1"))
        .await
        .unwrap();
    let err = app
        .requests
        .create(revoke_request(&hash), &Actor::staff("staff-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, CertLedgerError::Conflict(_)));
}

#[tokio::test]
async fn test_action_must_match_certificate_state() {
    let (app, hash) = app_with_certificate().await;
    let staff = Actor::staff("staff-1");

    let reactivate = NewActionRequest {
        action_type: ActionType::Reactivate,
        ..revoke_request(&hash)
    };
    assert!(matches!(
        app.requests.create(reactivate, &staff).await,
        Err(CertLedgerError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_create_rejects_unknown_certificate_and_empty_reason() {
    let (app, hash) = app_with_certificate().await;
    let staff = Actor::staff("staff-1");

    let missing = format!("0x{}", "ab".repeat(32));
    assert!(matches!(
        app.requests.create(revoke_request(&missing), &staff).await,
        Err(CertLedgerError::NotFound(_))
    ));

    let blank = NewActionRequest {
        reason: "   ".to_string(),
        ..revoke_request(&hash)
    };
    assert!(matches!(
        app.requests.create(blank, &staff).await,
        Err(CertLedgerError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_only_admins_take() {
    let (app, hash) = app_with_certificate().await;
    let request = app
        .requests
        .create(revoke_request(&hash), &Actor::staff("staff-1"))
        .await
        .unwrap();

    assert!(matches!(
        app.requests.take(request.id, &Actor::staff("staff-2")).await,
        Err(CertLedgerError::Forbidden(_))
    ));

    let taken = app.requests.take(request.id, &Actor::admin("admin-1")).await.unwrap();
    assert_eq!(taken.status, RequestStatus::Processing);
    assert_eq!(taken.taken_by.as_deref(), Some("admin-1"));

    assert!(matches!(
        app.requests.take(request.id, &Actor::admin("admin-2")).await,
        Err(CertLedgerError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn test_claimant_only_actions() {
    let (app, hash) = app_with_certificate().await;
    let request = app
        .requests
        .create(revoke_request(&hash), &Actor::staff("staff-1"))
        .await
        .unwrap();
    let claimant = Actor::admin("admin-1");
    let other = Actor::admin("admin-2");
    app.requests.take(request.id, &claimant).await.unwrap();

    assert!(matches!(
        app.requests.release(request.id, &other).await,
        Err(CertLedgerError::Forbidden(_))
    ));
    assert!(matches!(
        app.requests.complete(request.id, &other).await,
        Err(CertLedgerError::Forbidden(_))
    ));
    assert!(matches!(
        app.requests.reject(request.id, &other, "no").await,
        Err(CertLedgerError::Forbidden(_))
    ));

    let released = app.requests.release(request.id, &claimant).await.unwrap();
    assert_eq!(released.status, RequestStatus::Pending);
    assert!(released.taken_by.is_none());

    // Released work can be claimed by anyone with the admin role.
    let retaken = app.requests.take(request.id, &other).await.unwrap();
    assert_eq!(retaken.taken_by.as_deref(), Some("admin-2"));
}

#[tokio::test]
async fn test_terminal_states_are_final() {
    let (app, hash) = app_with_certificate().await;
    let admin = Actor::admin("admin-1");
    let request = app
        .requests
        .create(revoke_request(&hash), &Actor::staff("staff-1"))
        .await
        .unwrap();
    app.requests.take(request.id, &admin).await.unwrap();

    let rejected = app
        .requests
        .reject(request.id, &admin, "Insufficient evidence")
        .await
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("Insufficient evidence"));

    assert!(matches!(
        app.requests.complete(request.id, &admin).await,
        Err(CertLedgerError::InvalidTransition(_))
    ));
    assert!(matches!(
        app.requests.take(request.id, &admin).await,
        Err(CertLedgerError::InvalidTransition(_))
    ));

    // A closed request no longer blocks new ones.
    let again = app
        .requests
        .create(revoke_request(&hash), &Actor::staff("staff-1"))
        .await
        .unwrap();
    assert_ne!(again.id, request.id);
}

#[tokio::test]
async fn test_double_complete_is_invalid() {
    let (app, hash) = app_with_certificate().await;
    let admin = Actor::admin("admin-1");
    let request = app
        .requests
        .create(revoke_request(&hash), &Actor::staff("staff-1"))
        .await
        .unwrap();
    app.requests.take(request.id, &admin).await.unwrap();

    let completed = app.requests.complete(request.id, &admin).await.unwrap();
    assert_eq!(completed.status, RequestStatus::Completed);
    assert!(matches!(
        app.requests.complete(request.id, &admin).await,
        Err(CertLedgerError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn test_cancel_rules() {
    let (app, hash) = app_with_certificate().await;
    let requester = Actor::staff("staff-1");
    let request = app.requests.create(revoke_request(&hash), &requester).await.unwrap();

    assert!(matches!(
        app.requests.cancel(request.id, &Actor::staff("staff-2")).await,
        Err(CertLedgerError::Forbidden(_))
    ));

    app.requests.take(request.id, &Actor::admin("admin-1")).await.unwrap();
    assert!(matches!(
        app.requests.cancel(request.id, &requester).await,
        Err(CertLedgerError::InvalidTransition(_))
    ));

    app.requests.release(request.id, &Actor::admin("admin-1")).await.unwrap();
    app.requests.cancel(request.id, &requester).await.unwrap();
    assert!(matches!(
        app.requests.get(request.id).await,
        Err(CertLedgerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_concurrent_take_has_one_winner() {
    let (app, hash) = app_with_certificate().await;
    let request = app
        .requests
        .create(revoke_request(&hash), &Actor::staff("staff-1"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let requests = app.requests.clone();
        let id = request.id;
        handles.push(tokio::spawn(async move {
            requests.take(id, &Actor::admin(format!("admin-{}", i))).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(CertLedgerError::InvalidTransition(_)) | Err(CertLedgerError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_execute_revokes_then_completes() {
    let (app, hash) = app_with_certificate().await;
    let admin = Actor::admin("admin-1");
    let request = app
        .requests
        .create(revoke_request(&hash), &Actor::staff("staff-1"))
        .await
        .unwrap();

    assert!(matches!(
        app.requests.execute(request.id, &admin).await,
        Err(CertLedgerError::InvalidTransition(_))
    ));

    app.requests.take(request.id, &admin).await.unwrap();
    let (completed, change) = app.requests.execute(request.id, &admin).await.unwrap();
    assert_eq!(completed.status, RequestStatus::Completed);
    assert!(change.changed());
    assert!(app.chain.verify(&hash).await.unwrap().is_revoked);

    // Reactivation goes through the same gate.
    let reactivate = NewActionRequest {
        action_type: ActionType::Reactivate,
        ..revoke_request(&hash)
    };
    let request = app.requests.create(reactivate, &Actor::staff("staff-1")).await.unwrap();
    app.requests.take(request.id, &admin).await.unwrap();
    let (_, change) = app.requests.execute(request.id, &admin).await.unwrap();
    assert!(change.changed());
    assert!(!app.chain.verify(&hash).await.unwrap().is_revoked);
}

#[tokio::test]
async fn test_execute_tolerates_already_applied_state() {
    let (app, hash) = app_with_certificate().await;
    let admin = Actor::admin("admin-1");
    let request = app
        .requests
        .create(revoke_request(&hash), &Actor::staff("staff-1"))
        .await
        .unwrap();
    app.requests.take(request.id, &admin).await.unwrap();

    app.chain.revoke(&hash, "admin-2").await.unwrap();
    let (completed, change) = app.requests.execute(request.id, &admin).await.unwrap();
    assert_eq!(change, StateChange::Unchanged);
    assert_eq!(completed.status, RequestStatus::Completed);
}

#[tokio::test]
async fn test_execute_retry_after_failed_completion() {
    let (app, ledger) = setup_app().await;
    let key = IssuerKey::generate();
    let admin = Actor::admin("admin-1");
    let record = issue(&app, &key, "S1").await;
    let request = app
        .requests
        .create(revoke_request(&record.hash), &Actor::staff("staff-1"))
        .await
        .unwrap();
    app.requests.take(request.id, &admin).await.unwrap();

    sqlx::query(
        r#"
        CREATE TRIGGER fail_completion BEFORE UPDATE OF status ON action_requests
        WHEN NEW.status = 'completed'
        BEGIN SELECT RAISE(ABORT, 'completion unavailable'); END
        "#,
    )
    .execute(app.database.pool())
    .await
    .unwrap();

    assert!(matches!(
        app.requests.execute(request.id, &admin).await,
        Err(CertLedgerError::DatabaseError(_))
    ));
    assert!(app.chain.verify(&record.hash).await.unwrap().is_revoked);
    assert_eq!(
        app.requests.get(request.id).await.unwrap().status,
        RequestStatus::Processing
    );

    sqlx::query("DROP TRIGGER fail_completion")
        .execute(app.database.pool())
        .await
        .unwrap();

    let submissions = ledger.submission_count().await;
    let (completed, change) = app.requests.execute(request.id, &admin).await.unwrap();
    assert_eq!(change, StateChange::Unchanged);
    assert_eq!(completed.status, RequestStatus::Completed);
    assert_eq!(ledger.submission_count().await, submissions);
}

#[tokio::test]
async fn test_list_filters_and_pages() {
    let (app, _ledger) = setup_app().await;
    let key = IssuerKey::generate();
    let admin = Actor::admin("admin-1");
    let staff_a = Actor::staff("staff-a");
    let staff_b = Actor::staff("staff-b");

    let mut ids = Vec::new();
    for i in 0..5 {
        let record = issue(&app, &key, &format!("S{}", i)).await;
        let requester = if i % 2 == 0 { &staff_a } else { &staff_b };
        let request = app.requests.create(revoke_request(&record.hash), requester).await.unwrap();
        ids.push(request.id);
    }
    app.requests.take(ids[0], &admin).await.unwrap();
    app.requests.take(ids[1], &admin).await.unwrap();

    let pending = app
        .requests
        .list(
            &RequestFilter {
                status: Some(RequestStatus::Pending),
                mine: false,
            },
            &admin,
            None,
        )
        .await
        .unwrap();
    assert_eq!(pending.items().len(), 3);
    assert!(pending.meta().is_none());

    let mine = RequestFilter {
        status: None,
        mine: true,
    };
    let claimed = app.requests.list(&mine, &admin, None).await.unwrap();
    assert_eq!(claimed.items().len(), 2);
    let filed = app.requests.list(&mine, &staff_a, None).await.unwrap();
    assert_eq!(filed.items().len(), 3);
    assert!(filed.items().iter().all(|r| r.requested_by == "staff-a"));

    let page = app
        .requests
        .list(&RequestFilter::default(), &admin, Some(PageRequest::new(2, 2).unwrap()))
        .await
        .unwrap();
    let meta = page.meta().unwrap();
    assert_eq!(meta.total_count, 5);
    assert_eq!(meta.total_pages, 3);
    assert!(meta.has_more);
    let page_ids: Vec<i64> = page.items().iter().map(|r| r.id).collect();
    assert_eq!(page_ids, vec![ids[2], ids[1]]);
}

/// Staff files, admin claims and executes, the ledger shows the flip,
/// and the audit trail records both events newest first.
#[tokio::test]
async fn test_revocation_end_to_end() {
    let (app, ledger) = setup_app().await;
    let key = IssuerKey::generate();
    let admin = Actor::admin("admin-1");

    let v1 = issue(&app, &key, "S1").await;
    let request = app
        .requests
        .create(revoke_request(&v1.hash), &Actor::staff("staff-1"))
        .await
        .unwrap();
    app.requests.take(request.id, &admin).await.unwrap();
    app.requests.execute(request.id, &admin).await.unwrap();
    assert_eq!(ledger.submission_count().await, 2);

    let v2 = issue(&app, &key, "S1").await;
    assert_eq!(v2.version, 2);
    assert_eq!(app.chain.active_version("S1").await.unwrap().hash, v2.hash);

    let history = app.audit.certificate_history(&v1.hash, None).await.unwrap();
    let kinds: Vec<&str> = history.items().iter().map(|e| e.kind().as_str()).collect();
    assert_eq!(kinds, vec!["REVOKED", "ISSUED"]);
    assert_eq!(history.items()[0].base().actor, "admin-1");
}
