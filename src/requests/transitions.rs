//! Request state machine
//!
//! ```text
//! PENDING    --take(admin)-----------> PROCESSING
//! PENDING    --cancel(requester)-----> (deleted)
//! PROCESSING --release(claimant)-----> PENDING
//! PROCESSING --complete(claimant)----> COMPLETED
//! PROCESSING --reject(claimant)------> REJECTED
//! ```

use serde::{Deserialize, Serialize};

use crate::actor::Actor;
use crate::database::models::{ActionRequest, RequestStatus};
use crate::error::{CertLedgerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestEvent {
    Take,
    Release,
    Complete,
    Reject,
    Cancel,
}

impl RequestEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestEvent::Take => "take",
            RequestEvent::Release => "release",
            RequestEvent::Complete => "complete",
            RequestEvent::Reject => "reject",
            RequestEvent::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Move(RequestStatus),
    Delete,
}

/// Who may fire a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Any administrator
    Admin,
    /// Only the actor recorded in `taken_by`
    Claimant,
    /// Only the actor recorded in `requested_by`
    Requester,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RequestStatus,
    pub event: RequestEvent,
    pub outcome: Outcome,
    pub authority: Authority,
}

static TRANSITIONS: [Transition; 5] = [
    Transition {
        from: RequestStatus::Pending,
        event: RequestEvent::Take,
        outcome: Outcome::Move(RequestStatus::Processing),
        authority: Authority::Admin,
    },
    Transition {
        from: RequestStatus::Pending,
        event: RequestEvent::Cancel,
        outcome: Outcome::Delete,
        authority: Authority::Requester,
    },
    Transition {
        from: RequestStatus::Processing,
        event: RequestEvent::Release,
        outcome: Outcome::Move(RequestStatus::Pending),
        authority: Authority::Claimant,
    },
    Transition {
        from: RequestStatus::Processing,
        event: RequestEvent::Complete,
        outcome: Outcome::Move(RequestStatus::Completed),
        authority: Authority::Claimant,
    },
    Transition {
        from: RequestStatus::Processing,
        event: RequestEvent::Reject,
        outcome: Outcome::Move(RequestStatus::Rejected),
        authority: Authority::Claimant,
    },
];

impl Transition {
    pub fn lookup(from: RequestStatus, event: RequestEvent) -> Option<&'static Transition> {
        TRANSITIONS
            .iter()
            .find(|t| t.from == from && t.event == event)
    }

    /// Resolve and authorize `event` against the request's current state.
    pub fn check(request: &ActionRequest, event: RequestEvent, actor: &Actor) -> Result<&'static Transition> {
        let transition = Self::lookup(request.status, event).ok_or_else(|| {
            CertLedgerError::InvalidTransition(format!(
                "Cannot {} request {} while it is {}",
                event.as_str(),
                request.id,
                request.status.as_str()
            ))
        })?;

        match transition.authority {
            Authority::Admin => actor.require_admin()?,
            Authority::Claimant => {
                if request.taken_by.as_deref() != Some(actor.id.as_str()) {
                    return Err(CertLedgerError::Forbidden(format!(
                        "Request {} is claimed by {}, not {}",
                        request.id,
                        request.taken_by.as_deref().unwrap_or("nobody"),
                        actor.id
                    )));
                }
            }
            Authority::Requester => {
                if request.requested_by != actor.id {
                    return Err(CertLedgerError::Forbidden(format!(
                        "Only the requester may {} request {}",
                        event.as_str(),
                        request.id
                    )));
                }
            }
        }
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::ActionType;
    use chrono::Utc;

    fn request(status: RequestStatus, taken_by: Option<&str>) -> ActionRequest {
        ActionRequest {
            id: 1,
            cert_hash: "0xabc".to_string(),
            student_id: "S1".to_string(),
            action_type: ActionType::Revoke,
            reason: "typo in name".to_string(),
            status,
            requested_by: "staff-1".to_string(),
            requested_by_name: None,
            taken_by: taken_by.map(str::to_string),
            rejection_reason: None,
            requested_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_terminal_states_have_no_transitions() {
        for status in [RequestStatus::Completed, RequestStatus::Rejected] {
            for event in [
                RequestEvent::Take,
                RequestEvent::Release,
                RequestEvent::Complete,
                RequestEvent::Reject,
                RequestEvent::Cancel,
            ] {
                assert!(Transition::lookup(status, event).is_none());
            }
        }
    }

    #[test]
    fn test_take_requires_admin() {
        let pending = request(RequestStatus::Pending, None);
        assert!(matches!(
            Transition::check(&pending, RequestEvent::Take, &Actor::staff("staff-2")),
            Err(CertLedgerError::Forbidden(_))
        ));
        let t = Transition::check(&pending, RequestEvent::Take, &Actor::admin("admin-1")).unwrap();
        assert_eq!(t.outcome, Outcome::Move(RequestStatus::Processing));
    }

    #[test]
    fn test_claimant_only_actions() {
        let processing = request(RequestStatus::Processing, Some("admin-1"));
        for event in [RequestEvent::Release, RequestEvent::Complete, RequestEvent::Reject] {
            assert!(matches!(
                Transition::check(&processing, event, &Actor::admin("admin-2")),
                Err(CertLedgerError::Forbidden(_))
            ));
            assert!(Transition::check(&processing, event, &Actor::admin("admin-1")).is_ok());
        }
    }

    #[test]
    fn test_cancel_only_from_pending_by_requester() {
        let pending = request(RequestStatus::Pending, None);
        assert!(matches!(
            Transition::check(&pending, RequestEvent::Cancel, &Actor::staff("staff-2")),
            Err(CertLedgerError::Forbidden(_))
        ));
        assert_eq!(
            Transition::check(&pending, RequestEvent::Cancel, &Actor::staff("staff-1"))
                .unwrap()
                .outcome,
            Outcome::Delete
        );

        let processing = request(RequestStatus::Processing, Some("admin-1"));
        assert!(matches!(
            Transition::check(&processing, RequestEvent::Cancel, &Actor::staff("staff-1")),
            Err(CertLedgerError::InvalidTransition(_))
        ));
    }
}
