//! Action request governance workflow
//!
//! Off-ledger approval gate in front of revoke/reactivate. A staff member files
//! a request, an admin claims it, executes the ledger transaction and completes it.

pub mod transitions;
pub mod workflow;

pub use crate::database::models::{ActionRequest, ActionType, RequestStatus};
pub use transitions::{Authority, Outcome, RequestEvent, Transition};
pub use workflow::{ActionRequestWorkflow, NewActionRequest, RequestFilter};
