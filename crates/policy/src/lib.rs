//! Policy Engine: allow/deny/approve decisions over tool calls, plus the
//! durable store backing suspended `approve`-gated calls.

mod approval;
mod engine;

pub use approval::{ApprovalDecision, ApprovalError, ApprovalStore, PendingApproval};
pub use engine::{decide, PolicyRequest};
