//! Durable approval-suspension store.
//!
//! An `approve`-gated tool call suspends the *run* (status `waiting`, an
//! `approval_required` step recorded) and the resolution arrives later,
//! out of process — possibly hours later — so blocking the calling task on
//! a channel until a decision lands is not an option. This store instead
//! holds pending-approval metadata keyed by id; `resolve()` records the
//! decision and the caller re-drives the waiting run afterward.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The human (or automated approver)'s resolution of a pending approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: Option<String> },
}

/// A tool call suspended on an external approval decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: Uuid,
    pub run_id: Uuid,
    pub tenant_id: String,
    pub agent_id: String,
    pub tool_name: String,
    pub command_name: String,
    pub args: Value,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval not found")]
    NotFound,
    #[error("approval already resolved")]
    AlreadyResolved,
}

struct Inner {
    pending: HashMap<Uuid, PendingApproval>,
    resolved: HashMap<Uuid, ApprovalDecision>,
}

/// Durable store of approvals awaiting an external decision.
pub struct ApprovalStore {
    inner: RwLock<Inner>,
    timeout: chrono::Duration,
}

impl ApprovalStore {
    pub fn new(timeout: chrono::Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                pending: HashMap::new(),
                resolved: HashMap::new(),
            }),
            timeout,
        }
    }

    pub fn timeout(&self) -> chrono::Duration {
        self.timeout
    }

    /// Record a new suspended call, returning its approval id.
    pub fn insert(
        &self,
        run_id: Uuid,
        tenant_id: impl Into<String>,
        agent_id: impl Into<String>,
        tool_name: impl Into<String>,
        command_name: impl Into<String>,
        args: Value,
    ) -> PendingApproval {
        let approval = PendingApproval {
            id: Uuid::new_v4(),
            run_id,
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            tool_name: tool_name.into(),
            command_name: command_name.into(),
            args,
            requested_at: Utc::now(),
        };
        self.inner
            .write()
            .pending
            .insert(approval.id, approval.clone());
        approval
    }

    /// Resolve a pending approval. The caller is responsible for re-driving
    /// the suspended run afterward; this store only records the decision.
    pub fn resolve(
        &self,
        id: Uuid,
        decision: ApprovalDecision,
    ) -> Result<PendingApproval, ApprovalError> {
        let mut inner = self.inner.write();
        let approval = inner.pending.remove(&id).ok_or(ApprovalError::NotFound)?;
        inner.resolved.insert(id, decision);
        Ok(approval)
    }

    pub fn decision(&self, id: Uuid) -> Option<ApprovalDecision> {
        self.inner.read().resolved.get(&id).cloned()
    }

    pub fn get(&self, id: Uuid) -> Option<PendingApproval> {
        self.inner.read().pending.get(&id).cloned()
    }

    pub fn list_pending(&self) -> Vec<PendingApproval> {
        let mut list: Vec<_> = self.inner.read().pending.values().cloned().collect();
        list.sort_by_key(|a| a.requested_at);
        list
    }

    /// Deny and drop every pending approval older than `timeout`, returning
    /// the ones expired.
    pub fn remove_expired(&self) -> Vec<PendingApproval> {
        let now = Utc::now();
        let timeout = self.timeout;
        let mut inner = self.inner.write();
        let expired_ids: Vec<Uuid> = inner
            .pending
            .iter()
            .filter(|(_, a)| now - a.requested_at > timeout)
            .map(|(id, _)| *id)
            .collect();
        let mut expired = Vec::new();
        for id in expired_ids {
            if let Some(approval) = inner.pending.remove(&id) {
                inner.resolved.insert(
                    id,
                    ApprovalDecision::Denied {
                        reason: Some("approval timed out".into()),
                    },
                );
                expired.push(approval);
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ApprovalStore {
        ApprovalStore::new(chrono::Duration::minutes(5))
    }

    #[test]
    fn insert_then_get_round_trips() {
        let store = store();
        let approval = store.insert(
            Uuid::new_v4(),
            "tenant-1",
            "agent-1",
            "weather",
            "get",
            serde_json::json!({"city": "Porto"}),
        );
        assert_eq!(store.get(approval.id).unwrap().tool_name, "weather");
    }

    #[test]
    fn resolve_removes_from_pending_and_records_decision() {
        let store = store();
        let approval = store.insert(
            Uuid::new_v4(),
            "tenant-1",
            "agent-1",
            "weather",
            "get",
            serde_json::json!({}),
        );
        store
            .resolve(approval.id, ApprovalDecision::Approved)
            .unwrap();
        assert!(store.get(approval.id).is_none());
        assert_eq!(store.decision(approval.id), Some(ApprovalDecision::Approved));
    }

    #[test]
    fn resolve_unknown_id_errors() {
        let store = store();
        let err = store
            .resolve(Uuid::new_v4(), ApprovalDecision::Approved)
            .unwrap_err();
        assert_eq!(err, ApprovalError::NotFound);
    }

    #[test]
    fn list_pending_is_ordered_by_request_time() {
        let store = store();
        let first = store.insert(Uuid::new_v4(), "t", "a", "weather", "get", serde_json::json!({}));
        let second = store.insert(Uuid::new_v4(), "t", "a", "web", "search", serde_json::json!({}));
        let listed = store.list_pending();
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
    }

    #[test]
    fn remove_expired_denies_stale_approvals() {
        let store = ApprovalStore::new(chrono::Duration::zero());
        let approval = store.insert(Uuid::new_v4(), "t", "a", "weather", "get", serde_json::json!({}));
        let expired = store.remove_expired();
        assert_eq!(expired.len(), 1);
        assert!(store.get(approval.id).is_none());
        assert!(matches!(
            store.decision(approval.id),
            Some(ApprovalDecision::Denied { .. })
        ));
    }
}
