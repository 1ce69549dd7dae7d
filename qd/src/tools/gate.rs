//! Permission gate and user-approval rendezvous
//!
//! Every tool call passes the gate before it reaches a handler. Tools on
//! the approval list publish a pending request and block until a side
//! channel answers or the wait times out; timeout counts as denial.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use contextdoc::Mode;
use uuid::Uuid;

/// Outcome of a gate check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Denied(String),
    NeedsApproval(String),
}

/// One-shot rendezvous between a blocked tool call and a user response
#[derive(Default)]
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a pending request and return its receiver half
    fn publish(&self, request_id: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id.to_string(), tx);
        rx
    }

    /// Request IDs currently awaiting a response
    pub fn pending_requests(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Fulfill a pending request; returns false if the id is unknown
    pub fn respond(&self, request_id: &str, approved: bool) -> bool {
        match self.pending.lock().unwrap().remove(request_id) {
            Some(tx) => tx.send(approved).is_ok(),
            None => false,
        }
    }

    /// Block on a published request until answered or timed out
    ///
    /// Timeout and a dropped channel both count as denial.
    pub async fn await_approval(&self, request_id: &str, timeout: Duration) -> bool {
        let rx = self.publish(request_id);
        debug!(%request_id, ?timeout, "ApprovalBroker::await_approval: waiting");

        let approved = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(approved)) => approved,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(%request_id, "ApprovalBroker::await_approval: timed out, treating as denied");
                self.pending.lock().unwrap().remove(request_id);
                false
            }
        };
        info!(%request_id, approved, "ApprovalBroker::await_approval: resolved");
        approved
    }
}

/// Per-call permission check
///
/// Deny-listed tools are refused outright; approval-listed tools go
/// through the broker rendezvous. List entries are exact names or
/// namespace globs (`purchase.*`).
#[derive(Clone)]
pub struct PermissionGate {
    deny: Vec<String>,
    require_approval: Vec<String>,
}

impl PermissionGate {
    pub fn new(deny: Vec<String>, require_approval: Vec<String>) -> Self {
        Self { deny, require_approval }
    }

    /// Open gate: everything allowed
    pub fn permissive() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn check(&self, tool: &str, _args: &Value, _mode: Mode, session_id: &str) -> GateDecision {
        if self.deny.iter().any(|p| pattern_matches(p, tool)) {
            return GateDecision::Denied(format!("Tool '{}' is denied by policy", tool));
        }
        if self.require_approval.iter().any(|p| pattern_matches(p, tool)) {
            let request_id = format!("approval-{}-{}", session_id, Uuid::now_v7());
            return GateDecision::NeedsApproval(request_id);
        }
        GateDecision::Allowed
    }
}

fn pattern_matches(pattern: &str, tool: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix(".*") {
        tool.split('.').next() == Some(prefix)
    } else {
        pattern == tool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_allowed_by_default() {
        let gate = PermissionGate::permissive();
        assert_eq!(
            gate.check("internet.research", &json!({}), Mode::Chat, "s1"),
            GateDecision::Allowed
        );
    }

    #[test]
    fn test_deny_list_exact_and_glob() {
        let gate = PermissionGate::new(vec!["git.push".to_string(), "purchase.*".to_string()], vec![]);

        assert!(matches!(
            gate.check("git.push", &json!({}), Mode::Code, "s1"),
            GateDecision::Denied(_)
        ));
        assert!(matches!(
            gate.check("purchase.checkout", &json!({}), Mode::Chat, "s1"),
            GateDecision::Denied(_)
        ));
        assert_eq!(gate.check("git.commit", &json!({}), Mode::Code, "s1"), GateDecision::Allowed);
    }

    #[test]
    fn test_approval_list_yields_request_id() {
        let gate = PermissionGate::new(vec![], vec!["file.write".to_string()]);
        match gate.check("file.write", &json!({}), Mode::Chat, "sess-9") {
            GateDecision::NeedsApproval(id) => assert!(id.starts_with("approval-sess-9-")),
            other => panic!("expected NeedsApproval, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broker_approval_round_trip() {
        let broker = std::sync::Arc::new(ApprovalBroker::new());

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.await_approval("req-1", Duration::from_secs(5)).await })
        };

        // Wait until the request is published
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.pending_requests(), vec!["req-1".to_string()]);
        assert!(broker.respond("req-1", true));

        assert!(waiter.await.unwrap());
        assert!(broker.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn test_broker_denial() {
        let broker = std::sync::Arc::new(ApprovalBroker::new());
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.await_approval("req-2", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.respond("req-2", false);
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_broker_timeout_is_denial() {
        let broker = ApprovalBroker::new();
        let approved = broker.await_approval("req-3", Duration::from_millis(30)).await;
        assert!(!approved);
        assert!(broker.pending_requests().is_empty());
    }

    #[test]
    fn test_unknown_request_id_respond() {
        let broker = ApprovalBroker::new();
        assert!(!broker.respond("missing", true));
    }
}
