//! Node identity and health gate.
//!
//! The node's coarse lifecycle state is owned by whoever drives the process
//! lifecycle; this module only stores it atomically and turns it into a
//! serve/refuse decision for every entry point.

use std::sync::atomic::{AtomicU8, Ordering};

use akidb_core::{ErrorCode, NodeId, Status};
use serde::{Deserialize, Serialize};

/// Coarse lifecycle state of a query node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateCode {
    Healthy,
    Abnormal,
    Stopping,
}

impl StateCode {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Abnormal => 1,
            Self::Stopping => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Healthy,
            2 => Self::Stopping,
            _ => Self::Abnormal,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "Healthy",
            Self::Abnormal => "Abnormal",
            Self::Stopping => "Stopping",
        }
    }
}

/// Identity + health gate consulted before any request touches shared state.
#[derive(Debug)]
pub struct NodeGate {
    node_id: NodeId,
    state: AtomicU8,
}

impl NodeGate {
    /// Creates a gate for `node_id`, starting in `Abnormal` until the
    /// lifecycle owner marks the node healthy.
    #[must_use]
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: AtomicU8::new(StateCode::Abnormal.to_u8()),
        }
    }

    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    #[must_use]
    pub fn state_code(&self) -> StateCode {
        StateCode::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn update_state_code(&self, code: StateCode) {
        let previous = StateCode::from_u8(self.state.swap(code.to_u8(), Ordering::AcqRel));
        if previous != code {
            tracing::info!(
                node_id = %self.node_id,
                from = previous.as_str(),
                to = code.as_str(),
                "query node state changed"
            );
        }
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state_code() == StateCode::Healthy
    }

    /// Validates the request's target identity, then the node's health.
    ///
    /// Returns `None` when the request may proceed, otherwise the status to
    /// reply with. An absent target means the request is not node-addressed.
    #[must_use]
    pub fn check(&self, target: Option<NodeId>) -> Option<Status> {
        if let Some(target) = target {
            if target != self.node_id {
                return Some(Status::new(
                    ErrorCode::NodeIdNotMatch,
                    format!(
                        "target node id not match, target {}, node {}",
                        target, self.node_id
                    ),
                ));
            }
        }

        let code = self.state_code();
        if code != StateCode::Healthy {
            return Some(Status::new(
                ErrorCode::NotReadyServe,
                format!("query node {} is not ready, state {}", self.node_id, code.as_str()),
            ));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_abnormal() {
        let gate = NodeGate::new(NodeId::new(1));
        assert_eq!(gate.state_code(), StateCode::Abnormal);
        assert!(!gate.is_healthy());
    }

    #[test]
    fn test_healthy_serves() {
        let gate = NodeGate::new(NodeId::new(1));
        gate.update_state_code(StateCode::Healthy);
        assert!(gate.check(Some(NodeId::new(1))).is_none());
        assert!(gate.check(None).is_none());
    }

    #[test]
    fn test_refuses_when_not_healthy() {
        let gate = NodeGate::new(NodeId::new(1));
        for code in [StateCode::Abnormal, StateCode::Stopping] {
            gate.update_state_code(code);
            let status = gate.check(Some(NodeId::new(1))).unwrap();
            assert_eq!(status.error_code, ErrorCode::NotReadyServe);
        }
    }

    #[test]
    fn test_identity_checked_regardless_of_health() {
        let gate = NodeGate::new(NodeId::new(1));
        for code in [StateCode::Healthy, StateCode::Abnormal, StateCode::Stopping] {
            gate.update_state_code(code);
            let status = gate.check(Some(NodeId::INVALID)).unwrap();
            assert_eq!(status.error_code, ErrorCode::NodeIdNotMatch);
        }
    }
}
