//! API request/response models
//!
//! TigerStyle: Wire shapes kept separate from registry types so clients can
//! deserialize them without the registry crate.

use courier_registry::{Assignment, DeadReason, InstanceStatus, Liveness};
use serde::{Deserialize, Serialize};

// =============================================================================
// Registry
// =============================================================================

/// Query parameters for instance registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterQuery {
    /// Address clients use to reach the instance
    pub address: Option<String>,
}

/// A user's assignment as returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResponse {
    pub service_id: String,
    pub address: String,
}

impl From<Assignment> for AssignmentResponse {
    fn from(assignment: Assignment) -> Self {
        Self {
            service_id: assignment.instance_id.into(),
            address: assignment.address.as_str().to_string(),
        }
    }
}

/// One registered instance with its liveness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub instance_id: String,
    pub address: Option<String>,
    /// "alive", "dead" or "unverified"
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_ms: Option<u64>,
    /// Why the instance is dead or could not be checked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<InstanceStatus> for InstanceSummary {
    fn from(status: InstanceStatus) -> Self {
        let (state, last_seen_ms, detail) = match status.liveness {
            Liveness::Alive { last_seen_ms } => ("alive", Some(last_seen_ms), None),
            Liveness::Dead(DeadReason::Missing) => ("dead", None, Some("heartbeat missing".into())),
            Liveness::Dead(DeadReason::Stale { age_ms }) => {
                ("dead", None, Some(format!("heartbeat {}ms old", age_ms)))
            }
            Liveness::Dead(DeadReason::Malformed { value }) => {
                ("dead", None, Some(format!("malformed heartbeat {:?}", value)))
            }
            Liveness::Unverified { error } => ("unverified", None, Some(error)),
        };
        Self {
            instance_id: status.instance_id.into(),
            address: status.address.map(|a| a.as_str().to_string()),
            state: state.to_string(),
            last_seen_ms,
            detail,
        }
    }
}

/// Response for the instance listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceListResponse {
    pub instances: Vec<InstanceSummary>,
    pub count: usize,
}

impl InstanceListResponse {
    pub fn new(instances: Vec<InstanceSummary>) -> Self {
        let count = instances.len();
        Self { instances, count }
    }
}

// =============================================================================
// Health / Errors
// =============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("bad_request", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}
