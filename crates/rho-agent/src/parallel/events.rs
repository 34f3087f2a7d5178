//! Orchestrator event stream

use rho_ai::Usage;
use serde::{Deserialize, Serialize};

use super::lane::{Lane, LaneStatus, Manifest};

/// Typed progress events for one orchestration run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OrchestratorEvent {
    ManifestCreated {
        manifest: Manifest,
    },
    LaneCreated {
        lane: Lane,
    },
    LaneStatusChanged {
        lane_id: String,
        from: LaneStatus,
        to: LaneStatus,
        failure_count: u32,
    },
    /// A lane reached its failure ceiling and needs attention
    Escalation {
        lane_id: String,
        failure_count: u32,
        reason: String,
    },
    OrchestrationComplete {
        summary: OrchestrationSummary,
    },
    OrchestrationError {
        message: String,
    },
}

impl OrchestratorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorEvent::ManifestCreated { .. } => "manifest_created",
            OrchestratorEvent::LaneCreated { .. } => "lane_created",
            OrchestratorEvent::LaneStatusChanged { .. } => "lane_status_changed",
            OrchestratorEvent::Escalation { .. } => "escalation",
            OrchestratorEvent::OrchestrationComplete { .. } => "orchestration_complete",
            OrchestratorEvent::OrchestrationError { .. } => "orchestration_error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorEvent::OrchestrationComplete { .. }
                | OrchestratorEvent::OrchestrationError { .. }
        )
    }
}

/// Rollup of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationSummary {
    pub manifest_id: String,
    pub total_lanes: usize,
    pub merged: usize,
    pub failed: usize,
    pub escalations: usize,
    pub duration_ms: u64,
    /// Estimated cost in USD from token usage and model prices
    pub cost: f64,
    pub usage: Usage,
    /// True iff no lane ended failed, retries notwithstanding
    pub success: bool,
    pub lanes: Vec<Lane>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = OrchestratorEvent::LaneStatusChanged {
            lane_id: "l1".into(),
            from: LaneStatus::Working,
            to: LaneStatus::PendingVerify,
            failure_count: 0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "lane_status_changed");
        assert_eq!(json["laneId"], "l1");
        assert_eq!(json["to"], "PENDING_VERIFY");
        assert_eq!(event.name(), "lane_status_changed");
        assert!(!event.is_terminal());
    }
}
