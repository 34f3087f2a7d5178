//! Lanes, manifests and the lane state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Status of one lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaneStatus {
    Queued,
    Working,
    PendingVerify,
    Verified,
    Merged,
    Rejected,
    Failed,
    MergeConflict,
}

impl LaneStatus {
    /// Whether `self -> next` is an allowed transition. `Rejected` and
    /// `Failed` may go back to `Working` when a retry is attempted.
    pub fn can_transition_to(self, next: LaneStatus) -> bool {
        use LaneStatus::*;
        matches!(
            (self, next),
            (Queued, Working)
                | (Queued, Failed)
                | (Working, PendingVerify)
                | (Working, Failed)
                | (PendingVerify, Verified)
                | (PendingVerify, Rejected)
                | (Verified, Merged)
                | (Verified, MergeConflict)
                | (Rejected, Working)
                | (Failed, Working)
        )
    }

    /// Counted as failed in the run summary when a lane ends here
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            LaneStatus::Failed | LaneStatus::Rejected | LaneStatus::MergeConflict
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LaneStatus::Queued => "QUEUED",
            LaneStatus::Working => "WORKING",
            LaneStatus::PendingVerify => "PENDING_VERIFY",
            LaneStatus::Verified => "VERIFIED",
            LaneStatus::Merged => "MERGED",
            LaneStatus::Rejected => "REJECTED",
            LaneStatus::Failed => "FAILED",
            LaneStatus::MergeConflict => "MERGE_CONFLICT",
        }
    }
}

impl std::fmt::Display for LaneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One subtask of a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestNode {
    pub id: String,
    pub description: String,
    /// Workspace-relative paths or directories the lane may modify.
    /// Empty means unrestricted.
    #[serde(default)]
    pub file_scope: Vec<String>,
}

impl ManifestNode {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            file_scope: vec![],
        }
    }

    pub fn with_scope(mut self, scope: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.file_scope = scope.into_iter().map(Into::into).collect();
        self
    }
}

/// The decomposition of one goal, read-only once created
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub id: String,
    pub goal: String,
    pub nodes: Vec<ManifestNode>,
    pub created_at: DateTime<Utc>,
}

impl Manifest {
    pub fn new(goal: impl Into<String>, nodes: Vec<ManifestNode>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal: goal.into(),
            nodes,
            created_at: Utc::now(),
        }
    }
}

/// One independently worked and verified subtask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lane {
    pub id: String,
    pub manifest_id: String,
    pub subtask_id: String,
    pub status: LaneStatus,
    pub worker_model_id: String,
    pub verifier_model_id: String,
    pub files_touched: Vec<String>,
    pub failure_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lane {
    pub fn new(
        manifest: &Manifest,
        node: &ManifestNode,
        worker_model_id: impl Into<String>,
        verifier_model_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            manifest_id: manifest.id.clone(),
            subtask_id: node.id.clone(),
            status: LaneStatus::Queued,
            worker_model_id: worker_model_id.into(),
            verifier_model_id: verifier_model_id.into(),
            files_touched: vec![],
            failure_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, returning the previous status
    pub fn transition(&mut self, next: LaneStatus) -> Result<LaneStatus> {
        if !self.status.can_transition_to(next) {
            return Err(Error::Orchestration(format!(
                "lane {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        let from = self.status;
        self.status = next;
        self.updated_at = Utc::now();
        Ok(from)
    }

    /// Mark the lane failed from any status, for lanes whose task died.
    /// Returns the previous status.
    pub fn force_failed(&mut self) -> LaneStatus {
        let from = self.status;
        self.status = LaneStatus::Failed;
        self.updated_at = Utc::now();
        from
    }

    /// Add files to the touched set, keeping it sorted and unique
    pub fn record_files(&mut self, files: impl IntoIterator<Item = String>) {
        self.files_touched.extend(files);
        self.files_touched.sort();
        self.files_touched.dedup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lane() -> Lane {
        let manifest = Manifest::new("goal", vec![ManifestNode::new("n1", "do it")]);
        Lane::new(&manifest, &manifest.nodes[0], "worker", "verifier")
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut lane = lane();
        for next in [
            LaneStatus::Working,
            LaneStatus::PendingVerify,
            LaneStatus::Verified,
            LaneStatus::Merged,
        ] {
            lane.transition(next).unwrap();
        }
        assert_eq!(lane.status, LaneStatus::Merged);
    }

    #[test]
    fn test_terminal_states_do_not_move() {
        let mut lane = lane();
        lane.status = LaneStatus::Merged;
        assert!(lane.transition(LaneStatus::Working).is_err());
        lane.status = LaneStatus::MergeConflict;
        assert!(lane.transition(LaneStatus::Merged).is_err());
    }

    #[test]
    fn test_retry_from_rejected_and_failed() {
        assert!(LaneStatus::Rejected.can_transition_to(LaneStatus::Working));
        assert!(LaneStatus::Failed.can_transition_to(LaneStatus::Working));
        assert!(!LaneStatus::Queued.can_transition_to(LaneStatus::Verified));
        assert!(!LaneStatus::Working.can_transition_to(LaneStatus::Merged));
    }

    #[test]
    fn test_force_failed_skips_transition_table() {
        let mut lane = lane();
        lane.transition(LaneStatus::Working).unwrap();
        lane.transition(LaneStatus::PendingVerify).unwrap();
        assert!(!LaneStatus::PendingVerify.can_transition_to(LaneStatus::Failed));

        assert_eq!(lane.force_failed(), LaneStatus::PendingVerify);
        assert_eq!(lane.status, LaneStatus::Failed);
    }

    #[test]
    fn test_failure_rollup() {
        assert!(LaneStatus::Rejected.is_failure());
        assert!(LaneStatus::MergeConflict.is_failure());
        assert!(!LaneStatus::Merged.is_failure());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_value(LaneStatus::PendingVerify).unwrap();
        assert_eq!(json, "PENDING_VERIFY");
        let lane = serde_json::to_value(lane()).unwrap();
        assert!(lane.get("filesTouched").is_some());
        assert_eq!(lane["status"], "QUEUED");
    }

    #[test]
    fn test_record_files_dedups() {
        let mut lane = lane();
        lane.record_files(["b.rs".to_string(), "a.rs".to_string()]);
        lane.record_files(["a.rs".to_string()]);
        assert_eq!(lane.files_touched, vec!["a.rs", "b.rs"]);
    }
}
