//! UI-facing view of one tool call

use chrono::{DateTime, Utc};
use rho_ai::ToolCallRequest;
use serde::{Deserialize, Serialize};

use crate::tool::ToolResult;

/// Lifecycle of a tool call as shown to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl ToolCallStatus {
    fn rank(self) -> u8 {
        match self {
            ToolCallStatus::Queued => 0,
            ToolCallStatus::Running => 1,
            ToolCallStatus::Done | ToolCallStatus::Error => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

/// A tool call plus its execution state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBlock {
    pub id: String,
    pub tool: String,
    pub args: serde_json::Value,
    pub status: ToolCallStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<ToolResult>,
}

impl ToolCallBlock {
    pub fn queued(call: &ToolCallRequest) -> Self {
        Self {
            id: call.id.clone(),
            tool: call.name.clone(),
            args: call.arguments.clone(),
            status: ToolCallStatus::Queued,
            started_at: None,
            finished_at: None,
            result: None,
        }
    }

    /// Move forward in the lifecycle. Returns false and leaves the block
    /// untouched if `next` would not move it forward.
    pub fn advance(&mut self, next: ToolCallStatus) -> bool {
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            return false;
        }
        let now = Utc::now();
        if next == ToolCallStatus::Running || self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        true
    }

    /// Record the result and move to `done` or `error`
    pub fn finish(&mut self, result: ToolResult) -> bool {
        let next = if result.success {
            ToolCallStatus::Done
        } else {
            ToolCallStatus::Error
        };
        let moved = self.advance(next);
        if moved {
            self.result = Some(result);
        }
        moved
    }
}
