//! Agent event types

use rho_ai::ErrorClass;
use serde::{Deserialize, Serialize};

use crate::agent::RunStatus;
use crate::block::ToolCallBlock;

/// Events emitted to the UI sink during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A run started streaming an assistant message
    Start,

    /// A batch of assistant text
    Token { content: String },

    /// A tool call is about to execute
    ToolCall {
        id: String,
        tool: String,
        args: serde_json::Value,
    },

    /// A tool call block changed state
    ToolStatus { block: ToolCallBlock },

    /// The final assistant message
    Done {
        content: String,
        #[serde(rename = "toolCalls")]
        tool_calls: Vec<ToolCallBlock>,
        status: RunStatus,
    },

    /// An unrecoverable error; always followed by `Done`
    Error {
        message: String,
        class: ErrorClass,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
}

impl AgentEvent {
    /// Event name used for SSE framing
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::Start => "start",
            AgentEvent::Token { .. } => "token",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::ToolStatus { .. } => "tool_status",
            AgentEvent::Done { .. } => "done",
            AgentEvent::Error { .. } => "error",
        }
    }

    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done { .. })
    }
}
