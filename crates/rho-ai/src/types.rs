//! Core types for model interactions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cost information for a model (per million tokens)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostInfo {
    pub input: f64,
    pub output: f64,
}

/// Model definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier sent on the wire
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Base URL for API calls (without the `/chat/completions` suffix)
    pub base_url: String,
    /// Context window size in tokens
    pub context_window: u32,
    /// Maximum output tokens
    pub max_tokens: u32,
    /// Cost per million tokens
    #[serde(default)]
    pub cost: CostInfo,
    /// Additional headers for API calls
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Model {
    /// Build a model entry for an OpenAI-compatible endpoint
    pub fn openai_compatible(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            base_url: base_url.into(),
            context_window: 128_000,
            max_tokens: 8192,
            cost: CostInfo::default(),
            headers: HashMap::new(),
        }
    }

    /// Set per-million token prices
    pub fn with_cost(mut self, input: f64, output: f64) -> Self {
        self.cost = CostInfo { input, output };
        self
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
}

impl Usage {
    /// Add another usage record into this one
    pub fn add(&mut self, other: &Usage) {
        self.input += other.input;
        self.output += other.output;
    }

    /// Calculate cost for this usage given a model
    pub fn calculate_cost(&self, model: &Model) -> CostBreakdown {
        let input = (self.input as f64 / 1_000_000.0) * model.cost.input;
        let output = (self.output as f64 / 1_000_000.0) * model.cost.output;

        CostBreakdown {
            input,
            output,
            total: input + output,
        }
    }
}

/// Cost breakdown in dollars
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input: f64,
    pub output: f64,
    pub total: f64,
}

/// Reason why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response
    Stop,
    /// Maximum tokens reached
    Length,
    /// Tool use requested
    ToolUse,
}

impl StopReason {
    /// Map a chat-completions `finish_reason` string
    pub fn from_finish_reason(reason: &str) -> Option<Self> {
        match reason {
            "stop" | "end_turn" => Some(StopReason::Stop),
            "length" => Some(StopReason::Length),
            "tool_calls" | "function_call" => Some(StopReason::ToolUse),
            _ => None,
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique within a turn; correlates the tool-role reply
    pub id: String,
    /// Registered tool name
    pub name: String,
    /// Parsed arguments, or `{"raw": "<text>"}` when the model sent invalid JSON
    pub arguments: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Arguments as the JSON text sent back to the model
    pub fn arguments_json(&self) -> String {
        serde_json::to_string(&self.arguments).unwrap_or_default()
    }
}

/// Metadata for assistant messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMetadata {
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Usage,
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub timestamp: i64,
}

/// One entry of a conversation, tagged by role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// System instructions
    System { content: String },
    /// User message
    User {
        content: String,
        #[serde(default)]
        timestamp: i64,
    },
    /// Assistant response, possibly carrying tool calls
    Assistant {
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
        #[serde(flatten)]
        metadata: AssistantMetadata,
    },
    /// Result of one tool call
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        timestamp: i64,
    },
}

impl Message {
    /// Create a system message
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            content: text.into(),
        }
    }

    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: text.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self::Assistant {
            content,
            tool_calls,
            metadata: AssistantMetadata {
                timestamp: chrono::Utc::now().timestamp_millis(),
                ..Default::default()
            },
        }
    }

    /// Create an assistant message with plain text
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::assistant(Some(text.into()), vec![])
    }

    /// Create a tool result message
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Get the role as a string
    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }

    /// Text content, empty when the message has none
    pub fn text(&self) -> &str {
        match self {
            Self::System { content } => content,
            Self::User { content, .. } => content,
            Self::Assistant { content, .. } => content.as_deref().unwrap_or(""),
            Self::Tool { content, .. } => content,
        }
    }

    /// Tool calls carried by an assistant message
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Whether this is an assistant message that requested tools
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    /// Character size used for history budgeting
    pub fn char_count(&self) -> usize {
        let calls: usize = self
            .tool_calls()
            .iter()
            .map(|c| c.name.chars().count() + c.arguments_json().chars().count())
            .sum();
        self.text().chars().count() + calls
    }
}

/// Tool definition for function calling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name (used in API calls)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: serde_json::Value,
}

impl Tool {
    /// Create a new tool definition
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Context for one model request
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// System prompt
    pub system_prompt: Option<String>,
    /// Conversation messages
    pub messages: Vec<Message>,
    /// Available tools
    pub tools: Vec<Tool>,
}

impl Context {
    /// Create a new context with a system prompt
    pub fn with_system(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            messages: vec![],
            tools: vec![],
        }
    }

    /// Add a message to the context
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_tagging() {
        let msg = Message::tool_result("call_1", "read_file", "ok", false);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
    }

    #[test]
    fn test_assistant_without_content_roundtrips() {
        let msg = Message::assistant(
            None,
            vec![ToolCallRequest::new("c1", "list_directory", serde_json::json!({}))],
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.text(), "");
        assert!(back.has_tool_calls());
    }

    #[test]
    fn test_char_count_includes_tool_calls() {
        let msg = Message::assistant(
            Some("abc".into()),
            vec![ToolCallRequest::new("c1", "ls", serde_json::json!({}))],
        );
        // "abc" + "ls" + "{}"
        assert_eq!(msg.char_count(), 7);
    }

    #[test]
    fn test_usage_cost() {
        let model = Model::openai_compatible("m", "http://localhost").with_cost(2.0, 8.0);
        let usage = Usage {
            input: 500_000,
            output: 250_000,
        };
        let cost = usage.calculate_cost(&model);
        assert!((cost.total - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(StopReason::from_finish_reason("stop"), Some(StopReason::Stop));
        assert_eq!(
            StopReason::from_finish_reason("tool_calls"),
            Some(StopReason::ToolUse)
        );
        assert_eq!(StopReason::from_finish_reason("weird"), None);
    }
}
