//! Tool backend seam and tool results

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tools that never change the workspace and may run concurrently
pub const READ_ONLY_TOOLS: &[&str] = &[
    "read_file",
    "list_directory",
    "grep_search",
    "glob_search",
    "semantic_search",
];

/// Tools with side effects on the workspace or the host
pub const MUTATING_TOOLS: &[&str] = &[
    "edit_file",
    "create_file",
    "delete_file",
    "run_command",
    "memory_write",
    "generate_image",
];

/// Whether a tool is safe to run concurrently with others of its kind
pub fn is_read_only(name: &str) -> bool {
    READ_ONLY_TOOLS.contains(&name)
}

/// Whether a tool can modify state
pub fn is_mutating(name: &str) -> bool {
    MUTATING_TOOLS.contains(&name)
}

/// Result of a tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the call succeeded
    pub success: bool,
    /// Output text, possibly empty
    pub output: String,
    /// Set only when `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured details for callers and UIs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ToolResult {
    /// Create a successful text result
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            metadata: None,
        }
    }

    /// Create a failed result carrying a stable error code in `metadata.code`
    pub fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(message.into()),
            metadata: None,
        }
        .with_metadata("code", code)
    }

    /// Replace the output text
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    /// Attach one metadata entry
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    /// Stable error code, if any
    pub fn code(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("code")?.as_str()
    }

    /// Text sent back to the model in the tool-role message
    pub fn to_message_content(&self) -> String {
        match (&self.error, self.success) {
            (Some(error), false) if self.output.is_empty() => format!("Error: {error}"),
            (Some(error), false) => format!("Error: {error}\n{}", self.output),
            _ => self.output.clone(),
        }
    }
}

/// Executor for named tool calls
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Whether any tool can run at all (for example, a workspace is bound)
    fn is_enabled(&self) -> bool;

    /// Why tools are disabled, when they are
    fn disabled_reason(&self) -> Option<String> {
        None
    }

    /// Schemas of the tools offered to the model
    fn schemas(&self) -> Vec<rho_ai::Tool>;

    /// Execute one call. Never panics on bad input; failures are results.
    async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult;
}

/// Type alias for a shared backend
pub type BoxedBackend = Arc<dyn ToolBackend>;
