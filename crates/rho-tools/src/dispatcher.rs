//! Workspace-bound tool dispatcher

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::args::{ToolArgs, tool_schemas};
use crate::error::ToolError;
use crate::tools::{self, DEFAULT_FETCH_TIMEOUT, ToolContext};
use crate::workspace::Workspace;
use rho_agent::{ToolBackend, ToolResult};

/// Capabilities that depend on the host environment
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// SearXNG-compatible JSON search endpoint; `web_search` is unavailable without one
    pub web_search_endpoint: Option<String>,
    /// Shell command run by `read_lints`, with the optional path appended
    pub lint_command: Option<String>,
    pub fetch_timeout: Duration,
    /// Default for `run_command` when the call gives no timeout
    pub command_timeout: Duration,
    pub max_command_output: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            web_search_endpoint: None,
            lint_command: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            command_timeout: Duration::from_secs(120),
            max_command_output: 15_000,
        }
    }
}

/// Executes named tool calls against one workspace root
pub struct Dispatcher {
    workspace: Workspace,
    config: ToolsConfig,
    http: reqwest::Client,
}

impl Dispatcher {
    /// Bind to `root`. With `None` only the tools that need no workspace
    /// are offered.
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            workspace: Workspace::new(root),
            config: ToolsConfig::default(),
            http: reqwest::Client::builder()
                .user_agent(concat!("rho/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_config(mut self, config: ToolsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Validate, decode and run one call. Every failure comes back as a
    /// `ToolResult` with a stable code.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let args = match ToolArgs::parse(name, arguments) {
            Ok(args) => args,
            Err(e) => return e.into(),
        };
        if tools::needs_workspace(name) && !self.workspace.is_bound() {
            return ToolError::NoWorkspace.into();
        }
        if cancel.is_cancelled() {
            return ToolError::Cancelled.into();
        }

        let ctx = ToolContext {
            workspace: &self.workspace,
            config: &self.config,
            http: &self.http,
            cancel,
        };
        tools::run(&ctx, args).await.unwrap_or_else(ToolResult::from)
    }
}

#[async_trait]
impl ToolBackend for Dispatcher {
    fn is_enabled(&self) -> bool {
        true
    }

    fn schemas(&self) -> Vec<rho_ai::Tool> {
        let bound = self.workspace.is_bound();
        tool_schemas()
            .into_iter()
            .filter(|t| bound || !tools::needs_workspace(&t.name))
            .collect()
    }

    async fn execute(&self, name: &str, arguments: Value, cancel: CancellationToken) -> ToolResult {
        let start = Instant::now();
        let result = self.dispatch(name, arguments, &cancel).await;
        tracing::debug!(
            tool = name,
            success = result.success,
            code = result.code().unwrap_or(""),
            duration_ms = start.elapsed().as_millis() as u64,
            "Tool call finished"
        );
        result
    }
}
