//! Tool implementations
//!
//! Each tool is an async fn taking the call context and its decoded
//! arguments. Tools return `Err(ToolError)` for failures; the dispatcher
//! turns those into failed `ToolResult`s.

mod edit;
mod list;
mod memory;
mod process;
mod read;
mod search;
mod web;

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::args::{GenerateImageArgs, ToolArgs};
use crate::dispatcher::ToolsConfig;
use crate::error::{Result, ToolError};
use crate::workspace::Workspace;
use rho_agent::ToolResult;

pub use read::PROBE_EXTENSIONS;

/// Everything a tool may touch during one call
pub struct ToolContext<'a> {
    pub workspace: &'a Workspace,
    pub config: &'a ToolsConfig,
    pub http: &'a reqwest::Client,
    pub cancel: &'a CancellationToken,
}

/// Run one decoded call
pub(crate) async fn run(ctx: &ToolContext<'_>, args: ToolArgs) -> Result<ToolResult> {
    match args {
        ToolArgs::ReadFile(a) => read::read_file(ctx, a).await,
        ToolArgs::EditFile(a) => edit::edit_file(ctx, a).await,
        ToolArgs::CreateFile(a) => edit::create_file(ctx, a).await,
        ToolArgs::DeleteFile(a) => edit::delete_file(ctx, a).await,
        ToolArgs::ListDirectory(a) => list::list_directory(ctx, a).await,
        ToolArgs::GrepSearch(a) => search::grep_search(ctx, a).await,
        ToolArgs::GlobSearch(a) => search::glob_search(ctx, a).await,
        ToolArgs::SemanticSearch(a) => search::semantic_search(ctx, a).await,
        ToolArgs::RunCommand(a) => process::run_command(ctx, a).await,
        ToolArgs::ReadLints(a) => process::read_lints(ctx, a).await,
        ToolArgs::GitStatus(_) => process::git_status(ctx).await,
        ToolArgs::GitDiff(a) => process::git_diff(ctx, a).await,
        ToolArgs::GitLog(a) => process::git_log(ctx, a).await,
        ToolArgs::WebSearch(a) => web::web_search(ctx, a).await,
        ToolArgs::WebFetch(a) => web::web_fetch(ctx, a).await,
        ToolArgs::MemoryRead(_) => memory::memory_read(ctx).await,
        ToolArgs::MemoryWrite(a) => memory::memory_write(ctx, a).await,
        ToolArgs::GenerateImage(a) => generate_image(a),
    }
}

fn generate_image(args: GenerateImageArgs) -> Result<ToolResult> {
    tracing::debug!(prompt = %args.prompt, "Image generation requested");
    Err(ToolError::Unavailable(
        "Image generation is not available in this environment".into(),
    ))
}

/// Whether the tool works without a bound workspace
pub(crate) fn needs_workspace(name: &str) -> bool {
    !matches!(name, "web_search" | "web_fetch" | "generate_image")
}

pub(crate) const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
