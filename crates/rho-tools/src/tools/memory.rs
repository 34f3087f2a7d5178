//! memory_read and memory_write
//!
//! Notes persist across sessions in `<workspace>/.rho/memory.md`, one bullet per entry.

use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::ToolContext;
use crate::args::MemoryWriteArgs;
use crate::error::{Result, ToolError};
use rho_agent::ToolResult;

const MEMORY_DIR: &str = ".rho";
const MEMORY_FILE: &str = "memory.md";

fn memory_path(ctx: &ToolContext<'_>) -> Result<PathBuf> {
    Ok(ctx.workspace.root()?.join(MEMORY_DIR).join(MEMORY_FILE))
}

pub async fn memory_read(ctx: &ToolContext<'_>) -> Result<ToolResult> {
    let path = memory_path(ctx)?;
    let content = match fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(ToolError::Io(e)),
    };
    if content.trim().is_empty() {
        return Ok(ToolResult::ok("(no memories saved)").with_metadata("entries", 0));
    }
    let entries = content.lines().filter(|l| l.starts_with("- ")).count();
    Ok(ToolResult::ok(content.trim_end()).with_metadata("entries", entries))
}

pub async fn memory_write(ctx: &ToolContext<'_>, args: MemoryWriteArgs) -> Result<ToolResult> {
    let path = memory_path(ctx)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    // Entries are single bullets; fold newlines so one write stays one entry.
    let entry = args.content.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(format!("- {entry}\n").as_bytes()).await?;
    file.flush().await?;

    Ok(ToolResult::ok(format!("Saved to memory: {entry}")))
}
