//! read_file

use std::path::PathBuf;
use tokio::fs;

use super::ToolContext;
use crate::args::ReadFileArgs;
use crate::error::{Result, ToolError};
use rho_agent::ToolResult;

const MAX_LINES: usize = 2000;
const MAX_LINE_CHARS: usize = 2000;

/// Tried in order when an extensionless path does not exist
pub const PROBE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "py", "rs", "go", "java", "md", "json"];

pub async fn read_file(ctx: &ToolContext<'_>, args: ReadFileArgs) -> Result<ToolResult> {
    let requested = ctx.workspace.resolve(&args.path)?;
    let path = probe(requested).await.ok_or_else(|| ToolError::NotFound(args.path.clone()))?;
    let resolved = ctx.workspace.relative(&path);

    if ctx.cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }
    if fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(ToolError::InvalidArguments(format!(
            "{resolved} is a directory; use list_directory"
        )));
    }
    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| ToolError::io(&resolved, e))?;

    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    let offset = args.offset.unwrap_or(1).saturating_sub(1);
    let limit = args.limit.unwrap_or(MAX_LINES);

    if total > 0 && offset >= total {
        return Err(ToolError::InvalidArguments(format!(
            "offset {} is beyond the end of {resolved} ({total} lines)",
            offset + 1
        )));
    }

    let end = (offset + limit).min(total);
    let mut clipped = false;
    let mut output = lines[offset.min(total)..end]
        .iter()
        .map(|line| {
            if line.chars().count() > MAX_LINE_CHARS {
                clipped = true;
                line.chars().take(MAX_LINE_CHARS).collect()
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<String>>()
        .join("\n");

    let mut notices = vec![];
    if clipped {
        notices.push(format!("long lines were clipped to {MAX_LINE_CHARS} characters"));
    }
    if end < total {
        notices.push(format!(
            "{} more lines, continue with offset={}",
            total - end,
            end + 1
        ));
    }
    if !notices.is_empty() {
        output.push_str(&format!("\n\n... ({})", notices.join("; ")));
    }

    Ok(ToolResult::ok(output)
        .with_metadata("resolvedPath", resolved)
        .with_metadata("totalLines", total))
}

/// The path itself if it exists, else the first extension that does
async fn probe(path: PathBuf) -> Option<PathBuf> {
    if fs::try_exists(&path).await.unwrap_or(false) {
        return Some(path);
    }
    if path.extension().is_some() {
        return None;
    }
    for ext in PROBE_EXTENSIONS {
        let candidate = path.with_extension(ext);
        if fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some(candidate);
        }
    }
    None
}
