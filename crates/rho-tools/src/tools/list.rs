//! list_directory

use std::fs;
use std::path::Path;

use super::ToolContext;
use crate::args::ListDirectoryArgs;
use crate::error::{Result, ToolError};
use crate::workspace::is_ignored;
use rho_agent::ToolResult;

const DEFAULT_LIMIT: usize = 200;

pub async fn list_directory(ctx: &ToolContext<'_>, args: ListDirectoryArgs) -> Result<ToolResult> {
    let path = match args.path.as_deref() {
        Some(p) if !p.trim().is_empty() => ctx.workspace.resolve(p)?,
        _ => ctx.workspace.root()?.to_path_buf(),
    };
    let display = ctx.workspace.relative(&path);

    let meta = fs::metadata(&path).map_err(|e| ToolError::io(&display, e))?;
    if !meta.is_dir() {
        return Err(ToolError::InvalidArguments(format!("{display} is not a directory")));
    }

    let limit = args.limit.unwrap_or(DEFAULT_LIMIT);
    let mut entries = Vec::new();
    walk(&path, &path, args.recursive, limit, ctx, &mut entries)?;

    if ctx.cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }
    if entries.is_empty() {
        return Ok(ToolResult::ok("(empty directory)"));
    }

    let truncated = entries.len() >= limit;
    let count = entries.len();
    let mut output = entries.join("\n");
    if truncated {
        output.push_str(&format!("\n\n(showing first {limit} entries)"));
    }
    Ok(ToolResult::ok(output)
        .with_metadata("resolvedPath", display)
        .with_metadata("count", count))
}

fn walk(
    base: &Path,
    dir: &Path,
    recursive: bool,
    limit: usize,
    ctx: &ToolContext<'_>,
    out: &mut Vec<String>,
) -> Result<()> {
    let mut children: Vec<_> = fs::read_dir(dir)?.flatten().collect();
    children.sort_by_key(|e| e.file_name());

    for entry in children {
        if out.len() >= limit || ctx.cancel.is_cancelled() {
            return Ok(());
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || is_ignored(&name) {
            continue;
        }
        let path = entry.path();
        let rel = path
            .strip_prefix(base)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            out.push(format!("{rel}/"));
            if recursive {
                walk(base, &path, recursive, limit, ctx, out)?;
            }
        } else {
            out.push(format!("{rel} ({})", human_size(meta.len())));
        }
    }
    Ok(())
}

fn human_size(bytes: u64) -> String {
    match bytes {
        b if b < 1024 => format!("{b} B"),
        b if b < 1024 * 1024 => format!("{:.1} KB", b as f64 / 1024.0),
        b => format!("{:.1} MB", b as f64 / (1024.0 * 1024.0)),
    }
}
