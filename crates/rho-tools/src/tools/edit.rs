//! edit_file, create_file and delete_file

use similar::TextDiff;
use tokio::fs;

use super::ToolContext;
use crate::args::{CreateFileArgs, EditFileArgs, PathArgs};
use crate::error::{Result, ToolError};
use rho_agent::ToolResult;

const MAX_DIFF_LINES: usize = 200;

pub async fn edit_file(ctx: &ToolContext<'_>, args: EditFileArgs) -> Result<ToolResult> {
    let path = ctx.workspace.resolve(&args.path)?;
    let display = ctx.workspace.relative(&path);

    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| ToolError::io(&display, e))?;

    let occurrences = content.matches(&args.old_string).count();
    if occurrences == 0 {
        return Err(ToolError::NoMatch(format!(
            "old_string was not found in {display}. The file may have changed; read it again with read_file and retry with its exact current text."
        )));
    }
    if occurrences > 1 && !args.replace_all {
        return Err(ToolError::AmbiguousMatch(format!(
            "old_string occurs {occurrences} times in {display}. Include more surrounding text to make it unique, or set replace_all."
        )));
    }
    if args.old_string == args.new_string {
        return Err(ToolError::InvalidArguments(
            "old_string and new_string are identical".into(),
        ));
    }

    let updated = if args.replace_all {
        content.replace(&args.old_string, &args.new_string)
    } else {
        content.replacen(&args.old_string, &args.new_string, 1)
    };

    if ctx.cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }
    fs::write(&path, &updated).await?;

    let diff = unified_diff(&display, &content, &updated);
    let replaced = if args.replace_all { occurrences } else { 1 };
    Ok(ToolResult::ok(format!(
        "Edited {display} ({replaced} replacement{}).\n\n{diff}",
        if replaced == 1 { "" } else { "s" }
    ))
    .with_metadata("resolvedPath", display)
    .with_metadata("content", updated)
    .with_metadata("diff", diff))
}

pub async fn create_file(ctx: &ToolContext<'_>, args: CreateFileArgs) -> Result<ToolResult> {
    let path = ctx.workspace.resolve(&args.path)?;
    let display = ctx.workspace.relative(&path);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let existed = fs::try_exists(&path).await.unwrap_or(false);
    if ctx.cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }
    fs::write(&path, &args.content).await?;

    let verb = if existed { "Overwrote" } else { "Created" };
    Ok(ToolResult::ok(format!(
        "{verb} {display} ({} bytes)",
        args.content.len()
    ))
    .with_metadata("resolvedPath", display)
    .with_metadata("created", !existed))
}

pub async fn delete_file(ctx: &ToolContext<'_>, args: PathArgs) -> Result<ToolResult> {
    let path = ctx.workspace.resolve(&args.path)?;
    let display = ctx.workspace.relative(&path);

    let meta = fs::metadata(&path)
        .await
        .map_err(|e| ToolError::io(&display, e))?;
    if meta.is_dir() {
        return Err(ToolError::InvalidArguments(format!(
            "{display} is a directory; only files can be deleted"
        )));
    }
    fs::remove_file(&path).await?;
    Ok(ToolResult::ok(format!("Deleted {display}")).with_metadata("resolvedPath", display))
}

fn unified_diff(name: &str, old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(name, name)
        .to_string();
    let lines: Vec<&str> = diff.lines().collect();
    if lines.len() <= MAX_DIFF_LINES {
        return diff;
    }
    let mut clipped = lines[..MAX_DIFF_LINES].join("\n");
    clipped.push_str(&format!("\n... ({} more diff lines)", lines.len() - MAX_DIFF_LINES));
    clipped
}
