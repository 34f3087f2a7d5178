//! grep_search, glob_search and semantic_search

use regex::RegexBuilder;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::ToolContext;
use crate::args::{GlobSearchArgs, GrepSearchArgs, QueryArgs};
use crate::error::{Result, ToolError};
use crate::workspace::is_ignored;
use rho_agent::ToolResult;

const DEFAULT_GREP_LIMIT: usize = 50;
const DEFAULT_GLOB_LIMIT: usize = 100;
const DEFAULT_SEMANTIC_LIMIT: usize = 10;
const MAX_LINE_CHARS: usize = 300;
/// Files larger than this are skipped by content searches
const MAX_SEARCH_FILE_BYTES: u64 = 1024 * 1024;
const MAX_SCANNED_FILES: usize = 5000;

pub async fn grep_search(ctx: &ToolContext<'_>, args: GrepSearchArgs) -> Result<ToolResult> {
    let regex = RegexBuilder::new(&args.pattern)
        .case_insensitive(args.case_insensitive)
        .build()
        .map_err(|e| ToolError::InvalidArguments(format!("invalid regex: {e}")))?;
    let base = match args.path.as_deref() {
        Some(p) if !p.trim().is_empty() => ctx.workspace.resolve(p)?,
        _ => ctx.workspace.root()?.to_path_buf(),
    };
    let filter = args
        .glob
        .as_deref()
        .map(glob::Pattern::new)
        .transpose()
        .map_err(|e| ToolError::InvalidArguments(format!("invalid glob: {e}")))?;
    let limit = args.limit.unwrap_or(DEFAULT_GREP_LIMIT);

    let mut matches = Vec::new();
    let mut total = 0usize;
    for file in collect_files(&base, ctx)? {
        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        let rel = ctx.workspace.relative(&file);
        if let Some(filter) = &filter {
            if !filter.matches(&rel) && !file.file_name().is_some_and(|n| filter.matches(&n.to_string_lossy())) {
                continue;
            }
        }
        let Ok(content) = fs::read_to_string(&file) else {
            continue;
        };
        for (n, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                total += 1;
                if matches.len() < limit {
                    matches.push(format!("{rel}:{}: {}", n + 1, clip(line)));
                }
            }
        }
    }

    if matches.is_empty() {
        return Ok(ToolResult::ok("No matches found").with_metadata("matches", 0));
    }
    let mut output = matches.join("\n");
    if total > matches.len() {
        output.push_str(&format!("\n\n(showing {} of {total} matches)", matches.len()));
    }
    Ok(ToolResult::ok(output).with_metadata("matches", total))
}

pub async fn glob_search(ctx: &ToolContext<'_>, args: GlobSearchArgs) -> Result<ToolResult> {
    let root = ctx.workspace.root()?;
    let pattern = args.pattern.trim().trim_start_matches('/');
    if pattern.split('/').any(|part| part == "..") {
        return Err(ToolError::PathOutsideWorkspace(args.pattern.clone()));
    }
    let full = root.join(pattern).to_string_lossy().to_string();
    let paths = glob::glob(&full).map_err(|e| ToolError::InvalidArguments(format!("invalid glob: {e}")))?;
    let limit = args.limit.unwrap_or(DEFAULT_GLOB_LIMIT);

    let mut results = Vec::new();
    let mut total = 0usize;
    for entry in paths {
        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable glob entry");
                continue;
            }
        };
        let rel = ctx.workspace.relative(&path);
        if rel.split('/').any(is_ignored) {
            continue;
        }
        total += 1;
        if results.len() < limit {
            results.push(rel);
        }
    }

    if results.is_empty() {
        return Ok(ToolResult::ok("No files matched the pattern").with_metadata("count", 0));
    }
    let mut output = results.join("\n");
    if total > results.len() {
        output.push_str(&format!("\n\n(showing {} of {total} files)", results.len()));
    }
    Ok(ToolResult::ok(output).with_metadata("count", total))
}

/// Ranks files by how often the query's terms appear in their path and text.
/// There is no embedding index; this is a lexical relevance search.
pub async fn semantic_search(ctx: &ToolContext<'_>, args: QueryArgs) -> Result<ToolResult> {
    let root = ctx.workspace.root()?.to_path_buf();
    let terms: Vec<String> = args
        .query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= 3)
        .map(str::to_lowercase)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    if terms.is_empty() {
        return Err(ToolError::InvalidArguments(
            "query needs at least one word of three or more characters".into(),
        ));
    }
    let limit = args.limit.unwrap_or(DEFAULT_SEMANTIC_LIMIT);

    let mut scored: Vec<(usize, String, String)> = Vec::new();
    for file in collect_files(&root, ctx)? {
        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        let Ok(content) = fs::read_to_string(&file) else {
            continue;
        };
        let rel = ctx.workspace.relative(&file);
        let lower = content.to_lowercase();
        let rel_lower = rel.to_lowercase();
        let mut score = 0;
        for term in &terms {
            score += lower.matches(term.as_str()).count();
            if rel_lower.contains(term.as_str()) {
                score += 10;
            }
        }
        if score == 0 {
            continue;
        }
        let snippet = content
            .lines()
            .enumerate()
            .find(|(_, l)| {
                let l = l.to_lowercase();
                terms.iter().any(|t| l.contains(t.as_str()))
            })
            .map(|(n, l)| format!("{}: {}", n + 1, clip(l.trim())))
            .unwrap_or_default();
        scored.push((score, rel, snippet));
    }

    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    scored.truncate(limit);
    if scored.is_empty() {
        return Ok(ToolResult::ok("No relevant files found"));
    }
    let output = scored
        .iter()
        .map(|(score, rel, snippet)| format!("{rel} (score {score})\n  {snippet}"))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(ToolResult::ok(output))
}

fn clip(line: &str) -> String {
    if line.chars().count() > MAX_LINE_CHARS {
        let mut s: String = line.chars().take(MAX_LINE_CHARS).collect();
        s.push_str("...");
        s
    } else {
        line.to_string()
    }
}

/// Regular files under `base`, skipping hidden, ignored and large files
fn collect_files(base: &Path, ctx: &ToolContext<'_>) -> Result<Vec<PathBuf>> {
    let meta = fs::metadata(base).map_err(|e| ToolError::io(&ctx.workspace.relative(base), e))?;
    if meta.is_file() {
        return Ok(vec![base.to_path_buf()]);
    }
    let mut files = Vec::new();
    let mut stack = vec![base.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(read) = fs::read_dir(&dir) else { continue };
        let mut entries: Vec<_> = read.flatten().collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries.into_iter().rev() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || is_ignored(&name) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if meta.is_dir() {
                stack.push(entry.path());
            } else if meta.is_file() && meta.len() <= MAX_SEARCH_FILE_BYTES {
                files.push(entry.path());
                if files.len() >= MAX_SCANNED_FILES {
                    return Ok(files);
                }
            }
        }
    }
    files.sort();
    Ok(files)
}
