//! run_command, read_lints and the git tools

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::ToolContext;
use crate::args::{GitDiffArgs, LimitArgs, OptionalPathArgs, RunCommandArgs};
use crate::error::{Result, ToolError};
use rho_agent::ToolResult;
use rho_agent::compaction::truncate_with_marker;

const OUTPUT_MARKER: &str = "\n[... output truncated]";
const MAX_TIMEOUT_SECS: u64 = 600;

/// Combined output of a finished process
#[derive(Debug)]
struct ProcessOutput {
    output: String,
    exit_code: i32,
}

enum Ended {
    Exited(ProcessOutput),
    TimedOut(String),
}

pub async fn run_command(ctx: &ToolContext<'_>, args: RunCommandArgs) -> Result<ToolResult> {
    let cwd = match args.cwd.as_deref() {
        Some(dir) if !dir.trim().is_empty() => ctx.workspace.resolve(dir)?,
        _ => ctx.workspace.root()?.to_path_buf(),
    };
    let timeout = args
        .timeout_secs
        .map(|s| Duration::from_secs(s.clamp(1, MAX_TIMEOUT_SECS)))
        .unwrap_or(ctx.config.command_timeout);

    let mut command = shell(&args.command);
    command.current_dir(&cwd);

    tracing::debug!(command = %args.command, cwd = %cwd.display(), "Running command");
    match spawn_and_collect(command, timeout, ctx).await? {
        Ended::TimedOut(partial) => Ok(ToolResult::failure(
            "TIMEOUT",
            format!("Command timed out after {}s", timeout.as_secs()),
        )
        .with_output(cap(ctx, &partial))),
        Ended::Exited(out) => Ok(exit_result(ctx, out)),
    }
}

pub async fn read_lints(ctx: &ToolContext<'_>, args: OptionalPathArgs) -> Result<ToolResult> {
    let Some(lint) = ctx.config.lint_command.as_deref() else {
        return Err(ToolError::Unavailable(
            "No lint command is configured for this workspace".into(),
        ));
    };
    let root = ctx.workspace.root()?;
    let mut line = lint.to_string();
    if let Some(path) = args.path.as_deref().filter(|p| !p.trim().is_empty()) {
        let resolved = ctx.workspace.resolve(path)?;
        line.push(' ');
        line.push_str(&shell_quote(&ctx.workspace.relative(&resolved)));
    }
    let mut command = shell(&line);
    command.current_dir(root);

    match spawn_and_collect(command, ctx.config.command_timeout, ctx).await? {
        Ended::TimedOut(_) => Err(ToolError::Timeout(ctx.config.command_timeout.as_secs())),
        // Linters exit non-zero when they report problems; the report is the result.
        Ended::Exited(out) => {
            let text = if out.output.trim().is_empty() {
                "No lint problems reported".to_string()
            } else {
                cap(ctx, &out.output)
            };
            Ok(ToolResult::ok(text).with_metadata("exit_code", out.exit_code))
        }
    }
}

pub async fn git_status(ctx: &ToolContext<'_>) -> Result<ToolResult> {
    git(ctx, &["status", "--short", "--branch"]).await
}

pub async fn git_diff(ctx: &ToolContext<'_>, args: GitDiffArgs) -> Result<ToolResult> {
    let mut argv = vec!["diff".to_string()];
    if args.staged {
        argv.push("--staged".into());
    }
    if let Some(path) = args.path.as_deref().filter(|p| !p.trim().is_empty()) {
        let resolved = ctx.workspace.resolve(path)?;
        argv.push("--".into());
        argv.push(ctx.workspace.relative(&resolved));
    }
    let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
    git(ctx, &argv).await
}

pub async fn git_log(ctx: &ToolContext<'_>, args: LimitArgs) -> Result<ToolResult> {
    let n = format!("-n{}", args.limit.unwrap_or(20).min(200));
    git(ctx, &["log", "--oneline", "--decorate", &n]).await
}

async fn git(ctx: &ToolContext<'_>, argv: &[&str]) -> Result<ToolResult> {
    let root = ctx.workspace.root()?;
    let mut command = Command::new("git");
    command.args(argv).current_dir(root);
    match spawn_and_collect(command, ctx.config.command_timeout, ctx).await? {
        Ended::TimedOut(_) => Err(ToolError::Timeout(ctx.config.command_timeout.as_secs())),
        Ended::Exited(out) => {
            let mut result = exit_result(ctx, out);
            if result.success && result.output.is_empty() {
                result.output = "(no output)".into();
            }
            Ok(result)
        }
    }
}

fn exit_result(ctx: &ToolContext<'_>, out: ProcessOutput) -> ToolResult {
    let output = cap(ctx, &out.output);
    if out.exit_code == 0 {
        ToolResult::ok(output).with_metadata("exit_code", 0)
    } else {
        ToolResult::failure(
            "EXIT_STATUS",
            format!("Command exited with status {}", out.exit_code),
        )
        .with_output(output)
        .with_metadata("exit_code", out.exit_code)
    }
}

fn cap(ctx: &ToolContext<'_>, output: &str) -> String {
    truncate_with_marker(output, ctx.config.max_command_output, OUTPUT_MARKER)
}

fn shell(line: &str) -> Command {
    let (program, flag) = if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    };
    let mut command = Command::new(program);
    command.arg(flag).arg(line);
    command
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Run to completion, merging stdout and stderr in arrival order. The child
/// is killed on timeout or cancellation.
async fn spawn_and_collect(
    mut command: Command,
    timeout: Duration,
    ctx: &ToolContext<'_>,
) -> Result<Ended> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = command.spawn()?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, tx.clone());
    }
    drop(tx);

    // Stop buffering once far past the cap; the rest would be truncated anyway.
    let keep = ctx.config.max_command_output.saturating_mul(2);
    let mut output = String::new();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ToolError::Cancelled);
            }
            _ = tokio::time::sleep_until(deadline) => {
                let _ = child.kill().await;
                return Ok(Ended::TimedOut(output));
            }
            line = rx.recv() => match line {
                Some(line) => {
                    if output.len() < keep {
                        if !output.is_empty() {
                            output.push('\n');
                        }
                        output.push_str(&line);
                    }
                }
                None => break,
            },
        }
    }

    let status = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(ToolError::Cancelled);
        }
        _ = tokio::time::sleep_until(deadline) => {
            let _ = child.kill().await;
            return Ok(Ended::TimedOut(output));
        }
        status = child.wait() => status?,
    };

    Ok(Ended::Exited(ProcessOutput {
        output,
        exit_code: status.code().unwrap_or(-1),
    }))
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            if buf.ends_with(b"\n") {
                buf.pop();
                if buf.ends_with(b"\r") {
                    buf.pop();
                }
            }
            // Non-UTF-8 bytes become U+FFFD instead of ending the stream
            if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                break;
            }
        }
    });
}
