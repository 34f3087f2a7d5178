//! Cross-tool tests against real temp directories

use async_trait::async_trait;
use serde_json::{Value, json};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use rho_agent::transport::Transport;
use rho_agent::{Agent, AgentConfig, CircuitTrip, LoopLimits, RunStatus, ToolBackend};
use rho_ai::{Message, Model, StopReason, Tool, ToolCallRequest, TurnEvent, TurnEventStream, Usage};
use rho_tools::{Dispatcher, ToolsConfig};

fn workspace() -> (tempfile::TempDir, Dispatcher) {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new(Some(dir.path().to_path_buf()));
    (dir, dispatcher)
}

fn meta(r: &rho_agent::ToolResult, key: &str) -> Value {
    r.metadata
        .as_ref()
        .and_then(|m| m.get(key))
        .cloned()
        .unwrap_or(Value::Null)
}

async fn call(d: &Dispatcher, name: &str, args: Value) -> rho_agent::ToolResult {
    d.execute(name, args, CancellationToken::new()).await
}

#[tokio::test]
async fn empty_required_arguments_fail_without_panicking() {
    let (_dir, d) = workspace();
    for (name, args) in [
        ("read_file", json!({})),
        ("read_file", json!({"path": ""})),
        ("edit_file", json!({"path": "a.txt"})),
        ("run_command", json!({"command": ""})),
        ("grep_search", Value::Null),
        ("web_fetch", json!({"url": 42})),
    ] {
        let r = call(&d, name, args).await;
        assert!(!r.success, "{name} should fail");
        assert_eq!(r.code(), Some("INVALID_ARGUMENTS"), "{name}");
    }
}

#[tokio::test]
async fn unknown_tool_is_a_result() {
    let (_dir, d) = workspace();
    let r = call(&d, "format_disk", json!({})).await;
    assert_eq!(r.code(), Some("UNKNOWN_TOOL"));
}

#[tokio::test]
async fn edit_without_match_leaves_file_unchanged() {
    let (dir, d) = workspace();
    let file = dir.path().join("app.ts");
    fs::write(&file, "const a = 1;\n").unwrap();

    let r = call(
        &d,
        "edit_file",
        json!({"path": "app.ts", "old_string": "const A = 1;", "new_string": "const a = 2;"}),
    )
    .await;

    assert!(!r.success);
    assert_eq!(r.code(), Some("NO_MATCH"));
    assert!(r.error.as_deref().unwrap().contains("read_file"));
    assert_eq!(fs::read_to_string(&file).unwrap(), "const a = 1;\n");
}

#[tokio::test]
async fn edit_returns_new_content_and_diff() {
    let (dir, d) = workspace();
    fs::write(dir.path().join("lib.rs"), "fn one() {}\nfn two() {}\n").unwrap();

    let r = call(
        &d,
        "edit_file",
        json!({"path": "lib.rs", "old_string": "fn two() {}", "new_string": "fn three() {}"}),
    )
    .await;

    assert!(r.success, "{:?}", r.error);
    assert_eq!(meta(&r, "content"), "fn one() {}\nfn three() {}\n");
    let diff = meta(&r, "diff");
    let diff = diff.as_str().unwrap();
    assert!(diff.contains("-fn two() {}"));
    assert!(diff.contains("+fn three() {}"));
}

#[tokio::test]
async fn ambiguous_edit_needs_replace_all() {
    let (dir, d) = workspace();
    let file = dir.path().join("a.txt");
    fs::write(&file, "x x x").unwrap();

    let r = call(&d, "edit_file", json!({"path": "a.txt", "old_string": "x", "new_string": "y"})).await;
    assert_eq!(r.code(), Some("AMBIGUOUS_MATCH"));
    assert_eq!(fs::read_to_string(&file).unwrap(), "x x x");

    let r = call(
        &d,
        "edit_file",
        json!({"path": "a.txt", "old_string": "x", "new_string": "y", "replace_all": true}),
    )
    .await;
    assert!(r.success);
    assert_eq!(fs::read_to_string(&file).unwrap(), "y y y");
}

#[tokio::test]
async fn read_file_probes_extensions() {
    let (dir, d) = workspace();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/main.py"), "print('hi')\n").unwrap();
    fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();

    let r = call(&d, "read_file", json!({"path": "src/main"})).await;

    assert!(r.success);
    // "py" comes before "rs" in the probe order
    assert_eq!(meta(&r, "resolvedPath"), "src/main.py");
    assert_eq!(r.output, "print('hi')");

    let r = call(&d, "read_file", json!({"path": "src/missing"})).await;
    assert_eq!(r.code(), Some("NOT_FOUND"));
}

#[tokio::test]
async fn read_file_windows() {
    let (dir, d) = workspace();
    let body: String = (1..=10).map(|n| format!("line {n}\n")).collect();
    fs::write(dir.path().join("n.txt"), body).unwrap();

    let r = call(&d, "read_file", json!({"path": "n.txt", "offset": 3, "limit": 2})).await;

    assert!(r.output.starts_with("line 3\nline 4"));
    assert!(r.output.contains("continue with offset=5"));
    assert_eq!(meta(&r, "totalLines"), 10);
}

#[tokio::test]
async fn paths_cannot_escape_the_workspace() {
    let (_dir, d) = workspace();
    for (name, args) in [
        ("read_file", json!({"path": "../outside.txt"})),
        ("create_file", json!({"path": "a/../../b.txt", "content": "x"})),
        ("glob_search", json!({"pattern": "../*"})),
        ("read_file", json!({"path": "/etc/passwd"})),
    ] {
        let r = call(&d, name, args).await;
        assert_eq!(r.code(), Some("PATH_OUTSIDE_WORKSPACE"), "{name}");
    }
}

#[tokio::test]
async fn no_workspace_rejects_path_tools() {
    let d = Dispatcher::new(None);
    for name in ["read_file", "create_file", "list_directory", "run_command", "memory_read"] {
        let args = match name {
            "create_file" => json!({"path": "a", "content": ""}),
            "run_command" => json!({"command": "ls"}),
            "list_directory" | "memory_read" => json!({}),
            _ => json!({"path": "a"}),
        };
        let r = call(&d, name, args).await;
        assert_eq!(r.code(), Some("NO_WORKSPACE"), "{name}");
    }
}

#[tokio::test]
async fn create_list_and_delete() {
    let (dir, d) = workspace();
    let r = call(&d, "create_file", json!({"path": "pkg/mod.rs", "content": "pub fn f() {}\n"})).await;
    assert!(r.success);
    assert_eq!(meta(&r, "created"), true);

    fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
    let r = call(&d, "list_directory", json!({"recursive": true})).await;
    assert!(r.output.contains("pkg/"));
    assert!(r.output.contains("pkg/mod.rs"));
    assert!(!r.output.contains("node_modules"));

    let r = call(&d, "delete_file", json!({"path": "pkg/mod.rs"})).await;
    assert!(r.success);
    assert!(!dir.path().join("pkg/mod.rs").exists());

    let r = call(&d, "delete_file", json!({"path": "pkg"})).await;
    assert_eq!(r.code(), Some("INVALID_ARGUMENTS"));
}

#[tokio::test]
async fn grep_and_glob_find_files() {
    let (dir, d) = workspace();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/a.rs"), "fn alpha() {}\nfn beta() {}\n").unwrap();
    fs::write(dir.path().join("src/b.ts"), "function alpha() {}\n").unwrap();

    let r = call(&d, "grep_search", json!({"pattern": "fn alpha"})).await;
    assert_eq!(r.output, "src/a.rs:1: fn alpha() {}");
    assert_eq!(meta(&r, "matches"), 1);

    let r = call(&d, "grep_search", json!({"pattern": "ALPHA", "case_insensitive": true, "glob": "*.ts"})).await;
    assert_eq!(r.output, "src/b.ts:1: function alpha() {}");

    let r = call(&d, "glob_search", json!({"pattern": "src/*.rs"})).await;
    assert_eq!(r.output, "src/a.rs");

    let r = call(&d, "semantic_search", json!({"query": "where is alpha"})).await;
    assert!(r.output.starts_with("src/"));
}

#[tokio::test]
async fn run_command_reports_exit_status() {
    let (_dir, d) = workspace();

    let r = call(&d, "run_command", json!({"command": "echo out; echo err 1>&2"})).await;
    assert!(r.success);
    assert!(r.output.contains("out"));
    assert!(r.output.contains("err"));
    assert_eq!(meta(&r, "exit_code"), 0);

    let r = call(&d, "run_command", json!({"command": "false"})).await;
    assert!(!r.success);
    assert_eq!(r.code(), Some("EXIT_STATUS"));
    assert_eq!(meta(&r, "exit_code"), 1);
}

#[tokio::test]
async fn run_command_keeps_output_after_invalid_utf8() {
    let (_dir, d) = workspace();
    let r = call(&d, "run_command", json!({"command": r"printf 'before\n\377\376\nafter\n'"})).await;

    assert!(r.success);
    assert!(r.output.contains("before"));
    assert!(r.output.contains('\u{FFFD}'));
    assert!(r.output.contains("after"), "{:?}", r.output);
}

#[tokio::test]
async fn run_command_output_is_capped() {
    let (_dir, d) = workspace();
    let r = call(
        &d,
        "run_command",
        json!({"command": "i=0; while [ $i -lt 2000 ]; do echo 0123456789abcdefghij; i=$((i+1)); done"}),
    )
    .await;

    assert!(r.success);
    assert!(r.output.chars().count() <= 15_000);
    assert!(r.output.ends_with("[... output truncated]"));
}

#[tokio::test]
async fn run_command_times_out() {
    let (_dir, d) = workspace();
    let d = d.with_config(ToolsConfig {
        command_timeout: Duration::from_millis(200),
        ..ToolsConfig::default()
    });

    let r = call(&d, "run_command", json!({"command": "echo started; sleep 5"})).await;

    assert_eq!(r.code(), Some("TIMEOUT"));
    assert!(r.output.contains("started"));
}

#[tokio::test]
async fn memory_persists_between_calls() {
    let (_dir, d) = workspace();
    let r = call(&d, "memory_read", json!({})).await;
    assert_eq!(r.output, "(no memories saved)");

    call(&d, "memory_write", json!({"content": "tests use tempfile"})).await;
    call(&d, "memory_write", json!({"content": "prefer\nsmall diffs"})).await;

    let r = call(&d, "memory_read", Value::Null).await;
    assert_eq!(r.output, "- tests use tempfile\n- prefer small diffs");
    assert_eq!(meta(&r, "entries"), 2);
}

#[tokio::test]
async fn lints_unavailable_without_command() {
    let (_dir, d) = workspace();
    let r = call(&d, "read_lints", json!({})).await;
    assert_eq!(r.code(), Some("UNAVAILABLE"));

    let (_dir, d) = workspace();
    let d = d.with_config(ToolsConfig {
        lint_command: Some("echo 'warning: unused'; exit 1".into()),
        ..ToolsConfig::default()
    });
    let r = call(&d, "read_lints", json!({})).await;
    assert!(r.success);
    assert!(r.output.contains("warning: unused"));
    assert_eq!(meta(&r, "exit_code"), 1);
}

/// Replays a model that keeps asking to run `false`.
struct FailingCommandModel {
    turns: Mutex<u32>,
}

#[async_trait]
impl Transport for FailingCommandModel {
    async fn continue_turn(
        &self,
        _history: Vec<Message>,
        _tools: Vec<Tool>,
        _model: &Model,
        _cancel: CancellationToken,
    ) -> rho_ai::Result<TurnEventStream> {
        let n = {
            let mut turns = self.turns.lock().unwrap();
            *turns += 1;
            *turns
        };
        let events = vec![
            TurnEvent::Start,
            TurnEvent::Done {
                final_text: String::new(),
                final_tool_calls: vec![ToolCallRequest::new(
                    format!("call_{n}"),
                    "run_command",
                    json!({"command": "false"}),
                )],
                stop_reason: StopReason::ToolUse,
                usage: Usage::default(),
            },
        ];
        Ok(Box::pin(tokio_stream::iter(events)))
    }
}

#[tokio::test]
async fn failing_command_trips_consecutive_breaker() {
    let (_dir, d) = workspace();
    let transport = Arc::new(FailingCommandModel { turns: Mutex::new(0) });
    let config = AgentConfig::new(Model::openai_compatible("test", "http://localhost"));
    let mut agent = Agent::new(config, transport.clone(), Arc::new(d));

    let outcome = agent.prompt("run the tests").await.unwrap();

    assert_eq!(
        outcome.status,
        RunStatus::CircuitBroken {
            trip: CircuitTrip::ConsecutiveFailures { count: 3 }
        }
    );
    assert_eq!(outcome.tool_calls, 3);
    assert_eq!(*transport.turns.lock().unwrap(), 3);
    assert_eq!(LoopLimits::default().max_consecutive_failures, 3);
}

/// Serve one HTTP response: `head` then each chunk, pausing `gap` between chunks.
async fn serve_once(content_type: &'static str, chunks: Vec<Vec<u8>>, gap: Duration) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;
        let head = format!("HTTP/1.1 200 OK\r\ncontent-type: {content_type}\r\nconnection: close\r\n\r\n");
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for chunk in chunks {
            if socket.write_all(&chunk).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
            tokio::time::sleep(gap).await;
        }
    });
    format!("http://{addr}/page")
}

#[tokio::test]
async fn web_fetch_stops_reading_large_bodies() {
    let d = Dispatcher::new(None);
    let chunks = (0..40).map(|_| vec![b'a'; 64 * 1024]).collect();
    let url = serve_once("text/plain", chunks, Duration::ZERO).await;

    let r = call(&d, "web_fetch", json!({"url": url})).await;

    assert!(r.success, "{:?}", r.error);
    assert!(r.output.chars().count() <= 20_000 + "\n[... page truncated]".len());
    assert!(r.output.ends_with("[... page truncated]"));
    assert_eq!(meta(&r, "complete"), false);
}

#[tokio::test]
async fn web_fetch_is_cancelled_during_slow_body() {
    let d = Dispatcher::new(None);
    let chunks = (0..50).map(|_| b"<p>slow</p>".to_vec()).collect();
    let url = serve_once("text/html", chunks, Duration::from_millis(200)).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let r = d.execute("web_fetch", json!({"url": url}), cancel).await;

    assert_eq!(r.code(), Some("CANCELLED"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn web_fetch_converts_small_html_pages() {
    let d = Dispatcher::new(None);
    let url = serve_once(
        "text/html",
        vec![b"<html><body><h1>Docs</h1><p>hello</p></body></html>".to_vec()],
        Duration::ZERO,
    )
    .await;

    let r = call(&d, "web_fetch", json!({"url": url})).await;

    assert!(r.success, "{:?}", r.error);
    assert!(r.output.contains("hello"));
    assert!(!r.output.contains("<p>"));
    assert_eq!(meta(&r, "complete"), true);
}
