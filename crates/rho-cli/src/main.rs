//! rho - a tool-calling coding agent

mod config;
mod context;
mod runtime;
mod server;
mod utils;

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rho_agent::parallel::OrchestratorEvent;
use rho_agent::{AgentEvent, RunStatus, ToolCallStatus};

use crate::config::Config;
use crate::runtime::Runtime;

/// rho - a tool-calling coding agent
#[derive(Parser, Debug)]
#[command(name = "rho")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Model to use (overrides the config file)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Workspace folder the tools operate in (default: current directory)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Run without a workspace; file and shell tools are disabled
    #[arg(long, global = true)]
    no_workspace: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write an example config file and exit
    #[arg(long)]
    init_config: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one prompt to completion, printing events as they arrive
    Chat {
        #[arg(required = true)]
        prompt: Vec<String>,
    },
    /// Split a goal into verified parallel lanes
    Parallel {
        #[arg(required = true)]
        goal: Vec<String>,
    },
    /// Serve the event stream over HTTP
    Serve {
        /// Address to bind (overrides the config file)
        #[arg(long)]
        bind: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("rho=debug,rho_agent=debug,rho_ai=debug,rho_tools=debug")
    } else {
        EnvFilter::try_from_env("RHO_LOG")
            .unwrap_or_else(|_| EnvFilter::new("rho=info,rho_agent=info,rho_ai=info,rho_tools=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.init_config {
        let path = Config::init()?;
        println!("Config file at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let mut cfg = Config::load();
    if let Some(model) = args.model {
        cfg.model = Some(model);
    }

    let workspace = if args.no_workspace {
        None
    } else {
        Some(match args.workspace {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        })
    };
    if let Some(dir) = &workspace {
        anyhow::ensure!(dir.is_dir(), "Workspace {} is not a directory", dir.display());
    }

    let Some(command) = args.command else {
        anyhow::bail!("No command given; try `rho chat <prompt>` or `rho --help`");
    };

    match command {
        Command::Chat { prompt } => {
            let runtime = Runtime::from_config(cfg, workspace)?;
            run_chat(&runtime, &prompt.join(" ")).await
        }
        Command::Parallel { goal } => {
            let runtime = Runtime::from_config(cfg, workspace)?;
            run_parallel(&runtime, &goal.join(" ")).await
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| cfg.bind().to_string());
            let runtime = Runtime::from_config(cfg, workspace)?;
            server::serve(Arc::new(runtime), &bind).await
        }
    }
}

/// First ctrl-c stops after the current step, the second also cancels the
/// step in flight, the third exits
fn stop_on_ctrl_c(stop: impl Fn() + Send + 'static, force: impl Fn() + Send + 'static) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("\n[Stopping after the current step, press ctrl-c again to cancel it]");
        stop();
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("\n[Cancelling the current step, press ctrl-c again to quit]");
        force();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

async fn run_chat(runtime: &Runtime, prompt: &str) -> anyhow::Result<()> {
    let mut agent = runtime.agent("cli");
    let mut receiver = agent.subscribe();
    let handle = agent.handle();
    let force = handle.clone();
    stop_on_ctrl_c(move || handle.abort(), move || force.abort_now());

    println!("rho> {}", prompt);
    println!();

    let printer = tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            match event {
                AgentEvent::Start => {}
                AgentEvent::Token { content } => {
                    print!("{}", content);
                    let _ = std::io::stdout().flush();
                }
                AgentEvent::ToolCall { tool, args, .. } => {
                    let args = utils::truncate_chars(&args.to_string(), 120);
                    println!("\n[{} {}]", tool, args);
                }
                AgentEvent::ToolStatus { block } => match (block.status, &block.result) {
                    (ToolCallStatus::Done, Some(result)) => {
                        let preview = utils::truncate_chars(utils::first_line(&result.output), 200);
                        println!("[{}: {}]", block.tool, preview);
                    }
                    (ToolCallStatus::Error, Some(result)) => {
                        let error = result.error.as_deref().unwrap_or("failed");
                        println!("[{} failed: {}]", block.tool, utils::truncate_chars(error, 200));
                    }
                    _ => {}
                },
                AgentEvent::Error { message, hint, .. } => {
                    eprintln!("\nError: {}", message);
                    if let Some(hint) = hint {
                        eprintln!("Hint: {}", hint);
                    }
                }
                AgentEvent::Done { status, .. } => {
                    match status {
                        RunStatus::Stopped => println!("\n[Stopped]"),
                        RunStatus::CircuitBroken { trip } => println!("\n[Stopped: {}]", trip),
                        _ => println!(),
                    }
                    break;
                }
            }
        }
    });

    let outcome = agent.prompt(prompt).await?;
    let _ = printer.await;

    let cost = outcome.usage.calculate_cost(&runtime.model);
    println!(
        "\n[{} turns, {} tool calls, {} failed | tokens: {} in, {} out | ${:.4}]",
        outcome.iterations,
        outcome.tool_calls,
        outcome.failures,
        outcome.usage.input,
        outcome.usage.output,
        cost.total
    );

    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_parallel(runtime: &Runtime, goal: &str) -> anyhow::Result<()> {
    let orchestrator = runtime.orchestrator();
    let mut receiver = orchestrator.subscribe();
    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    stop_on_ctrl_c(move || stop.cancel(), || {
        std::process::exit(130);
    });

    println!("rho parallel> {}", goal);
    println!();

    let printer = tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            match &event {
                OrchestratorEvent::ManifestCreated { manifest } => {
                    println!("Plan ({} lanes):", manifest.nodes.len());
                    for node in &manifest.nodes {
                        println!("  {} {}", node.id, node.description);
                    }
                    println!();
                }
                OrchestratorEvent::LaneCreated { .. } => {}
                OrchestratorEvent::LaneStatusChanged {
                    lane_id, from, to, ..
                } => {
                    println!("[{}] {} -> {}", short_id(lane_id), from, to);
                }
                OrchestratorEvent::Escalation {
                    lane_id,
                    failure_count,
                    reason,
                } => {
                    println!(
                        "[{}] escalated after {} failures: {}",
                        short_id(lane_id),
                        failure_count,
                        utils::truncate_chars(reason, 200)
                    );
                }
                OrchestratorEvent::OrchestrationComplete { .. } => break,
                OrchestratorEvent::OrchestrationError { message } => {
                    eprintln!("Error: {}", message);
                    break;
                }
            }
        }
    });

    let result = orchestrator.run(goal, cancel).await;
    let _ = printer.await;
    let summary = result?;

    println!(
        "\n{} lanes: {} merged, {} failed, {} escalations | {:.1}s | ${:.4}",
        summary.total_lanes,
        summary.merged,
        summary.failed,
        summary.escalations,
        summary.duration_ms as f64 / 1000.0,
        summary.cost
    );
    if !summary.success {
        std::process::exit(1);
    }
    Ok(())
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
