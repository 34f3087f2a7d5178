//! Agent loop: model turns, tool execution and circuit breakers

use futures::StreamExt;
use rho_ai::{ErrorClass, Message, Model, ToolCallRequest, TurnEvent, TurnEventStream, Usage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    batch::{DEFAULT_FLUSH_INTERVAL, TokenBatcher},
    block::{ToolCallBlock, ToolCallStatus},
    compaction::{self, CompressionConfig, TRUNCATION_MARKER},
    conversation::Conversation,
    error::{Error, Result},
    events::AgentEvent,
    handle::AgentHandle,
    nudge::NudgePolicy,
    tool::{BoxedBackend, ToolResult, is_read_only},
    transport::Transport,
};

/// Hard limits for one run of the loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopLimits {
    /// Tool calls allowed across the whole run
    pub max_tool_calls: u32,
    /// Consecutive failed tool calls that stop the run
    pub max_consecutive_failures: u32,
    /// Failed tool calls across the run that stop it
    pub max_total_failures: u32,
    /// Model turns allowed per run
    pub max_iterations: u32,
    /// Cap for each tool-role message, marker included
    pub max_tool_result_chars: usize,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_tool_calls: 50,
            max_consecutive_failures: 3,
            max_total_failures: 8,
            max_iterations: 25,
            max_tool_result_chars: 10_000,
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// System prompt, inserted once at the start of a conversation
    pub system_prompt: Option<String>,
    /// Model to use
    pub model: Model,
    pub limits: LoopLimits,
    pub compression: CompressionConfig,
    pub nudge: NudgePolicy,
    /// How often streamed text is flushed to subscribers
    pub token_flush_interval: Duration,
    /// A turn fails if the model stream is silent this long
    pub stream_idle_timeout: Duration,
}

impl AgentConfig {
    pub fn new(model: Model) -> Self {
        Self {
            system_prompt: None,
            model,
            limits: LoopLimits::default(),
            compression: CompressionConfig::default(),
            nudge: NudgePolicy::default(),
            token_flush_interval: DEFAULT_FLUSH_INTERVAL,
            stream_idle_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Which circuit breaker stopped a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "breaker", rename_all = "snake_case")]
pub enum CircuitTrip {
    ToolCalls { limit: u32 },
    ConsecutiveFailures { count: u32 },
    TotalFailures { count: u32 },
    Iterations { limit: u32 },
}

impl CircuitTrip {
    pub fn name(&self) -> &'static str {
        match self {
            CircuitTrip::ToolCalls { .. } => "tool_calls",
            CircuitTrip::ConsecutiveFailures { .. } => "consecutive_failures",
            CircuitTrip::TotalFailures { .. } => "total_failures",
            CircuitTrip::Iterations { .. } => "iterations",
        }
    }
}

impl std::fmt::Display for CircuitTrip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitTrip::ToolCalls { limit } => {
                write!(f, "reached the limit of {limit} tool calls for one request")
            }
            CircuitTrip::ConsecutiveFailures { count } => {
                write!(f, "{count} tool calls failed in a row")
            }
            CircuitTrip::TotalFailures { count } => {
                write!(f, "{count} tool calls failed during this request")
            }
            CircuitTrip::Iterations { limit } => {
                write!(f, "reached the limit of {limit} model turns for one request")
            }
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Stopped,
    CircuitBroken { trip: CircuitTrip },
    Failed { class: ErrorClass, message: String },
}

/// Summary of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Final assistant text, with the reason appended when the run did not complete
    pub final_text: String,
    pub iterations: u32,
    pub tool_calls: u32,
    pub failures: u32,
    pub usage: Usage,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

#[derive(Debug, Default)]
struct Counters {
    iterations: u32,
    tool_calls: u32,
    consecutive_failures: u32,
    total_failures: u32,
}

impl Counters {
    fn record(&mut self, success: bool) {
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            self.total_failures += 1;
        }
    }

    fn failure_trip(&self, limits: &LoopLimits) -> Option<CircuitTrip> {
        if self.consecutive_failures >= limits.max_consecutive_failures {
            Some(CircuitTrip::ConsecutiveFailures {
                count: self.consecutive_failures,
            })
        } else if self.total_failures >= limits.max_total_failures {
            Some(CircuitTrip::TotalFailures {
                count: self.total_failures,
            })
        } else {
            None
        }
    }
}

enum TurnOutcome {
    Done {
        text: String,
        tool_calls: Vec<ToolCallRequest>,
        usage: Usage,
    },
    Failed {
        message: String,
        class: ErrorClass,
        partial: String,
    },
    Cancelled {
        partial: String,
    },
}

enum Halt {
    Completed,
    Stopped,
    Tripped(CircuitTrip),
    Failed { class: ErrorClass, message: String },
}

/// State accumulated over one run
#[derive(Default)]
struct RunState {
    counters: Counters,
    blocks: Vec<ToolCallBlock>,
    usage: Usage,
    /// Text of the latest turn
    last_text: String,
    /// Whether `last_text` is already part of the history
    delivered: bool,
}

/// The agent that drives one conversation
pub struct Agent {
    config: AgentConfig,
    conversation: Conversation,
    tools: BoxedBackend,
    transport: Arc<dyn Transport>,
    event_tx: broadcast::Sender<AgentEvent>,
    handle: AgentHandle,
}

impl Agent {
    /// Create a new agent
    pub fn new(config: AgentConfig, transport: Arc<dyn Transport>, tools: BoxedBackend) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            conversation: Conversation::default(),
            tools,
            transport,
            event_tx,
            handle: AgentHandle::new(),
        }
    }

    /// Subscribe to agent events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    /// Get the conversation state
    pub fn state(&self) -> &Conversation {
        &self.conversation
    }

    /// Get the agent config
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Get the conversation messages
    pub fn messages(&self) -> &[Message] {
        &self.conversation.messages
    }

    /// Get a cloneable handle for stopping the agent from elsewhere
    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    /// Request a cooperative stop of the current run
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Run the loop for one user message until it completes, stops, or a
    /// breaker trips. Only `Busy` is returned as an error; every other ending
    /// is described by the outcome.
    pub async fn prompt(&mut self, input: &str) -> Result<RunOutcome> {
        if !self.handle.begin() {
            return Err(Error::Busy);
        }

        if self.conversation.messages.is_empty() {
            if let Some(system) = &self.config.system_prompt {
                self.conversation.push(Message::system(system.clone()));
            }
        }
        self.conversation.push(Message::user(input));

        let outcome = self.run_loop().await;

        self.handle.finish();
        Ok(outcome)
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn run_loop(&mut self) -> RunOutcome {
        let cancel = self.handle.cancel_token();
        let limits = self.config.limits.clone();
        let mut run = RunState::default();

        self.emit(AgentEvent::Start);

        let halt = loop {
            if cancel.is_cancelled() {
                break Halt::Stopped;
            }
            if run.counters.iterations >= limits.max_iterations {
                break Halt::Tripped(CircuitTrip::Iterations {
                    limit: limits.max_iterations,
                });
            }
            run.counters.iterations += 1;

            let history = compaction::compress(&self.conversation.messages, &self.config.compression);
            let tools = if self.tools.is_enabled() {
                self.tools.schemas()
            } else {
                vec![]
            };

            tracing::debug!(
                iteration = run.counters.iterations,
                messages = history.len(),
                "Starting model turn"
            );

            let stream = match self
                .transport
                .continue_turn(history, tools, &self.config.model, cancel.clone())
                .await
            {
                Ok(stream) => stream,
                Err(e) if e.class() == ErrorClass::Cancelled => break Halt::Stopped,
                Err(e) => {
                    break Halt::Failed {
                        class: e.class(),
                        message: e.to_string(),
                    };
                }
            };

            match self.consume_turn(stream, &cancel).await {
                TurnOutcome::Cancelled { partial } => {
                    run.last_text = partial;
                    run.delivered = false;
                    break Halt::Stopped;
                }
                TurnOutcome::Failed {
                    message,
                    class,
                    partial,
                } => {
                    run.last_text = partial;
                    run.delivered = false;
                    break Halt::Failed { class, message };
                }
                TurnOutcome::Done {
                    text,
                    tool_calls,
                    usage,
                } => {
                    run.usage.add(&usage);
                    self.conversation.total_usage.add(&usage);
                    run.last_text = text.clone();
                    run.delivered = true;

                    if tool_calls.is_empty() {
                        let nudge = !self.conversation.has_called_tools
                            && !self.conversation.nudge_sent
                            && self.config.nudge.matches(&text);
                        self.conversation.push(Message::assistant(non_empty(text), vec![]));
                        if nudge {
                            tracing::info!("Assistant described an action without a tool call, nudging once");
                            self.conversation.nudge_sent = true;
                            self.conversation
                                .push(Message::user(self.config.nudge.message.clone()));
                            continue;
                        }
                        break Halt::Completed;
                    }

                    self.conversation
                        .push(Message::assistant(non_empty(text), tool_calls.clone()));

                    if let Some(halt) = self
                        .execute_tool_calls(&tool_calls, &mut run, &limits, &cancel)
                        .await
                    {
                        break halt;
                    }
                }
            }
        };

        self.finalize(halt, run)
    }

    /// Drain one turn's events, batching tokens to subscribers. The pending
    /// batch is always flushed before returning.
    async fn consume_turn(
        &self,
        mut stream: TurnEventStream,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let mut batcher = TokenBatcher::new(self.config.token_flush_interval);
        let mut text = String::new();
        let idle = self.config.stream_idle_timeout;
        let mut idle_deadline = Instant::now() + idle;

        let outcome = loop {
            let flush_at = batcher.deadline();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    break TurnOutcome::Cancelled { partial: std::mem::take(&mut text) };
                }
                _ = tokio::time::sleep_until(flush_at.unwrap_or(idle_deadline)), if flush_at.is_some() => {
                    self.flush_tokens(&mut batcher);
                }
                _ = tokio::time::sleep_until(idle_deadline) => {
                    break TurnOutcome::Failed {
                        message: format!("model stream was silent for {}s", idle.as_secs()),
                        class: ErrorClass::Transport,
                        partial: std::mem::take(&mut text),
                    };
                }
                event = stream.next() => {
                    idle_deadline = Instant::now() + idle;
                    match event {
                        Some(TurnEvent::Token { text: delta }) => {
                            text.push_str(&delta);
                            batcher.push(&delta);
                        }
                        Some(TurnEvent::Start) | Some(TurnEvent::ToolCallDelta { .. }) => {}
                        Some(TurnEvent::Done { final_text, final_tool_calls, usage, .. }) => {
                            break TurnOutcome::Done {
                                text: final_text,
                                tool_calls: final_tool_calls,
                                usage,
                            };
                        }
                        Some(TurnEvent::Error { message, class }) => {
                            break TurnOutcome::Failed {
                                message,
                                class,
                                partial: std::mem::take(&mut text),
                            };
                        }
                        None => {
                            break TurnOutcome::Failed {
                                message: "turn stream ended without a result".into(),
                                class: ErrorClass::Protocol,
                                partial: std::mem::take(&mut text),
                            };
                        }
                    }
                }
            }
        };

        self.flush_tokens(&mut batcher);
        outcome
    }

    fn flush_tokens(&self, batcher: &mut TokenBatcher) {
        if let Some(content) = batcher.take() {
            self.emit(AgentEvent::Token { content });
        }
    }

    /// Execute one turn's tool calls, appending exactly one tool-role message
    /// per request. Returns the halt reason if the run must end.
    async fn execute_tool_calls(
        &mut self,
        calls: &[ToolCallRequest],
        run: &mut RunState,
        limits: &LoopLimits,
        cancel: &CancellationToken,
    ) -> Option<Halt> {
        if !self.tools.is_enabled() {
            let reason = self
                .tools
                .disabled_reason()
                .unwrap_or_else(|| "tools are disabled".to_string());
            self.skip_calls(calls, &reason, run);
            return Some(Halt::Failed {
                class: ErrorClass::Tool,
                message: reason,
            });
        }

        if calls.iter().all(|c| is_read_only(&c.name)) {
            self.execute_concurrent(calls, run, limits, cancel).await
        } else {
            self.execute_sequential(calls, run, limits, cancel).await
        }
    }

    async fn execute_sequential(
        &mut self,
        calls: &[ToolCallRequest],
        run: &mut RunState,
        limits: &LoopLimits,
        cancel: &CancellationToken,
    ) -> Option<Halt> {
        let tools = Arc::clone(&self.tools);
        let tool_cancel = self.handle.tool_cancel_token();

        for (idx, call) in calls.iter().enumerate() {
            if cancel.is_cancelled() {
                self.skip_calls(&calls[idx..], "the run was stopped", run);
                return Some(Halt::Stopped);
            }
            if run.counters.tool_calls >= limits.max_tool_calls {
                let trip = CircuitTrip::ToolCalls {
                    limit: limits.max_tool_calls,
                };
                self.skip_calls(&calls[idx..], &trip.to_string(), run);
                return Some(Halt::Tripped(trip));
            }

            let block = self.start_block(call);
            run.counters.tool_calls += 1;
            let result = tools
                .execute(&call.name, call.arguments.clone(), tool_cancel.clone())
                .await;
            self.complete_call(call, block, result, run, limits);

            if let Some(trip) = run.counters.failure_trip(limits) {
                self.skip_calls(&calls[idx + 1..], &trip.to_string(), run);
                return Some(Halt::Tripped(trip));
            }
        }
        None
    }

    /// Read-only calls run together; results are appended in request order.
    async fn execute_concurrent(
        &mut self,
        calls: &[ToolCallRequest],
        run: &mut RunState,
        limits: &LoopLimits,
        cancel: &CancellationToken,
    ) -> Option<Halt> {
        if cancel.is_cancelled() {
            self.skip_calls(calls, "the run was stopped", run);
            return Some(Halt::Stopped);
        }

        let tools = Arc::clone(&self.tools);
        let tool_cancel = self.handle.tool_cancel_token();
        let allowed = limits.max_tool_calls.saturating_sub(run.counters.tool_calls) as usize;
        let (runnable, over) = calls.split_at(calls.len().min(allowed));

        let blocks: Vec<ToolCallBlock> = runnable.iter().map(|c| self.start_block(c)).collect();
        let results = futures::future::join_all(
            runnable
                .iter()
                .map(|c| tools.execute(&c.name, c.arguments.clone(), tool_cancel.clone())),
        )
        .await;
        run.counters.tool_calls += runnable.len() as u32;

        let mut tripped = None;
        for ((call, block), result) in runnable.iter().zip(blocks).zip(results) {
            self.complete_call(call, block, result, run, limits);
            if tripped.is_none() {
                tripped = run.counters.failure_trip(limits);
            }
        }

        if tripped.is_none() && !over.is_empty() {
            tripped = Some(CircuitTrip::ToolCalls {
                limit: limits.max_tool_calls,
            });
        }
        if let Some(trip) = tripped {
            self.skip_calls(over, &trip.to_string(), run);
            return Some(Halt::Tripped(trip));
        }
        None
    }

    fn start_block(&self, call: &ToolCallRequest) -> ToolCallBlock {
        let mut block = ToolCallBlock::queued(call);
        self.emit(AgentEvent::ToolCall {
            id: call.id.clone(),
            tool: call.name.clone(),
            args: call.arguments.clone(),
        });
        block.advance(ToolCallStatus::Running);
        self.emit(AgentEvent::ToolStatus {
            block: block.clone(),
        });
        block
    }

    fn complete_call(
        &mut self,
        call: &ToolCallRequest,
        mut block: ToolCallBlock,
        result: ToolResult,
        run: &mut RunState,
        limits: &LoopLimits,
    ) {
        run.counters.record(result.success);
        tracing::debug!(
            tool = %call.name,
            success = result.success,
            code = result.code().unwrap_or(""),
            "Tool call finished"
        );

        let content = compaction::truncate_with_marker(
            &result.to_message_content(),
            limits.max_tool_result_chars,
            TRUNCATION_MARKER,
        );
        self.conversation.push(Message::tool_result(
            &call.id,
            &call.name,
            content,
            !result.success,
        ));

        block.finish(result);
        self.emit(AgentEvent::ToolStatus {
            block: block.clone(),
        });
        run.blocks.push(block);
    }

    /// Answer calls that will not run so every request still gets a reply
    fn skip_calls(&mut self, calls: &[ToolCallRequest], reason: &str, run: &mut RunState) {
        for call in calls {
            let result = ToolResult::failure("CANCELLED", format!("Not executed: {reason}"));
            self.conversation.push(Message::tool_result(
                &call.id,
                &call.name,
                result.to_message_content(),
                true,
            ));
            let mut block = ToolCallBlock::queued(call);
            block.finish(result);
            self.emit(AgentEvent::ToolStatus {
                block: block.clone(),
            });
            run.blocks.push(block);
        }
    }

    fn finalize(&mut self, halt: Halt, run: RunState) -> RunOutcome {
        let counters = &run.counters;
        let (status, notice) = match halt {
            Halt::Completed => (RunStatus::Completed, None),
            Halt::Stopped => {
                tracing::info!(iterations = counters.iterations, "Run stopped");
                (RunStatus::Stopped, Some("[Stopped]".to_string()))
            }
            Halt::Tripped(trip) => {
                tracing::warn!(
                    breaker = trip.name(),
                    iterations = counters.iterations,
                    tool_calls = counters.tool_calls,
                    consecutive_failures = counters.consecutive_failures,
                    total_failures = counters.total_failures,
                    "Circuit breaker tripped"
                );
                (
                    RunStatus::CircuitBroken { trip },
                    Some(format!("[Stopped: {trip}]")),
                )
            }
            Halt::Failed { class, message } => {
                tracing::warn!(%class, error = %message, "Run failed");
                let hint = class.remediation_hint();
                self.emit(AgentEvent::Error {
                    message: message.clone(),
                    class,
                    hint: hint.map(String::from),
                });
                let notice = match hint {
                    Some(hint) => format!("[Error ({class}): {message}. Hint: {hint}]"),
                    None => format!("[Error ({class}): {message}]"),
                };
                (RunStatus::Failed { class, message }, Some(notice))
            }
        };

        let final_text = match &notice {
            None => run.last_text.clone(),
            Some(notice) => {
                let history_text = if run.delivered {
                    notice.clone()
                } else {
                    append_notice(&run.last_text, notice)
                };
                self.conversation.push(Message::assistant_text(history_text));
                append_notice(&run.last_text, notice)
            }
        };

        self.emit(AgentEvent::Done {
            content: final_text.clone(),
            tool_calls: run.blocks,
            status: status.clone(),
        });

        RunOutcome {
            status,
            final_text,
            iterations: run.counters.iterations,
            tool_calls: run.counters.tool_calls,
            failures: run.counters.total_failures,
            usage: run.usage,
        }
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}

fn append_notice(text: &str, notice: &str) -> String {
    if text.trim().is_empty() {
        notice.to_string()
    } else {
        format!("{text}\n\n{notice}")
    }
}
