//! Streaming event types and turn assembly
//!
//! Providers yield low-level [`ProviderEvent`]s straight off the wire.
//! [`assemble_turn`] folds them into the [`TurnEvent`] sequence consumed by
//! the agent: text tokens pass through, tool-call fragments are accumulated
//! per index, and a single terminal `Done` or `Error` closes the turn.

use crate::error::{Error, ErrorClass, Result};
use crate::types::{StopReason, ToolCallRequest, Usage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use tokio_stream::{Stream, StreamExt};

/// Raw events parsed from a provider's streaming response
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// Assistant text fragment
    TextDelta(String),
    /// Partial tool call addressed by its index within the turn
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// Raw `finish_reason` reported by the backend
    Finish(String),
    /// Token usage, usually on the last chunk
    Usage(Usage),
    /// A chunk that could not be parsed and was skipped
    Malformed(String),
}

/// A stream of raw provider events
pub type ProviderEventStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent>> + Send>>;

/// Lifecycle events for one model turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// The turn has started streaming
    Start,
    /// Assistant text fragment
    Token { text: String },
    /// Partial tool call, as received
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        args_fragment: String,
    },
    /// The turn completed
    Done {
        final_text: String,
        final_tool_calls: Vec<ToolCallRequest>,
        stop_reason: StopReason,
        usage: Usage,
    },
    /// The turn failed
    Error { message: String, class: ErrorClass },
}

impl TurnEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Done { .. } | TurnEvent::Error { .. })
    }

    fn from_error(error: &Error) -> Self {
        TurnEvent::Error {
            message: error.to_string(),
            class: error.class(),
        }
    }
}

/// A stream of turn events
pub type TurnEventStream = Pin<Box<dyn Stream<Item = TurnEvent> + Send>>;

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Merges tool-call fragments keyed by their index within a turn
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment. Ids and names are taken from the first delta that
    /// carries them; argument text is concatenated.
    pub fn apply(
        &mut self,
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: &str,
    ) {
        let entry = self.calls.entry(index).or_default();
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            if entry.id.is_none() {
                entry.id = Some(id.to_string());
            }
        }
        if let Some(name) = name.filter(|s| !s.is_empty()) {
            if entry.name.is_empty() {
                entry.name = name.to_string();
            }
        }
        entry.arguments.push_str(arguments);
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Finalize into requests ordered by index. Missing ids are synthesized and
    /// argument text is parsed only here.
    pub fn finish(self) -> Vec<ToolCallRequest> {
        self.calls
            .into_iter()
            .filter(|(_, c)| c.id.is_some() || !c.name.is_empty() || !c.arguments.is_empty())
            .map(|(index, c)| ToolCallRequest {
                id: c.id.unwrap_or_else(|| format!("call_{index}")),
                name: c.name,
                arguments: parse_arguments(&c.arguments),
            })
            .collect()
    }
}

/// Parse accumulated argument text, degrading to `{"raw": text}` on failure
pub fn parse_arguments(text: &str) -> serde_json::Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Tool call arguments are not valid JSON");
            serde_json::json!({ "raw": text })
        }
    }
}

/// Fold a provider stream into turn events.
///
/// Exactly one terminal event is emitted. A transport error before any
/// finish reason is reported as `Error`; a stream whose every chunk was
/// malformed is a protocol error; a stream that ends silently with no
/// content is an error rather than an empty success.
pub fn assemble_turn(mut events: ProviderEventStream) -> TurnEventStream {
    Box::pin(async_stream::stream! {
        yield TurnEvent::Start;

        let mut text = String::new();
        let mut calls = ToolCallAccumulator::new();
        let mut finish: Option<String> = None;
        let mut usage = Usage::default();
        let mut parsed = 0usize;
        let mut malformed = 0usize;

        while let Some(item) = events.next().await {
            match item {
                Ok(ProviderEvent::TextDelta(delta)) => {
                    parsed += 1;
                    if delta.is_empty() {
                        continue;
                    }
                    text.push_str(&delta);
                    yield TurnEvent::Token { text: delta };
                }
                Ok(ProviderEvent::ToolCallDelta { index, id, name, arguments }) => {
                    parsed += 1;
                    calls.apply(index, id.as_deref(), name.as_deref(), &arguments);
                    yield TurnEvent::ToolCallDelta {
                        index,
                        id,
                        name,
                        args_fragment: arguments,
                    };
                }
                Ok(ProviderEvent::Finish(reason)) => {
                    parsed += 1;
                    finish = Some(reason);
                }
                Ok(ProviderEvent::Usage(u)) => {
                    parsed += 1;
                    usage = u;
                }
                Ok(ProviderEvent::Malformed(chunk)) => {
                    malformed += 1;
                    tracing::debug!(chunk = %chunk, "Skipping malformed stream chunk");
                }
                Err(e) => {
                    if finish.is_some() {
                        tracing::warn!(error = %e, "Stream error after finish reason, keeping turn");
                        break;
                    }
                    yield TurnEvent::from_error(&e);
                    return;
                }
            }
        }

        if finish.is_none() {
            if parsed == 0 && malformed > 0 {
                let e = Error::UnexpectedResponse(format!(
                    "none of the {malformed} response chunks could be parsed"
                ));
                yield TurnEvent::from_error(&e);
                return;
            }
            if text.is_empty() && calls.is_empty() {
                let e = Error::Sse("stream ended before a finish reason".into());
                yield TurnEvent::from_error(&e);
                return;
            }
            tracing::warn!("Stream ended without a finish reason, keeping partial turn");
        }

        let final_tool_calls = calls.finish();
        let stop_reason = if !final_tool_calls.is_empty() {
            StopReason::ToolUse
        } else {
            finish
                .as_deref()
                .and_then(StopReason::from_finish_reason)
                .unwrap_or(StopReason::Stop)
        };

        yield TurnEvent::Done {
            final_text: text,
            final_tool_calls,
            stop_reason,
            usage,
        };
    })
}
