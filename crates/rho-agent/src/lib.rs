//! rho-agent: the tool-calling agent loop
//!
//! This crate drives multi-turn conversations with a model: it streams each
//! turn through a [`Transport`], executes requested tools through a
//! [`ToolBackend`], keeps history bounded, and stops on circuit breakers.
//! The [`parallel`] module runs many such loops as verified lanes.

pub mod agent;
pub mod batch;
pub mod block;
pub mod compaction;
pub mod context_cache;
pub mod conversation;
pub mod error;
pub mod events;
pub mod handle;
pub mod nudge;
pub mod parallel;
pub mod tool;
pub mod transport;

pub use agent::{Agent, AgentConfig, CircuitTrip, LoopLimits, RunOutcome, RunStatus};
pub use block::{ToolCallBlock, ToolCallStatus};
pub use compaction::CompressionConfig;
pub use context_cache::ContextCache;
pub use conversation::Conversation;
pub use error::{Error, Result};
pub use events::AgentEvent;
pub use handle::AgentHandle;
pub use nudge::NudgePolicy;
pub use tool::{BoxedBackend, ToolBackend, ToolResult};
pub use transport::{ProviderTransport, RetryConfig, Transport};
