//! rho-ai: conversation model and streaming chat-completions client
//!
//! This crate owns the wire side of a model turn: the message types sent to
//! an OpenAI-compatible endpoint, the provider that streams its response, and
//! the assembly of raw deltas into turn events with tool calls accumulated.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, ErrorClass, Result};
pub use providers::{ModelBackend, OpenAiCompatible};
pub use stream::{ProviderEvent, ProviderEventStream, ToolCallAccumulator, TurnEvent, TurnEventStream};
pub use types::*;
