//! Error types for rho-agent

use thiserror::Error;

/// Result type alias using rho-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during agent operations.
///
/// Tool failures are not errors; they come back as `ToolResult { success: false }`.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the model endpoint layer
    #[error(transparent)]
    Ai(#[from] rho_ai::Error),

    /// A run is already in progress for this agent
    #[error("Agent is already running")]
    Busy,

    /// Planning, verification or lane bookkeeping failed
    #[error("Orchestration error: {0}")]
    Orchestration(String),

    /// A generic agent error
    #[error("{0}")]
    Other(String),
}
