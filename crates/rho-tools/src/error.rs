//! Tool failures and their stable codes

use rho_agent::ToolResult;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

/// Why a tool call failed. Converted into `ToolResult { success: false }`
/// with the code in `metadata.code`; never surfaced as a Rust error.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("No workspace folder is open; open one before using workspace tools")]
    NoWorkspace,

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Path is outside the workspace: {0}")]
    PathOutsideWorkspace(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    NoMatch(String),

    #[error("{0}")]
    AmbiguousMatch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unreadable response: {0}")]
    BadResponse(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Unavailable(String),
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::NoWorkspace => "NO_WORKSPACE",
            ToolError::InvalidArguments(_) => "INVALID_ARGUMENTS",
            ToolError::UnknownTool(_) => "UNKNOWN_TOOL",
            ToolError::PathOutsideWorkspace(_) => "PATH_OUTSIDE_WORKSPACE",
            ToolError::NotFound(_) => "NOT_FOUND",
            ToolError::NoMatch(_) => "NO_MATCH",
            ToolError::AmbiguousMatch(_) => "AMBIGUOUS_MATCH",
            ToolError::Io(_) => "IO",
            ToolError::Http(_) | ToolError::BadResponse(_) => "HTTP",
            ToolError::Timeout(_) => "TIMEOUT",
            ToolError::Cancelled => "CANCELLED",
            ToolError::Unavailable(_) => "UNAVAILABLE",
        }
    }

    /// Map an I/O error on `path`, keeping missing files distinct
    pub fn io(path: &str, e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => ToolError::NotFound(path.to_string()),
            _ => ToolError::Io(e),
        }
    }
}

impl From<ToolError> for ToolResult {
    fn from(e: ToolError) -> Self {
        ToolResult::failure(e.code(), e.to_string())
    }
}
