//! rho-tools: the built-in tool registry
//!
//! [`Dispatcher`] validates each call against its JSON schema, decodes it
//! into a typed [`ToolArgs`] variant, resolves paths inside the bound
//! workspace and runs it. It implements [`rho_agent::ToolBackend`].

pub mod args;
pub mod dispatcher;
pub mod error;
pub mod tools;
pub mod workspace;

pub use args::{TOOL_NAMES, ToolArgs, tool_schemas};
pub use dispatcher::{Dispatcher, ToolsConfig};
pub use error::{Result, ToolError};
pub use workspace::Workspace;
