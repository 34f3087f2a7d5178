//! Typed tool arguments and their schemas
//!
//! Model-supplied arguments are validated against the tool's JSON schema and
//! then decoded into one variant of [`ToolArgs`]. Anything that fails either
//! step becomes an `INVALID_ARGUMENTS` result.

use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{Result, ToolError};

#[derive(Debug, Clone, Deserialize)]
pub struct ReadFileArgs {
    pub path: String,
    /// 1-indexed first line
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditFileArgs {
    pub path: String,
    pub old_string: String,
    pub new_string: String,
    #[serde(default)]
    pub replace_all: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFileArgs {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathArgs {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListDirectoryArgs {
    pub path: Option<String>,
    #[serde(default)]
    pub recursive: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrepSearchArgs {
    pub pattern: String,
    pub path: Option<String>,
    pub glob: Option<String>,
    #[serde(default)]
    pub case_insensitive: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobSearchArgs {
    pub pattern: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunCommandArgs {
    pub command: String,
    pub cwd: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryArgs {
    pub query: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebFetchArgs {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionalPathArgs {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateImageArgs {
    pub prompt: String,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitDiffArgs {
    pub path: Option<String>,
    #[serde(default)]
    pub staged: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitArgs {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryWriteArgs {
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoArgs {}

/// One decoded tool call
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ToolArgs {
    ReadFile(ReadFileArgs),
    EditFile(EditFileArgs),
    CreateFile(CreateFileArgs),
    DeleteFile(PathArgs),
    ListDirectory(ListDirectoryArgs),
    GrepSearch(GrepSearchArgs),
    GlobSearch(GlobSearchArgs),
    RunCommand(RunCommandArgs),
    WebSearch(QueryArgs),
    WebFetch(WebFetchArgs),
    ReadLints(OptionalPathArgs),
    SemanticSearch(QueryArgs),
    GenerateImage(GenerateImageArgs),
    GitStatus(NoArgs),
    GitDiff(GitDiffArgs),
    GitLog(LimitArgs),
    MemoryRead(NoArgs),
    MemoryWrite(MemoryWriteArgs),
}

impl ToolArgs {
    /// Validate and decode `arguments` for tool `name`
    pub fn parse(name: &str, arguments: Value) -> Result<Self> {
        if !TOOL_NAMES.contains(&name) {
            return Err(ToolError::UnknownTool(name.to_string()));
        }
        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        let Some(validator) = VALIDATORS.get(name) else {
            return decode(name, arguments);
        };

        let errors: Vec<String> = validator
            .iter_errors(&arguments)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect();
        if !errors.is_empty() {
            return Err(ToolError::InvalidArguments(errors.join("; ")));
        }
        decode(name, arguments)
    }
}

fn decode(name: &str, arguments: Value) -> Result<ToolArgs> {
    serde_json::from_value(json!({ "tool": name, "args": arguments }))
        .map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Every tool the dispatcher knows, in schema order
pub const TOOL_NAMES: &[&str] = &[
    "read_file",
    "edit_file",
    "create_file",
    "delete_file",
    "list_directory",
    "grep_search",
    "glob_search",
    "run_command",
    "web_search",
    "web_fetch",
    "read_lints",
    "semantic_search",
    "generate_image",
    "git_status",
    "git_diff",
    "git_log",
    "memory_read",
    "memory_write",
];

fn required_string(description: &str) -> Value {
    json!({ "type": "string", "minLength": 1, "description": description })
}

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

/// Tool definitions offered to the model
pub fn tool_schemas() -> Vec<rho_ai::Tool> {
    let limit = json!({ "type": "integer", "minimum": 1, "description": "Maximum number of results" });
    vec![
        rho_ai::Tool::new(
            "read_file",
            "Read a file in the workspace. Paths without an extension are matched against common source extensions. Use offset and limit for large files.",
            schema(
                json!({
                    "path": required_string("Workspace-relative file path"),
                    "offset": { "type": "integer", "minimum": 1, "description": "First line to read (1-indexed)" },
                    "limit": { "type": "integer", "minimum": 1, "description": "Maximum number of lines" }
                }),
                &["path"],
            ),
        ),
        rho_ai::Tool::new(
            "edit_file",
            "Replace an exact, case- and whitespace-sensitive substring of a file. If old_string is not found, re-read the file and retry with its current text.",
            schema(
                json!({
                    "path": required_string("Workspace-relative file path"),
                    "old_string": required_string("Exact text to replace"),
                    "new_string": { "type": "string", "description": "Replacement text" },
                    "replace_all": { "type": "boolean", "description": "Replace every occurrence instead of requiring a unique match" }
                }),
                &["path", "old_string", "new_string"],
            ),
        ),
        rho_ai::Tool::new(
            "create_file",
            "Create a file, or overwrite it, with the given content. Parent directories are created.",
            schema(
                json!({
                    "path": required_string("Workspace-relative file path"),
                    "content": { "type": "string", "description": "Full file content" }
                }),
                &["path", "content"],
            ),
        ),
        rho_ai::Tool::new(
            "delete_file",
            "Delete a file from the workspace.",
            schema(json!({ "path": required_string("Workspace-relative file path") }), &["path"]),
        ),
        rho_ai::Tool::new(
            "list_directory",
            "List a directory. Directories end with '/'.",
            schema(
                json!({
                    "path": { "type": "string", "description": "Directory, defaults to the workspace root" },
                    "recursive": { "type": "boolean" },
                    "limit": limit
                }),
                &[],
            ),
        ),
        rho_ai::Tool::new(
            "grep_search",
            "Search file contents with a regular expression. Returns path:line: text matches.",
            schema(
                json!({
                    "pattern": required_string("Regular expression"),
                    "path": { "type": "string", "description": "File or directory to search, defaults to the workspace root" },
                    "glob": { "type": "string", "description": "Only search files matching this glob, e.g. **/*.rs" },
                    "case_insensitive": { "type": "boolean" },
                    "limit": limit
                }),
                &["pattern"],
            ),
        ),
        rho_ai::Tool::new(
            "glob_search",
            "Find files by glob pattern relative to the workspace root, e.g. src/**/*.ts.",
            schema(json!({ "pattern": required_string("Glob pattern"), "limit": limit }), &["pattern"]),
        ),
        rho_ai::Tool::new(
            "run_command",
            "Run a shell command in the workspace. Returns combined stdout and stderr and the exit code; a non-zero exit is a failure.",
            schema(
                json!({
                    "command": required_string("Shell command"),
                    "cwd": { "type": "string", "description": "Working directory relative to the workspace root" },
                    "timeout_secs": { "type": "integer", "minimum": 1, "maximum": 600 }
                }),
                &["command"],
            ),
        ),
        rho_ai::Tool::new(
            "web_search",
            "Search the web. Returns titles, URLs and snippets.",
            schema(json!({ "query": required_string("Search query"), "limit": limit }), &["query"]),
        ),
        rho_ai::Tool::new(
            "web_fetch",
            "Fetch a URL and return its readable text.",
            schema(json!({ "url": required_string("http or https URL") }), &["url"]),
        ),
        rho_ai::Tool::new(
            "read_lints",
            "Run the configured linter and return its diagnostics.",
            schema(json!({ "path": { "type": "string", "description": "Limit diagnostics to this path" } }), &[]),
        ),
        rho_ai::Tool::new(
            "semantic_search",
            "Find the files most relevant to a natural-language query.",
            schema(json!({ "query": required_string("What to look for"), "limit": limit }), &["query"]),
        ),
        rho_ai::Tool::new(
            "generate_image",
            "Generate an image from a prompt and save it in the workspace.",
            schema(
                json!({
                    "prompt": required_string("Image description"),
                    "path": { "type": "string", "description": "Where to save the image" }
                }),
                &["prompt"],
            ),
        ),
        rho_ai::Tool::new("git_status", "Show the working tree status.", schema(json!({}), &[])),
        rho_ai::Tool::new(
            "git_diff",
            "Show uncommitted changes.",
            schema(
                json!({
                    "path": { "type": "string" },
                    "staged": { "type": "boolean", "description": "Show staged changes instead" }
                }),
                &[],
            ),
        ),
        rho_ai::Tool::new("git_log", "Show recent commits.", schema(json!({ "limit": limit }), &[])),
        rho_ai::Tool::new("memory_read", "Read notes saved for this workspace.", schema(json!({}), &[])),
        rho_ai::Tool::new(
            "memory_write",
            "Save a short note for future sessions in this workspace.",
            schema(json!({ "content": required_string("The note") }), &["content"]),
        ),
    ]
}

static VALIDATORS: LazyLock<HashMap<String, jsonschema::Validator>> = LazyLock::new(|| {
    tool_schemas()
        .into_iter()
        .filter_map(|tool| match jsonschema::validator_for(&tool.parameters) {
            Ok(validator) => Some((tool.name, validator)),
            Err(e) => {
                tracing::warn!(tool = %tool.name, error = %e, "Invalid tool schema, skipping validation");
                None
            }
        })
        .collect()
});
