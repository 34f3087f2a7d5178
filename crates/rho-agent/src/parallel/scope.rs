//! Tool backend restricted to a lane's file scope

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::tool::{BoxedBackend, ToolBackend, ToolResult, is_mutating, is_read_only};

/// Tools whose `path` argument names the file they change
const PATH_WRITING_TOOLS: &[&str] = &["edit_file", "create_file", "delete_file"];

/// Wraps a backend for one lane. Writes outside the scope are refused and
/// every file written is recorded. In read-only mode only read-only tools
/// are offered or executed.
#[derive(Clone)]
pub struct ScopedBackend {
    inner: BoxedBackend,
    scope: Vec<String>,
    read_only: bool,
    touched: Arc<Mutex<BTreeSet<String>>>,
}

impl ScopedBackend {
    pub fn new(inner: BoxedBackend, scope: Vec<String>) -> Self {
        Self {
            inner,
            // an entry that climbs out of the workspace stays literal and matches nothing
            scope: scope.iter().map(|s| normalize(s).unwrap_or_else(|| s.clone())).collect(),
            read_only: false,
            touched: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub fn read_only(inner: BoxedBackend) -> Self {
        Self {
            read_only: true,
            ..Self::new(inner, vec![])
        }
    }

    /// Files written through this backend so far, sorted
    pub fn files_touched(&self) -> Vec<String> {
        self.touched.lock().iter().cloned().collect()
    }

    /// `path` must already be normalized
    fn in_scope(&self, path: &str) -> bool {
        if self.scope.is_empty() {
            return true;
        }
        self.scope
            .iter()
            .any(|s| s.is_empty() || path == *s || path.starts_with(&format!("{s}/")))
    }
}

/// Resolve `.` and `..` lexically. `None` when the path climbs above its start.
fn normalize(path: &str) -> Option<String> {
    let path = path.trim().replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    Some(if path.starts_with('/') { format!("/{joined}") } else { joined })
}

#[async_trait]
impl ToolBackend for ScopedBackend {
    fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    fn disabled_reason(&self) -> Option<String> {
        self.inner.disabled_reason()
    }

    fn schemas(&self) -> Vec<rho_ai::Tool> {
        let schemas = self.inner.schemas();
        if self.read_only {
            schemas.into_iter().filter(|t| is_read_only(&t.name)).collect()
        } else {
            schemas
        }
    }

    async fn execute(&self, name: &str, arguments: Value, cancel: CancellationToken) -> ToolResult {
        if self.read_only && !is_read_only(name) {
            return ToolResult::failure(
                "READ_ONLY",
                format!("{name} is not available in read-only mode"),
            );
        }

        let target = match PATH_WRITING_TOOLS
            .contains(&name)
            .then(|| arguments.get("path").and_then(Value::as_str))
            .flatten()
        {
            Some(raw) => match normalize(raw) {
                Some(path) if self.in_scope(&path) => Some(path),
                None if self.scope.is_empty() => None,
                _ => {
                    return ToolResult::failure(
                        "OUT_OF_SCOPE",
                        format!(
                            "{raw} is outside this lane's file scope ({})",
                            self.scope.join(", ")
                        ),
                    );
                }
            },
            None => None,
        };

        let result = self.inner.execute(name, arguments, cancel).await;

        if result.success && is_mutating(name) {
            if let Some(path) = target {
                self.touched.lock().insert(path);
            }
        }
        result
    }
}
