//! Workspace root binding and path resolution

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, ToolError};

/// Directories skipped by every walking tool
pub const IGNORED_DIRS: &[&str] = &[".git", "node_modules", "target", ".rho"];

/// The directory tools operate in. Unbound means tools are disabled.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    root: Option<PathBuf>,
}

impl Workspace {
    pub fn new(root: Option<PathBuf>) -> Self {
        let root = root.map(|r| std::fs::canonicalize(&r).unwrap_or(r));
        Self { root }
    }

    pub fn root(&self) -> Result<&Path> {
        self.root.as_deref().ok_or(ToolError::NoWorkspace)
    }

    pub fn is_bound(&self) -> bool {
        self.root.is_some()
    }

    /// Resolve a workspace-relative (or absolute) path, refusing anything
    /// that escapes the root. Resolution is lexical.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let root = self.root()?;
        let path = path.trim();
        if path.is_empty() {
            return Err(ToolError::InvalidArguments("path must not be empty".into()));
        }
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            root.join(candidate)
        };
        let normalized = normalize(&joined);
        if !normalized.starts_with(root) {
            return Err(ToolError::PathOutsideWorkspace(path.to_string()));
        }
        Ok(normalized)
    }

    /// Display form of `path` relative to the root, with forward slashes
    pub fn relative(&self, path: &Path) -> String {
        let rel = match self.root.as_deref() {
            Some(root) => path.strip_prefix(root).unwrap_or(path),
            None => path,
        };
        let s = rel.to_string_lossy().replace('\\', "/");
        if s.is_empty() { ".".to_string() } else { s }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Whether a walk should descend into or report this entry
pub fn is_ignored(name: &str) -> bool {
    IGNORED_DIRS.contains(&name)
}
