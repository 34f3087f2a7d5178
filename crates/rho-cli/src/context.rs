//! Project context file loading
//!
//! Context files (AGENTS.md, or CLAUDE.md as a fallback) are collected from:
//! 1. Global: `<config_dir>/rho/AGENTS.md`
//! 2. Directories from the repository root down to the workspace root
//!
//! Later files take priority, so they come last. The assembled text is
//! cached per session because every new conversation needs it again.

use std::path::{Path, PathBuf};

use rho_agent::ContextCache;
use rho_agent::context_cache::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL};

/// Names of context files to look for, in order of preference
const CONTEXT_FILE_NAMES: &[&str] = &["AGENTS.md", "CLAUDE.md"];
const SEPARATOR: &str = "\n\n---\n\n";

/// Assembled project context, cached per session id
pub struct ProjectContext {
    workspace: Option<PathBuf>,
    global_dir: Option<PathBuf>,
    cache: ContextCache<Option<String>>,
}

impl ProjectContext {
    pub fn new(workspace: Option<PathBuf>) -> Self {
        Self {
            workspace,
            global_dir: dirs::config_dir().map(|d| d.join("rho")),
            cache: ContextCache::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES),
        }
    }

    #[cfg(test)]
    fn with_ttl(
        workspace: Option<PathBuf>,
        global_dir: Option<PathBuf>,
        ttl: std::time::Duration,
    ) -> Self {
        Self {
            workspace,
            global_dir,
            cache: ContextCache::new(ttl, DEFAULT_MAX_ENTRIES),
        }
    }

    /// Context for `session`, read from disk at most once per TTL
    pub fn for_session(&self, session: &str) -> Option<String> {
        if let Some(cached) = self.cache.get(session) {
            return cached;
        }
        let loaded = self.load();
        tracing::debug!(session, found = loaded.is_some(), "Assembled project context");
        self.cache.put(session, loaded.clone());
        loaded
    }

    /// Forget a session's context so the next run re-reads the files
    pub fn invalidate(&self, session: &str) {
        self.cache.evict(session);
        self.cache.purge_expired();
    }

    fn load(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(global) = self.global_dir.as_deref().and_then(load_context_from_dir) {
            parts.push(global);
        }
        if let Some(workspace) = self.workspace.as_deref() {
            for dir in dirs_from_repo_root(workspace) {
                if let Some(content) = load_context_from_dir(&dir) {
                    parts.push(content);
                }
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(SEPARATOR))
        }
    }
}

/// `start` and its ancestors up to the enclosing repository root, outermost first.
/// Outside a repository only `start` itself is searched.
fn dirs_from_repo_root(start: &Path) -> Vec<PathBuf> {
    let Some(root) = find_repo_root(start) else {
        return vec![start.to_path_buf()];
    };
    let mut dirs: Vec<PathBuf> = start
        .ancestors()
        .take_while(|dir| dir.starts_with(&root))
        .map(Path::to_path_buf)
        .collect();
    dirs.reverse();
    dirs
}

fn find_repo_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

fn load_context_from_dir(dir: &Path) -> Option<String> {
    CONTEXT_FILE_NAMES.iter().find_map(|name| {
        let content = std::fs::read_to_string(dir.join(name)).ok()?;
        let content = content.trim();
        (!content.is_empty()).then(|| content.to_string())
    })
}
