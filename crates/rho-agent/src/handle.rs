//! A cloneable handle for stopping or observing a running agent.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;

/// A cloneable handle for poking the agent from external code.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct AgentHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) tool_cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) is_running: Arc<AtomicBool>,
    /// Runs started while this is set are also stopped by it
    pub(crate) parent: Arc<Mutex<Option<CancellationToken>>>,
}

impl AgentHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            tool_cancel: Arc::new(Mutex::new(CancellationToken::new())),
            is_running: Arc::new(AtomicBool::new(false)),
            parent: Arc::new(Mutex::new(None)),
        }
    }

    /// Request a cooperative stop. A tool call already executing finishes;
    /// no further turn or tool call starts.
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    /// Stop and also cancel tool calls in flight (long shell commands, fetches).
    pub fn abort_now(&self) {
        self.cancel.lock().cancel();
        self.tool_cancel.lock().cancel();
    }

    /// Mark the start of a run. Returns false if one is already running.
    pub(crate) fn begin(&self) -> bool {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.cancel.lock() = match &*self.parent.lock() {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        *self.tool_cancel.lock() = CancellationToken::new();
        true
    }

    /// Tie future runs to an outer token, so cancelling it stops them
    pub fn link_parent(&self, parent: CancellationToken) {
        *self.parent.lock() = Some(parent);
    }

    pub(crate) fn finish(&self) {
        self.is_running.store(false, Ordering::Release);
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    pub(crate) fn tool_cancel_token(&self) -> CancellationToken {
        self.tool_cancel.lock().clone()
    }

    /// Whether the agent loop is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_is_exclusive() {
        let handle = AgentHandle::new();
        assert!(handle.begin());
        assert!(!handle.begin());
        handle.finish();
        assert!(handle.begin());
    }

    #[test]
    fn test_begin_resets_cancellation() {
        let handle = AgentHandle::new();
        handle.abort();
        assert!(handle.cancel_token().is_cancelled());
        assert!(handle.begin());
        assert!(!handle.cancel_token().is_cancelled());
    }

    #[test]
    fn test_abort_leaves_tools_running() {
        let handle = AgentHandle::new();
        handle.begin();
        handle.abort();
        assert!(handle.cancel_token().is_cancelled());
        assert!(!handle.tool_cancel_token().is_cancelled());
        handle.abort_now();
        assert!(handle.tool_cancel_token().is_cancelled());
    }

    #[test]
    fn test_parent_cancellation_reaches_runs() {
        let handle = AgentHandle::new();
        let parent = CancellationToken::new();
        handle.link_parent(parent.clone());
        parent.cancel();
        assert!(handle.begin());
        assert!(handle.cancel_token().is_cancelled());
    }
}
