//! Interval batching of streamed text

use std::time::Duration;
use tokio::time::Instant;

/// Default flush interval for UI token batches
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(80);

/// Accumulates tokens and reports when the pending batch is due.
///
/// The batcher owns no timer. The caller sleeps until [`deadline`](Self::deadline)
/// and calls [`take`](Self::take); taking also clears the deadline, so a
/// drained batcher can never fire late.
#[derive(Debug)]
pub struct TokenBatcher {
    buffer: String,
    interval: Duration,
    deadline: Option<Instant>,
}

impl TokenBatcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            buffer: String::new(),
            interval,
            deadline: None,
        }
    }

    /// Add text; the first token of a batch arms the deadline
    pub fn push(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.interval);
        }
        self.buffer.push_str(text);
    }

    /// When the pending batch should be flushed, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the pending batch
    pub fn take(&mut self) -> Option<String> {
        self.deadline = None;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for TokenBatcher {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesces_tokens() {
        let mut b = TokenBatcher::default();
        assert!(b.deadline().is_none());
        b.push("a");
        let first = b.deadline();
        b.push("b");
        assert_eq!(b.deadline(), first);
        assert_eq!(b.take().as_deref(), Some("ab"));
        assert!(b.deadline().is_none());
        assert!(b.take().is_none());
    }

    #[test]
    fn test_empty_push_does_not_arm() {
        let mut b = TokenBatcher::default();
        b.push("");
        assert!(b.deadline().is_none());
        assert!(b.is_empty());
    }
}
