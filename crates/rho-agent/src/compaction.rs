//! History compression applied before every model turn
//!
//! Compression is deterministic and runs in two phases. Structural
//! compression keeps the most recent entries verbatim and collapses long
//! tool output and long assistant prose in older entries to a prefix. Budget
//! eviction then drops the oldest compressed entries one at a time until the
//! character total fits. Independently of both phases, every tool-role message
//! is capped so a single huge output is never sent as-is.
//!
//! Leading system messages are pinned and never compressed or evicted.

use rho_ai::Message;

/// Appended to a tool message clipped by the per-message cap
pub const TRUNCATION_MARKER: &str = "\n[... output truncated]";
/// Appended to an older entry collapsed to a prefix
pub const COMPRESSION_MARKER: &str = "\n[... earlier content compressed]";

/// Configuration for history compression
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionConfig {
    /// Entry count above which structural compression applies
    pub max_entries: usize,
    /// Number of most recent entries always kept verbatim
    pub keep_recent: usize,
    /// Hard cap for any single tool-role message, marker included
    pub max_tool_message_chars: usize,
    /// Prefix kept from older tool output
    pub older_tool_prefix_chars: usize,
    /// Prefix kept from older assistant prose
    pub older_assistant_prefix_chars: usize,
    /// Character budget for the whole history
    pub char_budget: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_entries: 40,
            keep_recent: 12,
            max_tool_message_chars: 10_000,
            older_tool_prefix_chars: 500,
            older_assistant_prefix_chars: 800,
            char_budget: 120_000,
        }
    }
}

/// Clip `text` so that the result, marker included, is at most `limit` chars.
///
/// Text already within the limit is returned unchanged, which makes the
/// operation idempotent.
pub fn truncate_with_marker(text: &str, limit: usize, marker: &str) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let marker_len = marker.chars().count();
    if limit <= marker_len {
        return text.chars().take(limit).collect();
    }
    let mut out: String = text.chars().take(limit - marker_len).collect();
    out.push_str(marker);
    out
}

/// Total character size of a history
pub fn history_chars(history: &[Message]) -> usize {
    history.iter().map(Message::char_count).sum()
}

/// Compress a history so it fits the configured bounds
pub fn compress(history: &[Message], config: &CompressionConfig) -> Vec<Message> {
    let pinned = history
        .iter()
        .take_while(|m| matches!(m, Message::System { .. }))
        .count();
    let (system, rest) = history.split_at(pinned);

    let capped: Vec<Message> = rest
        .iter()
        .map(|m| cap_tool_message(m, config.max_tool_message_chars))
        .collect();

    let total = history_chars(system) + history_chars(&capped);
    if capped.len() <= config.max_entries && total <= config.char_budget {
        let mut out = system.to_vec();
        out.extend(capped);
        return out;
    }

    let split = recent_start(&capped, config.keep_recent);
    let (older, recent) = capped.split_at(split);

    let mut older: Vec<Message> = older
        .iter()
        .map(|m| collapse_older(m, config))
        .collect();

    // Budget eviction: oldest first, taking orphaned tool results with it.
    let fixed = history_chars(system) + history_chars(recent);
    let mut older_chars = history_chars(&older);
    let mut evicted = 0usize;
    let mut drop_from = 0usize;
    while fixed + older_chars > config.char_budget && drop_from < older.len() {
        older_chars -= older[drop_from].char_count();
        drop_from += 1;
        evicted += 1;
        while drop_from < older.len() && matches!(older[drop_from], Message::Tool { .. }) {
            older_chars -= older[drop_from].char_count();
            drop_from += 1;
            evicted += 1;
        }
    }
    older.drain(..drop_from);

    if evicted > 0 {
        tracing::debug!(
            evicted,
            kept = older.len() + recent.len(),
            chars = fixed + older_chars,
            "History compressed"
        );
    }
    if fixed > config.char_budget {
        tracing::warn!(
            chars = fixed,
            budget = config.char_budget,
            "Recent history alone exceeds the character budget"
        );
    }

    let mut out = Vec::with_capacity(system.len() + older.len() + recent.len());
    out.extend_from_slice(system);
    out.extend(older);
    out.extend_from_slice(recent);
    out
}

/// Index where the verbatim window starts. The window never begins with a
/// tool result, so it always includes the assistant turn that requested it.
fn recent_start(entries: &[Message], keep_recent: usize) -> usize {
    let mut start = entries.len().saturating_sub(keep_recent);
    while start > 0 && matches!(entries[start], Message::Tool { .. }) {
        start -= 1;
    }
    start
}

fn cap_tool_message(message: &Message, limit: usize) -> Message {
    match message {
        Message::Tool { content, .. } if content.chars().count() > limit => {
            replace_text(message, truncate_with_marker(content, limit, TRUNCATION_MARKER))
        }
        _ => message.clone(),
    }
}

fn collapse_older(message: &Message, config: &CompressionConfig) -> Message {
    match message {
        Message::Tool { content, .. } if content.chars().count() > config.older_tool_prefix_chars => {
            replace_text(
                message,
                truncate_with_marker(content, config.older_tool_prefix_chars, COMPRESSION_MARKER),
            )
        }
        Message::Assistant {
            content: Some(text),
            tool_calls,
            ..
        } if tool_calls.is_empty() && text.chars().count() > config.older_assistant_prefix_chars => {
            replace_text(
                message,
                truncate_with_marker(text, config.older_assistant_prefix_chars, COMPRESSION_MARKER),
            )
        }
        _ => message.clone(),
    }
}

fn replace_text(message: &Message, text: String) -> Message {
    let mut out = message.clone();
    match &mut out {
        Message::System { content } | Message::User { content, .. } | Message::Tool { content, .. } => {
            *content = text;
        }
        Message::Assistant { content, .. } => *content = Some(text),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rho_ai::ToolCallRequest;
    use serde_json::json;

    fn small_config() -> CompressionConfig {
        CompressionConfig {
            max_entries: 6,
            keep_recent: 3,
            max_tool_message_chars: 100,
            older_tool_prefix_chars: 30,
            older_assistant_prefix_chars: 40,
            char_budget: 400,
        }
    }

    fn tool_turn(i: usize, output_len: usize) -> Vec<Message> {
        let id = format!("c{i}");
        vec![
            Message::assistant(
                None,
                vec![ToolCallRequest::new(&id, "read_file", json!({"path": "f"}))],
            ),
            Message::tool_result(&id, "read_file", "x".repeat(output_len), false),
        ]
    }

    fn long_history(turns: usize, output_len: usize) -> Vec<Message> {
        let mut h = vec![Message::system("sys"), Message::user("go")];
        for i in 0..turns {
            h.extend(tool_turn(i, output_len));
        }
        h.push(Message::assistant_text("y".repeat(200)));
        h
    }

    #[test]
    fn test_truncate_with_marker_respects_limit() {
        let out = truncate_with_marker(&"a".repeat(50), 30, TRUNCATION_MARKER);
        assert!(out.chars().count() <= 30);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(truncate_with_marker("short", 30, TRUNCATION_MARKER), "short");
    }

    #[test]
    fn test_under_cap_still_caps_tool_messages() {
        let config = CompressionConfig {
            char_budget: 1_000_000,
            ..small_config()
        };
        let history = vec![
            Message::user("hi"),
            Message::tool_result("c1", "run_command", "z".repeat(5_000), false),
        ];
        let out = compress(&history, &config);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], history[0]);
        assert!(out[1].text().chars().count() <= 100);
        assert!(out[1].text().ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_over_budget_fits_and_keeps_recent_verbatim() {
        let config = small_config();
        let history = long_history(10, 90);
        assert!(history_chars(&history) > config.char_budget);

        let out = compress(&history, &config);
        assert!(history_chars(&out) <= config.char_budget);

        let n = config.keep_recent;
        assert_eq!(&out[out.len() - n..], &history[history.len() - n..]);
        assert_eq!(out[0], Message::system("sys"));
    }

    #[test]
    fn test_compress_is_idempotent() {
        let config = small_config();
        for history in [long_history(10, 90), long_history(4, 20), long_history(30, 500)] {
            let once = compress(&history, &config);
            let twice = compress(&once, &config);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_older_entries_are_collapsed() {
        let config = CompressionConfig {
            char_budget: 1_000_000,
            ..small_config()
        };
        let history = long_history(5, 90);
        let out = compress(&history, &config);
        assert_eq!(out.len(), history.len());
        // The first tool result is older than the recent window.
        let first_tool = out.iter().find(|m| m.role() == "tool").unwrap();
        assert!(first_tool.text().chars().count() <= 30);
        assert!(first_tool.text().ends_with(COMPRESSION_MARKER));
    }

    #[test]
    fn test_recent_window_never_starts_with_tool_result() {
        let mut history = vec![Message::user("go")];
        for i in 0..6 {
            history.extend(tool_turn(i, 10));
        }
        // keep_recent of 3 would start on a tool result; it must extend back.
        let config = CompressionConfig {
            max_entries: 4,
            keep_recent: 3,
            ..small_config()
        };
        assert_eq!(recent_start(&history[..history.len() - 1], 2), history.len() - 4);
        let out = compress(&history, &config);
        let first_kept_tool = out.iter().position(|m| m.role() == "tool").unwrap();
        assert!(first_kept_tool > 0);
        assert!(out[first_kept_tool - 1].has_tool_calls());
    }

    #[test]
    fn test_eviction_does_not_orphan_tool_results() {
        let config = CompressionConfig {
            char_budget: 150,
            ..small_config()
        };
        let history = long_history(8, 90);
        let out = compress(&history, &config);
        for (i, m) in out.iter().enumerate() {
            if m.role() == "tool" {
                assert!(i > 0);
                let prev = &out[i - 1];
                assert!(prev.has_tool_calls() || prev.role() == "tool");
            }
        }
    }

    #[test]
    fn test_recent_window_over_budget_is_kept_whole() {
        let config = CompressionConfig {
            char_budget: 150,
            ..small_config()
        };
        let history = long_history(6, 90);
        let n = config.keep_recent;
        assert!(history_chars(&history[history.len() - n..]) > config.char_budget);

        let out = compress(&history, &config);

        // Every older entry is evicted; the system prompt and recent window survive verbatim.
        assert_eq!(out.len(), 1 + n);
        assert_eq!(out[0], Message::system("sys"));
        assert_eq!(&out[1..], &history[history.len() - n..]);
        assert!(history_chars(&out) > config.char_budget);
        assert_eq!(compress(&out, &config), out);
    }
}
