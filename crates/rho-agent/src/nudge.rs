//! Detection of replies that announce an action without taking it

use regex::Regex;
use std::sync::LazyLock;

static DEFAULT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:I['’]ll|I will|let me|I['’]m going to|I am going to)\s+(?:now\s+|first\s+|go ahead and\s+)?(?:create|edit|run|fix|update|write|add|implement|modify|change|delete|remove|refactor|install|rename|move)\b",
    )
    .expect("default nudge pattern is valid")
});

/// Default corrective message sent to the model
pub const DEFAULT_NUDGE_MESSAGE: &str = "You described an action but did not call any tool. \
Use the available tools to actually perform it now instead of describing it.";

/// Policy for the one-time corrective nudge
#[derive(Debug, Clone)]
pub struct NudgePolicy {
    pub enabled: bool,
    pub pattern: Regex,
    pub message: String,
}

impl Default for NudgePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            pattern: DEFAULT_PATTERN.clone(),
            message: DEFAULT_NUDGE_MESSAGE.to_string(),
        }
    }
}

impl NudgePolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Whether `text` reads like an announced but untaken action
    pub fn matches(&self, text: &str) -> bool {
        self.enabled && self.pattern.is_match(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_announced_action() {
        let p = NudgePolicy::default();
        assert!(p.matches("I'll fix the bug in app.ts"));
        assert!(p.matches("Let me create the config file."));
        assert!(p.matches("I’m going to run the tests"));
        assert!(p.matches("I will now edit main.rs"));
    }

    #[test]
    fn test_ignores_plain_answers() {
        let p = NudgePolicy::default();
        assert!(!p.matches("The bug is caused by an off-by-one error."));
        assert!(!p.matches("I'll explain how this works."));
    }

    #[test]
    fn test_disabled_never_matches() {
        assert!(!NudgePolicy::disabled().matches("I'll fix it"));
    }
}
