//! Conversation state: messages, usage, and per-session nudge bookkeeping.

use rho_ai::{Message, Usage};

/// Conversation state for one chat session
#[derive(Debug, Default, Clone)]
pub struct Conversation {
    /// Conversation messages in turn order
    pub messages: Vec<Message>,
    /// Total usage across all turns
    pub total_usage: Usage,
    /// Whether any tool call was ever requested in this session
    pub has_called_tools: bool,
    /// Whether the corrective nudge was already sent
    pub nudge_sent: bool,
}

impl Conversation {
    pub fn push(&mut self, message: Message) {
        if message.has_tool_calls() {
            self.has_called_tools = true;
        }
        self.messages.push(message);
    }
}
