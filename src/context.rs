//! Context management utilities for manual history inspection.
//!
//! These are opt-in helpers — the engine does not truncate automatically.
//! Workflow workers or CLI callers decide when and how to manage context.

use crate::types::{ContentBlock, Message};

/// Estimate token count for a message list using a character-based
/// approximation (1 token ≈ 4 characters). Conservative across model
/// families; always leave a 10-20% safety margin when checking limits.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    if messages.is_empty() {
        return 0;
    }

    let mut total_chars = 0;

    for message in messages {
        total_chars += 8; // role formatting overhead

        for block in &message.content {
            match block {
                ContentBlock::Text(text) => total_chars += text.text.len(),
                ContentBlock::Thinking(thinking) => total_chars += thinking.thinking.len(),
                ContentBlock::ToolUse(tool) => {
                    total_chars += tool.name.len();
                    total_chars += tool.id.len();
                    total_chars += tool.input.to_string().len();
                }
                ContentBlock::ToolResult(result) => {
                    total_chars += result.tool_use_id.len();
                    total_chars += result.content.len();
                }
                ContentBlock::Image(image) => total_chars += image.url.len(),
            }
        }
    }

    total_chars += 16; // conversation-level overhead
    (total_chars + 3) / 4
}

/// Truncate message history, keeping the most recent `keep` messages. Does
/// not attempt to preserve tool-use/tool-result pairing — a domain-specific
/// implementation should do that if needed.
pub fn truncate_messages(messages: &[Message], keep: usize) -> Vec<Message> {
    if messages.len() <= keep {
        return messages.to_vec();
    }
    if keep == 0 {
        return Vec::new();
    }
    let start = messages.len().saturating_sub(keep);
    messages[start..].to_vec()
}

/// Convenience check combining estimation with a safety margin.
pub fn is_approaching_limit(messages: &[Message], limit: usize, margin: f32) -> bool {
    let estimated = estimate_tokens(messages);
    let threshold = (limit as f32 * margin) as usize;
    estimated > threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentBlock, Message};

    #[test]
    fn test_estimate_tokens_empty() {
        let messages: Vec<Message> = vec![];
        assert_eq!(estimate_tokens(&messages), 0);
    }

    #[test]
    fn test_estimate_tokens_simple() {
        let messages = vec![Message::assistant(vec![ContentBlock::text("Hello world")])];
        let tokens = estimate_tokens(&messages);
        assert!(tokens >= 3 && tokens <= 10);
    }

    #[test]
    fn test_truncate_messages_keep_recent() {
        let messages = vec![
            Message::user("one"),
            Message::user("two"),
            Message::user("three"),
            Message::user("four"),
        ];
        let truncated = truncate_messages(&messages, 2);
        assert_eq!(truncated.len(), 2);
        assert_eq!(truncated[0].text_content(), "three");
    }

    #[test]
    fn test_truncate_messages_keep_all() {
        let messages = vec![Message::user("one"), Message::user("two")];
        assert_eq!(truncate_messages(&messages, 10).len(), 2);
    }

    #[test]
    fn test_is_approaching_limit() {
        let messages = vec![Message::user("x".repeat(1000))];
        assert!(!is_approaching_limit(&messages, 1000, 0.9));
        assert!(is_approaching_limit(&messages, 200, 0.9));
    }
}
