//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token.
//! This approximation is accurate within ~10% for BPE tokenizers on
//! English text and keeps prompt-size accounting deterministic.

use sift_core::message::Message;
use sift_core::provider::ToolDefinition;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead.
///
/// Each message costs ~4 tokens of overhead for role name, delimiters,
/// and formatting markers in the API wire format.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let overhead = 4;
    overhead + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for a slice of tool definitions (serialized as JSON).
pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| estimate_tokens(&serde_json::to_string(t).unwrap_or_default()))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn multiple_messages() {
        let msgs = vec![
            Message::user("hello"),      // 2 tokens + 4 overhead
            Message::assistant("world"), // 2 tokens + 4 overhead
        ];
        assert_eq!(estimate_messages_tokens(&msgs), 12);
    }

    #[test]
    fn tool_definitions() {
        let tool = ToolDefinition {
            name: "search".to_string(),
            description: "Search the index".to_string(),
            parameters: serde_json::json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        };
        assert!(estimate_tools_tokens(&[tool]) > 0);
        assert_eq!(estimate_tools_tokens(&[]), 0);
    }
}
