//! Deterministic token estimation for a prepared history.
//!
//! The real tokenizer belongs to the embedder; it arrives here as a
//! [`Tokenizer`] capability (any pure `Fn(&str) -> usize` works). The
//! estimator itself is total: it never fails, and unserializable tool
//! payloads count as empty rather than erroring.

use crate::{ContentBlock, Message, MessageContent, ToolResultContent};

/// Fixed token estimate charged per image block. An approximation; callers
/// needing a different figure can wrap the estimator.
pub const IMAGE_TOKEN_ESTIMATE: usize = 1_500;

/// Flat overhead added per tool_use / tool_result block for the structural
/// tokens the serialized form does not show.
pub const TOOL_BLOCK_OVERHEAD_TOKENS: usize = 20;

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; 3.5 is a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// A pure, total text-to-token-count function.
pub trait Tokenizer {
    fn count(&self, text: &str) -> usize;
}

impl<F: Fn(&str) -> usize> Tokenizer for F {
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

/// Character-ratio heuristic tokenizer, for embedders that have not wired a
/// real tokenizer in.
#[derive(Debug, Clone, Copy)]
pub struct CharsPerToken(pub f64);

impl Default for CharsPerToken {
    fn default() -> Self {
        Self(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl Tokenizer for CharsPerToken {
    fn count(&self, text: &str) -> usize {
        (text.len() as f64 / self.0) as usize
    }
}

/// Estimate the total tokens a prepared history will occupy.
pub fn estimate_history(history: &[Message], tokenizer: &dyn Tokenizer) -> usize {
    history
        .iter()
        .map(|message| estimate_message(message, tokenizer))
        .sum()
}

fn estimate_message(message: &Message, tokenizer: &dyn Tokenizer) -> usize {
    match &message.content {
        // Legacy bare-string messages are costed as their text.
        MessageContent::Text(text) => tokenizer.count(text),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(|block| estimate_block(block, tokenizer))
            .sum(),
    }
}

fn estimate_block(block: &ContentBlock, tokenizer: &dyn Tokenizer) -> usize {
    match block {
        ContentBlock::Text { text } => tokenizer.count(text),
        ContentBlock::Image => IMAGE_TOKEN_ESTIMATE,
        ContentBlock::ToolUse { name, input } => {
            tokenizer.count(&serialize_or_empty(input))
                + tokenizer.count(name)
                + TOOL_BLOCK_OVERHEAD_TOKENS
        }
        ContentBlock::ToolResult { content } => {
            let text_tokens = match content {
                ToolResultContent::Text(text) => tokenizer.count(text),
                ToolResultContent::Structured(value) => tokenizer.count(&serialize_or_empty(value)),
            };
            text_tokens + TOOL_BLOCK_OVERHEAD_TOKENS
        }
    }
}

fn serialize_or_empty(value: &serde_json::Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
