//! Per-task context window management for LLM agent conversations.
//!
//! `taskctx` sits between an agent's append-only conversation log and a
//! token-limited chat API. Between turns, the [`ContextManager`](manager::ContextManager)
//! prepares the history that will actually be submitted:
//!
//! 1. **Duplicate file reads are elided.** When the same file appears in the
//!    history more than once (as a `read_file` tool result or an inline
//!    `<file_content>` mention), every occurrence except the most recent is
//!    replaced with a short notice. The latest read is the one most likely to
//!    reflect current file state, so it is the one that survives.
//!
//! 2. **Middle turns are evicted after an overflow.** If the *previous*
//!    request's token count exceeded the model's effective budget, a
//!    contiguous run of messages after the first user/assistant pair is
//!    dropped and a truncation notice is prepended to the first retained
//!    assistant message. The trigger is deliberately reactive: the cost of a
//!    miscount is amortized across turns instead of re-estimated eagerly.
//!
//! 3. **Every mutation is a reversible, timestamped edit.** The raw history
//!    is never modified. All elisions and notices live in an
//!    [`EditLog`](edits::EditLog) keyed by `(message index, block index)`,
//!    applied as a pure projection at submission time. Rolling back to a
//!    checkpoint is exact: drop every edit newer than the checkpoint instant.
//!
//! # Getting started
//!
//! ```ignore
//! use taskctx::manager::ContextManager;
//! use taskctx::store::FsEditLogStore;
//! use taskctx::budget::ModelDescriptor;
//!
//! let store = FsEditLogStore::new("/path/to/tasks");
//! let mut manager = ContextManager::new("task-42", Box::new(store))
//!     .with_model(Some(ModelDescriptor { context_window: Some(200_000) }))
//!     .with_reserved_response_tokens(8_192);
//!
//! // `history` is the task's raw conversation; `prev_tokens` is the token
//! // count the API reported for the previous request.
//! let outcome = manager.process(&history, prev_tokens);
//! send_to_model(&outcome.prepared_history);
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`edits`] | The timestamped edit log overlaying the raw history |
//! | [`store`] | Persistence port: load/store the edit log per task |
//! | [`budget`] | Model descriptor to `(window, effective_max)` policy |
//! | [`estimate`] | Deterministic token estimation of a prepared history |
//! | [`apply`] | Pure projection of the edit log onto a raw history |
//! | [`dedupe`] | Duplicate file-read detection and elision |
//! | [`truncate`] | Reactive middle-turn eviction |
//! | [`notices`] | Canonical notice strings |
//! | [`manager`] | The facade orchestrating all of the above |
//!
//! # Design principles
//!
//! 1. **The raw history is immutable.** Preparation is a projection, never a
//!    rewrite. The caller owns the history; this crate owns the edit log.
//!
//! 2. **The edit log is the single source of truth.** Within a task, the
//!    sequence of log states is totally ordered by the sequence of `process`
//!    and rollback calls. Deep equality of the log gates persistence.
//!
//! 3. **Nothing here is fatal.** Invalid indices, type mismatches, and
//!    persistence failures are logged and skipped. `process` always returns
//!    a submittable history, at worst the raw history itself.

pub mod apply;
pub mod budget;
pub mod dedupe;
pub mod edits;
pub mod estimate;
pub mod manager;
pub mod notices;
pub mod store;
pub mod truncate;

use serde::{Deserialize, Serialize};

// Re-export the entry points most embedders need.
pub use budget::ModelDescriptor;
pub use edits::EditLog;
pub use manager::{ContextManager, ProcessOutcome};
pub use store::FsEditLogStore;

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
///
/// The prepared history only ever contains user and assistant turns; system
/// prompts and provider bookkeeping are assembled by the caller.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Content carried by a tool result block: either plain text or a structured
/// value the tool returned as-is.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Structured(serde_json::Value),
}

/// A single content unit inside a message.
///
/// This is a closed sum: every consumer dispatches exhaustively, so adding a
/// variant is a deliberate API change rather than a silent pass-through.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text { text: String },
    /// An image. The payload is opaque to this crate; token estimation
    /// charges a fixed amount per image.
    Image,
    /// A tool invocation emitted by the assistant.
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
    /// The result of a tool invocation.
    ToolResult { content: ToolResultContent },
}

impl ContentBlock {
    /// Build a text block.
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// The text of this block, if it is a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Message content: a block sequence, or a bare string for legacy histories
/// recorded before blocks existed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A message in the raw conversation history, addressed by its zero-based
/// position. The history itself is owned by the caller and treated as
/// append-only and read-only here.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    /// A user message with a single text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::text(text)]),
        }
    }

    /// An assistant message with a single text block.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::text(text)]),
        }
    }

    /// A user message with explicit content blocks.
    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// An assistant message with explicit content blocks.
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// The message's blocks, or `None` for legacy bare-string content.
    pub fn blocks(&self) -> Option<&[ContentBlock]> {
        match &self.content {
            MessageContent::Blocks(blocks) => Some(blocks),
            MessageContent::Text(_) => None,
        }
    }

    /// The text of block `index`, if that block exists and is a text block.
    pub fn block_text(&self, index: usize) -> Option<&str> {
        self.blocks()?.get(index)?.as_text()
    }
}
