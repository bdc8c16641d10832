//! The timestamped edit log overlaying a raw conversation history.
//!
//! Every mutation the crate makes (file-read elision, truncation notices) is
//! recorded here as an [`Edit`] keyed by `(message index, block index)`
//! instead of rewriting the history. Within a block's list, order is append
//! order and only the **last** edit is ever applied; earlier edits are kept
//! solely so rollback can restore the state at any past instant.
//!
//! Two rewrite primitives support the lifecycle:
//! [`EditLog::retain_through`] (checkpoint rollback) and
//! [`EditLog::shift_for_eviction`] (index re-keying after middle turns are
//! evicted).

use crate::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What an edit does when projected onto its target block.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    /// Replace the full text of the target text block with the payload.
    ReplaceContent,
    /// Prepend the canonical truncation notice to the target text block.
    AddTruncationNotice,
    /// Reserved. Applied as a no-op.
    Other,
}

impl EditKind {
    /// Wire name used in the persisted representation.
    pub fn as_str(self) -> &'static str {
        match self {
            EditKind::ReplaceContent => "replace_content",
            EditKind::AddTruncationNotice => "add_truncation_notice",
            EditKind::Other => "other",
        }
    }

    /// Parse a wire name. Unknown names are rejected so malformed persisted
    /// entries can be dropped instead of misapplied.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "replace_content" => Some(EditKind::ReplaceContent),
            "add_truncation_notice" => Some(EditKind::AddTruncationNotice),
            "other" => Some(EditKind::Other),
            _ => None,
        }
    }
}

/// Structured hints recorded alongside an edit.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct EditMetadata {
    /// Path of the file whose content this edit elided.
    #[serde(rename = "originalPath", skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
    /// Whether the edit replaced an inline `<file_content>` mention (as
    /// opposed to a tool-result block).
    #[serde(rename = "replacedMention", default, skip_serializing_if = "std::ops::Not::not")]
    pub replaced_mention: bool,
}

/// A single timestamped mutation targeting one `(message, block)` pair.
///
/// Timestamps are wall-clock milliseconds at creation. Uniqueness is not
/// required; ordering within a block's list is append order.
#[derive(Clone, Debug, PartialEq)]
pub struct Edit {
    pub timestamp: i64,
    pub kind: EditKind,
    /// For [`EditKind::ReplaceContent`], the new full text of the target
    /// block (a JSON string). Absent for notices; opaque for `Other`.
    pub payload: Option<serde_json::Value>,
    pub metadata: Option<EditMetadata>,
}

impl Edit {
    /// A content replacement carrying the new full text.
    pub fn replace_content(timestamp: i64, payload: impl Into<String>) -> Self {
        Self {
            timestamp,
            kind: EditKind::ReplaceContent,
            payload: Some(serde_json::Value::String(payload.into())),
            metadata: None,
        }
    }

    /// A truncation notice marker. The notice text itself is canonical and
    /// supplied at application time, so the edit carries no payload.
    pub fn truncation_notice(timestamp: i64) -> Self {
        Self {
            timestamp,
            kind: EditKind::AddTruncationNotice,
            payload: None,
            metadata: None,
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: EditMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// The payload as a string, if present and a string.
    pub fn payload_str(&self) -> Option<&str> {
        self.payload.as_ref().and_then(serde_json::Value::as_str)
    }
}

/// All edits recorded against one message: the role the message had when it
/// was first edited, and per-block edit lists.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageEdits {
    /// Role of the raw message when its first edit was added. Never rewritten
    /// afterwards, so it stays meaningful across index re-keying.
    pub edit_type: Role,
    pub blocks: BTreeMap<usize, Vec<Edit>>,
}

impl MessageEdits {
    pub fn new(edit_type: Role) -> Self {
        Self {
            edit_type,
            blocks: BTreeMap::new(),
        }
    }
}

/// Mapping from message index to that message's recorded edits.
///
/// Deep structural equality (`PartialEq`) is what "changed" means for
/// persistence gating: the manager stores the log only when the projection
/// inputs actually differ.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EditLog {
    entries: BTreeMap<usize, MessageEdits>,
}

impl EditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: usize) -> Option<&MessageEdits> {
        self.entries.get(&index)
    }

    pub fn set(&mut self, index: usize, entry: MessageEdits) {
        self.entries.insert(index, entry);
    }

    pub fn remove(&mut self, index: usize) -> Option<MessageEdits> {
        self.entries.remove(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &MessageEdits)> {
        self.entries.iter().map(|(index, entry)| (*index, entry))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of message entries with at least one edit.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Append an edit to `(index, block)`. The message's `edit_type` is
    /// recorded from `role` on first touch and left alone afterwards.
    pub fn append(&mut self, index: usize, role: Role, block: usize, edit: Edit) {
        self.entries
            .entry(index)
            .or_insert_with(|| MessageEdits::new(role))
            .blocks
            .entry(block)
            .or_default()
            .push(edit);
    }

    /// The last edit recorded for `(index, block)`, which is the only one the
    /// applier projects.
    pub fn latest(&self, index: usize, block: usize) -> Option<&Edit> {
        self.entries.get(&index)?.blocks.get(&block)?.last()
    }

    /// Drop every edit newer than `timestamp`, pruning block lists and
    /// message entries that become empty. Returns whether anything changed.
    ///
    /// This is the rollback primitive: the log moves back along append order
    /// to its state at `timestamp`. There is no branching to reconcile.
    pub fn retain_through(&mut self, timestamp: i64) -> bool {
        let mut changed = false;
        self.entries.retain(|_, entry| {
            entry.blocks.retain(|_, edits| {
                let before = edits.len();
                edits.retain(|edit| edit.timestamp <= timestamp);
                if edits.len() != before {
                    changed = true;
                }
                !edits.is_empty()
            });
            !entry.blocks.is_empty()
        });
        changed
    }

    /// Re-key entries after the half-open message range
    /// `[start, start + removed)` was evicted: entries below `start` keep
    /// their index, entries inside the range are discarded, and entries above
    /// it shift down by exactly `removed`.
    pub fn shift_for_eviction(&mut self, start: usize, removed: usize) {
        if removed == 0 {
            return;
        }
        let entries = std::mem::take(&mut self.entries);
        for (index, entry) in entries {
            if index < start {
                self.entries.insert(index, entry);
            } else if index >= start + removed {
                self.entries.insert(index - removed, entry);
            }
            // Entries inside the evicted range are dropped with the messages
            // they targeted.
        }
    }
}
