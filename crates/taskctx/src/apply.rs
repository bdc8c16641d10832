//! Pure projection of an edit log onto a raw history.
//!
//! `apply_edits` never mutates its inputs and never fails: an edit whose
//! target does not line up with the history (stale index, non-text block,
//! non-string payload) is skipped with a warning and the rest of the log
//! still applies. Only the last edit of each `(message, block)` list is
//! projected; earlier edits exist for rollback, not for application.
//!
//! Applying twice yields the same output as applying once. Replacements set
//! the block to a fixed payload, and the truncation notice is only prepended
//! when the block does not already start with it.

use crate::edits::{EditKind, EditLog};
use crate::notices::context_truncation_notice;
use crate::{ContentBlock, Message, MessageContent};
use tracing::warn;

/// Project `log` onto `history`, returning the prepared history.
pub fn apply_edits(history: &[Message], log: &EditLog) -> Vec<Message> {
    let mut prepared: Vec<Message> = history.to_vec();

    for (index, entry) in log.iter() {
        let Some(message) = prepared.get_mut(index) else {
            warn!("edit at message {index} is outside the {}-message history; skipping", history.len());
            continue;
        };
        let MessageContent::Blocks(blocks) = &mut message.content else {
            warn!("edit at message {index} targets legacy string content; skipping");
            continue;
        };

        for (&block, edits) in &entry.blocks {
            let Some(edit) = edits.last() else {
                continue;
            };
            match edit.kind {
                EditKind::ReplaceContent => {
                    let Some(target) = blocks.get_mut(block) else {
                        warn!("edit at ({index}, {block}) is outside the message's blocks; skipping");
                        continue;
                    };
                    let ContentBlock::Text { text } = target else {
                        warn!("replace_content at ({index}, {block}) targets a non-text block; skipping");
                        continue;
                    };
                    let Some(payload) = edit.payload_str() else {
                        warn!("replace_content at ({index}, {block}) has a non-string payload; skipping");
                        continue;
                    };
                    *text = payload.to_string();
                }
                EditKind::AddTruncationNotice => {
                    let Some(target) = blocks.get_mut(block) else {
                        warn!("edit at ({index}, {block}) is outside the message's blocks; skipping");
                        continue;
                    };
                    let ContentBlock::Text { text } = target else {
                        warn!("truncation notice at ({index}, {block}) targets a non-text block; skipping");
                        continue;
                    };
                    let notice = context_truncation_notice();
                    if !text.starts_with(notice) {
                        *text = format!("{notice}\n{text}");
                    }
                }
                EditKind::Other => {
                    // Reserved kind: carried in the log, never projected.
                }
            }
        }
    }

    prepared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edits::Edit;
    use crate::{Role, ToolResultContent};

    fn two_turn_history() -> Vec<Message> {
        vec![Message::user("original"), Message::assistant("reply")]
    }

    #[test]
    fn replaces_text_block_with_payload() {
        let mut log = EditLog::new();
        log.append(0, Role::User, 0, Edit::replace_content(1, "replaced"));

        let prepared = apply_edits(&two_turn_history(), &log);
        assert_eq!(prepared[0].block_text(0), Some("replaced"));
        assert_eq!(prepared[1].block_text(0), Some("reply"));
    }

    #[test]
    fn only_last_edit_applies() {
        let mut log = EditLog::new();
        log.append(0, Role::User, 0, Edit::replace_content(1, "first"));
        log.append(0, Role::User, 0, Edit::replace_content(2, "second"));

        let prepared = apply_edits(&two_turn_history(), &log);
        assert_eq!(prepared[0].block_text(0), Some("second"));
    }

    #[test]
    fn inputs_are_not_mutated() {
        let history = two_turn_history();
        let mut log = EditLog::new();
        log.append(0, Role::User, 0, Edit::replace_content(1, "replaced"));

        let _ = apply_edits(&history, &log);
        assert_eq!(history[0].block_text(0), Some("original"));
    }

    #[test]
    fn truncation_notice_prepends_once() {
        let mut log = EditLog::new();
        log.append(1, Role::Assistant, 0, Edit::truncation_notice(5));

        let history = two_turn_history();
        let once = apply_edits(&history, &log);
        let notice = context_truncation_notice();
        assert_eq!(
            once[1].block_text(0),
            Some(format!("{notice}\nreply").as_str())
        );

        // Re-applying to the projected history must not double the notice.
        let twice = apply_edits(&once, &log);
        assert_eq!(twice, once);
    }

    #[test]
    fn applier_is_idempotent() {
        let history = vec![
            Message::user("one"),
            Message::assistant("two"),
            Message::user_blocks(vec![
                ContentBlock::text("header"),
                ContentBlock::text("payload"),
            ]),
        ];
        let mut log = EditLog::new();
        log.append(0, Role::User, 0, Edit::replace_content(1, "elided"));
        log.append(1, Role::Assistant, 0, Edit::truncation_notice(2));
        log.append(2, Role::User, 1, Edit::replace_content(3, "shortened"));

        let once = apply_edits(&history, &log);
        let twice = apply_edits(&once, &log);
        assert_eq!(twice, once);
    }

    #[test]
    fn mismatched_edits_are_skipped() {
        let history = vec![
            Message::user_blocks(vec![
                ContentBlock::text("text"),
                ContentBlock::Image,
                ContentBlock::ToolResult {
                    content: ToolResultContent::Text("result".into()),
                },
            ]),
            Message {
                role: Role::Assistant,
                content: MessageContent::Text("legacy".into()),
            },
        ];

        let mut log = EditLog::new();
        // Non-text targets.
        log.append(0, Role::User, 1, Edit::replace_content(1, "x"));
        log.append(0, Role::User, 2, Edit::truncation_notice(1));
        // Block out of range.
        log.append(0, Role::User, 9, Edit::replace_content(1, "x"));
        // Message out of range.
        log.append(7, Role::User, 0, Edit::replace_content(1, "x"));
        // Legacy string content.
        log.append(1, Role::Assistant, 0, Edit::replace_content(1, "x"));
        // Non-string payload on a text block.
        log.append(
            0,
            Role::User,
            0,
            Edit {
                timestamp: 1,
                kind: EditKind::ReplaceContent,
                payload: Some(serde_json::json!(42)),
                metadata: None,
            },
        );

        // Everything is skipped; the history survives untouched.
        let prepared = apply_edits(&history, &log);
        assert_eq!(prepared, history);
    }

    #[test]
    fn other_kind_is_a_noop() {
        let mut log = EditLog::new();
        log.append(
            0,
            Role::User,
            0,
            Edit {
                timestamp: 1,
                kind: EditKind::Other,
                payload: Some(serde_json::json!({"reserved": true})),
                metadata: None,
            },
        );
        let history = two_turn_history();
        assert_eq!(apply_edits(&history, &log), history);
    }
}
