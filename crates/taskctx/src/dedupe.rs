//! Duplicate file-read detection and elision.
//!
//! File content is the single largest repeat offender in an agent history: a
//! file read once as a tool result and mentioned again two turns later pays
//! its full token cost every time. The elider scans the **raw** history for
//! file-read occurrences, groups them by path, and replaces every occurrence
//! except the most recent with a short notice. The latest read is the one
//! most likely to reflect current file state, and an elision is reversible
//! through rollback, so nothing is lost for good.
//!
//! Two shapes are recognized, both only in user messages:
//!
//! - **Tool result**: block 0 is the `read_file` result header and block 1
//!   carries the file content. The content block is what gets replaced.
//! - **Mention**: an inline `<file_content path="...">...</file_content>`
//!   span anywhere in a text block. The span is rewritten in place, leaving
//!   the surrounding text intact.
//!
//! The elider works on a clone of the live log and returns it as a
//! candidate; the caller decides when the candidate becomes live.

use crate::edits::{Edit, EditLog, EditMetadata};
use crate::notices::duplicate_file_read_notice;
use crate::{ContentBlock, Message, Role};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Header line a `read_file` tool result starts with. The whole block text
/// must be the header; capture 1 is the path.
static READ_RESULT_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[read_file for '([^']+)'\] Result:$").unwrap());

/// Inline file mention. Capture 1 is the path; the full match is the span to
/// rewrite. `[\s\S]` deliberately crosses newlines.
static FILE_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<file_content path="([^"]*)">([\s\S]*?)</file_content>"#).unwrap()
});

/// One detected file read, in scan order.
#[derive(Debug)]
struct ReadOccurrence {
    message_index: usize,
    /// The block that will be rewritten if this occurrence is elided.
    block_index: usize,
    shape: OccurrenceShape,
}

#[derive(Debug)]
enum OccurrenceShape {
    ToolResult,
    Mention {
        /// The exact matched span, for in-place replacement.
        full_match: String,
    },
}

/// Scan `history` for duplicate file reads and return a candidate log: a
/// clone of `live_log` extended with one replacement edit per elided
/// occurrence. All emitted edits share `timestamp`.
///
/// Re-scanning a history whose duplicates were already elided on an earlier
/// turn appends nothing: an occurrence whose block already projects to the
/// elided text is recognized and skipped, so the log only grows when the
/// prepared history actually changes.
pub fn elide_duplicate_reads(history: &[Message], live_log: &EditLog, timestamp: i64) -> EditLog {
    let mut candidate = live_log.clone();
    let groups = group_by_path(scan_file_reads(history));

    // For blocks holding several identical mention spans, elision must leave
    // the trailing spans intact. Count, per (message, block, span), how many
    // instances the final text keeps: one per surviving occurrence.
    let mut keep_counts: HashMap<(usize, usize, &str), usize> = HashMap::new();
    for (_, occurrences) in &groups {
        if occurrences.len() < 2 {
            continue;
        }
        let kept = &occurrences[occurrences.len() - 1];
        if let OccurrenceShape::Mention { full_match } = &kept.shape {
            *keep_counts
                .entry((kept.message_index, kept.block_index, full_match.as_str()))
                .or_default() += 1;
        }
    }

    // Working text per touched block, threaded through successive elisions
    // within this call.
    let mut working: HashMap<(usize, usize), String> = HashMap::new();
    let mut elided = 0usize;

    for (path, occurrences) in &groups {
        if occurrences.len() < 2 {
            continue;
        }
        for occurrence in &occurrences[..occurrences.len() - 1] {
            let index = occurrence.message_index;
            let block = occurrence.block_index;

            let current = match working.entry((index, block)) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(entry) => {
                    match current_block_text(history, &candidate, index, block) {
                        Some(text) => entry.insert(text),
                        None => {
                            warn!(
                                "duplicate read at ({index}, {block}) has no text block to elide; skipping"
                            );
                            continue;
                        }
                    }
                }
            };

            let (new_text, metadata) = match &occurrence.shape {
                OccurrenceShape::ToolResult => {
                    let notice = duplicate_file_read_notice();
                    if current.as_str() == notice {
                        continue; // elided on a previous turn
                    }
                    (notice.to_string(), None)
                }
                OccurrenceShape::Mention { full_match } => {
                    let keep = keep_counts
                        .get(&(index, block, full_match.as_str()))
                        .copied()
                        .unwrap_or(0);
                    if current.matches(full_match.as_str()).count() <= keep {
                        continue; // elided on a previous turn
                    }
                    let elided_span = format!(
                        "<file_content path=\"{path}\">{}</file_content>",
                        duplicate_file_read_notice()
                    );
                    // Replace the leftmost remaining span; trailing spans are
                    // the ones elision keeps.
                    let rewritten = current.replacen(full_match.as_str(), &elided_span, 1);
                    let metadata = EditMetadata {
                        original_path: Some(path.clone()),
                        replaced_mention: true,
                    };
                    (rewritten, Some(metadata))
                }
            };

            *current = new_text.clone();
            let mut edit = Edit::replace_content(timestamp, new_text);
            if let Some(metadata) = metadata {
                edit = edit.with_metadata(metadata);
            }
            candidate.append(index, Role::User, block, edit);
            elided += 1;
        }
    }

    if elided > 0 {
        debug!("elided {elided} duplicate file read(s)");
    }
    candidate
}

fn scan_file_reads(history: &[Message]) -> Vec<(String, ReadOccurrence)> {
    let mut occurrences = Vec::new();

    for (message_index, message) in history.iter().enumerate() {
        if message.role != Role::User {
            continue;
        }
        let Some(blocks) = message.blocks() else {
            continue;
        };

        // Tool-result shape: header in block 0, content in block 1.
        if let Some(ContentBlock::Text { text }) = blocks.first()
            && let Some(captures) = READ_RESULT_HEADER.captures(text)
            && blocks.len() > 1
        {
            occurrences.push((
                captures[1].to_string(),
                ReadOccurrence {
                    message_index,
                    block_index: 1,
                    shape: OccurrenceShape::ToolResult,
                },
            ));
        }

        // Mention shape: every inline span in every text block.
        for (block_index, block) in blocks.iter().enumerate() {
            let Some(text) = block.as_text() else {
                continue;
            };
            for captures in FILE_MENTION.captures_iter(text) {
                occurrences.push((
                    captures[1].to_string(),
                    ReadOccurrence {
                        message_index,
                        block_index,
                        shape: OccurrenceShape::Mention {
                            full_match: captures[0].to_string(),
                        },
                    },
                ));
            }
        }
    }

    occurrences
}

/// Group occurrences into a path-keyed multimap, preserving scan order both
/// across paths and within each path's list.
fn group_by_path(occurrences: Vec<(String, ReadOccurrence)>) -> Vec<(String, Vec<ReadOccurrence>)> {
    let mut groups: Vec<(String, Vec<ReadOccurrence>)> = Vec::new();
    for (path, occurrence) in occurrences {
        match groups.iter_mut().find(|(existing, _)| *existing == path) {
            Some((_, list)) => list.push(occurrence),
            None => groups.push((path, vec![occurrence])),
        }
    }
    groups
}

/// The text the block currently projects to: the latest edit's payload when
/// one carries a string, the raw block text otherwise.
fn current_block_text(
    history: &[Message],
    log: &EditLog,
    index: usize,
    block: usize,
) -> Option<String> {
    if let Some(edit) = log.latest(index, block)
        && let Some(payload) = edit.payload_str()
    {
        return Some(payload.to_string());
    }
    Some(history.get(index)?.block_text(block)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::apply_edits;

    fn mention(path: &str, content: &str) -> String {
        format!("<file_content path=\"{path}\">{content}</file_content>")
    }

    fn read_result(path: &str, content: &str) -> Message {
        Message::user_blocks(vec![
            ContentBlock::text(format!("[read_file for '{path}'] Result:")),
            ContentBlock::text(content),
        ])
    }

    #[test]
    fn single_occurrence_is_untouched() {
        let history = vec![
            Message::user(format!("see {}", mention("a.ts", "X"))),
            Message::assistant("ok"),
        ];
        let candidate = elide_duplicate_reads(&history, &EditLog::new(), 1);
        assert!(candidate.is_empty());
    }

    #[test]
    fn mention_elision_keeps_last() {
        let history = vec![
            Message::user(format!("A {}", mention("a.ts", "X"))),
            Message::assistant("ok"),
            Message::user(format!("B {}", mention("a.ts", "X"))),
        ];

        let candidate = elide_duplicate_reads(&history, &EditLog::new(), 7);
        assert_eq!(candidate.len(), 1);
        let edit = candidate.latest(0, 0).unwrap();
        assert_eq!(edit.timestamp, 7);
        assert_eq!(
            edit.payload_str(),
            Some(format!("A {}", mention("a.ts", duplicate_file_read_notice())).as_str())
        );
        let metadata = edit.metadata.as_ref().unwrap();
        assert_eq!(metadata.original_path.as_deref(), Some("a.ts"));
        assert!(metadata.replaced_mention);

        let prepared = apply_edits(&history, &candidate);
        assert!(
            prepared[0]
                .block_text(0)
                .unwrap()
                .contains(duplicate_file_read_notice())
        );
        assert_eq!(prepared[2], history[2]);
    }

    #[test]
    fn tool_result_elision_keeps_last() {
        let history = vec![
            read_result("f", "CONTENT"),
            Message::assistant("k"),
            read_result("f", "CONTENT"),
        ];

        let candidate = elide_duplicate_reads(&history, &EditLog::new(), 1);
        assert_eq!(candidate.len(), 1);
        assert_eq!(
            candidate.latest(0, 1).unwrap().payload_str(),
            Some(duplicate_file_read_notice())
        );
        assert!(candidate.latest(0, 1).unwrap().metadata.is_none());

        let prepared = apply_edits(&history, &candidate);
        assert_eq!(
            prepared[0].block_text(1),
            Some(duplicate_file_read_notice())
        );
        assert_eq!(prepared[2].block_text(1), Some("CONTENT"));
    }

    #[test]
    fn header_without_content_block_is_not_an_occurrence() {
        let history = vec![
            Message::user_blocks(vec![ContentBlock::text("[read_file for 'f'] Result:")]),
            Message::assistant("k"),
            read_result("f", "CONTENT"),
        ];
        // Only one real occurrence of 'f', so nothing is elided.
        assert!(elide_duplicate_reads(&history, &EditLog::new(), 1).is_empty());
    }

    #[test]
    fn assistant_messages_are_not_scanned() {
        let history = vec![
            Message::assistant(mention("a.ts", "X")),
            Message::user(mention("a.ts", "X")),
        ];
        assert!(elide_duplicate_reads(&history, &EditLog::new(), 1).is_empty());
    }

    #[test]
    fn distinct_paths_are_independent() {
        let history = vec![
            Message::user(mention("a.ts", "A")),
            Message::assistant("ok"),
            Message::user(mention("b.ts", "B")),
        ];
        assert!(elide_duplicate_reads(&history, &EditLog::new(), 1).is_empty());
    }

    #[test]
    fn three_reads_elide_all_but_the_last() {
        let history = vec![
            read_result("f", "V1"),
            Message::assistant("a"),
            read_result("f", "V2"),
            Message::assistant("b"),
            read_result("f", "V3"),
        ];

        let candidate = elide_duplicate_reads(&history, &EditLog::new(), 1);
        let prepared = apply_edits(&history, &candidate);
        assert_eq!(
            prepared[0].block_text(1),
            Some(duplicate_file_read_notice())
        );
        assert_eq!(
            prepared[2].block_text(1),
            Some(duplicate_file_read_notice())
        );
        assert_eq!(prepared[4].block_text(1), Some("V3"));
    }

    #[test]
    fn repeated_mentions_in_one_block_keep_the_final_span() {
        let span = mention("a.ts", "X");
        let history = vec![Message::user(format!("{span} and {span} and {span}"))];

        let candidate = elide_duplicate_reads(&history, &EditLog::new(), 1);
        let prepared = apply_edits(&history, &candidate);
        let text = prepared[0].block_text(0).unwrap();
        assert_eq!(text.matches(duplicate_file_read_notice()).count(), 2);
        assert_eq!(text.matches(&span).count(), 1);
        // The surviving span is the trailing one.
        assert!(text.ends_with(&span));
    }

    #[test]
    fn rescan_after_elision_adds_no_edits() {
        let history = vec![
            Message::user(format!("A {}", mention("a.ts", "X"))),
            Message::assistant("ok"),
            Message::user(format!("B {}", mention("a.ts", "X"))),
            read_result("f", "CONTENT"),
            Message::assistant("k"),
            read_result("f", "CONTENT"),
        ];

        let first = elide_duplicate_reads(&history, &EditLog::new(), 1);
        let second = elide_duplicate_reads(&history, &first, 2);
        assert_eq!(second, first);
    }

    #[test]
    fn rescan_of_identical_spans_in_one_block_converges() {
        let span = mention("a.ts", "X");
        let history = vec![Message::user(format!("{span} then {span} then {span}"))];

        let first = elide_duplicate_reads(&history, &EditLog::new(), 1);
        // A second scan sees the already-elided text and must neither grow
        // the log nor consume the surviving trailing span.
        let second = elide_duplicate_reads(&history, &first, 2);
        assert_eq!(second, first);

        let text_owner = apply_edits(&history, &second);
        let text = text_owner[0].block_text(0).unwrap();
        assert_eq!(text.matches(&span).count(), 1);
        assert!(text.ends_with(&span));
    }

    #[test]
    fn mention_rewrite_reads_previously_edited_text() {
        // An earlier turn already elided one of three duplicate spans in the
        // block; a later scan must build on that text, not the raw block,
        // and must still leave the trailing span alone.
        let span = mention("a.ts", "X");
        let history = vec![Message::user(format!("{span} then {span} then {span}"))];

        let mut seeded = EditLog::new();
        let partially_elided = format!(
            "{} then {span} then {span}",
            mention("a.ts", duplicate_file_read_notice())
        );
        seeded.append(0, Role::User, 0, Edit::replace_content(1, partially_elided));

        let candidate = elide_duplicate_reads(&history, &seeded, 2);
        let prepared = apply_edits(&history, &candidate);
        let text = prepared[0].block_text(0).unwrap();
        assert_eq!(text.matches(duplicate_file_read_notice()).count(), 2);
        assert_eq!(text.matches(&span).count(), 1);
        assert!(text.ends_with(&span));
    }
}
