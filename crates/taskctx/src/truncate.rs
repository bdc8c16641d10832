//! Reactive middle-turn eviction.
//!
//! Truncation is triggered by the *previous* request's measured token count,
//! never by an estimate of the current history. A request that overflowed is
//! evidence the conversation no longer fits; reacting to the measurement
//! keeps the behavior predictable and amortizes estimation error across
//! turns instead of re-deciding every turn.
//!
//! The first user/assistant pair is always preserved: it anchors the task
//! and keeps role alternation intact. Eviction removes an even-sized,
//! contiguous run of messages immediately after that pair, re-keys the edit
//! log across the gap, and records a truncation-notice edit against the
//! retained assistant message.

use crate::edits::{Edit, EditKind, EditLog};
use crate::{ContentBlock, Message, Role};
use tracing::{info, warn};

/// Messages preserved at the front of the history: the first user/assistant
/// pair.
pub const PRESERVED_PREFIX_MESSAGES: usize = 2;

/// Fraction of the evictable span removed per truncation.
pub const DEFAULT_TRUNCATION_FRACTION: f64 = 0.5;

/// Result of a truncation decision.
#[derive(Debug)]
pub struct TruncationOutcome {
    pub history: Vec<Message>,
    pub log: EditLog,
    pub was_truncated: bool,
}

/// Evict middle turns if the previous request exceeded `effective_budget`.
///
/// For fixed inputs the output is bit-identical; `timestamp` (stamped on the
/// notice edit) is the only non-pure input.
pub fn truncate_if_needed(
    history: Vec<Message>,
    log: EditLog,
    effective_budget: usize,
    prev_request_tokens: usize,
    fraction: f64,
    timestamp: i64,
) -> TruncationOutcome {
    if prev_request_tokens <= effective_budget {
        return TruncationOutcome {
            history,
            log,
            was_truncated: false,
        };
    }

    let total = history.len();
    let preserved = PRESERVED_PREFIX_MESSAGES;
    if total <= preserved {
        warn!(
            "previous request used {prev_request_tokens} tokens against a budget of \
             {effective_budget}, but the history has only {total} message(s); nothing to evict"
        );
        return TruncationOutcome {
            history,
            log,
            was_truncated: true,
        };
    }

    let evictable = total - preserved;
    let mut remove = ((evictable as f64) * fraction).ceil() as usize;
    // Round up to even so role alternation survives in the tail.
    if remove % 2 == 1 {
        remove += 1;
    }
    remove = remove.min(evictable);

    // Notice eligibility is judged against the pre-eviction history; the
    // preserved pair makes index 1 the same message afterwards.
    let notice_target_is_assistant_text = matches!(
        history.get(1),
        Some(Message { role: Role::Assistant, .. })
    ) && matches!(
        history.get(1).and_then(|m| m.blocks()?.first()),
        Some(ContentBlock::Text { .. })
    );

    let mut kept: Vec<Message> = Vec::with_capacity(total - remove);
    kept.extend_from_slice(&history[..preserved]);
    kept.extend_from_slice(&history[preserved + remove..]);

    let mut log = log;
    log.shift_for_eviction(preserved, remove);

    if notice_target_is_assistant_text {
        let already_noticed = log
            .latest(1, 0)
            .is_some_and(|edit| edit.kind == EditKind::AddTruncationNotice);
        if !already_noticed {
            log.append(1, Role::Assistant, 0, Edit::truncation_notice(timestamp));
        }
    } else {
        warn!(
            "message 1 is not an assistant text message; omitting the truncation notice"
        );
    }

    info!(
        "evicted {remove} of {total} message(s) after a {prev_request_tokens}-token request \
         exceeded the {effective_budget}-token budget"
    );

    TruncationOutcome {
        history: kept,
        log,
        was_truncated: true,
    }
}
