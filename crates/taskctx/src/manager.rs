//! The facade orchestrating context preparation for one task.
//!
//! A [`ContextManager`] owns the task's live edit log and its capabilities
//! (store, tokenizer, clock) and exposes three operations:
//!
//! - [`process`](ContextManager::process) — prepare the raw history for the
//!   next request: elide duplicate file reads, apply the edit log, evict
//!   middle turns if the previous request overflowed, and persist the log if
//!   it changed.
//! - [`update_model`](ContextManager::update_model) — swap the model
//!   descriptor the budget policy is resolved against.
//! - [`rollback_at_timestamp`](ContextManager::rollback_at_timestamp) —
//!   restore the edit log to its state at a checkpoint instant.
//!
//! One `process` call per task at a time; serializing calls per task id is
//! the scheduler's job. Calls for different task ids share no mutable state.
//! Nothing in here panics or propagates errors: persistence failures and
//! malformed edits are logged and the call still returns a submittable
//! history.

use crate::apply::apply_edits;
use crate::budget::{ContextWindowInfo, ModelDescriptor, context_window_info};
use crate::dedupe::elide_duplicate_reads;
use crate::edits::EditLog;
use crate::estimate::{CharsPerToken, Tokenizer, estimate_history};
use crate::store::EditLogStore;
use crate::truncate::{DEFAULT_TRUNCATION_FRACTION, truncate_if_needed};
use crate::Message;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Wall-clock capability. Monotonicity is not required; only a consistent
/// ordering within a single call is relied upon.
pub trait Clock {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// System wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// What one preparation produced.
#[derive(Debug)]
pub struct ProcessOutcome {
    /// The history to submit: the raw history with all edits projected and,
    /// possibly, middle turns evicted.
    pub prepared_history: Vec<Message>,
    /// Snapshot of the live edit log after this call.
    pub log: EditLog,
    /// Estimated tokens the prepared history occupies.
    pub tokens_used: usize,
    /// Whether this call evicted messages (or wanted to but the history was
    /// too short).
    pub was_truncated: bool,
}

/// Per-task context preparation facade.
pub struct ContextManager {
    task_id: String,
    store: Box<dyn EditLogStore>,
    tokenizer: Box<dyn Tokenizer>,
    clock: Box<dyn Clock>,
    live_log: EditLog,
    /// The log is loaded lazily on the first `process`/rollback call.
    loaded: bool,
    model: Option<ModelDescriptor>,
    truncation_fraction: f64,
    reserved_response_tokens: usize,
    token_buffer: usize,
    warned_missing_model: bool,
}

impl ContextManager {
    /// Create a manager for `task_id` with default capabilities: the
    /// character-ratio tokenizer, the system clock, no model descriptor, and
    /// no reserves.
    pub fn new(task_id: impl Into<String>, store: Box<dyn EditLogStore>) -> Self {
        Self {
            task_id: task_id.into(),
            store,
            tokenizer: Box::new(CharsPerToken::default()),
            clock: Box::new(SystemClock),
            live_log: EditLog::new(),
            loaded: false,
            model: None,
            truncation_fraction: DEFAULT_TRUNCATION_FRACTION,
            reserved_response_tokens: 0,
            token_buffer: 0,
            warned_missing_model: false,
        }
    }

    /// Use a real tokenizer instead of the character-ratio heuristic.
    pub fn with_tokenizer(mut self, tokenizer: impl Tokenizer + 'static) -> Self {
        self.tokenizer = Box::new(tokenizer);
        self
    }

    /// Override the clock (tests want a fixed one).
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Set the initial model descriptor.
    pub fn with_model(mut self, model: Option<ModelDescriptor>) -> Self {
        self.model = model;
        self
    }

    /// Override the fraction of the evictable span removed per truncation.
    pub fn with_truncation_fraction(mut self, fraction: f64) -> Self {
        self.truncation_fraction = fraction;
        self
    }

    /// Tokens reserved for the model's response.
    pub fn with_reserved_response_tokens(mut self, tokens: usize) -> Self {
        self.reserved_response_tokens = tokens;
        self
    }

    /// Safety margin subtracted from the budget on top of the response
    /// reserve.
    pub fn with_token_buffer(mut self, tokens: usize) -> Self {
        self.token_buffer = tokens;
        self
    }

    /// The task this manager serves.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The live edit log.
    pub fn edit_log(&self) -> &EditLog {
        &self.live_log
    }

    /// Prepare `raw_history` for the next request. `prev_request_tokens` is
    /// the token count the API reported for the previous request; it alone
    /// decides whether truncation runs this turn.
    pub fn process(&mut self, raw_history: &[Message], prev_request_tokens: usize) -> ProcessOutcome {
        self.ensure_loaded();

        // Elide duplicate file reads into a candidate log seeded with the
        // live log, then project the candidate. The live log's edits keep
        // their original timestamps; only new edits get this call's instant.
        let timestamp = self.clock.now_ms();
        let candidate = elide_duplicate_reads(raw_history, &self.live_log, timestamp);
        let optimized = apply_edits(raw_history, &candidate);

        let info = self.window_info();
        let effective_budget = info
            .effective_max
            .saturating_sub(self.reserved_response_tokens)
            .saturating_sub(self.token_buffer);
        if effective_budget == 0 {
            error!(
                "effective context budget underflowed (window {}, effective max {}, reserved {}, \
                 buffer {}); returning the raw history untouched",
                info.window, info.effective_max, self.reserved_response_tokens, self.token_buffer
            );
            return ProcessOutcome {
                prepared_history: raw_history.to_vec(),
                log: self.live_log.clone(),
                tokens_used: estimate_history(raw_history, self.tokenizer.as_ref()),
                was_truncated: false,
            };
        }

        let outcome = truncate_if_needed(
            optimized,
            candidate,
            effective_budget,
            prev_request_tokens,
            self.truncation_fraction,
            timestamp,
        );
        // Project once more so a freshly recorded truncation notice shows up
        // in the prepared text. Re-applying already-projected edits is
        // idempotent.
        let prepared_history = apply_edits(&outcome.history, &outcome.log);
        let tokens_used = estimate_history(&prepared_history, self.tokenizer.as_ref());
        debug!(
            "prepared {} message(s), ~{tokens_used} tokens against a budget of {effective_budget}",
            prepared_history.len()
        );

        if outcome.log != self.live_log {
            self.live_log = outcome.log;
            self.persist();
        }

        ProcessOutcome {
            prepared_history,
            log: self.live_log.clone(),
            tokens_used,
            was_truncated: outcome.was_truncated,
        }
    }

    /// Replace the model descriptor if it differs structurally from the
    /// current one.
    pub fn update_model(&mut self, model: Option<ModelDescriptor>) {
        if model == self.model {
            return;
        }
        info!(
            "model for task {} changed: context window {:?} -> {:?}",
            self.task_id,
            self.model.as_ref().and_then(|m| m.context_window),
            model.as_ref().and_then(|m| m.context_window),
        );
        self.model = model;
        self.warned_missing_model = false;
    }

    /// Drop every edit recorded after `timestamp`, restoring the log to its
    /// state at that instant. Persists only if the log changed.
    pub fn rollback_at_timestamp(&mut self, timestamp: i64) {
        self.ensure_loaded();
        if self.live_log.retain_through(timestamp) {
            debug!("rolled edit log for task {} back to {timestamp}", self.task_id);
            self.persist();
        }
    }

    fn window_info(&mut self) -> ContextWindowInfo {
        let info = context_window_info(self.model.as_ref());
        let missing = self
            .model
            .as_ref()
            .and_then(|m| m.context_window)
            .unwrap_or(0)
            == 0;
        if missing && !self.warned_missing_model {
            warn!(
                "no context window known for task {}; assuming {} tokens",
                self.task_id, info.window
            );
            self.warned_missing_model = true;
        }
        info
    }

    fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;
        match self.store.load(&self.task_id) {
            Ok(log) => self.live_log = log,
            Err(e) => {
                warn!(
                    "failed to load edit log for task {}: {e}; starting with an empty log",
                    self.task_id
                );
            }
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.store(&self.task_id, &self.live_log) {
            warn!("failed to persist edit log for task {}: {e}", self.task_id);
        }
    }
}
