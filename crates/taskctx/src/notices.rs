//! Canonical notice strings inserted into prepared histories.
//!
//! Both the edit writers (the elider and the truncator) and the
//! "already applied?" checks in the applier reference these functions so the
//! two sides can't drift out of sync. Embedders that localize the notices
//! must keep using one exact string per deployment: the idempotence checks
//! compare against the text returned here.

/// Notice prepended to the first retained assistant message after middle
/// turns have been evicted.
pub fn context_truncation_notice() -> &'static str {
    "[NOTE] Part of the earlier conversation was removed to keep the context \
     within the model's window. The initial exchange and the most recent turns \
     are retained; intermediate turns are no longer available."
}

/// Replacement text for a file read that appears again later in the history.
/// The most recent read of the file is left untouched.
pub fn duplicate_file_read_notice() -> &'static str {
    "[Duplicate file read removed to save context. The latest read of this \
     file appears later in the conversation and reflects its current state.]"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_are_distinct_and_stable() {
        assert_ne!(context_truncation_notice(), duplicate_file_read_notice());
        // Same pointer each call; these must behave as constants.
        assert_eq!(context_truncation_notice(), context_truncation_notice());
    }
}
