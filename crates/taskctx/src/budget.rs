//! Context window policy: model descriptor to usable token budget.
//!
//! Providers advertise a raw context window; the amount the conversation can
//! actually occupy is smaller, because the model needs headroom to respond
//! and token estimation is approximate. The policy here maps a window size
//! to an `effective_max` with fixed buffers for the common window sizes and
//! a proportional rule for everything else.

use serde::{Deserialize, Serialize};

/// Window assumed when the model descriptor is absent or carries no window.
pub const DEFAULT_CONTEXT_WINDOW: usize = 128_000;

/// Buffer subtracted from a 64k window.
const BUFFER_64K: usize = 27_000;

/// Buffer subtracted from a 128k window. Also the buffer applied when no
/// window is known (the default window is 128k).
const DEFAULT_BUFFER: usize = 30_000;

/// Buffer subtracted from a 200k window.
const BUFFER_200K: usize = 40_000;

/// For windows outside the known sizes: reserve this fraction of the window,
/// but never less than `MIN_PROPORTIONAL_BUFFER` tokens.
const PROPORTIONAL_BUFFER_FRACTION: f64 = 0.20;
const MIN_PROPORTIONAL_BUFFER: usize = 40_000;

/// Floor on `effective_max` after the proportional rule: at least half the
/// window, and never below this absolute minimum, so tiny windows still
/// yield a strictly positive budget.
const MIN_EFFECTIVE_MAX: usize = 1_000;

/// The slice of a model's capabilities this crate cares about. Everything
/// else about the model is opaque to context management.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Advertised context window in tokens, when known.
    pub context_window: Option<usize>,
}

/// Resolved window policy for one model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextWindowInfo {
    /// The raw context window.
    pub window: usize,
    /// The portion the conversation may occupy.
    pub effective_max: usize,
}

/// Resolve the window policy for an optional model descriptor.
///
/// An absent descriptor, or a descriptor with an absent or zero window,
/// falls back to [`DEFAULT_CONTEXT_WINDOW`]. The result's `effective_max` is
/// strictly positive for any window of at least 2 000 tokens.
pub fn context_window_info(descriptor: Option<&ModelDescriptor>) -> ContextWindowInfo {
    let window = descriptor
        .and_then(|d| d.context_window)
        .filter(|w| *w > 0)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW);

    let effective_max = match window {
        64_000 => window - BUFFER_64K,
        128_000 => window - DEFAULT_BUFFER,
        200_000 => window - BUFFER_200K,
        w => {
            let buffer =
                ((w as f64) * PROPORTIONAL_BUFFER_FRACTION).max(MIN_PROPORTIONAL_BUFFER as f64);
            let reduced = ((w as f64) - buffer).max(0.0) as usize;
            reduced.max(w / 2).max(MIN_EFFECTIVE_MAX)
        }
    };

    ContextWindowInfo {
        window,
        effective_max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_for(window: Option<usize>) -> ContextWindowInfo {
        let descriptor = window.map(|w| ModelDescriptor {
            context_window: Some(w),
        });
        context_window_info(descriptor.as_ref())
    }

    #[test]
    fn missing_descriptor_uses_default_window() {
        let info = context_window_info(None);
        assert_eq!(info.window, DEFAULT_CONTEXT_WINDOW);
        assert_eq!(info.effective_max, 128_000 - 30_000);
    }

    #[test]
    fn zero_window_treated_as_missing() {
        let info = info_for(Some(0));
        assert_eq!(info.window, DEFAULT_CONTEXT_WINDOW);
        assert_eq!(info.effective_max, 98_000);
    }

    #[test]
    fn known_window_buffers() {
        assert_eq!(info_for(Some(64_000)).effective_max, 37_000);
        assert_eq!(info_for(Some(128_000)).effective_max, 98_000);
        assert_eq!(info_for(Some(200_000)).effective_max, 160_000);
    }

    #[test]
    fn large_window_uses_proportional_buffer() {
        // 20% of 1M is 200k, which beats the 40k floor.
        assert_eq!(info_for(Some(1_000_000)).effective_max, 800_000);
    }

    #[test]
    fn mid_window_uses_flat_floor() {
        // 20% of 100k is 20k; the 40k floor wins, leaving 60k.
        assert_eq!(info_for(Some(100_000)).effective_max, 60_000);
    }

    #[test]
    fn small_window_clamps_to_half() {
        // 90k - 40k = 50k, but half the window (45k) does not beat it;
        // 60k - 40k = 20k loses to half the window (30k).
        assert_eq!(info_for(Some(90_000)).effective_max, 50_000);
        assert_eq!(info_for(Some(60_000)).effective_max, 30_000);
    }

    #[test]
    fn tiny_window_clamps_to_absolute_minimum() {
        // 1 500 - 40 000 saturates; half the window is 750; the absolute
        // floor applies.
        assert_eq!(info_for(Some(1_500)).effective_max, MIN_EFFECTIVE_MAX);
        // Any window of at least 2 000 yields a positive budget via the
        // half-window clamp.
        assert_eq!(info_for(Some(2_000)).effective_max, 1_000);
    }
}
