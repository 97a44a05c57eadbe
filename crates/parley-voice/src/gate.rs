//! Mic gate — keeps the agent from hearing its own voice.
//!
//! While a turn is speaking, microphone input must be suppressed so the TTS
//! output doesn't get segmented, transcribed, and answered in an endless
//! loop. The gate is the single piece of state shared between the capture
//! side and the turn controller, so its transitions must be atomic: there
//! must be no window where the mic is live while synthesis output is about
//! to start, or muted after the agent has stopped speaking.
//!
//! Suppression is owned by a turn id. A superseded turn racing its own
//! cleanup against a newer turn's `suppress` cannot reopen the mic under
//! the newer turn: `clear` only succeeds for the owning id.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Gate value meaning "no turn is suppressing the mic".
const OPEN: u64 = 0;

/// Shared, atomically-owned microphone suppression flag.
///
/// Clones share state. Turn ids start at 1; id 0 is reserved for the open
/// gate.
#[derive(Debug, Clone)]
pub struct MicGate {
    suppressed_by: Arc<AtomicU64>,
}

impl MicGate {
    /// Create an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            suppressed_by: Arc::new(AtomicU64::new(OPEN)),
        }
    }

    /// Suppress the mic on behalf of `turn`. Replaces any previous owner.
    pub fn suppress(&self, turn: u64) {
        debug_assert_ne!(turn, OPEN);
        self.suppressed_by.store(turn, Ordering::SeqCst);
        tracing::debug!(turn, "mic gated - agent speaking");
    }

    /// Reopen the mic, but only if `turn` still owns the suppression.
    ///
    /// A stale turn clearing after a newer turn took over is a no-op.
    pub fn clear(&self, turn: u64) {
        if self
            .suppressed_by
            .compare_exchange(turn, OPEN, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::debug!(turn, "mic open - agent silent");
        }
    }

    /// Whether any turn currently suppresses the mic.
    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        self.suppressed_by.load(Ordering::SeqCst) != OPEN
    }
}

impl Default for MicGate {
    fn default() -> Self {
        Self::new()
    }
}
