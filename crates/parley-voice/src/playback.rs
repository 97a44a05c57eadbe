//! Playback controller — the state machine for synthesized speech output.
//!
//! One TTS utterance is one playback session: chunks stream in lazily, a
//! small pre-roll is buffered to mask first-chunk latency, and output then
//! follows arrival order with no reordering or skipping. Pause, resume, and
//! interrupt are safe to call from a different task than the one driving the
//! streaming loop; they share only a status watch and a cancellation token,
//! never the audio buffers themselves.
//!
//! ```text
//!   Idle → Buffering → Playing ⇄ Paused
//!                 │         │
//!                 └──── interrupt ────→ Stopped
//!                           │
//!                      (drained) → Idle
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use parley_core::audio::AudioChunk;
use parley_core::config::PlaybackConfig;
use parley_core::error::AgentError;
use parley_core::ports::{OutputSink, SpeechStream};

/// How often the drain wait re-checks the sink once the chunk stream is
/// exhausted.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Current state of the playback controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    /// No session active.
    Idle,

    /// Collecting initial synthesized chunks before starting output.
    Buffering,

    /// Audio is streaming to the output device.
    Playing,

    /// Output paused; queued audio is retained.
    Paused,

    /// Session halted by interrupt or output failure.
    Stopped,
}

impl PlaybackState {
    /// Whether a session is in progress (the agent counts as speaking).
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Buffering | Self::Playing | Self::Paused)
    }
}

/// How a playback session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackFinish {
    /// The chunk stream was exhausted and the device drained.
    Completed,

    /// The session was interrupted before completion.
    Interrupted,
}

struct Shared {
    state: watch::Sender<PlaybackState>,

    /// The current session, replaced on every `play`.
    session: Mutex<Session>,
}

struct Session {
    /// Cancellation token observed by the session's streaming loop.
    token: CancellationToken,

    /// Monotonic session number. A session that is no longer current must
    /// not touch the sink or the state on its way out.
    seq: u64,
}

/// Controller for synthesized-speech output over an [`OutputSink`].
///
/// Clones share state: one clone drives [`play`](Self::play) inside the turn
/// pipeline while another answers `pause`/`resume`/`interrupt` from the turn
/// controller.
#[derive(Clone)]
pub struct PlaybackController {
    sink: Arc<dyn OutputSink>,
    shared: Arc<Shared>,
    config: PlaybackConfig,
}

impl PlaybackController {
    /// Create a controller over the given output sink.
    #[must_use]
    pub fn new(sink: Arc<dyn OutputSink>, config: PlaybackConfig) -> Self {
        let (state, _) = watch::channel(PlaybackState::Idle);
        Self {
            sink,
            shared: Arc::new(Shared {
                state,
                session: Mutex::new(Session {
                    token: CancellationToken::new(),
                    seq: 0,
                }),
            }),
            config,
        }
    }

    /// Current playback state.
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        *self.shared.state.borrow()
    }

    /// Subscribe to state changes (used by the listening loop to decide when
    /// the barge-in monitor is active).
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<PlaybackState> {
        self.shared.state.subscribe()
    }

    /// Whether a session is in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Play one utterance: consume the chunk stream, pre-roll, then stream
    /// to the sink until exhausted and drained.
    ///
    /// `cancel` is the owning turn's token; the session observes a child of
    /// it, so superseding the turn stops playback and [`interrupt`] stops
    /// playback without touching the rest of the turn. A token that is
    /// already cancelled is rejected with [`AgentError::Cancelled`] before
    /// any state is touched.
    pub async fn play(
        &self,
        mut stream: SpeechStream,
        cancel: CancellationToken,
    ) -> Result<PlaybackFinish, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let (session, seq) = {
            let mut slot = lock_unpoisoned(&self.shared.session);
            slot.seq += 1;
            slot.token = cancel.child_token();
            (slot.token.clone(), slot.seq)
        };

        self.set_state(PlaybackState::Buffering);

        let mut pending: Vec<AudioChunk> = Vec::with_capacity(self.config.prebuffer_chunks);
        let mut started = false;

        loop {
            tokio::select! {
                biased;
                () = session.cancelled() => return Ok(self.halt(seq)),
                next = stream.next() => match next {
                    Some(Ok(chunk)) => {
                        if started {
                            if let Err(err) = self.sink.enqueue(chunk) {
                                return self.fail(seq, err);
                            }
                        } else {
                            pending.push(chunk);
                            if pending.len() >= self.config.prebuffer_chunks {
                                if let Err(err) = self.start_output(&mut pending) {
                                    return self.fail(seq, err);
                                }
                                started = true;
                            }
                        }
                    }
                    Some(Err(err)) => {
                        self.halt(seq);
                        return Err(err);
                    }
                    None => break,
                }
            }
        }

        // Stream exhausted. Very short utterances may never have reached the
        // pre-roll target; play whatever arrived.
        if !started {
            if pending.is_empty() {
                if self.is_current(seq) {
                    self.set_state(PlaybackState::Idle);
                }
                return Ok(PlaybackFinish::Completed);
            }
            if let Err(err) = self.start_output(&mut pending) {
                return self.fail(seq, err);
            }
        }

        // Wait for the device to drain the queued audio.
        loop {
            tokio::select! {
                biased;
                () = session.cancelled() => return Ok(self.halt(seq)),
                () = sleep(DRAIN_POLL) => {
                    if self.sink.is_drained() {
                        break;
                    }
                }
            }
        }

        if self.is_current(seq) {
            self.set_state(PlaybackState::Idle);
        }
        Ok(PlaybackFinish::Completed)
    }

    /// Pause the output. Valid only from `Playing`; otherwise a no-op.
    pub fn pause(&self) {
        if self.state() == PlaybackState::Playing {
            self.sink.pause();
            self.set_state(PlaybackState::Paused);
        } else {
            tracing::debug!(state = ?self.state(), "pause ignored - not playing");
        }
    }

    /// Resume a paused output. Valid only from `Paused`; otherwise a no-op.
    pub fn resume(&self) {
        if self.state() == PlaybackState::Paused {
            self.sink.resume();
            self.set_state(PlaybackState::Playing);
        } else {
            tracing::debug!(state = ?self.state(), "resume ignored - not paused");
        }
    }

    /// Halt the current session immediately, discarding all buffered and
    /// in-flight audio and cancelling the upstream chunk stream.
    ///
    /// Idempotent: a second call finds no active session and does nothing.
    pub fn interrupt(&self) {
        if !self.is_active() {
            return;
        }
        tracing::debug!("playback interrupted");
        lock_unpoisoned(&self.shared.session).token.cancel();
        self.sink.clear();
        self.set_state(PlaybackState::Stopped);
    }

    /// Begin device output and flush the pre-roll buffer in order.
    fn start_output(&self, pending: &mut Vec<AudioChunk>) -> Result<(), AgentError> {
        self.sink.begin()?;
        for chunk in pending.drain(..) {
            self.sink.enqueue(chunk)?;
        }
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    /// Stop output after an interrupt observation and report how the
    /// session ended. A session that has been superseded by a newer `play`
    /// leaves the sink and state alone — they belong to the new session.
    fn halt(&self, seq: u64) -> PlaybackFinish {
        if self.is_current(seq) {
            self.sink.clear();
            self.set_state(PlaybackState::Stopped);
        }
        PlaybackFinish::Interrupted
    }

    /// An output write failed: equivalent to an interrupt, surfaced upward.
    fn fail(&self, seq: u64, err: AgentError) -> Result<PlaybackFinish, AgentError> {
        if self.is_current(seq) {
            self.sink.clear();
            self.set_state(PlaybackState::Stopped);
        }
        Err(err)
    }

    fn is_current(&self, seq: u64) -> bool {
        lock_unpoisoned(&self.shared.session).seq == seq
    }

    fn set_state(&self, new: PlaybackState) {
        let old = self.shared.state.send_replace(new);
        if old != new {
            tracing::debug!(?old, ?new, "playback state transition");
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that accepts everything and reports drained.
    struct NullSink;

    impl OutputSink for NullSink {
        fn begin(&self) -> Result<(), AgentError> {
            Ok(())
        }
        fn enqueue(&self, _chunk: AudioChunk) -> Result<(), AgentError> {
            Ok(())
        }
        fn pause(&self) {}
        fn resume(&self) {}
        fn clear(&self) {}
        fn is_drained(&self) -> bool {
            true
        }
    }

    fn controller() -> PlaybackController {
        PlaybackController::new(Arc::new(NullSink), PlaybackConfig::default())
    }

    #[test]
    fn starts_idle() {
        let ctl = controller();
        assert_eq!(ctl.state(), PlaybackState::Idle);
        assert!(!ctl.is_active());
    }

    #[test]
    fn pause_outside_playing_is_a_noop() {
        let ctl = controller();
        ctl.pause();
        assert_eq!(ctl.state(), PlaybackState::Idle);
    }

    #[test]
    fn resume_outside_paused_is_a_noop() {
        let ctl = controller();
        ctl.resume();
        assert_eq!(ctl.state(), PlaybackState::Idle);
    }

    #[test]
    fn interrupt_without_session_is_a_noop() {
        let ctl = controller();
        ctl.interrupt();
        ctl.interrupt();
        assert_eq!(ctl.state(), PlaybackState::Idle);
    }

    #[test]
    fn active_states() {
        assert!(PlaybackState::Buffering.is_active());
        assert!(PlaybackState::Playing.is_active());
        assert!(PlaybackState::Paused.is_active());
        assert!(!PlaybackState::Idle.is_active());
        assert!(!PlaybackState::Stopped.is_active());
    }
}
