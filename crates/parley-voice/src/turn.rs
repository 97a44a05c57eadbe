//! Turn controller — single-flight orchestration of the conversation loop.
//!
//! A turn is one pass through transcribe → reason → synthesize → play for one
//! utterance. At most one turn pipeline runs at a time; a new utterance
//! supersedes the previous turn by cancelling its token, and the superseded
//! turn unwinds cooperatively at its next suspension point. Turn ids increase
//! monotonically for the life of the agent and are never reused, which is
//! what lets late results and stale mic-gate cleanup be detected and
//! discarded.
//!
//! Every turn, however it exits, ends with the mic gate cleared and the agent
//! back in `Listening`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use parley_core::audio::SpeechSegment;
use parley_core::error::{AgentError, Stage};
use parley_core::ports::{ReasoningService, SpeechSynthesizer, TranscriptionService};

use crate::gate::MicGate;
use crate::playback::{PlaybackController, PlaybackFinish};

// ── Agent state machine ────────────────────────────────────────────

/// Conversational state of the agent, as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    /// Waiting for the user to speak.
    Listening,

    /// A finished utterance is being transcribed.
    Transcribing,

    /// Waiting for the reasoning service to produce a reply.
    Thinking,

    /// The reply is being synthesized and played back.
    Speaking,
}

/// How a turn ended. Exactly one outcome is reported per started turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnOutcome {
    /// The reply played to completion.
    Completed,

    /// Transcription produced no usable text; nothing was spoken.
    EmptyTranscript,

    /// The reasoning service returned an empty reply; nothing was spoken.
    EmptyReply,

    /// The user barged in and playback was cut short.
    Interrupted,

    /// A newer utterance superseded this turn before it finished.
    Superseded,

    /// A collaborator failed; the turn was abandoned.
    Failed,
}

/// Events emitted by the agent to the application layer.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The agent's conversational state changed.
    StateChanged(AgentState),

    /// A non-empty transcript was produced from user speech.
    Transcript { turn: u64, text: String },

    /// The reasoning service produced a non-empty reply.
    Reply { turn: u64, text: String },

    /// Sustained user speech during playback triggered an interrupt.
    BargeIn { turn: u64 },

    /// A turn finished with the given outcome.
    TurnFinished { turn: u64, outcome: TurnOutcome },

    /// A collaborator or output error aborted a turn.
    Error(String),

    /// Microphone level (0.0–1.0), for UI visualisation.
    AudioLevel(f32),
}

// ── Collaborators ──────────────────────────────────────────────────

/// The external services a turn consumes.
///
/// Cheap to clone; each spawned turn task holds its own handle set.
#[derive(Clone)]
pub struct Collaborators {
    pub transcription: Arc<dyn TranscriptionService>,
    pub reasoning: Arc<dyn ReasoningService>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

// ── Turn controller ────────────────────────────────────────────────

struct ActiveTurn {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the single-flight turn pipeline.
///
/// The listening loop calls [`begin_turn`](Self::begin_turn) for each
/// finished utterance and [`notify_barge_in`](Self::notify_barge_in) when the
/// monitor fires; everything else happens inside the spawned turn task.
pub struct TurnController {
    collaborators: Collaborators,
    playback: PlaybackController,
    gate: MicGate,
    events: mpsc::UnboundedSender<AgentEvent>,

    /// Parent of every turn token; cancelling it winds down all turns.
    shutdown: CancellationToken,

    /// Next turn id to assign. Starts at 1; 0 is the mic gate's open value.
    next_turn: u64,

    active: Option<ActiveTurn>,
}

impl TurnController {
    /// Create a controller.
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        playback: PlaybackController,
        gate: MicGate,
        events: mpsc::UnboundedSender<AgentEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            collaborators,
            playback,
            gate,
            events,
            shutdown,
            next_turn: 1,
            active: None,
        }
    }

    /// Id of the turn currently running, if any.
    #[must_use]
    pub fn current_turn(&self) -> Option<u64> {
        self.active
            .as_ref()
            .filter(|t| !t.handle.is_finished())
            .map(|t| t.id)
    }

    /// Whether a turn pipeline is still running.
    #[must_use]
    pub fn is_turn_active(&self) -> bool {
        self.current_turn().is_some()
    }

    /// Start a turn for a finished utterance, superseding any running turn.
    ///
    /// Returns the new turn's id. The pipeline runs in a spawned task; its
    /// outcome arrives later as [`AgentEvent::TurnFinished`].
    pub fn begin_turn(&mut self, segment: SpeechSegment) -> u64 {
        self.supersede();

        let id = self.next_turn;
        self.next_turn += 1;

        let cancel = self.shutdown.child_token();
        let ctx = TurnContext {
            id,
            cancel: cancel.clone(),
            collaborators: self.collaborators.clone(),
            playback: self.playback.clone(),
            gate: self.gate.clone(),
            events: self.events.clone(),
        };

        tracing::info!(
            turn = id,
            duration_ms = segment
                .ended_at
                .duration_since(segment.started_at)
                .as_millis(),
            "turn started"
        );

        let handle = tokio::spawn(ctx.run(segment));
        self.active = Some(ActiveTurn { id, cancel, handle });
        id
    }

    /// React to a barge-in: cut playback so the current turn unwinds with
    /// [`TurnOutcome::Interrupted`]. No-op when nothing is playing.
    pub fn notify_barge_in(&mut self) {
        if !self.playback.is_active() {
            return;
        }
        if let Some(turn) = self.current_turn() {
            tracing::info!(turn, "barge-in - interrupting playback");
            let _ = self.events.send(AgentEvent::BargeIn { turn });
        }
        self.playback.interrupt();
    }

    /// Cancel the running turn, if any. Its task reports
    /// [`TurnOutcome::Superseded`] once it observes the cancellation.
    fn supersede(&mut self) {
        if let Some(active) = self.active.take() {
            if active.handle.is_finished() {
                return;
            }
            tracing::debug!(turn = active.id, "turn superseded by new utterance");
            active.cancel.cancel();
        }
    }

    /// Cancel the running turn and stop playback. Used on agent shutdown.
    pub fn stop(&mut self) {
        self.supersede();
        self.playback.interrupt();
    }
}

// ── The per-turn pipeline task ─────────────────────────────────────

struct TurnContext {
    id: u64,
    cancel: CancellationToken,
    collaborators: Collaborators,
    playback: PlaybackController,
    gate: MicGate,
    events: mpsc::UnboundedSender<AgentEvent>,
}

impl TurnContext {
    async fn run(self, segment: SpeechSegment) {
        let outcome = self.pipeline(segment).await;

        // Every exit path reopens the mic (no-op if this turn never
        // suppressed it, or if a newer turn owns the gate by now).
        self.gate.clear(self.id);

        tracing::info!(turn = self.id, ?outcome, "turn finished");
        self.emit(AgentEvent::TurnFinished {
            turn: self.id,
            outcome,
        });
        self.emit(AgentEvent::StateChanged(AgentState::Listening));
    }

    async fn pipeline(&self, segment: SpeechSegment) -> TurnOutcome {
        // ── Transcribe ─────────────────────────────────────────────
        self.emit(AgentEvent::StateChanged(AgentState::Transcribing));
        let samples = segment.into_samples();

        // The segmenter never emits empty segments, but begin_turn is a
        // public entry point; an empty segment has nothing to answer.
        if samples.is_empty() {
            tracing::debug!(turn = self.id, "empty segment - nothing to transcribe");
            return TurnOutcome::EmptyTranscript;
        }

        let text = match self
            .guarded(self.collaborators.transcription.transcribe(&samples))
            .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => return self.fail(Stage::Transcription, &err),
            Err(Cancelled) => return TurnOutcome::Superseded,
        };

        let text = text.trim().to_owned();
        if text.is_empty() {
            tracing::debug!(turn = self.id, "empty transcript - nothing to answer");
            return TurnOutcome::EmptyTranscript;
        }
        self.emit(AgentEvent::Transcript {
            turn: self.id,
            text: text.clone(),
        });

        // ── Reason ─────────────────────────────────────────────────
        self.emit(AgentEvent::StateChanged(AgentState::Thinking));

        let reply = match self.guarded(self.collaborators.reasoning.ask(&text)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => return self.fail(Stage::Reasoning, &err),
            Err(Cancelled) => return TurnOutcome::Superseded,
        };

        let reply = reply.trim().to_owned();
        if reply.is_empty() {
            tracing::debug!(turn = self.id, "empty reply - nothing to speak");
            return TurnOutcome::EmptyReply;
        }
        self.emit(AgentEvent::Reply {
            turn: self.id,
            text: reply.clone(),
        });

        // ── Synthesize & play ──────────────────────────────────────
        self.emit(AgentEvent::StateChanged(AgentState::Speaking));

        let stream = match self
            .guarded(self.collaborators.synthesizer.stream_speech(&reply))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return self.fail(Stage::Synthesis, &err),
            Err(Cancelled) => return TurnOutcome::Superseded,
        };

        // Gate the mic before the first chunk can reach the speaker.
        self.gate.suppress(self.id);

        match self.playback.play(stream, self.cancel.clone()).await {
            Ok(PlaybackFinish::Completed) => TurnOutcome::Completed,
            Ok(PlaybackFinish::Interrupted) => {
                if self.cancel.is_cancelled() {
                    TurnOutcome::Superseded
                } else {
                    TurnOutcome::Interrupted
                }
            }
            // The turn was superseded in the instant before playback began.
            Err(AgentError::Cancelled) => TurnOutcome::Superseded,
            Err(err) => {
                tracing::error!(turn = self.id, error = %err, "playback failed");
                self.emit(AgentEvent::Error(err.to_string()));
                TurnOutcome::Failed
            }
        }
    }

    /// Await a collaborator call under this turn's cancellation token.
    ///
    /// Checks the token both before invoking and after the result arrives,
    /// so a superseded turn neither starts new work nor acts on a stale
    /// result that raced the cancellation.
    async fn guarded<T>(
        &self,
        fut: impl std::future::Future<Output = T>,
    ) -> Result<T, Cancelled> {
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        let value = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Cancelled),
            value = fut => value,
        };
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        Ok(value)
    }

    fn fail(&self, stage: Stage, err: &AgentError) -> TurnOutcome {
        tracing::error!(turn = self.id, %stage, error = %err, "collaborator failed");
        self.emit(AgentEvent::Error(err.to_string()));
        TurnOutcome::Failed
    }

    fn emit(&self, event: AgentEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!(turn = self.id, "agent event receiver dropped");
        }
    }
}

struct Cancelled;
