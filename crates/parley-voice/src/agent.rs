//! Agent assembly — wires capture, segmentation, barge-in, and turns into
//! the conversation loop.
//!
//! [`VoiceAgent`] owns the lifecycle: starting spawns the audio device actor
//! and one listening task; stopping cancels the task and joins the device
//! thread. The listening task is the only consumer of the captured frame
//! stream, and it processes every frame in a fixed order: meter, score,
//! barge-in check, then segment handoff. Scoring is synchronous and bounded,
//! so the loop keeps up with the 32 ms frame cadence without buffering.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use parley_core::audio::AudioFrame;
use parley_core::config::AgentConfig;
use parley_core::error::AgentError;
use parley_core::ports::SpeechScorer;

use crate::barge_in::BargeInMonitor;
use crate::device::AudioDevice;
use crate::gate::MicGate;
use crate::playback::PlaybackController;
use crate::segmenter::Segmenter;
use crate::turn::{AgentEvent, AgentState, Collaborators, TurnController};

/// The top-level voice agent.
///
/// Construct with [`new`](Self::new), then [`start`](Self::start) to open
/// the audio devices and begin listening. Events stream out on the receiver
/// returned from `new` for the application layer to render.
pub struct VoiceAgent {
    config: AgentConfig,
    collaborators: Collaborators,
    events: mpsc::UnboundedSender<AgentEvent>,
    gate: MicGate,

    device: Option<AudioDevice>,
    shutdown: Option<CancellationToken>,
    loop_handle: Option<JoinHandle<()>>,
}

impl VoiceAgent {
    /// Create an agent. Returns the agent and the event receiver.
    #[must_use]
    pub fn new(
        config: AgentConfig,
        collaborators: Collaborators,
    ) -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let agent = Self {
            config,
            collaborators,
            events,
            gate: MicGate::new(),
            device: None,
            shutdown: None,
            loop_handle: None,
        };
        (agent, event_rx)
    }

    /// Whether the agent is currently listening.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.device.is_some()
    }

    /// Open the audio devices and start the listening loop.
    ///
    /// `scorer` is the per-chunk speech probability model; it moves into the
    /// listening task and lives until [`stop`](Self::stop).
    pub fn start(&mut self, scorer: Box<dyn SpeechScorer>) -> Result<(), AgentError> {
        if self.is_running() {
            return Err(AgentError::AlreadyRunning);
        }

        tracing::info!(
            sample_rate = self.config.capture.sample_rate,
            chunk_size = self.config.capture.chunk_size,
            "starting voice agent"
        );

        let device = AudioDevice::spawn(self.config.capture.clone(), self.config.playback.clone())?;
        let frames = device.subscribe();

        let playback =
            PlaybackController::new(Arc::new(device.sink()), self.config.playback.clone());
        let shutdown = CancellationToken::new();
        let turns = TurnController::new(
            self.collaborators.clone(),
            playback.clone(),
            self.gate.clone(),
            self.events.clone(),
            shutdown.clone(),
        );

        let segmenter = Segmenter::new(
            self.config.segmenter.clone(),
            scorer,
            self.config.capture.sample_rate,
            self.config.capture.chunk_size,
        );
        let monitor = BargeInMonitor::new(self.config.barge_in.clone());

        let listener = Listener {
            frames,
            segmenter,
            monitor,
            turns,
            playback,
            gate: self.gate.clone(),
            events: self.events.clone(),
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(listener.run());

        self.device = Some(device);
        self.shutdown = Some(shutdown);
        self.loop_handle = Some(handle);

        self.emit(AgentEvent::StateChanged(AgentState::Listening));
        tracing::info!("voice agent started");
        Ok(())
    }

    /// Stop listening, cancel any running turn, and release the devices.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        tracing::info!("stopping voice agent");

        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
        // The listening task unwinds on the cancelled token; nothing to join.
        self.loop_handle.take();

        // Dropping the handle shuts down and joins the audio thread.
        self.device.take();

        tracing::info!("voice agent stopped");
    }

    fn emit(&self, event: AgentEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!("agent event receiver dropped");
        }
    }
}

impl Drop for VoiceAgent {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Listening loop ─────────────────────────────────────────────────

struct Listener {
    frames: broadcast::Receiver<AudioFrame>,
    segmenter: Segmenter,
    monitor: BargeInMonitor,
    turns: TurnController,
    playback: PlaybackController,
    gate: MicGate,
    events: mpsc::UnboundedSender<AgentEvent>,
    shutdown: CancellationToken,
}

impl Listener {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                frame = self.frames.recv() => match frame {
                    Ok(frame) => self.on_frame(&frame),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(dropped = n, "listening loop lagged - oldest frames dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::error!("frame source closed - stopping listening loop");
                        let _ = self
                            .events
                            .send(AgentEvent::Error(AgentError::AudioThreadDied.to_string()));
                        break;
                    }
                }
            }
        }
        self.turns.stop();
        tracing::debug!("listening loop finished");
    }

    fn on_frame(&mut self, frame: &AudioFrame) {
        let _ = self
            .events
            .send(AgentEvent::AudioLevel(audio_level(&frame.samples)));

        let playback_active = self.playback.is_active();
        let suppressed = self.gate.is_suppressed();

        let out = self
            .segmenter
            .push(&frame.samples, frame.captured_at, suppressed);

        // Barge-in is checked before segment handoff: a user cutting the
        // agent off wins over anything else this frame produced.
        for sample in &out.confidences {
            if self.monitor.observe(sample.probability, playback_active) {
                self.turns.notify_barge_in();
            }
        }

        for segment in out.segments {
            self.turns.begin_turn(segment);
        }
    }
}

/// Normalised microphone level (0.0–1.0) from PCM samples.
fn audio_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();

    #[allow(clippy::cast_precision_loss)]
    let rms = (sum_sq / samples.len() as f32).sqrt();

    // An RMS of ~0.3 is already very loud speech.
    (rms / 0.3).min(1.0)
}
