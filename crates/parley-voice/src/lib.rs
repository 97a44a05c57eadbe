//! Turn-taking concurrency core for the parley voice agent.
//!
//! The agent listens continuously, segments user speech, runs each finished
//! utterance through transcribe → reason → synthesize → play, and lets the
//! user barge in mid-reply. This crate owns the concurrency policy that makes
//! that feel like a conversation: single-flight turns with monotonic ids,
//! cooperative cancellation, debounced barge-in, hysteresis segmentation, and
//! a pre-rolled playback state machine.
//!
//! The acoustic model, STT, LLM, and TTS engines are consumed through the
//! port traits in [`parley_core`]; see [`turn::Collaborators`].

#![deny(unused_crate_dependencies)]

// Dev-dependencies used only by the integration tests under tests/.
#[cfg(test)]
use anyhow as _;

pub mod agent;
pub mod barge_in;
pub mod device;
pub mod gate;
pub mod playback;
pub mod segmenter;
pub mod turn;

// Re-export key types for convenience
pub use agent::VoiceAgent;
pub use barge_in::BargeInMonitor;
pub use device::AudioDevice;
pub use gate::MicGate;
pub use playback::{PlaybackController, PlaybackFinish, PlaybackState};
pub use segmenter::{Segmenter, SegmenterOutput, SegmenterState};
pub use turn::{AgentEvent, AgentState, Collaborators, TurnController, TurnOutcome};
