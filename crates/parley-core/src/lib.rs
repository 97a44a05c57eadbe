//! Core domain types and port definitions for the parley voice agent.
//!
//! This crate is deliberately free of audio-hardware and async-runtime
//! adapter dependencies. It defines:
//!
//! - the audio data model ([`audio`]): frames, confidence samples, speech
//!   segments, and synthesized PCM chunks;
//! - the collaborator ports ([`ports`]): trait abstractions over the VAD
//!   scorer, the transcription/reasoning/synthesis services, and the audio
//!   output sink;
//! - the configuration surface ([`config`]) with environment overrides;
//! - the error taxonomy ([`error`]).
//!
//! The concurrency core that consumes these lives in `parley-voice`.

#![deny(unused_crate_dependencies)]

pub mod audio;
pub mod config;
pub mod error;
pub mod ports;

// Re-export commonly used types for convenience
pub use audio::{AudioChunk, AudioFrame, ConfidenceSample, SpeechSegment};
pub use config::{AgentConfig, BargeInConfig, CaptureConfig, PlaybackConfig, SegmenterConfig};
pub use error::{AgentError, Stage};
pub use ports::{
    OutputSink, ReasoningService, SpeechScorer, SpeechStream, SpeechSynthesizer,
    TranscriptionService,
};
