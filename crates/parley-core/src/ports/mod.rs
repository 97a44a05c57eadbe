//! Collaborator ports — trait abstractions consumed by the turn-taking core.
//!
//! # Design Rules
//!
//! - Ports carry no implementation detail of any cloud service or model:
//!   the STT/LLM/TTS wire formats belong entirely to the implementations.
//! - Every async port call must return promptly on failure (bounded
//!   timeout/retry is the implementation's own contract); the core treats a
//!   failed or timed-out call as "no result" and aborts the turn.
//! - Cancellation is cooperative: the core checks its turn token before
//!   invoking a port and before acting on its result, and discards stale
//!   results rather than killing in-flight calls.

mod llm;
mod output;
mod scorer;
mod stt;
mod tts;

pub use llm::ReasoningService;
pub use output::OutputSink;
pub use scorer::SpeechScorer;
pub use stt::TranscriptionService;
pub use tts::{SpeechStream, SpeechSynthesizer};
