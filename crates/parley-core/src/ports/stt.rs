//! Transcription service port.

use async_trait::async_trait;

use crate::error::AgentError;

/// Speech-to-text collaborator.
///
/// Transcription happens off the time-critical path and may take hundreds of
/// milliseconds to seconds. Implementations may apply their own bounded
/// retry/timeout policy but must return rather than hang; the core discards
/// the result if the owning turn has been superseded in the meantime.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Transcribe a complete utterance (mono f32 PCM @ 16 kHz).
    ///
    /// An empty or whitespace-only string is a normal outcome ("nothing was
    /// said"), not an error.
    async fn transcribe(&self, audio: &[f32]) -> Result<String, AgentError>;
}
