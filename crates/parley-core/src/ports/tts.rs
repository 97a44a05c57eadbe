//! Speech-synthesis service port.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::audio::AudioChunk;
use crate::error::AgentError;

/// Lazy sequence of synthesized PCM chunks.
///
/// Dropping the stream abandons synthesis upstream; implementations must
/// stop producing further chunks without leaking resources when that
/// happens.
pub type SpeechStream = BoxStream<'static, Result<AudioChunk, AgentError>>;

/// Text-to-speech collaborator.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Begin synthesizing `text`, yielding i16 PCM chunks at the synthesis
    /// sample rate (normally 22.05 kHz) as they become available.
    async fn stream_speech(&self, text: &str) -> Result<SpeechStream, AgentError>;
}
