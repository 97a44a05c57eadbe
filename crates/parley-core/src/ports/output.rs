//! Audio output sink port.

use crate::audio::AudioChunk;
use crate::error::AgentError;

/// Device-output abstraction driven by the playback controller.
///
/// All methods take `&self` and must be safe to call from a different task
/// than the one driving the streaming loop: pause/resume/interrupt arrive
/// asynchronously from the turn controller while chunks are still being
/// enqueued.
pub trait OutputSink: Send + Sync {
    /// Prepare a fresh output session, discarding any previous one.
    fn begin(&self) -> Result<(), AgentError>;

    /// Queue a chunk for playback. Chunks play strictly in enqueue order.
    fn enqueue(&self, chunk: AudioChunk) -> Result<(), AgentError>;

    /// Pause the device output without discarding queued audio.
    fn pause(&self);

    /// Resume a paused output.
    fn resume(&self);

    /// Halt output immediately and discard all queued audio.
    fn clear(&self);

    /// Whether all enqueued audio has been played (vacuously true when no
    /// session is active).
    fn is_drained(&self) -> bool;
}
