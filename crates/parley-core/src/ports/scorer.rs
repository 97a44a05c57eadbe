//! Speech-probability scorer port.

/// Assigns a speech probability to a fixed-size audio chunk.
///
/// Synchronous and bounded-cost: the segmenter calls this inline on the
/// frame-arrival path, so an implementation must never block on I/O. It is
/// stateless across calls except for any internal smoothing the model itself
/// performs (hence `&mut self`).
pub trait SpeechScorer: Send {
    /// Score one chunk of mono f32 PCM at the capture sample rate.
    ///
    /// Returns a probability in `[0, 1]`.
    fn score(&mut self, chunk: &[f32]) -> f32;
}

/// Closures make convenient scorers in tests and for simple energy-based
/// detection.
impl<F> SpeechScorer for F
where
    F: FnMut(&[f32]) -> f32 + Send,
{
    fn score(&mut self, chunk: &[f32]) -> f32 {
        self(chunk)
    }
}
