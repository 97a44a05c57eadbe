//! Audio data model shared by the capture, segmentation, and playback paths.
//!
//! Capture audio is f32 PCM in `[-1, 1]` at 16 kHz mono; synthesized audio is
//! i16 PCM at 22.05 kHz mono. Frames and chunks carry monotonic timestamps so
//! the segmentation policy never has to read the wall clock itself.

use std::time::{Duration, Instant};

/// A fixed-size block of captured audio samples.
///
/// Produced by the frame source at a constant cadence (one frame per
/// `chunk_size / sample_rate` seconds) and consumed by the segmenter. Frames
/// are discarded after segmentation; nothing retains them beyond that.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 PCM samples in `[-1, 1]`.
    pub samples: Vec<f32>,

    /// Monotonic capture timestamp.
    pub captured_at: Instant,
}

impl AudioFrame {
    /// Duration of this frame at the given sample rate.
    #[must_use]
    pub fn duration(&self, sample_rate: u32) -> Duration {
        duration_of(self.samples.len(), sample_rate)
    }
}

/// The speech probability assigned to one scored chunk.
///
/// Ephemeral: consumed immediately by the segmentation policy, and — while
/// the agent is speaking — by the barge-in monitor. The scored chunk itself
/// is not duplicated here; the segmenter retains it only if it qualifies for
/// the active segment.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceSample {
    /// Speech probability in `[0, 1]` from the external scorer.
    pub probability: f32,

    /// Capture timestamp of the scored chunk.
    pub at: Instant,
}

/// One continuous utterance, as judged by the segmenter.
///
/// Chunks are stored in capture order and are never empty: the segmenter
/// refuses to emit a segment with zero accumulated chunks. Ownership passes
/// to the turn controller on emission, which disposes of the segment after
/// transcription.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// Speech-qualified chunks, contiguous in the order received.
    pub chunks: Vec<Vec<f32>>,

    /// Timestamp of the first speech chunk.
    pub started_at: Instant,

    /// Timestamp at which the segment was closed.
    pub ended_at: Instant,
}

impl SpeechSegment {
    /// Total number of samples across all chunks.
    #[must_use]
    pub fn len_samples(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Concatenate the chunks into a single contiguous buffer, consuming
    /// the segment.
    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.len_samples());
        for chunk in self.chunks {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// A block of synthesized speech audio.
///
/// Produced lazily by the speech synthesizer and played strictly in arrival
/// order by the playback controller.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono i16 PCM samples.
    pub samples: Vec<i16>,

    /// Sample rate of this chunk (normally 22 050 Hz).
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Duration of this chunk.
    #[must_use]
    pub fn duration(&self) -> Duration {
        duration_of(self.samples.len(), self.sample_rate)
    }
}

fn duration_of(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(samples as u64 * 1_000_000 / u64::from(sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_concatenation_preserves_order() {
        let seg = SpeechSegment {
            chunks: vec![vec![0.1, 0.2], vec![0.3], vec![0.4, 0.5]],
            started_at: Instant::now(),
            ended_at: Instant::now(),
        };
        assert_eq!(seg.len_samples(), 5);
        assert_eq!(seg.into_samples(), vec![0.1, 0.2, 0.3, 0.4, 0.5]);
    }

    #[test]
    fn frame_duration_at_16khz() {
        let frame = AudioFrame {
            samples: vec![0.0; 512],
            captured_at: Instant::now(),
        };
        assert_eq!(frame.duration(16_000), Duration::from_micros(32_000));
    }

    #[test]
    fn chunk_duration_handles_zero_rate() {
        let chunk = AudioChunk {
            samples: vec![0; 100],
            sample_rate: 0,
        };
        assert_eq!(chunk.duration(), Duration::ZERO);
    }
}
