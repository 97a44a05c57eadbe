//! Hysteresis segmentation — groups scored chunks into discrete utterances.
//!
//! The segmenter buffers incoming samples, scores each fixed-size chunk
//! through the external [`SpeechScorer`], and applies a two-sided policy:
//! a chunk above the speech threshold opens (or extends) a segment, while a
//! segment only closes after a full grace window of continuous silence, so
//! short mid-utterance pauses don't chatter the boundary.
//!
//! Silence is measured by accumulated chunk duration, not wall-clock reads,
//! which keeps the policy deterministic under test. Scoring is a synchronous
//! bounded-cost call; the whole path runs inline on frame arrival and never
//! blocks.

use std::time::Instant;

use parley_core::audio::{ConfidenceSample, SpeechSegment};
use parley_core::config::SegmenterConfig;
use parley_core::ports::SpeechScorer;

/// Segmentation state: either waiting for speech or accumulating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// No active segment.
    Idle,

    /// Speech detected; chunks are accumulating into a segment.
    Speaking,
}

/// Everything one [`Segmenter::push`] call produced.
#[derive(Debug, Default)]
pub struct SegmenterOutput {
    /// One confidence sample per chunk scored during this push. Feeds the
    /// barge-in monitor while the agent is speaking.
    pub confidences: Vec<ConfidenceSample>,

    /// Segments closed during this push (normally zero or one).
    pub segments: Vec<SpeechSegment>,
}

/// Groups a continuous sample stream into [`SpeechSegment`]s.
///
/// Owns all segmentation state explicitly — the unscored sample buffer, the
/// accumulating segment, and the silence counter — so nothing hides in a
/// capture callback's enclosing scope.
pub struct Segmenter {
    config: SegmenterConfig,
    scorer: Box<dyn SpeechScorer>,

    /// Samples per scored chunk.
    chunk_size: usize,

    /// Duration of one chunk in milliseconds, derived from the sample rate.
    chunk_ms: u64,

    /// Buffered samples not yet scored (always shorter than one chunk
    /// between pushes).
    pending: Vec<f32>,

    state: SegmenterState,

    /// Chunks of the segment being accumulated.
    segment_chunks: Vec<Vec<f32>>,
    segment_started_at: Option<Instant>,

    /// Continuous silence since the last speech chunk, in milliseconds.
    silence_ms: u64,
}

impl Segmenter {
    /// Create a segmenter for the given chunking parameters.
    pub fn new(
        config: SegmenterConfig,
        scorer: Box<dyn SpeechScorer>,
        sample_rate: u32,
        chunk_size: usize,
    ) -> Self {
        let chunk_ms = chunk_size as u64 * 1000 / u64::from(sample_rate.max(1));
        Self {
            config,
            scorer,
            chunk_size,
            chunk_ms,
            pending: Vec::new(),
            state: SegmenterState::Idle,
            segment_chunks: Vec::new(),
            segment_started_at: None,
            silence_ms: 0,
        }
    }

    /// Current segmentation state.
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    /// Feed captured samples into the segmenter.
    ///
    /// `at` is the capture timestamp of the samples. While `suppressed` is
    /// set (the agent is speaking), chunks are still scored — the barge-in
    /// monitor needs the live confidences — but segment accumulation is
    /// discarded so the agent's own voice never becomes an utterance.
    pub fn push(&mut self, samples: &[f32], at: Instant, suppressed: bool) -> SegmenterOutput {
        let mut out = SegmenterOutput::default();

        self.pending.extend_from_slice(samples);

        while self.pending.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.pending.drain(..self.chunk_size).collect();
            let probability = self.scorer.score(&chunk).clamp(0.0, 1.0);
            out.confidences.push(ConfidenceSample { probability, at });

            if suppressed {
                self.reset();
                continue;
            }

            if probability > self.config.speech_threshold {
                if self.state == SegmenterState::Idle {
                    tracing::debug!(probability, "speech started");
                    self.state = SegmenterState::Speaking;
                    self.segment_started_at = Some(at);
                }
                self.segment_chunks.push(chunk);
                self.silence_ms = 0;
            } else if self.state == SegmenterState::Speaking {
                self.silence_ms += self.chunk_ms;
                if self.silence_ms > self.config.silence_grace_ms {
                    if let Some(segment) = self.close_segment(at) {
                        out.segments.push(segment);
                    }
                }
            }
            // silence while Idle: no-op
        }

        out
    }

    /// Discard all accumulation and return to idle. Buffered-but-unscored
    /// samples are kept.
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.segment_chunks.clear();
        self.segment_started_at = None;
        self.silence_ms = 0;
    }

    /// Close the active segment. A segment with zero chunks is never
    /// emitted.
    fn close_segment(&mut self, ended_at: Instant) -> Option<SpeechSegment> {
        let chunks = std::mem::take(&mut self.segment_chunks);
        let started_at = self.segment_started_at.take().unwrap_or(ended_at);
        self.state = SegmenterState::Idle;
        self.silence_ms = 0;

        if chunks.is_empty() {
            return None;
        }

        tracing::debug!(
            chunks = chunks.len(),
            duration_ms = chunks.len() as u64 * self.chunk_ms,
            "speech ended"
        );

        Some(SpeechSegment {
            chunks,
            started_at,
            ended_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;
    const CHUNK: usize = 512;

    /// A scorer that reads the first sample of the chunk as the probability,
    /// letting tests drive the policy with crafted input.
    fn probe_scorer() -> Box<dyn SpeechScorer> {
        Box::new(|chunk: &[f32]| chunk.first().copied().unwrap_or(0.0))
    }

    fn chunk_with_probability(p: f32) -> Vec<f32> {
        let mut samples = vec![0.0f32; CHUNK];
        samples[0] = p;
        samples
    }

    fn segmenter() -> Segmenter {
        Segmenter::new(SegmenterConfig::default(), probe_scorer(), RATE, CHUNK)
    }

    /// Chunks of silence needed to exceed the default 500 ms grace window
    /// at 32 ms per chunk.
    fn grace_chunks() -> usize {
        (500 / 32) + 1
    }

    #[test]
    fn starts_idle_and_ignores_silence() {
        let mut seg = segmenter();
        let now = Instant::now();
        for _ in 0..20 {
            let out = seg.push(&chunk_with_probability(0.1), now, false);
            assert!(out.segments.is_empty());
        }
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn speech_then_grace_silence_emits_one_segment() {
        let mut seg = segmenter();
        let now = Instant::now();

        for _ in 0..3 {
            seg.push(&chunk_with_probability(0.9), now, false);
        }
        assert_eq!(seg.state(), SegmenterState::Speaking);

        let mut segments = Vec::new();
        for _ in 0..grace_chunks() {
            segments.extend(seg.push(&chunk_with_probability(0.1), now, false).segments);
        }

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].chunks.len(), 3);
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn short_pause_does_not_split_segment() {
        let mut seg = segmenter();
        let now = Instant::now();

        seg.push(&chunk_with_probability(0.9), now, false);
        // 3 silent chunks ≈ 96 ms, well inside the 500 ms grace window.
        for _ in 0..3 {
            let out = seg.push(&chunk_with_probability(0.1), now, false);
            assert!(out.segments.is_empty());
        }
        seg.push(&chunk_with_probability(0.9), now, false);
        assert_eq!(seg.state(), SegmenterState::Speaking);

        let mut segments = Vec::new();
        for _ in 0..grace_chunks() {
            segments.extend(seg.push(&chunk_with_probability(0.1), now, false).segments);
        }
        // One segment containing both speech chunks; the pause was absorbed.
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].chunks.len(), 2);
    }

    #[test]
    fn never_emits_empty_segment() {
        let mut seg = segmenter();
        let now = Instant::now();
        // Silence only — no segment may ever be produced.
        for _ in 0..(grace_chunks() * 3) {
            let out = seg.push(&chunk_with_probability(0.0), now, false);
            assert!(out.segments.is_empty());
        }
    }

    #[test]
    fn emitted_chunks_are_contiguous_in_order() {
        let mut seg = segmenter();
        let now = Instant::now();

        // Tag each speech chunk with a distinct probability so order is
        // observable in the emitted segment.
        let tags = [0.91f32, 0.92, 0.93, 0.94];
        for &tag in &tags {
            seg.push(&chunk_with_probability(tag), now, false);
        }
        let mut segments = Vec::new();
        for _ in 0..grace_chunks() {
            segments.extend(seg.push(&chunk_with_probability(0.1), now, false).segments);
        }

        let emitted: Vec<f32> = segments[0].chunks.iter().map(|c| c[0]).collect();
        assert_eq!(emitted, tags);
    }

    #[test]
    fn sub_chunk_pushes_accumulate() {
        let mut seg = segmenter();
        let now = Instant::now();

        // Push half a chunk at a time; scoring only happens once a full
        // chunk is buffered.
        let half = chunk_with_probability(0.9)[..CHUNK / 2].to_vec();
        let out = seg.push(&half, now, false);
        assert!(out.confidences.is_empty());

        let out = seg.push(&half, now, false);
        assert_eq!(out.confidences.len(), 1);
    }

    #[test]
    fn suppressed_chunks_are_scored_but_not_accumulated() {
        let mut seg = segmenter();
        let now = Instant::now();

        let out = seg.push(&chunk_with_probability(0.95), now, true);
        assert_eq!(out.confidences.len(), 1);
        assert!((out.confidences[0].probability - 0.95).abs() < 1e-6);
        assert_eq!(seg.state(), SegmenterState::Idle);

        // Even a long run of suppressed speech never becomes a segment.
        for _ in 0..(grace_chunks() * 2) {
            let out = seg.push(&chunk_with_probability(0.95), now, true);
            assert!(out.segments.is_empty());
        }
    }

    #[test]
    fn suppression_mid_segment_discards_accumulation() {
        let mut seg = segmenter();
        let now = Instant::now();

        seg.push(&chunk_with_probability(0.9), now, false);
        assert_eq!(seg.state(), SegmenterState::Speaking);

        seg.push(&chunk_with_probability(0.9), now, true);
        assert_eq!(seg.state(), SegmenterState::Idle);

        // After suppression lifts, silence alone must not emit anything.
        for _ in 0..grace_chunks() {
            let out = seg.push(&chunk_with_probability(0.1), now, false);
            assert!(out.segments.is_empty());
        }
    }
}
