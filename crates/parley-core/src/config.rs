//! Agent configuration.
//!
//! Every timing and threshold knob in the turn-taking core is a tunable, not
//! a constant: the silence grace window trades response latency against
//! truncating mid-utterance pauses, and the barge-in sustain count trades
//! interrupt latency against false triggers from clicks or TTS bleed-through.
//! Defaults follow the calibration in `AgentConfig::default()` and can be
//! overridden per-field from the environment (`PARLEY_*` variables).
//!
//! Device selection is an explicit startup step: the chosen device names are
//! carried here and passed into the audio device actor, never read from
//! ambient global state.

use serde::{Deserialize, Serialize};

/// Capture-side configuration (microphone and chunking).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capture sample rate in Hz. The VAD scorer and STT collaborators
    /// expect 16 kHz mono.
    pub sample_rate: u32,

    /// Samples per scored chunk (512 @ 16 kHz ≈ 32 ms).
    pub chunk_size: usize,

    /// Preferred input device name. `None` selects the first non-loopback
    /// input device, falling back to the system default.
    pub input_device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_size: 512,
            input_device: None,
        }
    }
}

/// Hysteresis segmentation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Speech probability threshold for a chunk to count as speech
    /// (0.0–1.0, default 0.5; raise towards 0.7 in noisy environments).
    pub speech_threshold: f32,

    /// Continuous silence (ms) after speech before the segment is closed
    /// (default 500, sensible range 300–700).
    pub silence_grace_ms: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 0.5,
            silence_grace_ms: 500,
        }
    }
}

/// Barge-in detection parameters.
///
/// The interrupt threshold is deliberately stricter than the speech
/// threshold: single high-confidence chunks are common artifacts (clicks,
/// coughs, TTS sibilants leaking into the mic), so an interrupt requires
/// sustained strong speech.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BargeInConfig {
    /// Probability a chunk must exceed to count towards an interrupt
    /// (default 0.90).
    pub interrupt_threshold: f32,

    /// Consecutive qualifying chunks required before the interrupt fires
    /// (default 3 ≈ 100 ms of sustained speech at 32 ms chunks).
    pub sustain_chunks: u32,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            interrupt_threshold: 0.90,
            sustain_chunks: 3,
        }
    }
}

/// Playback-side configuration (synthesized speech output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Synthesis sample rate in Hz (default 22 050).
    pub sample_rate: u32,

    /// Synthesized chunks buffered before output starts. Masks first-chunk
    /// latency while bounding total pre-roll (default 3, sensible range 2–5).
    pub prebuffer_chunks: usize,

    /// Preferred output device name. `None` selects the first non-loopback
    /// speaker/headphone device, falling back to the system default.
    pub output_device: Option<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22_050,
            prebuffer_chunks: 3,
            output_device: None,
        }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Capture / chunking settings.
    pub capture: CaptureConfig,

    /// Segmentation hysteresis settings.
    pub segmenter: SegmenterConfig,

    /// Barge-in detection settings.
    pub barge_in: BargeInConfig,

    /// Playback settings.
    pub playback: PlaybackConfig,

    /// TTS backend selector, passed through to whoever constructs the
    /// synthesis collaborator (e.g. `"elevenlabs"`).
    pub tts_backend: Option<String>,

    /// TTS voice identifier, passed through to the synthesis collaborator.
    pub voice: Option<String>,
}

impl AgentConfig {
    /// Build a configuration from defaults plus `PARLEY_*` environment
    /// overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from a key/value lookup. Unparsable values are
    /// logged and skipped, keeping the default.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        override_parsed(&get, "PARLEY_SPEECH_THRESHOLD", &mut self.segmenter.speech_threshold);
        override_parsed(&get, "PARLEY_SILENCE_GRACE_MS", &mut self.segmenter.silence_grace_ms);
        override_parsed(
            &get,
            "PARLEY_INTERRUPT_THRESHOLD",
            &mut self.barge_in.interrupt_threshold,
        );
        override_parsed(&get, "PARLEY_INTERRUPT_SUSTAIN", &mut self.barge_in.sustain_chunks);
        override_parsed(&get, "PARLEY_CHUNK_SIZE", &mut self.capture.chunk_size);
        override_parsed(&get, "PARLEY_PREBUFFER_CHUNKS", &mut self.playback.prebuffer_chunks);

        if let Some(name) = get("PARLEY_INPUT_DEVICE") {
            self.capture.input_device = Some(name);
        }
        if let Some(name) = get("PARLEY_OUTPUT_DEVICE") {
            self.playback.output_device = Some(name);
        }
        if let Some(backend) = get("PARLEY_TTS_BACKEND") {
            self.tts_backend = Some(backend);
        }
        if let Some(voice) = get("PARLEY_VOICE") {
            self.voice = Some(voice);
        }
    }
}

fn override_parsed<T: std::str::FromStr>(
    get: impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = get(key) else { return };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparsable config override"),
    }
}
