//! Agent error taxonomy.
//!
//! Only device errors are allowed to take the whole agent down. Collaborator
//! failures are contained at the turn-controller boundary: the turn aborts
//! back to listening and the error is logged, never retried by the core.
//! Empty transcripts/replies and stale results are *not* errors — they are
//! turn outcomes, reported through the event channel.

use std::fmt;

/// Which collaborator a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Speech-to-text.
    Transcription,
    /// Language-model round trip.
    Reasoning,
    /// Text-to-speech streaming.
    Synthesis,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transcription => write!(f, "transcription"),
            Self::Reasoning => write!(f, "reasoning"),
            Self::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// Errors that can occur in the voice agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// No usable audio input device found.
    #[error("no usable audio input device found")]
    NoInputDevice,

    /// No usable audio output device found.
    #[error("no usable audio output device found")]
    NoOutputDevice,

    /// The audio device failed to open or a stream broke. Fatal to the frame
    /// source; restarting is the caller's responsibility.
    #[error("audio device failure: {0}")]
    Device(String),

    /// The dedicated audio I/O thread terminated unexpectedly.
    #[error("audio thread terminated unexpectedly")]
    AudioThreadDied,

    /// A collaborator call failed or timed out. Aborts the current turn.
    #[error("{stage} collaborator failed: {source}")]
    Collaborator {
        /// Which collaborator failed.
        stage: Stage,
        /// Underlying cause.
        #[source]
        source: anyhow::Error,
    },

    /// Writing to the audio output failed mid-utterance. Treated as an
    /// interrupt; never retried (a replayed utterance would stutter).
    #[error("audio output failed: {0}")]
    Output(String),

    /// The agent is already running.
    #[error("agent is already running")]
    AlreadyRunning,

    /// The operation was refused because its owner had already been
    /// cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl AgentError {
    /// Wrap a collaborator failure with its stage.
    pub fn collaborator(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        Self::Collaborator {
            stage,
            source: source.into(),
        }
    }
}
