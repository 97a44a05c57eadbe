//! Integration tests for the `TurnController` lifecycle.
//!
//! These tests drive whole turns through mock collaborators: canned
//! transcription, reasoning, and synthesis plus a recording output sink.
//! No audio hardware, model files, or network access is required.
//!
//! # What is tested
//!
//! - The happy path: segment → transcript → reply → playback → `Completed`
//! - Empty transcripts and empty replies end turns without speaking
//! - Collaborator failures abort the turn back to listening
//! - A new utterance supersedes the running turn, discarding stale results
//! - Barge-in interrupts playback and ends the turn
//! - The mic gate is held during playback and cleared on every exit path

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parley_core::audio::{AudioChunk, SpeechSegment};
use parley_core::config::PlaybackConfig;
use parley_core::error::{AgentError, Stage};
use parley_core::ports::{
    OutputSink, ReasoningService, SpeechStream, SpeechSynthesizer, TranscriptionService,
};
use parley_voice::gate::MicGate;
use parley_voice::playback::{PlaybackController, PlaybackState};
use parley_voice::turn::{AgentEvent, Collaborators, TurnController, TurnOutcome};

// ── Mock collaborators ─────────────────────────────────────────────

/// Transcription that returns a fixed text after an optional delay.
struct ScriptedStt {
    text: String,
    delay: Duration,
}

impl ScriptedStt {
    fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl TranscriptionService for ScriptedStt {
    async fn transcribe(&self, _audio: &[f32]) -> Result<String, AgentError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.text.clone())
    }
}

/// Transcription that always fails.
struct FailingStt;

#[async_trait]
impl TranscriptionService for FailingStt {
    async fn transcribe(&self, _audio: &[f32]) -> Result<String, AgentError> {
        Err(AgentError::collaborator(
            Stage::Transcription,
            anyhow::anyhow!("model exploded"),
        ))
    }
}

/// Reasoning that returns a fixed reply after an optional delay.
struct ScriptedLlm {
    reply: String,
    delay: Duration,
}

impl ScriptedLlm {
    fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            delay: Duration::ZERO,
        }
    }

    fn slow(reply: impl Into<String>, delay: Duration) -> Self {
        Self {
            reply: reply.into(),
            delay,
        }
    }
}

#[async_trait]
impl ReasoningService for ScriptedLlm {
    async fn ask(&self, _text: &str) -> Result<String, AgentError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.reply.clone())
    }
}

/// Synthesis yielding a fixed number of chunks; optionally the stream then
/// stays open forever (to hold playback active for interrupt tests).
struct ChunkTts {
    chunks: usize,
    endless: bool,
}

fn chunk() -> AudioChunk {
    AudioChunk {
        samples: vec![0i16; 2205], // 100 ms at 22.05 kHz
        sample_rate: 22_050,
    }
}

#[async_trait]
impl SpeechSynthesizer for ChunkTts {
    async fn stream_speech(&self, _text: &str) -> Result<SpeechStream, AgentError> {
        use futures_util::StreamExt;
        let head = futures_util::stream::iter(
            (0..self.chunks).map(|_| Ok(chunk())).collect::<Vec<_>>(),
        );
        if self.endless {
            Ok(Box::pin(head.chain(futures_util::stream::pending())))
        } else {
            Ok(Box::pin(head))
        }
    }
}

// ── Mock sink ──────────────────────────────────────────────────────

struct RecordingSink {
    began: AtomicBool,
    enqueued: Mutex<usize>,
    drained: AtomicBool,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            began: AtomicBool::new(false),
            enqueued: Mutex::new(0),
            drained: AtomicBool::new(true),
        })
    }
}

impl OutputSink for RecordingSink {
    fn begin(&self) -> Result<(), AgentError> {
        self.began.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn enqueue(&self, _chunk: AudioChunk) -> Result<(), AgentError> {
        *self.enqueued.lock().unwrap() += 1;
        Ok(())
    }

    fn pause(&self) {}
    fn resume(&self) {}
    fn clear(&self) {}

    fn is_drained(&self) -> bool {
        self.drained.load(Ordering::SeqCst)
    }
}

// ── Test harness ───────────────────────────────────────────────────

struct Harness {
    turns: TurnController,
    playback: PlaybackController,
    gate: MicGate,
    sink: Arc<RecordingSink>,
    rx: mpsc::UnboundedReceiver<AgentEvent>,
}

fn harness(
    stt: impl TranscriptionService + 'static,
    llm: impl ReasoningService + 'static,
    tts: impl SpeechSynthesizer + 'static,
) -> Harness {
    let sink = RecordingSink::new();
    let playback =
        PlaybackController::new(Arc::clone(&sink) as Arc<dyn OutputSink>, PlaybackConfig::default());
    let gate = MicGate::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let turns = TurnController::new(
        Collaborators {
            transcription: Arc::new(stt),
            reasoning: Arc::new(llm),
            synthesizer: Arc::new(tts),
        },
        playback.clone(),
        gate.clone(),
        tx,
        CancellationToken::new(),
    );
    Harness {
        turns,
        playback,
        gate,
        sink,
        rx,
    }
}

fn segment() -> SpeechSegment {
    let now = Instant::now();
    SpeechSegment {
        chunks: vec![vec![0.0f32; 512]; 4],
        started_at: now,
        ended_at: now,
    }
}

/// Receive events until a `TurnFinished` for `turn` arrives, returning every
/// event seen along the way (including the finish).
async fn events_until_finished(
    rx: &mut mpsc::UnboundedReceiver<AgentEvent>,
    turn: u64,
) -> Vec<AgentEvent> {
    let mut seen = Vec::new();
    let deadline = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event channel closed early");
            let done = matches!(event, AgentEvent::TurnFinished { turn: t, .. } if t == turn);
            seen.push(event);
            if done {
                break;
            }
        }
    });
    deadline.await.expect("turn did not finish in time");
    seen
}

fn outcome_of(events: &[AgentEvent], turn: u64) -> Option<TurnOutcome> {
    events.iter().find_map(|e| match e {
        AgentEvent::TurnFinished { turn: t, outcome } if *t == turn => Some(*outcome),
        _ => None,
    })
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_speaks_the_reply_and_completes() {
    let mut h = harness(
        ScriptedStt::new("what time is it"),
        ScriptedLlm::new("it is noon"),
        ChunkTts {
            chunks: 5,
            endless: false,
        },
    );

    let id = h.turns.begin_turn(segment());
    let events = events_until_finished(&mut h.rx, id).await;

    assert_eq!(outcome_of(&events, id), Some(TurnOutcome::Completed));
    assert!(h.sink.began.load(Ordering::SeqCst));
    assert_eq!(*h.sink.enqueued.lock().unwrap(), 5);

    let transcript = events.iter().any(
        |e| matches!(e, AgentEvent::Transcript { text, .. } if text == "what time is it"),
    );
    let reply = events
        .iter()
        .any(|e| matches!(e, AgentEvent::Reply { text, .. } if text == "it is noon"));
    assert!(transcript && reply);

    // Playback finished cleanly and the mic is open again.
    assert_eq!(h.playback.state(), PlaybackState::Idle);
    assert!(!h.gate.is_suppressed());
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_transcript_ends_the_turn_silently() {
    let mut h = harness(
        ScriptedStt::new("   "),
        ScriptedLlm::new("never asked"),
        ChunkTts {
            chunks: 5,
            endless: false,
        },
    );

    let id = h.turns.begin_turn(segment());
    let events = events_until_finished(&mut h.rx, id).await;

    assert_eq!(outcome_of(&events, id), Some(TurnOutcome::EmptyTranscript));
    assert!(!h.sink.began.load(Ordering::SeqCst));
    assert!(
        !events.iter().any(|e| matches!(e, AgentEvent::Reply { .. })),
        "no reply should be produced"
    );
    assert!(!h.gate.is_suppressed());
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_reply_ends_the_turn_silently() {
    let mut h = harness(
        ScriptedStt::new("hello"),
        ScriptedLlm::new(""),
        ChunkTts {
            chunks: 5,
            endless: false,
        },
    );

    let id = h.turns.begin_turn(segment());
    let events = events_until_finished(&mut h.rx, id).await;

    assert_eq!(outcome_of(&events, id), Some(TurnOutcome::EmptyReply));
    assert!(!h.sink.began.load(Ordering::SeqCst));
    assert!(!h.gate.is_suppressed());
}

#[tokio::test(flavor = "multi_thread")]
async fn collaborator_failure_aborts_the_turn() {
    let mut h = harness(
        FailingStt,
        ScriptedLlm::new("never asked"),
        ChunkTts {
            chunks: 5,
            endless: false,
        },
    );

    let id = h.turns.begin_turn(segment());
    let events = events_until_finished(&mut h.rx, id).await;

    assert_eq!(outcome_of(&events, id), Some(TurnOutcome::Failed));
    assert!(
        events.iter().any(|e| matches!(e, AgentEvent::Error(_))),
        "an error event should be emitted"
    );
    assert!(!h.sink.began.load(Ordering::SeqCst));
    assert!(!h.gate.is_suppressed());
}

#[tokio::test(flavor = "multi_thread")]
async fn new_utterance_supersedes_the_running_turn() {
    let mut h = harness(
        ScriptedStt::new("question"),
        ScriptedLlm::slow("stale answer", Duration::from_millis(300)),
        ChunkTts {
            chunks: 2,
            endless: false,
        },
    );

    let first = h.turns.begin_turn(segment());
    // Let the first turn get into the reasoning await.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = h.turns.begin_turn(segment());

    let events = events_until_finished(&mut h.rx, first).await;
    assert_eq!(outcome_of(&events, first), Some(TurnOutcome::Superseded));
    // The superseded turn's stale reply must never surface.
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, AgentEvent::Reply { turn, .. } if *turn == first)),
        "stale reply leaked from the superseded turn"
    );

    let events = events_until_finished(&mut h.rx, second).await;
    assert_eq!(outcome_of(&events, second), Some(TurnOutcome::Completed));
    assert!(!h.gate.is_suppressed());
}

#[tokio::test(flavor = "multi_thread")]
async fn barge_in_interrupts_playback() {
    let mut h = harness(
        ScriptedStt::new("tell me a story"),
        ScriptedLlm::new("once upon a time"),
        ChunkTts {
            chunks: 4,
            endless: true,
        },
    );
    // Keep the sink holding audio so playback stays active.
    h.sink.drained.store(false, Ordering::SeqCst);

    let id = h.turns.begin_turn(segment());

    let mut watch = h.playback.watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        watch.wait_for(|s| *s == PlaybackState::Playing),
    )
    .await
    .expect("playback never started")
    .unwrap();

    // The agent is speaking now, so the mic must be gated.
    assert!(h.gate.is_suppressed());

    h.turns.notify_barge_in();

    let events = events_until_finished(&mut h.rx, id).await;
    assert_eq!(outcome_of(&events, id), Some(TurnOutcome::Interrupted));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, AgentEvent::BargeIn { turn } if *turn == id)),
        "a barge-in event should be emitted"
    );
    assert_eq!(h.playback.state(), PlaybackState::Stopped);
    assert!(!h.gate.is_suppressed());
}

#[tokio::test(flavor = "multi_thread")]
async fn gate_is_held_for_the_duration_of_playback() {
    let mut h = harness(
        ScriptedStt::new("hello"),
        ScriptedLlm::new("hi there"),
        ChunkTts {
            chunks: 4,
            endless: false,
        },
    );
    h.sink.drained.store(false, Ordering::SeqCst);

    let id = h.turns.begin_turn(segment());

    let mut watch = h.playback.watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        watch.wait_for(|s| *s == PlaybackState::Playing),
    )
    .await
    .expect("playback never started")
    .unwrap();

    // Stream ended but the device still holds audio: still speaking.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.gate.is_suppressed());

    h.sink.drained.store(true, Ordering::SeqCst);

    let events = events_until_finished(&mut h.rx, id).await;
    assert_eq!(outcome_of(&events, id), Some(TurnOutcome::Completed));
    assert!(!h.gate.is_suppressed());
}
