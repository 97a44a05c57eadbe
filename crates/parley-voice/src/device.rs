//! Audio device actor — confines `!Send` audio resources to one OS thread.
//!
//! `cpal::Stream` (capture) and `rodio::OutputStream` (playback) are `!Send`
//! on some platforms, so both live for their entire lifetime on a dedicated
//! audio thread. The [`AudioDevice`] handle is the `Send + Sync` proxy the
//! rest of the agent holds: captured frames flow out through a broadcast
//! channel, and playback operations go in as commands over an `mpsc` queue.
//!
//! The frame channel is bounded with drop-oldest overflow: if the listening
//! loop stalls, the broadcast receiver observes `Lagged(n)` and the newest
//! audio wins. The capture callback itself never blocks and never touches a
//! lock.

use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use rodio::{OutputStream, OutputStreamHandle, Sink};
use rubato::{FftFixedIn, Resampler as _};
use tokio::sync::broadcast;

use parley_core::audio::{AudioChunk, AudioFrame};
use parley_core::config::{CaptureConfig, PlaybackConfig};
use parley_core::error::AgentError;
use parley_core::ports::OutputSink;

/// Capture target rate: what the speech scorer and STT expect.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Frames buffered before the broadcast channel starts dropping the oldest.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Input size of the streaming resampler, in device-rate mono samples.
const RESAMPLE_CHUNK: usize = 1024;

/// Device names containing any of these are loopback/virtual devices that
/// would feed the agent its own output; they are never auto-selected.
const LOOPBACK_KEYWORDS: &[&str] = &["loopback", "monitor", "blackhole", "virtual", "what u hear"];

// ── Commands ───────────────────────────────────────────────────────

enum DeviceCommand {
    /// Create a fresh playback sink, replacing any previous one.
    BeginOutput {
        reply: mpsc::Sender<Result<(), AgentError>>,
    },

    /// Append a synthesized chunk to the playback sink.
    EnqueueOutput {
        chunk: AudioChunk,
        reply: mpsc::Sender<Result<(), AgentError>>,
    },

    /// Pause the playback sink, retaining queued audio.
    PauseOutput,

    /// Resume a paused playback sink.
    ResumeOutput,

    /// Discard all queued playback audio.
    ClearOutput,

    /// Query whether all enqueued playback audio has been played.
    IsOutputDrained { reply: mpsc::Sender<bool> },

    /// Shut down the audio thread, releasing all resources.
    Shutdown,
}

// ── Handle (Send + Sync proxy) ─────────────────────────────────────

/// Handle to the dedicated audio I/O thread.
///
/// Dropping the handle shuts the thread down and releases both devices.
pub struct AudioDevice {
    cmd_tx: mpsc::Sender<DeviceCommand>,
    frames: broadcast::Sender<AudioFrame>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AudioDevice {
    /// Spawn the audio thread: open the input device, start continuous
    /// capture, and prepare the output device.
    ///
    /// Device-open failures are fatal and propagate here; there is no
    /// internal retry.
    pub fn spawn(capture: CaptureConfig, playback: PlaybackConfig) -> Result<Self, AgentError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<DeviceCommand>();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), AgentError>>();
        let (frame_tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);

        let frames = frame_tx.clone();
        let thread = thread::Builder::new()
            .name("parley-audio".into())
            .spawn(move || {
                run_audio_thread(&capture, &playback, &frame_tx, &cmd_rx, &init_tx);
            })
            .map_err(|e| AgentError::Device(format!("failed to spawn audio thread: {e}")))?;

        init_rx.recv().map_err(|_| AgentError::AudioThreadDied)??;

        Ok(Self {
            cmd_tx,
            frames,
            thread: Some(thread),
        })
    }

    /// Subscribe to the captured frame stream (16 kHz mono, fixed-size).
    ///
    /// A receiver that falls behind sees `Lagged(n)`; the dropped frames are
    /// gone and capture continues from the newest audio.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.frames.subscribe()
    }

    /// A cloneable [`OutputSink`] routed through the audio thread.
    #[must_use]
    pub fn sink(&self) -> DeviceSink {
        DeviceSink {
            cmd_tx: self.cmd_tx.clone(),
        }
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(DeviceCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// [`OutputSink`] implementation that proxies to the audio thread.
///
/// Request–reply methods block the caller for the channel round trip plus
/// the sink operation, both sub-millisecond.
#[derive(Clone)]
pub struct DeviceSink {
    cmd_tx: mpsc::Sender<DeviceCommand>,
}

impl DeviceSink {
    fn send_and_recv(
        &self,
        build: impl FnOnce(mpsc::Sender<Result<(), AgentError>>) -> DeviceCommand,
    ) -> Result<(), AgentError> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| AgentError::AudioThreadDied)?;
        rx.recv().map_err(|_| AgentError::AudioThreadDied)?
    }
}

impl OutputSink for DeviceSink {
    fn begin(&self) -> Result<(), AgentError> {
        self.send_and_recv(|reply| DeviceCommand::BeginOutput { reply })
    }

    fn enqueue(&self, chunk: AudioChunk) -> Result<(), AgentError> {
        self.send_and_recv(|reply| DeviceCommand::EnqueueOutput { chunk, reply })
    }

    fn pause(&self) {
        let _ = self.cmd_tx.send(DeviceCommand::PauseOutput);
    }

    fn resume(&self) {
        let _ = self.cmd_tx.send(DeviceCommand::ResumeOutput);
    }

    fn clear(&self) {
        let _ = self.cmd_tx.send(DeviceCommand::ClearOutput);
    }

    fn is_drained(&self) -> bool {
        let (tx, rx) = mpsc::channel();
        if self
            .cmd_tx
            .send(DeviceCommand::IsOutputDrained { reply: tx })
            .is_err()
        {
            // Thread gone: nothing can still be queued.
            return true;
        }
        rx.recv().unwrap_or(true)
    }
}

// ── Audio thread body ──────────────────────────────────────────────

struct OutputState {
    /// Must be kept alive for the duration of playback.
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Option<Sink>,
}

fn run_audio_thread(
    capture: &CaptureConfig,
    playback: &PlaybackConfig,
    frame_tx: &broadcast::Sender<AudioFrame>,
    cmd_rx: &mpsc::Receiver<DeviceCommand>,
    init_tx: &mpsc::Sender<Result<(), AgentError>>,
) {
    let capture_stream = match open_capture(capture, frame_tx.clone()) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = init_tx.send(Err(err));
            return;
        }
    };

    let mut output = match open_output(playback) {
        Ok(output) => output,
        Err(err) => {
            let _ = init_tx.send(Err(err));
            return;
        }
    };

    if init_tx.send(Ok(())).is_err() {
        return;
    }

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            DeviceCommand::BeginOutput { reply } => {
                let _ = reply.send(begin_output(&mut output));
            }

            DeviceCommand::EnqueueOutput { chunk, reply } => {
                let _ = reply.send(enqueue_output(&output, chunk));
            }

            DeviceCommand::PauseOutput => {
                if let Some(ref sink) = output.sink {
                    sink.pause();
                }
            }

            DeviceCommand::ResumeOutput => {
                if let Some(ref sink) = output.sink {
                    sink.play();
                }
            }

            DeviceCommand::ClearOutput => {
                if let Some(sink) = output.sink.take() {
                    sink.stop();
                }
            }

            DeviceCommand::IsOutputDrained { reply } => {
                let drained = output.sink.as_ref().is_none_or(Sink::empty);
                let _ = reply.send(drained);
            }

            DeviceCommand::Shutdown => break,
        }
    }

    // Streams and sinks drop here, on the audio thread.
    drop(capture_stream);
    tracing::debug!("audio thread shutting down");
}

fn begin_output(output: &mut OutputState) -> Result<(), AgentError> {
    if let Some(sink) = output.sink.take() {
        sink.stop();
    }
    let sink =
        Sink::try_new(&output.handle).map_err(|e| AgentError::Output(e.to_string()))?;
    output.sink = Some(sink);
    Ok(())
}

fn enqueue_output(output: &OutputState, chunk: AudioChunk) -> Result<(), AgentError> {
    let sink = output
        .sink
        .as_ref()
        .ok_or_else(|| AgentError::Output("no active playback sink".to_owned()))?;
    let source = rodio::buffer::SamplesBuffer::new(1, chunk.sample_rate, chunk.samples);
    sink.append(source);
    Ok(())
}

// ── Device selection ───────────────────────────────────────────────

fn is_loopback(name: &str) -> bool {
    let lower = name.to_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Pick the capture device: the named one if requested, otherwise the first
/// non-loopback input, otherwise the system default.
fn pick_input_device(host: &cpal::Host, preferred: Option<&str>) -> Result<Device, AgentError> {
    let devices: Vec<Device> = host
        .input_devices()
        .map_err(|e| AgentError::Device(e.to_string()))?
        .collect();

    if let Some(preferred) = preferred {
        for device in &devices {
            if device.name().is_ok_and(|n| n == preferred) {
                return Ok(device.clone());
            }
        }
        tracing::warn!(preferred, "requested input device not found - falling back");
    }

    for device in &devices {
        if let Ok(name) = device.name() {
            if !is_loopback(&name) {
                tracing::info!(device = %name, "selected input device");
                return Ok(device.clone());
            }
            tracing::debug!(device = %name, "skipping loopback input device");
        }
    }

    host.default_input_device().ok_or(AgentError::NoInputDevice)
}

/// Pick the output device with the same policy as the input side.
fn pick_output_device(host: &cpal::Host, preferred: Option<&str>) -> Result<Device, AgentError> {
    let devices: Vec<Device> = host
        .output_devices()
        .map_err(|e| AgentError::Device(e.to_string()))?
        .collect();

    if let Some(preferred) = preferred {
        for device in &devices {
            if device.name().is_ok_and(|n| n == preferred) {
                return Ok(device.clone());
            }
        }
        tracing::warn!(preferred, "requested output device not found - falling back");
    }

    for device in &devices {
        if let Ok(name) = device.name() {
            if !is_loopback(&name) {
                tracing::info!(device = %name, "selected output device");
                return Ok(device.clone());
            }
            tracing::debug!(device = %name, "skipping loopback output device");
        }
    }

    host.default_output_device()
        .ok_or(AgentError::NoOutputDevice)
}

// ── Capture ────────────────────────────────────────────────────────

fn open_capture(
    config: &CaptureConfig,
    frame_tx: broadcast::Sender<AudioFrame>,
) -> Result<cpal::Stream, AgentError> {
    let host = cpal::default_host();
    let device = pick_input_device(&host, config.input_device.as_deref())?;

    let supported = device
        .default_input_config()
        .map_err(|e| AgentError::Device(e.to_string()))?;
    let device_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let sample_format = supported.sample_format();

    tracing::info!(
        device = %device.name().unwrap_or_default(),
        sample_rate = device_rate,
        channels,
        "capture initialized"
    );

    let stream_config: StreamConfig = supported.into();
    let assembler = FrameAssembler::new(channels, device_rate, config.chunk_size)?;

    let err_fn = |err: cpal::StreamError| {
        tracing::error!(%err, "audio input stream error");
    };

    let stream = match sample_format {
        SampleFormat::F32 => {
            let mut assembler = assembler;
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    publish(&frame_tx, assembler.push(data));
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let mut assembler = assembler;
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let float_data: Vec<f32> =
                        data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                    publish(&frame_tx, assembler.push(&float_data));
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I32 => {
            let mut assembler = assembler;
            device.build_input_stream(
                &stream_config,
                move |data: &[i32], _: &cpal::InputCallbackInfo| {
                    #[allow(clippy::cast_precision_loss)]
                    let float_data: Vec<f32> =
                        data.iter().map(|&s| s as f32 / 2_147_483_648.0).collect();
                    publish(&frame_tx, assembler.push(&float_data));
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(AgentError::Device(format!(
                "unsupported sample format: {other:?}"
            )));
        }
    }
    .map_err(|e| AgentError::Device(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AgentError::Device(e.to_string()))?;

    Ok(stream)
}

/// Broadcast assembled frames. A send error only means no receiver is
/// subscribed yet; the frames are simply dropped.
fn publish(frame_tx: &broadcast::Sender<AudioFrame>, frames: Vec<AudioFrame>) {
    for frame in frames {
        let _ = frame_tx.send(frame);
    }
}

fn open_output(config: &PlaybackConfig) -> Result<OutputState, AgentError> {
    let host = cpal::default_host();
    let device = pick_output_device(&host, config.output_device.as_deref())?;

    tracing::info!(
        device = %device.name().unwrap_or_default(),
        "playback initialized"
    );

    let (stream, handle) = OutputStream::try_from_device(&device)
        .map_err(|e| AgentError::Output(e.to_string()))?;

    Ok(OutputState {
        _stream: stream,
        handle,
        sink: None,
    })
}

// ── Frame assembly ─────────────────────────────────────────────────

/// Turns raw interleaved device audio into fixed-size 16 kHz mono frames.
///
/// Downmixes by channel averaging, resamples through a streaming FFT
/// resampler when the device rate differs from 16 kHz, and cuts the result
/// into `chunk_size` frames. Owned entirely by the capture callback.
struct FrameAssembler {
    channels: usize,
    resampler: Option<FftFixedIn<f32>>,

    /// Mono samples at the device rate, waiting for a full resampler input.
    raw: Vec<f32>,

    /// Mono samples at 16 kHz, waiting to fill a frame.
    out: Vec<f32>,

    chunk_size: usize,
}

impl FrameAssembler {
    fn new(channels: u16, device_rate: u32, chunk_size: usize) -> Result<Self, AgentError> {
        let resampler = if device_rate == CAPTURE_SAMPLE_RATE {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(
                    device_rate as usize,
                    CAPTURE_SAMPLE_RATE as usize,
                    RESAMPLE_CHUNK,
                    2,
                    1,
                )
                .map_err(|e| AgentError::Device(e.to_string()))?,
            )
        };

        Ok(Self {
            channels: usize::from(channels.max(1)),
            resampler,
            raw: Vec::new(),
            out: Vec::new(),
            chunk_size,
        })
    }

    /// Feed interleaved device samples; returns zero or more full frames.
    fn push(&mut self, interleaved: &[f32]) -> Vec<AudioFrame> {
        if self.channels == 1 {
            self.raw.extend_from_slice(interleaved);
        } else {
            #[allow(clippy::cast_precision_loss)]
            self.raw.extend(
                interleaved
                    .chunks_exact(self.channels)
                    .map(|frame| frame.iter().sum::<f32>() / self.channels as f32),
            );
        }

        match self.resampler {
            None => self.out.append(&mut self.raw),
            Some(ref mut resampler) => {
                while self.raw.len() >= RESAMPLE_CHUNK {
                    let input: Vec<f32> = self.raw.drain(..RESAMPLE_CHUNK).collect();
                    match resampler.process(&[input], None) {
                        Ok(result) => {
                            if let Some(channel) = result.first() {
                                self.out.extend_from_slice(channel);
                            }
                        }
                        Err(err) => {
                            tracing::error!(%err, "resample failed - dropping input chunk");
                        }
                    }
                }
            }
        }

        let mut frames = Vec::new();
        let captured_at = Instant::now();
        while self.out.len() >= self.chunk_size {
            let samples: Vec<f32> = self.out.drain(..self.chunk_size).collect();
            frames.push(AudioFrame {
                samples,
                captured_at,
            });
        }
        frames
    }
}
