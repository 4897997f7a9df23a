//! Audio capture pipeline.
//!
//! ```text
//! AudioSource ──push──► SPSC ring ──pop──► pump thread ──► RateConverter ──► Framer
//!  (device callback                                                           │
//!   or injected)                                     AudioFrame{session_id} ◄─┘
//!                                                          │
//!                                               mpsc::Receiver (backend)
//! ```
//!
//! `cpal::Stream` is `!Send` on most platforms, so each capture owns a
//! dedicated pump thread that opens the source, drains the ring and drops the
//! stream on exit. Open results come back through a oneshot channel.
//!
//! Frames are tagged with the session id that is current *when the frame is
//! emitted*. Backends compare it with their own id before forwarding.

pub mod framer;
pub mod injected;
pub mod microphone;
pub mod recorder;
pub mod resample;

pub use injected::InjectedSource;
pub use microphone::MicrophoneSource;
pub use recorder::BlobRecorder;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    buffering::{chunk::AudioFrame, create_audio_ring, AudioProducer, Consumer},
    error::{Result, SaywordError},
};
use framer::Framer;
use resample::{RateConverter, RESAMPLE_CHUNK};

/// Frames buffered between the pump thread and the backend.
const FRAME_CHANNEL_CAP: usize = 256;

/// Pump sleep when the ring is empty.
const PUMP_IDLE: Duration = Duration::from_millis(5);

/// Something that can be opened to produce mono f32 samples.
pub trait AudioSource: Send + Sync + 'static {
    fn describe(&self) -> String;

    /// Open the source on the calling (pump) thread and start pushing mono
    /// samples into `producer`. `frame_hint` is the preferred callback size.
    fn open(
        &self,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        frame_hint: usize,
    ) -> Result<Box<dyn ActiveCapture>>;
}

/// An open source, owned by the pump thread.
pub trait ActiveCapture {
    fn sample_rate(&self) -> u32;

    /// Called once per pump iteration. Returns `false` once the source has
    /// nothing more to give. Live devices fill the ring from their own
    /// callback and always return `true`.
    fn pump(&mut self) -> bool {
        true
    }

    /// Stop hardware streams. Called exactly once, on the pump thread.
    fn shutdown(&mut self) {}
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    /// Resample to this rate; `None` keeps the device rate.
    pub target_rate: Option<u32>,
    pub frame_samples: usize,
}

/// Shared stop switch for a capture. Closing is idempotent.
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl CaptureHandle {
    fn new(running: Arc<AtomicBool>) -> Self {
        Self {
            running,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.running.store(false, Ordering::Release);
        debug!("capture close requested");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// An open capture. Dropping it closes the source.
pub struct CaptureSession {
    frames: mpsc::Receiver<AudioFrame>,
    sample_rate: u32,
    handle: CaptureHandle,
}

impl CaptureSession {
    /// Next frame, or `None` once the source is exhausted or closed.
    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.frames.recv().await
    }

    /// Rate of the emitted frames.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn close(&mut self) {
        self.handle.close();
        self.frames.close();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.handle.close();
    }
}

/// Open `source` and start emitting frames tagged from `current_session`.
pub async fn open_capture(
    source: Arc<dyn AudioSource>,
    options: CaptureOptions,
    current_session: Arc<AtomicU64>,
) -> Result<CaptureSession> {
    let running = Arc::new(AtomicBool::new(true));
    let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAP);
    let (open_tx, open_rx) = oneshot::channel::<Result<u32>>();

    let pump_running = Arc::clone(&running);
    std::thread::Builder::new()
        .name("sayword-capture".into())
        .spawn(move || {
            pump(source, options, current_session, pump_running, frames_tx, open_tx)
        })?;

    let sample_rate = open_rx
        .await
        .map_err(|_| SaywordError::AudioStream("capture thread exited during open".into()))??;

    Ok(CaptureSession {
        frames: frames_rx,
        sample_rate,
        handle: CaptureHandle::new(running),
    })
}

fn pump(
    source: Arc<dyn AudioSource>,
    options: CaptureOptions,
    current_session: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    frames_tx: mpsc::Sender<AudioFrame>,
    open_tx: oneshot::Sender<Result<u32>>,
) {
    let (producer, mut consumer) = create_audio_ring();

    let mut capture = match source.open(producer, Arc::clone(&running), options.frame_samples) {
        Ok(capture) => capture,
        Err(e) => {
            let _ = open_tx.send(Err(e));
            return;
        }
    };

    let capture_rate = capture.sample_rate();
    let output_rate = options.target_rate.unwrap_or(capture_rate);
    let mut converter = match RateConverter::new(capture_rate, output_rate, RESAMPLE_CHUNK) {
        Ok(converter) => converter,
        Err(e) => {
            capture.shutdown();
            let _ = open_tx.send(Err(e));
            return;
        }
    };

    info!(
        source = source.describe().as_str(),
        capture_rate, output_rate, "capture opened"
    );
    if open_tx.send(Ok(output_rate)).is_err() {
        capture.shutdown();
        return;
    }

    let mut framer = Framer::new(options.frame_samples);
    let mut raw = vec![0f32; 4096];
    let mut live = true;

    while running.load(Ordering::Acquire) {
        if live {
            live = capture.pump();
        }

        let n = consumer.pop_slice(&mut raw);
        if n == 0 {
            if !live {
                debug!("capture source exhausted");
                break;
            }
            std::thread::sleep(PUMP_IDLE);
            continue;
        }

        let converted = converter.process(&raw[..n]);
        for samples in framer.push(&converted) {
            let frame = AudioFrame::new(current_session.load(Ordering::Acquire), samples, output_rate);
            if frames_tx.blocking_send(frame).is_err() {
                running.store(false, Ordering::Release);
                break;
            }
        }
    }

    capture.shutdown();
    if framer.pending() > 0 {
        debug!(dropped = framer.pending(), "partial frame discarded at close");
    }
    drop(capture);
    debug!("capture pump stopped");
}

/// Map a device error message onto the permission/stream split callers see.
pub(crate) fn classify_stream_error(message: String) -> SaywordError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        warn!("microphone access refused: {message}");
        SaywordError::PermissionDenied(message)
    } else {
        SaywordError::AudioStream(message)
    }
}
