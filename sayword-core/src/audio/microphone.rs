//! Live microphone capture via cpal.
//!
//! The input callback runs on an OS audio thread and must not block, so it
//! only downmixes and pushes into the ring producer.
//!
//! Setup first asks for a fixed, frame-sized device buffer (lowest latency).
//! Many backends reject fixed buffer sizes; in that case the stream is rebuilt
//! with the device's default buffering. Callers see the same frames either way.

use std::sync::{atomic::AtomicBool, Arc};

use super::{ActiveCapture, AudioSource};
use crate::{
    buffering::AudioProducer,
    error::{Result, SaywordError},
};

/// Opens the preferred input device, else the default one.
#[derive(Debug, Clone, Default)]
pub struct MicrophoneSource {
    preferred_device: Option<String>,
}

impl MicrophoneSource {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

#[cfg(feature = "audio-cpal")]
mod live {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        BufferSize, Device, SampleFormat, SizedSample, Stream, StreamConfig,
    };
    use parking_lot::Mutex;
    use tracing::{error, info, warn};

    use super::super::{classify_stream_error, ActiveCapture};
    use crate::{
        buffering::{AudioProducer, Producer},
        error::{Result, SaywordError},
    };

    /// The producer waits here until a stream's first callback claims it, so
    /// a failed build does not consume it.
    type ProducerSlot = Arc<Mutex<Option<AudioProducer>>>;

    pub(super) struct MicrophoneCapture {
        stream: Stream,
        sample_rate: u32,
    }

    impl ActiveCapture for MicrophoneCapture {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn shutdown(&mut self) {
            if let Err(e) = self.stream.pause() {
                warn!("failed to pause input stream: {e}");
            }
        }
    }

    pub(super) fn open(
        preferred: Option<&str>,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        frame_hint: usize,
    ) -> Result<MicrophoneCapture> {
        let device = select_device(preferred)?;
        let supported = device
            .default_input_config()
            .map_err(|e| classify_stream_error(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let format = supported.sample_format();
        let slot: ProducerSlot = Arc::new(Mutex::new(Some(producer)));

        let mut config: StreamConfig = supported.config();
        config.buffer_size = BufferSize::Fixed(frame_hint as u32);

        let stream = match start(&device, &config, format, &slot, &running) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("low-latency capture setup failed ({e}), using default buffering");
                config.buffer_size = BufferSize::Default;
                start(&device, &config, format, &slot, &running)?
            }
        };

        info!(sample_rate, channels = config.channels, ?format, "microphone open");
        Ok(MicrophoneCapture {
            stream,
            sample_rate,
        })
    }

    fn select_device(preferred: Option<&str>) -> Result<Device> {
        let host = cpal::default_host();

        if let Some(name) = preferred {
            match host.input_devices() {
                Ok(mut devices) => {
                    if let Some(device) =
                        devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    {
                        return Ok(device);
                    }
                    warn!(device = name, "preferred input device not found, falling back");
                }
                Err(e) => warn!("failed to list input devices: {e}"),
            }
        }

        if let Some(device) = host.default_input_device() {
            return Ok(device);
        }
        host.input_devices()
            .map_err(|e| SaywordError::AudioDevice(e.to_string()))?
            .next()
            .ok_or(SaywordError::NoDefaultInputDevice)
    }

    fn start(
        device: &Device,
        config: &StreamConfig,
        format: SampleFormat,
        slot: &ProducerSlot,
        running: &Arc<AtomicBool>,
    ) -> Result<Stream> {
        let stream = match format {
            SampleFormat::F32 => build::<f32>(device, config, slot, running, |s| s),
            SampleFormat::I16 => build::<i16>(device, config, slot, running, |s| s as f32 / 32768.0),
            SampleFormat::U8 => {
                build::<u8>(device, config, slot, running, |s| (s as f32 - 128.0) / 128.0)
            }
            other => {
                return Err(SaywordError::AudioStream(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        }
        .map_err(|e| classify_stream_error(e.to_string()))?;

        stream
            .play()
            .map_err(|e| classify_stream_error(e.to_string()))?;
        Ok(stream)
    }

    fn build<T: SizedSample>(
        device: &Device,
        config: &StreamConfig,
        slot: &ProducerSlot,
        running: &Arc<AtomicBool>,
        to_f32: fn(T) -> f32,
    ) -> std::result::Result<Stream, cpal::BuildStreamError> {
        let channels = usize::from(config.channels.max(1));
        let slot = Arc::clone(slot);
        let running = Arc::clone(running);
        let mut producer: Option<AudioProducer> = None;
        let mut mixed: Vec<f32> = Vec::new();

        device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                if producer.is_none() {
                    producer = slot.try_lock().and_then(|mut guard| guard.take());
                }
                let Some(producer) = producer.as_mut() else {
                    return;
                };

                mixed.clear();
                mixed.extend(data.chunks_exact(channels).map(|frame| {
                    frame.iter().map(|s| to_f32(*s)).sum::<f32>() / channels as f32
                }));
                let written = producer.push_slice(&mixed);
                if written < mixed.len() {
                    warn!(dropped = mixed.len() - written, "capture ring full");
                }
            },
            |err| error!("audio stream error: {err}"),
            None,
        )
    }
}

#[cfg(feature = "audio-cpal")]
impl AudioSource for MicrophoneSource {
    fn describe(&self) -> String {
        match &self.preferred_device {
            Some(name) => format!("microphone ({name})"),
            None => "microphone (default)".into(),
        }
    }

    fn open(
        &self,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        frame_hint: usize,
    ) -> Result<Box<dyn ActiveCapture>> {
        let capture = live::open(self.preferred_device.as_deref(), producer, running, frame_hint)?;
        Ok(Box::new(capture))
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl AudioSource for MicrophoneSource {
    fn describe(&self) -> String {
        "microphone (unavailable)".into()
    }

    fn open(
        &self,
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _frame_hint: usize,
    ) -> Result<Box<dyn ActiveCapture>> {
        Err(SaywordError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
