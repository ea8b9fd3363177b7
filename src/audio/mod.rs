//! Microphone capture via cpal.
//!
//! # Real-time constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated
//! priority. It must not allocate after warm-up, block on a lock, or
//! perform I/O. The callback therefore only converts samples into a
//! reusable scratch buffer and writes them to the lock-free SPSC ring
//! producer.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows,
//! CoreAudio on macOS), so `AudioCapture` must be created and dropped on
//! the same thread. The engine does this inside `spawn_blocking`.

pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleRate, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{error, info, warn};

use crate::{
    buffering::{AudioProducer, Producer},
    error::{RelayError, Result},
};

/// Handle to an active capture stream.
///
/// **Not `Send`** — bound to its creation thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    running: Arc<AtomicBool>,
    /// Actual rate the device delivers samples at (Hz).
    pub sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl AudioCapture {
    /// Open an input device by name, falling back to the system default
    /// and then to the first available input.
    pub fn open_with_preference(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = resolve_device(&host, preferred_device_name)?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| RelayError::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "capture config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &config, producer, Arc::clone(&running), |s| s)
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, producer, Arc::clone(&running), |s| {
                    s as f32 / 32768.0
                })
            }
            cpal::SampleFormat::U8 => {
                build_stream::<u8>(&device, &config, producer, Arc::clone(&running), |s| {
                    (s as f32 - 128.0) / 128.0
                })
            }
            fmt => {
                return Err(RelayError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| RelayError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Open the system default microphone.
    ///
    /// Call from the thread that will also drop this value — in practice
    /// inside `tokio::task::spawn_blocking`.
    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Names of the available input devices, for selection UIs.
#[cfg(feature = "audio-cpal")]
pub fn input_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| RelayError::AudioDevice(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

#[cfg(feature = "audio-cpal")]
fn resolve_device(
    host: &cpal::Host,
    preferred_name: Option<&str>,
) -> Result<cpal::Device> {
    if let Some(name) = preferred_name {
        match host.input_devices() {
            Ok(mut devices) => {
                if let Some(device) =
                    devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
                {
                    return Ok(device);
                }
                warn!("preferred input device '{name}' not found, falling back");
            }
            Err(e) => warn!("failed to list input devices: {e}"),
        }
    }

    if let Some(default) = host.default_input_device() {
        return Ok(default);
    }

    let mut devices = host
        .input_devices()
        .map_err(|e| RelayError::AudioDevice(e.to_string()))?;
    let first = devices.next().ok_or(RelayError::NoDefaultInputDevice)?;
    warn!("no default input device, using first available input");
    Ok(first)
}

/// Build one input stream for sample type `T`, mixing interleaved
/// channels down to mono f32 inside the callback.
#[cfg(feature = "audio-cpal")]
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
    convert: fn(T) -> f32,
) -> Result<Stream>
where
    T: cpal::SizedSample + Send + 'static,
{
    let channels = config.channels as usize;
    // Reused across callbacks; grows once to the device buffer size.
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }

                let frames = data.len() / channels;
                mono.resize(frames, 0.0);
                for (frame_idx, frame) in data.chunks_exact(channels).enumerate() {
                    let mut sum = 0f32;
                    for sample in frame {
                        sum += convert(*sample);
                    }
                    mono[frame_idx] = sum / channels as f32;
                }

                let written = producer.push_slice(&mono);
                if written < mono.len() {
                    warn!("ring buffer full: dropped {} frames", mono.len() - written);
                }
            },
            |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| RelayError::AudioStream(e.to_string()))
}

/// Stub when the `audio-cpal` feature is disabled. Session and
/// dispatcher tests run without a device; only live capture needs cpal.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(RelayError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn input_device_names() -> Result<Vec<String>> {
    Ok(Vec::new())
}
