//! Audio capture via cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory (beyond a reused mixdown scratch buffer)
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! This module satisfies that contract by writing i16 samples directly into
//! an SPSC ring buffer producer whose `push_slice` is lock-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioCapture` therefore must be created and dropped on the same
//! thread. The engine accomplishes this by calling `open_with_preference`
//! inside `spawn_blocking`.

pub mod device;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use crate::{
    buffering::{CaptureConsumer, CaptureProducer, Consumer},
    error::{ContrecError, Result},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Blocking-ish acquisition of fixed-size PCM sample blocks.
///
/// `Ok(0)` is a transient empty read — the caller should back off briefly
/// and retry, never treat it as end-of-stream (microphones have no EOF).
/// `Err(DeviceFailure)` is fatal to the current capture session.
pub trait FrameSource: Send + 'static {
    /// Fill `buf` with up to `buf.len()` mono i16 samples; returns the count.
    fn read(&mut self, buf: &mut [i16]) -> Result<usize>;
}

/// `FrameSource` over the consumer half of the capture ring.
///
/// The paired producer is fed by the cpal callback; `failed` is set by the
/// stream's error callback, turning the next drained-empty read into a
/// `DeviceFailure`.
pub struct RingSource {
    consumer: CaptureConsumer,
    failed: Arc<AtomicBool>,
}

impl RingSource {
    pub fn new(consumer: CaptureConsumer, failed: Arc<AtomicBool>) -> Self {
        Self { consumer, failed }
    }
}

impl FrameSource for RingSource {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize> {
        let n = self.consumer.pop_slice(buf);
        if n == 0 && self.failed.load(Ordering::Acquire) {
            return Err(ContrecError::DeviceFailure(
                "audio stream reported an error".into(),
            ));
        }
        Ok(n)
    }
}

/// Handle to an active audio capture stream.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the same OS thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Set by the stream error callback; observed by `RingSource`.
    pub failed: Arc<AtomicBool>,
}

/// Convert one normalized f32 sample to i16 with clamping.
#[cfg(feature = "audio-cpal")]
#[inline]
fn f32_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * 32767.0) as i16
}

impl AudioCapture {
    /// Open an input device by preferred name (default input device when
    /// `None`) at exactly `sample_rate` Hz, pushing mono i16 samples into
    /// `producer`.
    ///
    /// Must be called from the thread that will also drop this value. In
    /// practice this means calling it inside `tokio::task::spawn_blocking`.
    ///
    /// # Errors
    /// - `ContrecError::NoDefaultInputDevice` when no microphone exists.
    /// - `ContrecError::DeviceUnavailable` when the device cannot be opened
    ///   or does not support `sample_rate`.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        mut producer: CaptureProducer,
        running: Arc<AtomicBool>,
        sample_rate: u32,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });

                    if selected_device.is_none() {
                        warn!(
                            "preferred input device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else {
            host.default_input_device()
                .ok_or(ContrecError::NoDefaultInputDevice)?
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate, "opening input device"
        );

        // Negotiate a supported config carrying the requested rate. The
        // capture rate is a hard requirement: segment timing and the WAV
        // header are both derived from it, so there is no resampling fallback.
        let supported = device
            .supported_input_configs()
            .map_err(|e| ContrecError::DeviceUnavailable(e.to_string()))?
            .find(|range| {
                range.min_sample_rate().0 <= sample_rate
                    && sample_rate <= range.max_sample_rate().0
            })
            .ok_or_else(|| {
                ContrecError::DeviceUnavailable(format!(
                    "device does not support {sample_rate} Hz capture"
                ))
            })?
            .with_sample_rate(SampleRate(sample_rate));

        let channels = supported.channels();
        let sample_format = supported.sample_format();

        info!(channels, ?sample_format, "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let failed = Arc::new(AtomicBool::new(false));
        let ch = channels as usize;
        let mut mix_buf: Vec<i16> = Vec::new();

        // Each match arm owns its own clones; only one arm ever executes.
        let running_cb = Arc::clone(&running);
        let failed_cb = Arc::clone(&failed);

        let stream = match sample_format {
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    if ch == 1 {
                        let written = producer.push_slice(data);
                        if written < data.len() {
                            warn!("ring buffer full: dropped {} samples", data.len() - written);
                        }
                        return;
                    }
                    let frames = data.len() / ch;
                    mix_buf.resize(frames, 0);
                    for f in 0..frames {
                        let base = f * ch;
                        let mut sum = 0i32;
                        for c in 0..ch {
                            sum += data[base + c] as i32;
                        }
                        mix_buf[f] = (sum / ch as i32) as i16;
                    }
                    let written = producer.push_slice(&mix_buf);
                    if written < mix_buf.len() {
                        warn!(
                            "ring buffer full: dropped {} samples",
                            mix_buf.len() - written
                        );
                    }
                },
                move |err| {
                    error!("audio stream error: {err}");
                    failed_cb.store(true, Ordering::Release);
                },
                None,
            ),

            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    let frames = data.len() / ch;
                    mix_buf.resize(frames, 0);
                    if ch == 1 {
                        for (dst, src) in mix_buf.iter_mut().zip(data.iter()) {
                            *dst = f32_to_i16(*src);
                        }
                    } else {
                        for f in 0..frames {
                            let base = f * ch;
                            let mut sum = 0f32;
                            for c in 0..ch {
                                sum += data[base + c];
                            }
                            mix_buf[f] = f32_to_i16(sum / ch as f32);
                        }
                    }
                    let written = producer.push_slice(&mix_buf);
                    if written < mix_buf.len() {
                        warn!(
                            "ring buffer full: dropped {} samples",
                            mix_buf.len() - written
                        );
                    }
                },
                move |err| {
                    error!("audio stream error: {err}");
                    failed_cb.store(true, Ordering::Release);
                },
                None,
            ),

            SampleFormat::U8 => device.build_input_stream(
                &config,
                move |data: &[u8], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    let frames = data.len() / ch;
                    mix_buf.resize(frames, 0);
                    if ch == 1 {
                        for (dst, src) in mix_buf.iter_mut().zip(data.iter()) {
                            *dst = ((*src as i16) - 128) << 8;
                        }
                    } else {
                        for f in 0..frames {
                            let base = f * ch;
                            let mut sum = 0i32;
                            for c in 0..ch {
                                sum += (data[base + c] as i32) - 128;
                            }
                            mix_buf[f] = ((sum / ch as i32) << 8) as i16;
                        }
                    }
                    let written = producer.push_slice(&mix_buf);
                    if written < mix_buf.len() {
                        warn!(
                            "ring buffer full: dropped {} samples",
                            mix_buf.len() - written
                        );
                    }
                },
                move |err| {
                    error!("audio stream error: {err}");
                    failed_cb.store(true, Ordering::Release);
                },
                None,
            ),

            fmt => {
                return Err(ContrecError::DeviceUnavailable(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| ContrecError::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| ContrecError::DeviceUnavailable(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            failed,
        })
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _producer: CaptureProducer,
        _running: Arc<AtomicBool>,
        _sample_rate: u32,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(ContrecError::DeviceUnavailable(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
