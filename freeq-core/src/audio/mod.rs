//! Audio output bridge via cpal backend.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated
//! (TIME_CRITICAL on Windows) priority. It **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! This module satisfies that contract by driving the duplex channel's
//! `RealtimeEnd` with interleaved push/pull, which is lock-free and
//! allocation-free; the scratch buffer for generated input is sized once
//! before the stream starts.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioBridge` therefore must be created and dropped on the same
//! thread.

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use crate::{
    duplex::RealtimeEnd,
    error::{FreeqError, Result},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// RT-safe input generator driven from inside the render callback.
///
/// `fill` receives a channel-interleaved buffer of `buf.len() / channels`
/// frames and must complete without allocating or blocking.
pub trait SampleSource: Send + 'static {
    fn fill(&mut self, buf: &mut [f32], channels: usize);
}

impl<F> SampleSource for F
where
    F: FnMut(&mut [f32], usize) + Send + 'static,
{
    fn fill(&mut self, buf: &mut [f32], channels: usize) {
        self(buf, channels)
    }
}

/// Handle to an active duplex output stream.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the same OS thread.
pub struct AudioBridge {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Shared flag — set to `false` to make the callback emit silence.
    running: Arc<AtomicBool>,
    /// Actual output sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

impl AudioBridge {
    /// Open an output device by preferred name, otherwise fall back to the
    /// default output device and then the first available device.
    ///
    /// The callback chunks each device buffer into `quantum_frames` quanta
    /// and runs one `process_quantum_interleaved` per chunk: source frames
    /// in, processed frames out, worker signaled when a batch is pending.
    /// Underruns are rendered as silence.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference<S: SampleSource>(
        mut realtime: RealtimeEnd,
        mut source: S,
        running: Arc<AtomicBool>,
        quantum_frames: usize,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        assert!(quantum_frames > 0, "quantum must cover at least one frame");

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.output_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });

                    if selected_device.is_none() {
                        warn!(
                            "preferred output device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list output devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_output_device() {
            default
        } else {
            let mut devices = host
                .output_devices()
                .map_err(|e| FreeqError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(FreeqError::NoDefaultOutputDevice)?;
            warn!("no default output device, falling back to first available output");
            fallback
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening output device"
        );

        let supported = device
            .default_output_config()
            .map_err(|e| FreeqError::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        if usize::from(channels) != realtime.channel_count() {
            return Err(FreeqError::AudioDevice(format!(
                "device has {} channels, duplex channel was built for {}",
                channels,
                realtime.channel_count()
            )));
        }

        info!(sample_rate, channels, "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ch = usize::from(channels);
        // Sized once, before the stream starts; never grown in the callback.
        let mut scratch = vec![0.0f32; quantum_frames * ch];

        // Pre-clone one Arc per sample format branch so each closure owns
        // its flag.
        let running_f32 = Arc::clone(&running);
        let running_i16 = Arc::clone(&running);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    if !running_f32.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }
                    for chunk in data.chunks_mut(quantum_frames * ch) {
                        let frames = chunk.len() / ch;
                        let quantum = &mut scratch[..frames * ch];
                        source.fill(quantum, ch);
                        let report =
                            realtime.process_quantum_interleaved(quantum, chunk, frames);
                        if !report.pulled {
                            chunk.fill(0.0);
                            warn!(frames, "output underrun: rendering silence");
                        }
                        if !report.pushed {
                            warn!(frames, "input ring full: dropped one quantum");
                        }
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),

            SampleFormat::I16 => {
                // Second scratch for the f32 frames pulled before conversion.
                let mut pulled = vec![0.0f32; quantum_frames * ch];
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _info| {
                        if !running_i16.load(Ordering::Relaxed) {
                            data.fill(0);
                            return;
                        }
                        for chunk in data.chunks_mut(quantum_frames * ch) {
                            let frames = chunk.len() / ch;
                            let quantum = &mut scratch[..frames * ch];
                            source.fill(quantum, ch);
                            let out = &mut pulled[..frames * ch];
                            let report =
                                realtime.process_quantum_interleaved(quantum, out, frames);
                            if report.pulled {
                                for (dst, &src) in chunk.iter_mut().zip(out.iter()) {
                                    *dst = (src.clamp(-1.0, 1.0) * 32767.0) as i16;
                                }
                            } else {
                                chunk.fill(0);
                                warn!(frames, "output underrun: rendering silence");
                            }
                            if !report.pushed {
                                warn!(frames, "input ring full: dropped one quantum");
                            }
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(FreeqError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| FreeqError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| FreeqError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Open the system default output device.
    ///
    /// Must be called from the thread that will also drop this value.
    ///
    /// # Errors
    /// Returns `FreeqError::NoDefaultOutputDevice` when no output device is
    /// available, or `FreeqError::AudioStream` if cpal fails to build the
    /// stream.
    #[cfg(feature = "audio-cpal")]
    pub fn open_default<S: SampleSource>(
        realtime: RealtimeEnd,
        source: S,
        running: Arc<AtomicBool>,
        quantum_frames: usize,
    ) -> Result<Self> {
        Self::open_with_preference(realtime, source, running, quantum_frames, None)
    }

    /// Stop: make the callback render silence from its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioBridge {
    pub fn open_with_preference<S: SampleSource>(
        _realtime: RealtimeEnd,
        _source: S,
        _running: Arc<AtomicBool>,
        _quantum_frames: usize,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(FreeqError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default<S: SampleSource>(
        realtime: RealtimeEnd,
        source: S,
        running: Arc<AtomicBool>,
        quantum_frames: usize,
    ) -> Result<Self> {
        Self::open_with_preference(realtime, source, running, quantum_frames, None)
    }
}

/// Endless sine generator usable as a `SampleSource` (all channels carry the
/// same tone). Phase advances across calls, so quantum boundaries are
/// click-free.
pub struct SineSource {
    phase: f32,
    step: f32,
    amplitude: f32,
}

impl SineSource {
    pub fn new(frequency_hz: f32, sample_rate: u32, amplitude: f32) -> Self {
        Self {
            phase: 0.0,
            step: std::f32::consts::TAU * frequency_hz / sample_rate as f32,
            amplitude,
        }
    }
}

impl SampleSource for SineSource {
    fn fill(&mut self, buf: &mut [f32], channels: usize) {
        for frame in buf.chunks_mut(channels) {
            let sample = self.phase.sin() * self.amplitude;
            for slot in frame {
                *slot = sample;
            }
            self.phase += self.step;
            if self.phase > std::f32::consts::TAU {
                self.phase -= std::f32::consts::TAU;
            }
        }
    }
}
