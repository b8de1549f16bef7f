//! Audio playback sinks.
//!
//! The manager plays decoded PCM through an [`AudioSink`]. Production uses
//! [`CpalSink`] over the system output device; tests and headless embedders
//! use [`VirtualSink`], whose playback clock is advanced by the engine tick.

use crate::config::AudioConfig;
use crate::error::{CompanionError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Decoded mono PCM ready for a sink.
#[derive(Debug, Clone)]
pub struct PcmClip {
    /// f32 samples in `[-1, 1]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl PcmClip {
    /// Decode 16-bit little-endian mono PCM, the TTS endpoint's wire format.
    #[must_use]
    pub fn from_pcm16(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
            .collect();
        Self {
            samples,
            sample_rate,
        }
    }

    /// Clip length in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate.max(1) as f32
    }
}

/// Shared playback progress, mutated by the stream callback (cpal) or by the
/// engine tick (virtual).
struct PlaybackShared {
    samples: Vec<f32>,
    sample_rate: u32,
    position: usize,
    paused: bool,
    stopped: bool,
    volume: f32,
}

/// Handle to one in-flight playback.
///
/// At most one handle is live at a time; the manager drops it when the clip
/// ends or is stopped, releasing the backing stream.
pub struct PlaybackHandle {
    shared: Arc<Mutex<PlaybackShared>>,
    /// Keeps the cpal stream alive for the duration of the playback.
    _stream: Option<cpal::Stream>,
    /// True when the position advances via [`PlaybackHandle::tick`] rather
    /// than a device callback.
    tick_clocked: bool,
}

impl PlaybackHandle {
    fn new(clip: PcmClip, volume: f32, stream: Option<cpal::Stream>, tick_clocked: bool) -> Self {
        Self {
            shared: Arc::new(Mutex::new(PlaybackShared {
                sample_rate: clip.sample_rate,
                samples: clip.samples,
                position: 0,
                paused: false,
                stopped: false,
                volume,
            })),
            _stream: stream,
            tick_clocked,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PlaybackShared>> {
        self.shared
            .lock()
            .map_err(|e| CompanionError::Audio(format!("playback lock poisoned: {e}")))
    }

    /// Pause without losing position.
    pub fn pause(&self) {
        if let Ok(mut shared) = self.lock() {
            shared.paused = true;
        }
    }

    /// Resume from the paused position.
    pub fn resume(&self) {
        if let Ok(mut shared) = self.lock() {
            shared.paused = false;
        }
    }

    /// Halt and reset the play position.
    pub fn stop(&self) {
        if let Ok(mut shared) = self.lock() {
            shared.stopped = true;
            shared.position = 0;
        }
    }

    /// Adjust playback volume, clamped to `[0, 1]`.
    pub fn set_volume(&self, volume: f32) {
        if let Ok(mut shared) = self.lock() {
            shared.volume = volume.clamp(0.0, 1.0);
        }
    }

    /// Whether playback has ended or was stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.lock()
            .map(|shared| shared.stopped || shared.position >= shared.samples.len())
            .unwrap_or(true)
    }

    /// Whether playback is paused (and not stopped).
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.lock()
            .map(|shared| shared.paused && !shared.stopped)
            .unwrap_or(false)
    }

    /// Advance a tick-clocked playback by `dt` seconds. No-op for device
    /// playbacks, whose callback advances the position.
    pub fn tick(&self, dt: f32) {
        if !self.tick_clocked {
            return;
        }
        if let Ok(mut shared) = self.lock() {
            if shared.paused || shared.stopped {
                return;
            }
            let step = (dt * shared.sample_rate as f32) as usize;
            shared.position = (shared.position + step).min(shared.samples.len());
        }
    }

    /// The most recent `n` samples behind the play head, for the VU analyser.
    #[must_use]
    pub fn recent_samples(&self, n: usize) -> Vec<f32> {
        self.lock()
            .map(|shared| {
                let end = shared.position.min(shared.samples.len());
                let start = end.saturating_sub(n);
                shared.samples[start..end].to_vec()
            })
            .unwrap_or_default()
    }
}

/// Destination for decoded speech audio.
pub trait AudioSink {
    /// Begin playing a clip at the given volume.
    ///
    /// # Errors
    ///
    /// Returns `Audio` if the output stream cannot be created.
    fn play(&self, clip: PcmClip, volume: f32) -> Result<PlaybackHandle>;
}

/// System-speaker sink via cpal.
pub struct CpalSink {
    device: cpal::Device,
    stream_config: StreamConfig,
}

impl CpalSink {
    /// Open the configured (or default) output device.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| CompanionError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| CompanionError::Audio(format!("output device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| CompanionError::Audio("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: config.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            stream_config,
        })
    }
}

impl AudioSink for CpalSink {
    fn play(&self, clip: PcmClip, volume: f32) -> Result<PlaybackHandle> {
        let handle = PlaybackHandle::new(clip, volume, None, false);
        let shared = Arc::clone(&handle.shared);

        let stream = self
            .device
            .build_output_stream(
                &self.stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let mut buf = match shared.lock() {
                        Ok(b) => b,
                        Err(_) => return,
                    };
                    for sample in data.iter_mut() {
                        if buf.paused || buf.stopped || buf.position >= buf.samples.len() {
                            *sample = 0.0;
                        } else {
                            *sample = buf.samples[buf.position] * buf.volume;
                            buf.position += 1;
                        }
                    }
                },
                move |err| {
                    error!("audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| CompanionError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| CompanionError::Audio(format!("failed to start output stream: {e}")))?;

        Ok(PlaybackHandle {
            _stream: Some(stream),
            ..handle
        })
    }
}

/// Silent sink whose clock is the engine tick. Used in tests and headless
/// embeddings.
#[derive(Debug, Default)]
pub struct VirtualSink;

impl VirtualSink {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AudioSink for VirtualSink {
    fn play(&self, clip: PcmClip, volume: f32) -> Result<PlaybackHandle> {
        Ok(PlaybackHandle::new(clip, volume, None, true))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn clip(seconds: f32) -> PcmClip {
        let rate = 1_000;
        PcmClip {
            samples: vec![0.5; (seconds * rate as f32) as usize],
            sample_rate: rate,
        }
    }

    #[test]
    fn pcm16_decoding() {
        let bytes = [0x00, 0x00, 0xFF, 0x7F, 0x01, 0x80];
        let clip = PcmClip::from_pcm16(&bytes, 24_000);
        assert_eq!(clip.samples.len(), 3);
        assert!((clip.samples[0] - 0.0).abs() < 1e-6);
        assert!((clip.samples[1] - 1.0).abs() < 1e-4);
        assert!((clip.samples[2] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn virtual_playback_advances_with_ticks() {
        let sink = VirtualSink::new();
        let handle = sink.play(clip(1.0), 1.0).unwrap();
        assert!(!handle.is_finished());

        handle.tick(0.5);
        assert!(!handle.is_finished());
        handle.tick(0.6);
        assert!(handle.is_finished());
    }

    #[test]
    fn pause_holds_position_resume_continues() {
        let sink = VirtualSink::new();
        let handle = sink.play(clip(1.0), 1.0).unwrap();

        handle.tick(0.3);
        handle.pause();
        assert!(handle.is_paused());
        handle.tick(10.0);
        assert!(!handle.is_finished(), "paused playback does not advance");

        handle.resume();
        assert!(!handle.is_paused());
        handle.tick(0.8);
        assert!(handle.is_finished());
    }

    #[test]
    fn stop_finishes_and_resets() {
        let sink = VirtualSink::new();
        let handle = sink.play(clip(1.0), 1.0).unwrap();
        handle.tick(0.2);
        handle.stop();
        assert!(handle.is_finished());
        // Stopped playback yields no analyser samples.
        assert!(handle.recent_samples(64).is_empty());
    }

    #[test]
    fn recent_samples_window() {
        let sink = VirtualSink::new();
        let handle = sink.play(clip(1.0), 1.0).unwrap();
        handle.tick(0.1); // 100 samples in
        assert_eq!(handle.recent_samples(64).len(), 64);
        assert_eq!(handle.recent_samples(1_000).len(), 100);
    }
}
