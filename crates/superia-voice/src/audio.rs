//! Microphone capture using CPAL.
//!
//! Delivers fixed-size mono f32 frames on a tokio channel; the VAD and the relay both consume them.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per frame (480 = 30 ms at 16 kHz, one VAD window).
    pub frame_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_size: 480,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Normalized to -1.0..=1.0.
    pub samples: Vec<f32>,
    pub captured_at: Instant,
}

pub struct AudioCapture {
    config: AudioConfig,
    device: Device,
    stream_config: StreamConfig,
}

impl AudioCapture {
    /// Open the default input device.
    pub fn new(config: AudioConfig) -> VoiceResult<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?;
        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate = config.sample_rate,
            "🎤 Input device ready"
        );
        // Fails early on hosts that expose the device but cannot open it.
        device.default_input_config()?;

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        Ok(Self {
            config,
            device,
            stream_config,
        })
    }

    /// Start the stream. Frames flow until the returned `Stream` is dropped, which also closes `frames`.
    pub fn start(
        self,
        frames: mpsc::UnboundedSender<AudioFrame>,
        on_error: impl FnMut(String) + Send + 'static,
    ) -> VoiceResult<Stream> {
        let frame_size = self.config.frame_size.max(1);
        let channels = self.config.channels.max(1) as usize;
        let mut buffer = Vec::with_capacity(frame_size);
        let mut on_error = on_error;

        let stream = self.device.build_input_stream(
            &self.stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Downmix by taking the first channel.
                for sample in data.iter().step_by(channels) {
                    buffer.push(*sample);
                    if buffer.len() >= frame_size {
                        let frame = AudioFrame {
                            samples: std::mem::replace(&mut buffer, Vec::with_capacity(frame_size)),
                            captured_at: Instant::now(),
                        };
                        if frames.send(frame).is_err() {
                            return;
                        }
                    }
                }
            },
            move |err| {
                warn!(error = %err, "Audio stream error");
                on_error(err.to_string());
            },
            None,
        )?;
        stream.play()?;
        info!("▶️ Audio capture started");
        Ok(stream)
    }

    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let devices = cpal::default_host().input_devices()?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_vad_window() {
        let config = AudioConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.frame_size, 480);
    }

    #[test]
    fn listing_devices_does_not_panic() {
        // CI machines usually have no audio hardware.
        if let Ok(devices) = AudioCapture::list_input_devices() {
            println!("input devices: {:?}", devices);
        }
    }
}
