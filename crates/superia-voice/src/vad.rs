//! Voice Activity Detection using WebRTC VAD.

use crate::error::{VoiceError, VoiceResult};
use tracing::info;
use webrtc_vad::{SampleRate, Vad, VadMode};

#[derive(Debug, Clone)]
pub struct VadConfig {
    /// 8000, 16000, 32000 or 48000 Hz.
    pub sample_rate: u32,
    /// 0 (quality) to 3 (very aggressive).
    pub mode: u8,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            mode: 3,
        }
    }
}

/// Not `Send`: build it on the thread that uses it.
pub struct VadDetector {
    vad: Vad,
    frame_size: usize,
}

fn vad_rate(sample_rate: u32) -> VoiceResult<SampleRate> {
    match sample_rate {
        8000 => Ok(SampleRate::Rate8kHz),
        16000 => Ok(SampleRate::Rate16kHz),
        32000 => Ok(SampleRate::Rate32kHz),
        48000 => Ok(SampleRate::Rate48kHz),
        other => Err(VoiceError::Config(format!(
            "WebRTC VAD only supports 8000, 16000, 32000, or 48000 Hz, got {}",
            other
        ))),
    }
}

fn vad_mode(mode: u8) -> VoiceResult<VadMode> {
    match mode {
        0 => Ok(VadMode::Quality),
        1 => Ok(VadMode::LowBitrate),
        2 => Ok(VadMode::Aggressive),
        3 => Ok(VadMode::VeryAggressive),
        other => Err(VoiceError::Config(format!("VAD mode must be 0-3, got {}", other))),
    }
}

impl VadDetector {
    pub fn new(config: &VadConfig) -> VoiceResult<Self> {
        let rate = vad_rate(config.sample_rate)?;
        let mode = vad_mode(config.mode)?;
        let mut vad = Vad::new();
        vad.set_mode(mode);
        vad.set_sample_rate(rate);
        // 30 ms windows.
        let frame_size = (config.sample_rate as usize * 30) / 1000;
        info!(sample_rate = config.sample_rate, mode = config.mode, frame_size, "🎙️ VAD ready");
        Ok(Self { vad, frame_size })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Classify one frame of exactly `frame_size` samples.
    pub fn is_speech(&mut self, frame: &[f32]) -> VoiceResult<bool> {
        if frame.len() != self.frame_size {
            return Err(VoiceError::Vad(format!(
                "Expected {} samples, got {}",
                self.frame_size,
                frame.len()
            )));
        }
        let pcm: Vec<i16> = frame
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();
        self.vad
            .is_voice_segment(&pcm)
            .map_err(|_| VoiceError::Vad("invalid frame length".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_is_thirty_ms() {
        let vad = VadDetector::new(&VadConfig::default()).unwrap();
        assert_eq!(vad.frame_size(), 480);
    }

    #[test]
    fn unsupported_rate_and_mode_rejected() {
        let rate = VadConfig {
            sample_rate: 44100,
            ..VadConfig::default()
        };
        assert!(matches!(VadDetector::new(&rate), Err(VoiceError::Config(_))));
        let mode = VadConfig {
            mode: 7,
            ..VadConfig::default()
        };
        assert!(matches!(VadDetector::new(&mode), Err(VoiceError::Config(_))));
    }

    #[test]
    fn silence_is_not_speech() {
        let mut vad = VadDetector::new(&VadConfig::default()).unwrap();
        assert!(!vad.is_speech(&[0.0f32; 480]).unwrap());
        assert!(matches!(vad.is_speech(&[0.0f32; 100]), Err(VoiceError::Vad(_))));
    }
}
