//! Speech segmentation for local capture.
//!
//! Gap logic: a segment starts at the first voiced frame and is committed once the
//! user has been silent for `gap` (800 ms by default). Segments shorter than
//! `min_speech` are discarded as clicks and breaths.

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Silence before a segment is committed.
    pub gap: Duration,
    pub min_speech: Duration,
    /// Segments are force-committed at this length.
    pub max_segment: Duration,
    pub sample_rate: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            gap: Duration::from_millis(800),
            min_speech: Duration::from_millis(200),
            max_segment: Duration::from_secs(30),
            sample_rate: 16000,
        }
    }
}

/// One committed stretch of speech, 16-bit-ready mono PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSegment {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmenterEvent {
    SpeechStarted,
    Committed(SpeechSegment),
    /// Speech ended but was too short to keep.
    Discarded { duration: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Speaking,
    Trailing,
}

/// Pure state machine over VAD decisions. The caller supplies the clock.
pub struct SpeechSegmenter {
    config: SegmenterConfig,
    phase: Phase,
    started: Option<Instant>,
    last_voice: Option<Instant>,
    buffer: Vec<f32>,
}

impl SpeechSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            started: None,
            last_voice: None,
            buffer: Vec::new(),
        }
    }

    /// Feed one VAD-classified frame captured at `now`.
    pub fn push(&mut self, is_speech: bool, frame: &[f32], now: Instant) -> Option<SegmenterEvent> {
        match (self.phase, is_speech) {
            (Phase::Idle, true) => {
                debug!("🎤 Speech started");
                self.phase = Phase::Speaking;
                self.started = Some(now);
                self.last_voice = Some(now);
                self.buffer.clear();
                self.buffer.extend_from_slice(frame);
                Some(SegmenterEvent::SpeechStarted)
            }
            (Phase::Idle, false) => None,
            (Phase::Speaking, true) | (Phase::Trailing, true) => {
                self.phase = Phase::Speaking;
                self.last_voice = Some(now);
                self.buffer.extend_from_slice(frame);
                let elapsed = self.started.map(|s| now.duration_since(s)).unwrap_or_default();
                if elapsed >= self.config.max_segment {
                    warn!("⏱️ Max segment length reached, committing");
                    return Some(self.finish(now));
                }
                None
            }
            (Phase::Speaking, false) => {
                self.phase = Phase::Trailing;
                // Trailing silence is kept so words are not clipped.
                self.buffer.extend_from_slice(frame);
                None
            }
            (Phase::Trailing, false) => {
                self.buffer.extend_from_slice(frame);
                let silent = self.last_voice.map(|t| now.duration_since(t)).unwrap_or_default();
                if silent >= self.config.gap {
                    return Some(self.finish(now));
                }
                None
            }
        }
    }

    /// Close any open segment (microphone released).
    pub fn flush(&mut self, now: Instant) -> Option<SegmenterEvent> {
        if self.phase == Phase::Idle {
            return None;
        }
        Some(self.finish(now))
    }

    pub fn is_speaking(&self) -> bool {
        self.phase != Phase::Idle
    }

    fn finish(&mut self, now: Instant) -> SegmenterEvent {
        let spoken = match (self.started, self.last_voice) {
            (Some(s), Some(l)) => l.duration_since(s),
            _ => Duration::ZERO,
        };
        let total = self.started.map(|s| now.duration_since(s)).unwrap_or_default();
        let samples = std::mem::take(&mut self.buffer);
        self.phase = Phase::Idle;
        self.started = None;
        self.last_voice = None;

        if spoken < self.config.min_speech {
            debug!(?spoken, "⏭️ Speech too short, discarding");
            return SegmenterEvent::Discarded { duration: spoken };
        }
        info!(?total, samples = samples.len(), "🎯 Speech segment committed");
        SegmenterEvent::Committed(SpeechSegment {
            samples,
            sample_rate: self.config.sample_rate,
            duration: total,
        })
    }
}
