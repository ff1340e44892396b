//! Playback seam. Sinks report natural end and errors back through the coordinator queue.

use crate::error::VoiceResult;
use crate::event::{HandleId, PlaybackEvent, VoiceEvent};
use crate::synthesis::SynthesizedAudio;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Unloaded,
    Playing,
    Paused,
    Ended,
    Errored,
}

/// Given to a sink on `start`; tags every report with the handle it belongs to.
#[derive(Debug, Clone)]
pub struct PlaybackNotifier {
    handle: HandleId,
    tx: mpsc::UnboundedSender<VoiceEvent>,
}

impl PlaybackNotifier {
    pub fn new(handle: HandleId, tx: mpsc::UnboundedSender<VoiceEvent>) -> Self {
        Self { handle, tx }
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    pub fn ended(&self) {
        self.send(PlaybackEvent::Ended);
    }

    pub fn failed(&self, message: impl Into<String>) {
        self.send(PlaybackEvent::Failed(message.into()));
    }

    fn send(&self, event: PlaybackEvent) {
        if self
            .tx
            .send(VoiceEvent::Playback {
                handle: self.handle,
                event,
            })
            .is_err()
        {
            debug!(handle = %self.handle, "Playback report dropped, coordinator gone");
        }
    }
}

/// A speaker. Not required to be `Send`: audio output handles are often thread-bound.
/// Only one clip plays at a time; `start` replaces whatever was loaded.
pub trait PlaybackSink {
    fn start(
        &mut self,
        handle: HandleId,
        audio: &SynthesizedAudio,
        notifier: PlaybackNotifier,
    ) -> VoiceResult<()>;

    fn pause(&mut self);

    fn resume(&mut self);

    /// Stop and unload. No end report is sent for a stopped clip.
    fn stop(&mut self);
}

/// Simulated speaker: "plays" for as long as the transcript takes to read aloud.
pub struct TimedPlayback {
    words_per_minute: u32,
    min_duration: Duration,
    clip: Option<TimedClip>,
}

struct TimedClip {
    notifier: PlaybackNotifier,
    remaining: Duration,
    started: Instant,
    timer: Option<JoinHandle<()>>,
}

impl TimedPlayback {
    pub fn new(words_per_minute: u32) -> Self {
        Self {
            words_per_minute: words_per_minute.max(1),
            min_duration: Duration::from_millis(300),
            clip: None,
        }
    }

    pub fn with_min_duration(mut self, min: Duration) -> Self {
        self.min_duration = min;
        self
    }

    pub fn duration_for(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count() as u64;
        let millis = words * 60_000 / self.words_per_minute as u64;
        Duration::from_millis(millis).max(self.min_duration)
    }

    /// Time left on the loaded clip.
    pub fn remaining(&self) -> Option<Duration> {
        self.clip.as_ref().map(|c| match c.timer {
            Some(_) => c.remaining.saturating_sub(c.started.elapsed()),
            None => c.remaining,
        })
    }

    fn spawn_timer(notifier: PlaybackNotifier, after: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            notifier.ended();
        })
    }
}

impl PlaybackSink for TimedPlayback {
    fn start(
        &mut self,
        handle: HandleId,
        audio: &SynthesizedAudio,
        notifier: PlaybackNotifier,
    ) -> VoiceResult<()> {
        self.stop();
        let remaining = self.duration_for(&audio.transcript);
        debug!(handle = %handle, ?remaining, "Timed playback started");
        self.clip = Some(TimedClip {
            timer: Some(Self::spawn_timer(notifier.clone(), remaining)),
            notifier,
            remaining,
            started: Instant::now(),
        });
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(clip) = self.clip.as_mut() {
            if let Some(timer) = clip.timer.take() {
                timer.abort();
                clip.remaining = clip.remaining.saturating_sub(clip.started.elapsed());
            }
        }
    }

    fn resume(&mut self) {
        if let Some(clip) = self.clip.as_mut() {
            if clip.timer.is_none() {
                clip.started = Instant::now();
                clip.timer = Some(Self::spawn_timer(clip.notifier.clone(), clip.remaining));
            }
        }
    }

    fn stop(&mut self) {
        if let Some(clip) = self.clip.take() {
            if let Some(timer) = clip.timer {
                timer.abort();
            }
        }
    }
}
