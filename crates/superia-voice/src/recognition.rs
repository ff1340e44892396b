//! Recognition seam: engines push session-tagged events into the coordinator queue.

use crate::error::VoiceResult;
use crate::event::{RecognitionEvent, SessionId, VoiceEvent};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use superia_core::env_bool;
use tokio::sync::mpsc;
use tracing::debug;

/// Settings a session is started with; a restart reuses them unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionSettings {
    /// Keep listening across pauses instead of ending after the first result.
    pub continuous: bool,
    pub interim_results: bool,
    pub language: String,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            continuous: true,
            interim_results: true,
            language: "en-US".to_string(),
        }
    }
}

/// Coordinator behaviour toggles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSettings {
    /// Pause or cancel the assistant when the user starts talking.
    pub barge_in: bool,
    pub start_muted: bool,
    pub recognition: RecognitionSettings,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            barge_in: true,
            start_muted: false,
            recognition: RecognitionSettings::default(),
        }
    }
}

impl VoiceSettings {
    /// Read SUPERIA_BARGE_IN, SUPERIA_START_MUTED, SUPERIA_INTERIM_RESULTS, SUPERIA_CONTINUOUS.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            barge_in: env_bool("SUPERIA_BARGE_IN", defaults.barge_in),
            start_muted: env_bool("SUPERIA_START_MUTED", defaults.start_muted),
            recognition: RecognitionSettings {
                continuous: env_bool("SUPERIA_CONTINUOUS", defaults.recognition.continuous),
                interim_results: env_bool(
                    "SUPERIA_INTERIM_RESULTS",
                    defaults.recognition.interim_results,
                ),
                language: std::env::var("SUPERIA_LANGUAGE")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or(defaults.recognition.language),
            },
        }
    }
}

/// Where an engine reports. Every event is stamped with the session it was created for.
#[derive(Debug, Clone)]
pub struct RecognitionSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<VoiceEvent>,
}

impl RecognitionSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<VoiceEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Returns false once the coordinator is gone.
    pub fn emit(&self, event: RecognitionEvent) -> bool {
        let sent = self
            .tx
            .send(VoiceEvent::Recognition {
                session: self.session,
                event,
            })
            .is_ok();
        if !sent {
            debug!(session = %self.session, "Recognition event dropped, coordinator gone");
        }
        sent
    }

    pub fn speech_started(&self) -> bool {
        self.emit(RecognitionEvent::SpeechStarted)
    }

    pub fn result(&self, fragment: impl Into<String>, is_final: bool) -> bool {
        self.emit(RecognitionEvent::Result {
            fragment: fragment.into(),
            is_final,
        })
    }

    pub fn speech_ended(&self) -> bool {
        self.emit(RecognitionEvent::SpeechEnded)
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(RecognitionEvent::Error(message.into()))
    }

    pub fn session_ended(&self) -> bool {
        self.emit(RecognitionEvent::SessionEnded)
    }
}

/// A speech recognizer. Holds the microphone for one session at a time.
/// Not required to be `Send`: capture streams are often thread-bound.
#[async_trait(?Send)]
pub trait RecognitionEngine {
    async fn start(
        &mut self,
        session: SessionId,
        settings: &RecognitionSettings,
        sink: RecognitionSink,
    ) -> VoiceResult<()>;

    /// Release the microphone. Events emitted afterwards are ignored by session id.
    async fn stop(&mut self);
}

/// Recognizer fed by hand: typed lines, scripted tests, or any external transcript source.
#[derive(Debug, Default)]
pub struct ManualRecognizer {
    sink: Arc<Mutex<Option<RecognitionSink>>>,
    starts: Arc<Mutex<Vec<(SessionId, RecognitionSettings)>>>,
}

/// Cloneable feeder for a [`ManualRecognizer`]. Events are dropped while no session is open.
#[derive(Debug, Clone)]
pub struct ManualFeed {
    sink: Arc<Mutex<Option<RecognitionSink>>>,
    starts: Arc<Mutex<Vec<(SessionId, RecognitionSettings)>>>,
}

impl ManualRecognizer {
    pub fn new() -> (Self, ManualFeed) {
        let recognizer = Self::default();
        let feed = ManualFeed {
            sink: Arc::clone(&recognizer.sink),
            starts: Arc::clone(&recognizer.starts),
        };
        (recognizer, feed)
    }
}

#[async_trait(?Send)]
impl RecognitionEngine for ManualRecognizer {
    async fn start(
        &mut self,
        session: SessionId,
        settings: &RecognitionSettings,
        sink: RecognitionSink,
    ) -> VoiceResult<()> {
        if let Ok(mut starts) = self.starts.lock() {
            starts.push((session, settings.clone()));
        }
        if let Ok(mut slot) = self.sink.lock() {
            *slot = Some(sink);
        }
        Ok(())
    }

    async fn stop(&mut self) {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = None;
        }
    }
}

impl ManualFeed {
    fn with_sink(&self, f: impl FnOnce(&RecognitionSink)) -> bool {
        match self.sink.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(sink) => {
                    f(sink);
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// A complete utterance: speech start, one final result, speech end.
    pub fn say(&self, text: &str) -> bool {
        self.with_sink(|sink| {
            sink.speech_started();
            sink.result(text, true);
            sink.speech_ended();
        })
    }

    pub fn emit(&self, event: RecognitionEvent) -> bool {
        self.with_sink(|sink| {
            sink.emit(event);
        })
    }

    pub fn interim(&self, text: &str) -> bool {
        self.with_sink(|sink| {
            sink.result(text, false);
        })
    }

    /// Simulate the engine stopping on its own.
    pub fn end_session(&self) -> bool {
        let ended = self.with_sink(|sink| {
            sink.session_ended();
        });
        if let Ok(mut slot) = self.sink.lock() {
            *slot = None;
        }
        ended
    }

    pub fn is_open(&self) -> bool {
        self.sink.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Every session started so far, with the settings it was started with.
    pub fn starts(&self) -> Vec<(SessionId, RecognitionSettings)> {
        self.starts.lock().map(|s| s.clone()).unwrap_or_default()
    }
}
