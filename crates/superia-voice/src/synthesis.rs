//! **Speech synthesis**: text to audio units, and the controller that owns the live playback handle.
//!
//! The controller spawns one synthesis task per turn and keeps at most one handle. Requesting new
//! synthesis supersedes the current handle; completions and playback reports for superseded
//! turns/handles are dropped.

use crate::error::{VoiceError, VoiceResult};
use crate::event::{HandleId, PlaybackEvent, TurnId, VoiceEvent};
use crate::playback::{PlaybackNotifier, PlaybackSink, PlaybackState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use superia_core::{Credentials, SuperiaConfig};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioData {
    /// Encoded audio (MP3/WAV/Opus) as returned by a speech API.
    Encoded { bytes: Vec<u8>, mime: String },
    /// No audio; the transcript itself is the unit (terminal output).
    Text,
}

/// One synthesized unit ready to be loaded into a playback handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub data: AudioData,
    pub transcript: String,
}

impl SynthesizedAudio {
    pub fn text(transcript: impl Into<String>) -> Self {
        Self {
            data: AudioData::Text,
            transcript: transcript.into(),
        }
    }

    pub fn encoded(bytes: Vec<u8>, mime: impl Into<String>, transcript: impl Into<String>) -> Self {
        Self {
            data: AudioData::Encoded {
                bytes,
                mime: mime.into(),
            },
            transcript: transcript.into(),
        }
    }
}

/// Backend that turns text into an audio unit.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> VoiceResult<SynthesizedAudio>;
}

/// Local "voice" that only carries the text. Pair with a text-rendering or timed sink.
#[derive(Debug, Default, Clone)]
pub struct TextOnlySynthesizer;

#[async_trait]
impl SpeechSynthesizer for TextOnlySynthesizer {
    async fn synthesize(&self, text: &str) -> VoiceResult<SynthesizedAudio> {
        Ok(SynthesizedAudio::text(text.trim()))
    }
}

/// OpenAI-compatible speech API (`POST {base}/audio/speech` with `{model, input, voice}`).
#[derive(Debug, Clone)]
pub struct SpeechApiSynthesizer {
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    client: reqwest::Client,
}

impl SpeechApiSynthesizer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into().trim().to_string(),
            model: model.into(),
            voice: voice.into(),
            client,
        }
    }

    /// Build from `tts_model` / `tts_voice` and the OpenAI key.
    pub fn from_config(config: &SuperiaConfig, credentials: &Credentials) -> VoiceResult<Self> {
        let key = credentials.require_openai()?;
        Ok(Self::new(
            config.openai_api_base.clone(),
            key,
            config.tts_model.clone(),
            config.tts_voice.clone(),
        ))
    }

    /// Use a persona's voice instead of the configured default.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechApiSynthesizer {
    async fn synthesize(&self, text: &str) -> VoiceResult<SynthesizedAudio> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VoiceError::Synthesis("nothing to synthesize".to_string()));
        }
        let url = format!("{}/audio/speech", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "speech API error {}: {}",
                status, body
            )));
        }
        let mime = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        if bytes.is_empty() {
            return Err(VoiceError::Synthesis("speech API returned no audio".to_string()));
        }
        Ok(SynthesizedAudio::encoded(bytes.to_vec(), mime, text))
    }
}

/// The live synthesized unit.
#[derive(Debug)]
pub struct PlaybackHandle {
    pub id: HandleId,
    pub turn: TurnId,
    pub state: PlaybackState,
    pub audio: SynthesizedAudio,
}

/// Outcome of applying a synthesis completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// A new handle is loaded (unloaded state), ready to play.
    Ready(HandleId),
    Failed(String),
    Stale,
}

/// Owns the synthesizer, the speaker and the single live handle.
pub struct SynthesisController {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Box<dyn PlaybackSink>,
    events: mpsc::UnboundedSender<VoiceEvent>,
    last_handle: HandleId,
    current: Option<PlaybackHandle>,
    in_flight: Option<(TurnId, AbortHandle)>,
}

impl SynthesisController {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Box<dyn PlaybackSink>,
        events: mpsc::UnboundedSender<VoiceEvent>,
    ) -> Self {
        Self {
            synthesizer,
            sink,
            events,
            last_handle: HandleId::default(),
            current: None,
            in_flight: None,
        }
    }

    pub fn current(&self) -> Option<&PlaybackHandle> {
        self.current.as_ref()
    }

    pub fn state(&self) -> Option<PlaybackState> {
        self.current.as_ref().map(|h| h.state)
    }

    pub fn is_synthesizing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Supersede the current handle and request audio for `text`.
    pub fn synthesize(&mut self, turn: TurnId, text: &str) {
        self.stop();
        if let Some((_, task)) = self.in_flight.take() {
            task.abort();
        }
        let synthesizer = Arc::clone(&self.synthesizer);
        let events = self.events.clone();
        let text = text.to_string();
        let task = tokio::spawn(async move {
            let result = synthesizer.synthesize(&text).await.map_err(|e| e.to_string());
            if events
                .send(VoiceEvent::SynthesisFinished { turn, result })
                .is_err()
            {
                debug!(turn = %turn, "Coordinator gone before synthesis finished");
            }
        });
        debug!(turn = %turn, "🗣️ Synthesis requested");
        self.in_flight = Some((turn, task.abort_handle()));
    }

    /// Apply a synthesis completion for the turn it was requested for.
    pub fn accept(&mut self, turn: TurnId, result: Result<SynthesizedAudio, String>) -> SynthesisOutcome {
        match self.in_flight {
            Some((pending, _)) if pending == turn => self.in_flight = None,
            _ => return SynthesisOutcome::Stale,
        }
        match result {
            Ok(audio) => {
                self.last_handle = self.last_handle.next();
                let id = self.last_handle;
                self.current = Some(PlaybackHandle {
                    id,
                    turn,
                    state: PlaybackState::Unloaded,
                    audio,
                });
                SynthesisOutcome::Ready(id)
            }
            Err(message) => {
                warn!(turn = %turn, error = %message, "Synthesis failed");
                SynthesisOutcome::Failed(message)
            }
        }
    }

    /// Start an unloaded handle or resume a paused one. Returns true when the handle is now playing.
    pub fn play(&mut self) -> VoiceResult<bool> {
        let handle = match self.current.as_mut() {
            Some(h) => h,
            None => return Ok(false),
        };
        match handle.state {
            PlaybackState::Unloaded => {
                let notifier = PlaybackNotifier::new(handle.id, self.events.clone());
                if let Err(e) = self.sink.start(handle.id, &handle.audio, notifier) {
                    handle.state = PlaybackState::Errored;
                    return Err(e);
                }
                handle.state = PlaybackState::Playing;
                info!(handle = %handle.id, turn = %handle.turn, "🔊 Playback started");
                Ok(true)
            }
            PlaybackState::Paused => {
                self.sink.resume();
                handle.state = PlaybackState::Playing;
                Ok(true)
            }
            PlaybackState::Playing => Ok(true),
            PlaybackState::Ended | PlaybackState::Errored => Ok(false),
        }
    }

    pub fn pause(&mut self) -> bool {
        match self.current.as_mut() {
            Some(h) if h.state == PlaybackState::Playing => {
                self.sink.pause();
                h.state = PlaybackState::Paused;
                info!(handle = %h.id, "⏸️ Playback paused");
                true
            }
            _ => false,
        }
    }

    pub fn resume(&mut self) -> bool {
        match self.current.as_mut() {
            Some(h) if h.state == PlaybackState::Paused => {
                self.sink.resume();
                h.state = PlaybackState::Playing;
                info!(handle = %h.id, "▶️ Playback resumed");
                true
            }
            _ => false,
        }
    }

    /// Stop and discard the current handle.
    pub fn stop(&mut self) {
        if let Some(handle) = self.current.take() {
            if matches!(handle.state, PlaybackState::Playing | PlaybackState::Paused) {
                self.sink.stop();
                info!(handle = %handle.id, "⏹️ Playback stopped");
            }
        }
    }

    /// Stop playback and forget any in-flight synthesis.
    pub fn discard(&mut self) {
        self.stop();
        if let Some((turn, task)) = self.in_flight.take() {
            task.abort();
            debug!(turn = %turn, "Synthesis discarded");
        }
    }

    /// Filter a playback report. Returns it only when it belongs to the live handle.
    pub fn on_playback(&mut self, handle: HandleId, event: PlaybackEvent) -> Option<PlaybackEvent> {
        let current = match self.current.as_mut() {
            Some(h) if h.id == handle => h,
            _ => {
                debug!(handle = %handle, "Dropping report for superseded handle");
                return None;
            }
        };
        current.state = match event {
            PlaybackEvent::Ended => PlaybackState::Ended,
            PlaybackEvent::Failed(_) => PlaybackState::Errored,
        };
        self.current = None;
        Some(event)
    }
}
