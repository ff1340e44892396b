//! Realtime transcription relay.
//!
//! JSON frames `{"event": ..., "data": ...}` over a WebSocket. The client streams ~2 s WAV chunks
//! as base64 data URLs; the relay answers with transcriptions of each chunk.

use crate::stt::encode_wav;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client → relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    StartStream {},
    AudioData { audio: String, id: String },
    EndStream {},
}

/// Relay → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    Transcription { text: String },
    TranscriptionError { error: String },
}

impl ClientFrame {
    pub fn audio(samples: &[f32], sample_rate: u32, id: impl Into<String>) -> Self {
        ClientFrame::AudioData {
            audio: audio_data_url(samples, sample_rate),
            id: id.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ServerFrame {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// `data:audio/wav;base64,...` for a mono PCM chunk.
pub fn audio_data_url(samples: &[f32], sample_rate: u32) -> String {
    format!(
        "data:audio/wav;base64,{}",
        STANDARD.encode(encode_wav(samples, sample_rate))
    )
}

/// Slices a PCM stream into fixed-length chunks.
#[derive(Debug, Clone)]
pub struct AudioChunker {
    chunk_samples: usize,
    buffer: Vec<f32>,
}

impl AudioChunker {
    pub fn new(sample_rate: u32, length: Duration) -> Self {
        let chunk_samples = ((sample_rate as f64 * length.as_secs_f64()) as usize).max(1);
        Self {
            chunk_samples,
            buffer: Vec::with_capacity(chunk_samples),
        }
    }

    /// Two-second chunks, the relay's cadence.
    pub fn two_seconds(sample_rate: u32) -> Self {
        Self::new(sample_rate, Duration::from_secs(2))
    }

    /// Append samples; returns every chunk that became complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.buffer.extend_from_slice(samples);
        let mut full = Vec::new();
        while self.buffer.len() >= self.chunk_samples {
            let rest = self.buffer.split_off(self.chunk_samples);
            full.push(std::mem::replace(&mut self.buffer, rest));
        }
        full
    }

    /// Whatever is left over, if anything.
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

#[cfg(feature = "relay")]
pub use recognizer::RelayRecognizer;

#[cfg(feature = "relay")]
mod recognizer {
    use super::{AudioChunker, ClientFrame, ServerFrame};
    use crate::audio::{AudioCapture, AudioConfig};
    use crate::error::{VoiceError, VoiceResult};
    use crate::event::SessionId;
    use crate::recognition::{RecognitionEngine, RecognitionSettings, RecognitionSink};
    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;
    use tracing::{debug, info, warn};

    /// Streams the microphone to a transcription relay. Each transcription is a final result.
    pub struct RelayRecognizer {
        url: String,
        audio: AudioConfig,
        live: Option<RelaySession>,
    }

    struct RelaySession {
        session: SessionId,
        stream: cpal::Stream,
        stopping: Arc<AtomicBool>,
    }

    impl RelayRecognizer {
        pub fn new(url: impl Into<String>) -> Self {
            Self {
                url: url.into(),
                audio: AudioConfig::default(),
                live: None,
            }
        }
    }

    #[async_trait(?Send)]
    impl RecognitionEngine for RelayRecognizer {
        async fn start(
            &mut self,
            session: SessionId,
            _settings: &RecognitionSettings,
            sink: RecognitionSink,
        ) -> VoiceResult<()> {
            self.stop().await;

            let (socket, _) = connect_async(self.url.as_str())
                .await
                .map_err(|e| VoiceError::RecognitionUnavailable(format!("{}: {}", self.url, e)))?;
            info!(url = %self.url, session = %session, "🔌 Connected to transcription relay");
            let (mut write, mut read) = socket.split();

            let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
            let error_sink = sink.clone();
            let stream = AudioCapture::new(self.audio.clone())?.start(frames_tx, move |message| {
                error_sink.error(message);
            })?;
            let stopping = Arc::new(AtomicBool::new(false));

            let sample_rate = self.audio.sample_rate;
            tokio::spawn(async move {
                let mut chunker = AudioChunker::two_seconds(sample_rate);
                let mut sent = 0u64;
                let mut frames = vec![ClientFrame::StartStream {}];
                loop {
                    for frame in frames.drain(..) {
                        let json = match frame.to_json() {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(error = %e, "Relay frame not encodable");
                                continue;
                            }
                        };
                        if write.send(Message::Text(json)).await.is_err() {
                            debug!("Relay socket closed while sending");
                            return;
                        }
                    }
                    match frames_rx.recv().await {
                        Some(captured) => {
                            for chunk in chunker.push(&captured.samples) {
                                sent += 1;
                                frames.push(ClientFrame::audio(&chunk, sample_rate, sent.to_string()));
                            }
                        }
                        None => break,
                    }
                }
                // Capture stopped: send the tail and close.
                if let Some(rest) = chunker.flush() {
                    sent += 1;
                    frames.push(ClientFrame::audio(&rest, sample_rate, sent.to_string()));
                }
                frames.push(ClientFrame::EndStream {});
                for frame in frames {
                    if let Ok(json) = frame.to_json() {
                        if write.send(Message::Text(json)).await.is_err() {
                            return;
                        }
                    }
                }
                let _ = write.close().await;
            });

            let flag = Arc::clone(&stopping);
            tokio::spawn(async move {
                while let Some(message) = read.next().await {
                    let text = match message {
                        Ok(Message::Text(text)) => text,
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(error = %e, "Relay socket error");
                            break;
                        }
                    };
                    match ServerFrame::parse(&text) {
                        Ok(ServerFrame::Transcription { text }) => {
                            let text = text.trim();
                            if !text.is_empty() {
                                sink.result(text, true);
                                sink.speech_ended();
                            }
                        }
                        Ok(ServerFrame::TranscriptionError { error }) => {
                            sink.error(format!("Transcription error: {}", error));
                        }
                        Err(e) => debug!(error = %e, "Ignoring unknown relay frame"),
                    }
                }
                if !flag.load(Ordering::SeqCst) {
                    sink.session_ended();
                }
            });

            self.live = Some(RelaySession {
                session,
                stream,
                stopping,
            });
            Ok(())
        }

        async fn stop(&mut self) {
            if let Some(live) = self.live.take() {
                live.stopping.store(true, Ordering::SeqCst);
                // Closing capture makes the writer send `end_stream` and close the socket.
                drop(live.stream);
                info!(session = %live.session, "🔌 Relay session stopped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_use_event_and_data() {
        assert_eq!(
            ClientFrame::StartStream {}.to_json().unwrap(),
            r#"{"event":"start_stream","data":{}}"#
        );
        let frame = ClientFrame::AudioData {
            audio: "data:audio/wav;base64,AA==".to_string(),
            id: "7".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "audio_data");
        assert_eq!(value["data"]["id"], "7");
    }

    #[test]
    fn server_frames_parse() {
        assert_eq!(
            ServerFrame::parse(r#"{"event":"transcription","data":{"text":"hello"}}"#).unwrap(),
            ServerFrame::Transcription {
                text: "hello".to_string()
            }
        );
        assert_eq!(
            ServerFrame::parse(r#"{"event":"transcription_error","data":{"error":"boom"}}"#)
                .unwrap(),
            ServerFrame::TranscriptionError {
                error: "boom".to_string()
            }
        );
        assert!(ServerFrame::parse(r#"{"event":"pong","data":{}}"#).is_err());
    }

    #[test]
    fn data_url_wraps_wav() {
        let url = audio_data_url(&[0.0; 4], 16000);
        let encoded = url.strip_prefix("data:audio/wav;base64,").unwrap();
        let wav = STANDARD.decode(encoded).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(wav.len(), 44 + 8);
    }

    #[test]
    fn chunker_emits_two_second_chunks() {
        let mut chunker = AudioChunker::two_seconds(100);
        assert!(chunker.push(&[0.0; 150]).is_empty());
        let chunks = chunker.push(&[0.0; 300]);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 200));
        assert_eq!(chunker.flush().map(|r| r.len()), Some(50));
        assert_eq!(chunker.flush(), None);
    }
}
