//! **Speech-to-Text (STT)**: turn a committed [`SpeechSegment`] into text.
//!
//! Used by the microphone recognizer: every segment becomes one final recognition result.

use crate::error::{VoiceError, VoiceResult};
use crate::segmenter::SpeechSegment;
use async_trait::async_trait;
use std::time::Duration;
use superia_core::{Credentials, SuperiaConfig};

#[async_trait]
pub trait SttBackend: Send + Sync {
    /// Empty string when nothing intelligible was said.
    async fn transcribe(&self, segment: &SpeechSegment) -> VoiceResult<String>;
}

/// Encode mono f32 PCM as a 16-bit WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes());

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

/// OpenAI-compatible transcription API (`POST {base}/audio/transcriptions`, multipart WAV).
#[derive(Debug, Clone)]
pub struct TranscriptionApi {
    base_url: String,
    api_key: String,
    model: String,
    language: Option<String>,
    client: reqwest::Client,
}

impl TranscriptionApi {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into().trim().to_string(),
            model: model.into(),
            language: None,
            client,
        })
    }

    /// Build from `stt_model` and the OpenAI key.
    pub fn from_config(config: &SuperiaConfig, credentials: &Credentials) -> VoiceResult<Self> {
        let key = credentials.require_openai()?;
        Self::new(config.openai_api_base.clone(), key, config.stt_model.clone())
    }

    /// ISO-639-1 hint, e.g. "en". Region suffixes like "en-US" are trimmed.
    pub fn with_language(mut self, language: &str) -> Self {
        let code = language.split(|c: char| c == '-' || c == '_').next().unwrap_or(language).trim();
        self.language = (!code.is_empty()).then(|| code.to_lowercase());
        self
    }
}

#[async_trait]
impl SttBackend for TranscriptionApi {
    async fn transcribe(&self, segment: &SpeechSegment) -> VoiceResult<String> {
        if segment.samples.is_empty() {
            return Ok(String::new());
        }
        let wav = encode_wav(&segment.samples, segment.sample_rate);
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("speech.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let url = format!("{}/audio/transcriptions", self.base_url);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().await.map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn segment(samples: Vec<f32>) -> SpeechSegment {
        SpeechSegment {
            samples,
            sample_rate: 16000,
            duration: Duration::from_millis(500),
        }
    }

    #[test]
    fn wav_header_describes_mono_16bit() {
        let wav = encode_wav(&[0.0, 1.0, -1.0], 16000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 6);
        assert_eq!(u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]), 36 + 6);
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 16000);
        assert_eq!(i16::from_le_bytes([wav[46], wav[47]]), 32767);
        assert_eq!(i16::from_le_bytes([wav[48], wav[49]]), -32767);
    }

    #[test]
    fn language_hint_drops_region() {
        let api = TranscriptionApi::new("http://localhost", "k", "whisper-1")
            .unwrap()
            .with_language("en-US");
        assert_eq!(api.language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn transcription_returns_trimmed_text() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/audio/transcriptions")
                .header("authorization", "Bearer sk-test");
            then.status(200).json_body(serde_json::json!({"text": "  hello there "}));
        });
        let api = TranscriptionApi::new(server.base_url(), "sk-test", "whisper-1").unwrap();
        let text = api.transcribe(&segment(vec![0.1; 1600])).await.unwrap();
        mock.assert();
        assert_eq!(text, "hello there");
    }

    #[tokio::test]
    async fn empty_segment_skips_request() {
        let api = TranscriptionApi::new("http://127.0.0.1:9", "k", "whisper-1").unwrap();
        assert_eq!(api.transcribe(&segment(Vec::new())).await.unwrap(), "");
    }

    #[tokio::test]
    async fn api_error_is_stt_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/audio/transcriptions");
            then.status(401).body("bad key");
        });
        let api = TranscriptionApi::new(server.base_url(), "k", "whisper-1").unwrap();
        let err = api.transcribe(&segment(vec![0.1; 160])).await.unwrap_err();
        assert!(matches!(err, VoiceError::Stt(ref m) if m.contains("401")));
    }
}
