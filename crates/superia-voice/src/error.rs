//! Error types for the Superia voice loop

use superia_core::CoreError;
use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the voice conversation loop
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("A turn is already in progress")]
    TurnActive,

    #[error("Utterance is empty")]
    EmptyUtterance,

    #[error("Speech recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("VAD error: {0}")]
    Vad(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Speech synthesis error: {0}")]
    Synthesis(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Generation error: {0}")]
    Generation(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "audio")]
impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

#[cfg(feature = "audio")]
impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

#[cfg(feature = "audio")]
impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

#[cfg(feature = "audio")]
impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_convert() {
        let err: VoiceError = CoreError::MissingCredential("OPENAI_API_KEY".to_string()).into();
        assert!(matches!(err, VoiceError::Generation(_)));
        assert_eq!(
            err.to_string(),
            "Generation error: Missing credential: OPENAI_API_KEY"
        );
    }
}
