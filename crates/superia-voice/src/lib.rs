//! # Superia Voice - barge-in conversation loop
//!
//! Spoken input is assembled into turns, answered by a [`superia_core::TextGenerator`],
//! synthesized and played back. Talking over the assistant pauses its speech (or cancels a
//! reply still being generated); completed exchanges land in an append-only history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      BargeInCoordinator                          │
//! │                  (one ordered event queue)                       │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐            │
//! │  │ Recognition  │→ │  Transcript  │→ │    Turn      │            │
//! │  │ (mic/relay)  │  │  Assembler   │  │  Dispatcher  │            │
//! │  └──────────────┘  └──────────────┘  └──────────────┘            │
//! │         │ barge-in                           ↓                   │
//! │         ▼                            ┌──────────────┐            │
//! │  ┌──────────────┐   pause/resume     │  Synthesis   │            │
//! │  │   Playback   │←───────────────────│  Controller  │            │
//! │  │ (rodio/timed)│                    └──────────────┘            │
//! │  └──────────────┘ ──ended──▶ ConversationHistory                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod history;
pub mod playback;
pub mod recognition;
pub mod relay;
pub mod segmenter;
pub mod stt;
pub mod synthesis;
pub mod transcript;

#[cfg(feature = "audio")]
pub mod audio;
#[cfg(feature = "audio")]
pub mod mic;
#[cfg(feature = "audio")]
pub mod speaker;
#[cfg(feature = "audio")]
pub mod vad;

pub use coordinator::{BargeInCoordinator, VoiceBackends};
pub use dispatcher::{Acceptance, Turn, TurnDispatcher, TurnStatus};
pub use error::{VoiceError, VoiceResult};
pub use event::{
    ControlCommand, ControlSender, CoordinatorState, HandleId, PlaybackEvent, RecognitionEvent,
    SessionId, TurnId, VoiceEvent, VoiceNotice,
};
pub use history::{ConversationEntry, ConversationHistory, Role};
pub use playback::{PlaybackNotifier, PlaybackSink, PlaybackState, TimedPlayback};
pub use recognition::{
    ManualFeed, ManualRecognizer, RecognitionEngine, RecognitionSettings, RecognitionSink,
    VoiceSettings,
};
pub use relay::{audio_data_url, AudioChunker, ClientFrame, ServerFrame};
pub use segmenter::{SegmenterConfig, SegmenterEvent, SpeechSegment, SpeechSegmenter};
pub use stt::{encode_wav, SttBackend, TranscriptionApi};
pub use synthesis::{
    AudioData, PlaybackHandle, SpeechApiSynthesizer, SpeechSynthesizer, SynthesisController,
    SynthesisOutcome, SynthesizedAudio, TextOnlySynthesizer,
};
pub use transcript::TranscriptAssembler;

#[cfg(feature = "audio")]
pub use audio::{AudioCapture, AudioConfig, AudioFrame};
#[cfg(feature = "audio")]
pub use mic::MicRecognizer;
#[cfg(feature = "relay")]
pub use relay::RelayRecognizer;
#[cfg(feature = "audio")]
pub use speaker::RodioPlayback;
#[cfg(feature = "audio")]
pub use vad::{VadConfig, VadDetector};
