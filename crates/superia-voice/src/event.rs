//! Everything that flows through the coordinator's single event queue, and the
//! notices it publishes back to the front-end.

use crate::error::{VoiceError, VoiceResult};
use crate::history::ConversationEntry;
use crate::synthesis::SynthesizedAudio;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// The id after this one.
            pub fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

id_type!(
    /// One request/response exchange. Completions carry the id of the turn they answer.
    TurnId,
    "turn"
);
id_type!(
    /// One synthesized audio unit.
    HandleId,
    "handle"
);
id_type!(
    /// One recognition session (microphone open to close or restart).
    SessionId,
    "session"
);

/// Coordinator state, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorState {
    Idle,
    Listening,
    Generating,
    Synthesizing,
    Speaking,
    Paused,
}

impl CoordinatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorState::Idle => "idle",
            CoordinatorState::Listening => "listening",
            CoordinatorState::Generating => "generating",
            CoordinatorState::Synthesizing => "synthesizing",
            CoordinatorState::Speaking => "speaking",
            CoordinatorState::Paused => "paused",
        }
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    StartRecording,
    StopRecording,
    Cancel,
    SetMuted(bool),
    ToggleMute,
    Shutdown,
}

/// What a recognition engine reports for its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    SpeechStarted,
    Result { fragment: String, is_final: bool },
    SpeechEnded,
    Error(String),
    /// The engine stopped on its own (timeout, network drop, device change).
    SessionEnded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Ended,
    Failed(String),
}

/// One entry of the coordinator's ordered queue.
#[derive(Debug)]
pub enum VoiceEvent {
    Control(ControlCommand),
    Recognition {
        session: SessionId,
        event: RecognitionEvent,
    },
    GenerationFinished {
        turn: TurnId,
        result: Result<String, String>,
    },
    SynthesisFinished {
        turn: TurnId,
        result: Result<SynthesizedAudio, String>,
    },
    Playback {
        handle: HandleId,
        event: PlaybackEvent,
    },
}

impl From<ControlCommand> for VoiceEvent {
    fn from(cmd: ControlCommand) -> Self {
        VoiceEvent::Control(cmd)
    }
}

/// Posts controls to a running coordinator.
#[derive(Debug, Clone)]
pub struct ControlSender(mpsc::UnboundedSender<VoiceEvent>);

impl ControlSender {
    pub fn new(events: mpsc::UnboundedSender<VoiceEvent>) -> Self {
        Self(events)
    }

    /// Fails with [`VoiceError::Channel`] once the coordinator has been dropped.
    pub fn send(&self, cmd: ControlCommand) -> VoiceResult<()> {
        self.0
            .send(VoiceEvent::Control(cmd))
            .map_err(|e| VoiceError::Channel(format!("coordinator gone, {:?} not delivered", e.0)))
    }
}

/// Published by the coordinator for the UI layer.
#[derive(Debug, Clone)]
pub enum VoiceNotice {
    StateChanged {
        from: CoordinatorState,
        to: CoordinatorState,
    },
    RecordingChanged(bool),
    MuteChanged(bool),
    /// Displayed transcript (finalized text plus the current interim fragment).
    TranscriptUpdated(String),
    TurnStarted {
        turn: TurnId,
        input: String,
    },
    ResponseReady {
        turn: TurnId,
        text: String,
    },
    PlaybackStarted {
        turn: TurnId,
        handle: HandleId,
    },
    TurnCancelled {
        turn: TurnId,
    },
    TurnFailed {
        turn: TurnId,
        error: String,
    },
    HistoryAppended(Vec<ConversationEntry>),
    RecognitionRestarted {
        session: SessionId,
    },
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_prefixed() {
        let t = TurnId::default().next().next();
        assert_eq!(t, TurnId(2));
        assert!(t > TurnId(1));
        assert_eq!(t.to_string(), "turn-2");
        assert_eq!(SessionId(7).to_string(), "session-7");
        assert_eq!(HandleId(3).to_string(), "handle-3");
    }

    #[test]
    fn state_names() {
        assert_eq!(CoordinatorState::Paused.to_string(), "paused");
        assert_eq!(
            serde_json::to_string(&CoordinatorState::Synthesizing).unwrap(),
            "\"synthesizing\""
        );
    }

    #[test]
    fn control_sender_reports_a_closed_queue() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controls = ControlSender::new(tx);
        controls.send(ControlCommand::StopRecording).unwrap();
        assert!(matches!(
            rx.try_recv(),
            Ok(VoiceEvent::Control(ControlCommand::StopRecording))
        ));

        drop(rx);
        let err = controls.send(ControlCommand::Shutdown).unwrap_err();
        assert!(matches!(err, VoiceError::Channel(_)));
    }
}
