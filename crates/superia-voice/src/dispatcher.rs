//! Turn dispatcher: one utterance in, one generation task out, at most one live turn.

use crate::error::{VoiceError, VoiceResult};
use crate::event::{TurnId, VoiceEvent};
use serde::Serialize;
use std::sync::Arc;
use superia_core::TextGenerator;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    /// Created, generation not started yet.
    Idle,
    Generating,
    Synthesizing,
    Speaking,
    Completed,
    Cancelled,
    Failed,
}

impl TurnStatus {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TurnStatus::Generating | TurnStatus::Synthesizing | TurnStatus::Speaking
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub id: TurnId,
    pub input: String,
    pub status: TurnStatus,
    pub response: Option<String>,
    pub error: Option<String>,
}

/// Outcome of applying a generation completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance {
    /// Response text for the current turn; it is now synthesizing.
    Accepted(String),
    /// The current turn failed with this message.
    Failed(String),
    /// Completion belongs to a superseded or cancelled turn.
    Stale,
}

pub struct TurnDispatcher {
    generator: Arc<dyn TextGenerator>,
    events: mpsc::UnboundedSender<VoiceEvent>,
    last_id: TurnId,
    current: Option<Turn>,
    task: Option<AbortHandle>,
}

impl TurnDispatcher {
    pub fn new(generator: Arc<dyn TextGenerator>, events: mpsc::UnboundedSender<VoiceEvent>) -> Self {
        Self {
            generator,
            events,
            last_id: TurnId::default(),
            current: None,
            task: None,
        }
    }

    pub fn current(&self) -> Option<&Turn> {
        self.current.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.current.as_ref().is_some_and(|t| t.status.is_active())
    }

    pub fn status(&self) -> Option<TurnStatus> {
        self.current.as_ref().map(|t| t.status)
    }

    /// Start generation for `text`. Rejected while another turn is generating, synthesizing or speaking.
    pub fn submit(&mut self, text: &str) -> VoiceResult<TurnId> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VoiceError::EmptyUtterance);
        }
        if self.is_active() {
            return Err(VoiceError::TurnActive);
        }

        self.last_id = self.last_id.next();
        let id = self.last_id;
        let mut turn = Turn {
            id,
            input: text.to_string(),
            status: TurnStatus::Idle,
            response: None,
            error: None,
        };

        let generator = Arc::clone(&self.generator);
        let events = self.events.clone();
        let input = turn.input.clone();
        let handle = tokio::spawn(async move {
            let result = generator
                .generate(&input)
                .await
                .map(|g| g.text)
                .map_err(|e| e.to_string());
            if events
                .send(VoiceEvent::GenerationFinished { turn: id, result })
                .is_err()
            {
                debug!(turn = %id, "Coordinator gone before generation finished");
            }
        });

        turn.status = TurnStatus::Generating;
        info!(turn = %id, generator = %self.generator.label(), "📨 Turn submitted");
        self.task = Some(handle.abort_handle());
        self.current = Some(turn);
        Ok(id)
    }

    /// Cancel while generating. Returns the cancelled turn id; no-op once generation has finished.
    pub fn cancel(&mut self) -> Option<TurnId> {
        let turn = self.current.as_mut()?;
        if turn.status != TurnStatus::Generating {
            return None;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        turn.status = TurnStatus::Cancelled;
        info!(turn = %turn.id, "✋ Generation cancelled");
        Some(turn.id)
    }

    /// Apply a generation completion if it belongs to the turn currently generating.
    pub fn accept(&mut self, id: TurnId, result: Result<String, String>) -> Acceptance {
        let turn = match self.current.as_mut() {
            Some(t) if t.id == id && t.status == TurnStatus::Generating => t,
            _ => return Acceptance::Stale,
        };
        self.task = None;
        match result {
            Ok(text) if !text.trim().is_empty() => {
                turn.status = TurnStatus::Synthesizing;
                turn.response = Some(text.clone());
                Acceptance::Accepted(text)
            }
            Ok(_) => {
                let message = "Empty response".to_string();
                turn.status = TurnStatus::Failed;
                turn.error = Some(message.clone());
                Acceptance::Failed(message)
            }
            Err(message) => {
                warn!(turn = %id, error = %message, "Generation failed");
                turn.status = TurnStatus::Failed;
                turn.error = Some(message.clone());
                Acceptance::Failed(message)
            }
        }
    }

    pub fn mark_speaking(&mut self) {
        if let Some(turn) = self.current.as_mut() {
            if turn.status == TurnStatus::Synthesizing {
                turn.status = TurnStatus::Speaking;
            }
        }
    }

    /// Natural end of playback. Returns the completed turn.
    pub fn complete(&mut self) -> Option<Turn> {
        let turn = self.current.as_mut()?;
        if turn.status != TurnStatus::Speaking {
            return None;
        }
        turn.status = TurnStatus::Completed;
        Some(turn.clone())
    }

    /// Mark the live turn failed (synthesis or playback error).
    pub fn fail(&mut self, message: &str) -> Option<TurnId> {
        let turn = self.current.as_mut()?;
        if !turn.status.is_active() {
            return None;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        turn.status = TurnStatus::Failed;
        turn.error = Some(message.to_string());
        Some(turn.id)
    }

    /// Drop the live turn whatever its status.
    pub fn discard(&mut self) -> Option<TurnId> {
        let turn = self.current.as_mut()?;
        if !turn.status.is_active() {
            return None;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        turn.status = TurnStatus::Cancelled;
        Some(turn.id)
    }
}
