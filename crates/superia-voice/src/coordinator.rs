//! **Barge-in coordinator**: the state machine tying recognition, generation, synthesis,
//! playback and history together.
//!
//! Every input arrives on one ordered queue (`VoiceEvent`). Decisions are taken from the current
//! turn status and the ids carried by each event, never from arrival order, so a completion that
//! lands after a barge-in is recognized as stale and dropped.
//!
//! ```text
//!  Idle ──start──▶ Listening ──final──▶ Generating ──reply──▶ Synthesizing ──audio──▶ Speaking
//!   ▲                 ▲   ▲                 │ speech                                  │    ▲
//!   │                 │   └──── cancel ─────┘                                 speech  │    │ speech end
//!   └── cancel ───────┴──────────────── playback ended (history) ◀──────────────┐     ▼    │
//!                                                                              └── Paused ─┘
//! ```

use crate::dispatcher::{Acceptance, Turn, TurnDispatcher, TurnStatus};
use crate::error::{VoiceError, VoiceResult};
use crate::event::{
    ControlCommand, ControlSender, CoordinatorState, HandleId, PlaybackEvent, RecognitionEvent, SessionId, TurnId,
    VoiceEvent, VoiceNotice,
};
use crate::history::ConversationHistory;
use crate::playback::{PlaybackSink, PlaybackState};
use crate::recognition::{RecognitionEngine, RecognitionSink, VoiceSettings};
use crate::synthesis::{SpeechSynthesizer, SynthesisController, SynthesisOutcome, SynthesizedAudio};
use crate::transcript::TranscriptAssembler;
use std::sync::Arc;
use superia_core::TextGenerator;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The pluggable pieces the coordinator drives.
pub struct VoiceBackends {
    pub generator: Arc<dyn TextGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub recognizer: Box<dyn RecognitionEngine>,
    pub playback: Box<dyn PlaybackSink>,
}

pub struct BargeInCoordinator {
    settings: VoiceSettings,
    state: CoordinatorState,
    recording: bool,
    muted: bool,
    user_speaking: bool,
    session: SessionId,
    /// A closed session whose final results are still accepted (STT may still be in flight).
    draining: Option<SessionId>,
    shutdown: bool,

    assembler: TranscriptAssembler,
    dispatcher: TurnDispatcher,
    synthesis: SynthesisController,
    recognizer: Box<dyn RecognitionEngine>,
    history: ConversationHistory,
    /// Final fragments heard while a turn was busy; submitted as the next turn.
    deferred: Vec<String>,

    events_tx: mpsc::UnboundedSender<VoiceEvent>,
    events_rx: mpsc::UnboundedReceiver<VoiceEvent>,
    notices: mpsc::UnboundedSender<VoiceNotice>,
}

impl BargeInCoordinator {
    /// Create a coordinator and the receiver of its notices.
    pub fn new(
        settings: VoiceSettings,
        backends: VoiceBackends,
    ) -> (Self, mpsc::UnboundedReceiver<VoiceNotice>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices, notice_rx) = mpsc::unbounded_channel();

        let coordinator = Self {
            muted: settings.start_muted,
            settings,
            state: CoordinatorState::Idle,
            recording: false,
            user_speaking: false,
            session: SessionId::default(),
            draining: None,
            shutdown: false,
            assembler: TranscriptAssembler::new(),
            dispatcher: TurnDispatcher::new(backends.generator, events_tx.clone()),
            synthesis: SynthesisController::new(
                backends.synthesizer,
                backends.playback,
                events_tx.clone(),
            ),
            recognizer: backends.recognizer,
            history: ConversationHistory::new(),
            deferred: Vec::new(),
            events_tx,
            events_rx,
            notices,
        };

        (coordinator, notice_rx)
    }

    /// Sender for controls and externally produced events.
    pub fn sender(&self) -> mpsc::UnboundedSender<VoiceEvent> {
        self.events_tx.clone()
    }

    pub fn controls(&self) -> ControlSender {
        ControlSender::new(self.events_tx.clone())
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn current_turn(&self) -> Option<&Turn> {
        self.dispatcher.current()
    }

    pub fn current_handle(&self) -> Option<HandleId> {
        self.synthesis.current().map(|h| h.id)
    }

    pub fn playback_state(&self) -> Option<PlaybackState> {
        self.synthesis.state()
    }

    pub fn transcript(&self) -> &str {
        self.assembler.display()
    }

    pub fn pending_text(&self) -> &str {
        self.assembler.pending()
    }

    pub fn deferred(&self) -> &[String] {
        &self.deferred
    }

    /// Consume events until `Shutdown`. Handler errors are logged and never stop the loop.
    pub async fn run(&mut self) {
        info!("🎭 Voice coordinator running");
        loop {
            match self.step().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(error = %e, state = ?self.state, "Voice event handling failed");
                    if self.shutdown {
                        break;
                    }
                }
            }
        }
        info!(entries = self.history.len(), "Voice coordinator stopped");
    }

    /// Wait for and handle one event. Returns false once shut down.
    pub async fn step(&mut self) -> VoiceResult<bool> {
        let event = match self.events_rx.recv().await {
            Some(event) => event,
            None => return Ok(false),
        };
        self.handle(event).await?;
        Ok(!self.shutdown)
    }

    /// Handle every event already queued, without waiting. Returns how many were handled.
    pub async fn drain(&mut self) -> VoiceResult<usize> {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle(event).await?;
            handled += 1;
        }
        Ok(handled)
    }

    pub async fn handle(&mut self, event: VoiceEvent) -> VoiceResult<()> {
        match event {
            VoiceEvent::Control(cmd) => self.on_control(cmd).await,
            VoiceEvent::Recognition { session, event } => {
                if self.recording && session == self.session {
                    return self.on_recognition(event).await;
                }
                if self.draining == Some(session) {
                    self.on_trailing(session, event);
                    return Ok(());
                }
                debug!(session = %session, current = %self.session, "Dropping event from stale recognition session");
                Ok(())
            }
            VoiceEvent::GenerationFinished { turn, result } => {
                self.on_generation(turn, result);
                Ok(())
            }
            VoiceEvent::SynthesisFinished { turn, result } => {
                self.on_synthesis(turn, result);
                Ok(())
            }
            VoiceEvent::Playback { handle, event } => {
                self.on_playback(handle, event);
                Ok(())
            }
        }
    }

    async fn on_control(&mut self, cmd: ControlCommand) -> VoiceResult<()> {
        debug!(command = ?cmd, state = ?self.state, "Control");
        match cmd {
            ControlCommand::StartRecording => self.start_recording().await,
            ControlCommand::StopRecording => {
                self.stop_recording().await;
                Ok(())
            }
            ControlCommand::Cancel => {
                self.cancel_all().await;
                Ok(())
            }
            ControlCommand::SetMuted(muted) => {
                self.set_muted(muted);
                Ok(())
            }
            ControlCommand::ToggleMute => {
                self.set_muted(!self.muted);
                Ok(())
            }
            ControlCommand::Shutdown => {
                self.cancel_all().await;
                self.shutdown = true;
                info!("🛑 Shutdown requested");
                Ok(())
            }
        }
    }

    async fn start_recording(&mut self) -> VoiceResult<()> {
        if self.recording {
            self.recognizer.stop().await;
            self.set_recording(false);
        }
        self.discard_turn();
        self.assembler.reset();
        self.deferred.clear();
        self.user_speaking = false;
        self.draining = None;

        self.session = self.session.next();
        let sink = RecognitionSink::new(self.session, self.events_tx.clone());
        if let Err(e) = self
            .recognizer
            .start(self.session, &self.settings.recognition, sink)
            .await
        {
            warn!(error = %e, "Could not start recognition");
            self.notify(VoiceNotice::Error(e.to_string()));
            self.set_state(CoordinatorState::Idle);
            return Err(e);
        }
        self.set_recording(true);
        info!(session = %self.session, "🎤 Recording started");
        self.set_state(CoordinatorState::Listening);
        Ok(())
    }

    async fn stop_recording(&mut self) {
        if !self.recording {
            return;
        }
        self.recognizer.stop().await;
        self.set_recording(false);
        self.user_speaking = false;
        self.draining = Some(self.session);
        info!(session = %self.session, "🎤 Recording stopped");

        if self.dispatcher.is_active() {
            if self.state == CoordinatorState::Paused && !self.muted {
                self.start_playback();
            }
            return;
        }
        if self.flush_deferred() {
            return;
        }
        let pending = self.assembler.pending().to_string();
        if !pending.is_empty() && self.submit(&pending) {
            return;
        }
        self.set_state(CoordinatorState::Idle);
    }

    async fn cancel_all(&mut self) {
        if self.recording {
            self.recognizer.stop().await;
            self.set_recording(false);
        }
        self.discard_turn();
        self.assembler.reset();
        self.deferred.clear();
        self.user_speaking = false;
        self.draining = None;
        self.notify(VoiceNotice::TranscriptUpdated(String::new()));
        self.set_state(CoordinatorState::Idle);
    }

    fn set_muted(&mut self, muted: bool) {
        if self.muted == muted {
            return;
        }
        self.muted = muted;
        self.notify(VoiceNotice::MuteChanged(muted));
        if muted {
            info!("🔇 Muted");
            if self.state == CoordinatorState::Speaking {
                self.synthesis.pause();
                self.set_state(CoordinatorState::Paused);
            }
        } else {
            info!("🔈 Unmuted");
            if self.state == CoordinatorState::Paused && !self.user_speaking {
                self.start_playback();
            }
        }
    }

    async fn on_recognition(&mut self, event: RecognitionEvent) -> VoiceResult<()> {
        match event {
            RecognitionEvent::SpeechStarted => {
                self.user_speaking = true;
                self.barge_in();
            }
            RecognitionEvent::Result {
                fragment,
                is_final: false,
            } => {
                self.barge_in();
                if let Some(display) = self.assembler.interim(&fragment) {
                    let display = display.to_string();
                    self.notify(VoiceNotice::TranscriptUpdated(display));
                }
            }
            RecognitionEvent::Result {
                fragment,
                is_final: true,
            } => {
                self.barge_in();
                let fragment = fragment.trim();
                if fragment.is_empty() {
                    return Ok(());
                }
                if self.dispatcher.is_active() {
                    debug!(fragment = %fragment, "Turn busy, deferring final result");
                    self.deferred.push(fragment.to_string());
                    return Ok(());
                }
                if let Some(text) = self.assembler.finalize(fragment) {
                    self.notify(VoiceNotice::TranscriptUpdated(text.clone()));
                    self.submit(&text);
                }
            }
            RecognitionEvent::SpeechEnded => self.utterance_finished(),
            RecognitionEvent::Error(message) => {
                warn!(session = %self.session, error = %message, "Recognition error");
                self.notify(VoiceNotice::Error(message));
            }
            RecognitionEvent::SessionEnded => return self.restart_recognition().await,
        }
        Ok(())
    }

    /// User speech while the assistant is busy.
    fn barge_in(&mut self) {
        if !self.settings.barge_in {
            return;
        }
        match self.state {
            CoordinatorState::Generating => {
                if let Some(turn) = self.dispatcher.cancel() {
                    info!(turn = %turn, "⚡ Barge-in: generation cancelled");
                    self.notify(VoiceNotice::TurnCancelled { turn });
                }
                self.assembler.reset();
                self.rest();
            }
            CoordinatorState::Speaking => {
                if self.synthesis.pause() {
                    info!("⚡ Barge-in: speech paused");
                }
                self.set_state(CoordinatorState::Paused);
            }
            // Synthesis cannot be interrupted; the audio plays once ready.
            CoordinatorState::Synthesizing => {}
            CoordinatorState::Idle | CoordinatorState::Listening | CoordinatorState::Paused => {}
        }
    }

    async fn restart_recognition(&mut self) -> VoiceResult<()> {
        self.recognizer.stop().await;
        self.draining = Some(self.session);
        self.session = self.session.next();
        let sink = RecognitionSink::new(self.session, self.events_tx.clone());
        match self
            .recognizer
            .start(self.session, &self.settings.recognition, sink)
            .await
        {
            Ok(()) => {
                info!(session = %self.session, "🔄 Recognition session restarted");
                self.notify(VoiceNotice::RecognitionRestarted {
                    session: self.session,
                });
                // A session that ended mid-utterance keeps the reply paused until that
                // utterance is reported finished.
                if self.state == CoordinatorState::Paused && !self.muted && !self.user_speaking {
                    self.start_playback();
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Recognition restart failed");
                self.set_recording(false);
                self.user_speaking = false;
                self.notify(VoiceNotice::Error(e.to_string()));
                if self.state == CoordinatorState::Listening {
                    self.set_state(CoordinatorState::Idle);
                }
                Err(e)
            }
        }
    }

    /// Events from a closed session: only finals count, and they never barge in.
    fn on_trailing(&mut self, session: SessionId, event: RecognitionEvent) {
        let fragment = match event {
            RecognitionEvent::Result {
                fragment,
                is_final: true,
            } => fragment,
            RecognitionEvent::SessionEnded => {
                debug!(session = %session, "Closed session drained");
                self.draining = None;
                return;
            }
            RecognitionEvent::SpeechEnded => {
                self.utterance_finished();
                return;
            }
            other => {
                debug!(session = %session, event = ?other, "Ignoring event from closed session");
                return;
            }
        };
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return;
        }
        info!(session = %session, "Final result from closed session");
        if self.dispatcher.is_active() {
            self.deferred.push(fragment.to_string());
        } else if let Some(text) = self.assembler.finalize(fragment) {
            self.notify(VoiceNotice::TranscriptUpdated(text.clone()));
            self.submit(&text);
        }
        self.utterance_finished();
    }

    /// The user stopped talking: a reply paused by them may go on.
    fn utterance_finished(&mut self) {
        self.user_speaking = false;
        if self.state == CoordinatorState::Paused && !self.muted {
            self.start_playback();
        }
    }

    fn submit(&mut self, text: &str) -> bool {
        match self.dispatcher.submit(text) {
            Ok(turn) => {
                self.notify(VoiceNotice::TurnStarted {
                    turn,
                    input: text.trim().to_string(),
                });
                self.set_state(CoordinatorState::Generating);
                true
            }
            Err(VoiceError::TurnActive) => {
                debug!("Submit rejected, turn active");
                false
            }
            Err(e) => {
                debug!(error = %e, "Submit skipped");
                false
            }
        }
    }

    /// Submit deferred finals as one turn. Returns true when a turn was started.
    fn flush_deferred(&mut self) -> bool {
        if self.deferred.is_empty() || self.dispatcher.is_active() {
            return false;
        }
        let fragments = std::mem::take(&mut self.deferred);
        let mut text = None;
        for fragment in &fragments {
            if let Some(t) = self.assembler.finalize(fragment) {
                text = Some(t);
            }
        }
        match text {
            Some(text) => {
                info!(fragments = fragments.len(), "Submitting deferred speech");
                self.notify(VoiceNotice::TranscriptUpdated(text.clone()));
                self.submit(&text)
            }
            None => false,
        }
    }

    fn on_generation(&mut self, turn: TurnId, result: Result<String, String>) {
        match self.dispatcher.accept(turn, result) {
            Acceptance::Stale => {
                debug!(turn = %turn, "Dropping stale generation result");
            }
            Acceptance::Failed(error) => {
                self.notify(VoiceNotice::TurnFailed { turn, error });
                self.rest();
                self.flush_deferred();
            }
            Acceptance::Accepted(text) => {
                info!(turn = %turn, chars = text.len(), "💬 Response ready");
                self.notify(VoiceNotice::ResponseReady {
                    turn,
                    text: text.clone(),
                });
                self.synthesis.synthesize(turn, &text);
                self.set_state(CoordinatorState::Synthesizing);
            }
        }
    }

    fn on_synthesis(&mut self, turn: TurnId, result: Result<SynthesizedAudio, String>) {
        let live = self
            .dispatcher
            .current()
            .is_some_and(|t| t.id == turn && t.status == TurnStatus::Synthesizing);
        if !live {
            debug!(turn = %turn, "Dropping synthesis for inactive turn");
            return;
        }
        match self.synthesis.accept(turn, result) {
            SynthesisOutcome::Stale => {
                debug!(turn = %turn, "Dropping stale synthesis result");
            }
            SynthesisOutcome::Failed(error) => self.fail_turn(&error, false),
            SynthesisOutcome::Ready(handle) => {
                if self.muted {
                    info!(handle = %handle, "🔇 Audio ready while muted, holding");
                    self.set_state(CoordinatorState::Paused);
                } else {
                    self.start_playback();
                }
            }
        }
    }

    fn on_playback(&mut self, handle: HandleId, event: PlaybackEvent) {
        let event = match self.synthesis.on_playback(handle, event) {
            Some(event) => event,
            None => return,
        };
        match event {
            PlaybackEvent::Ended => {
                if let Some(turn) = self.dispatcher.complete() {
                    let response = turn.response.as_deref().unwrap_or_default();
                    let added = self.history.append_exchange(&turn.input, response);
                    info!(turn = %turn.id, entries = self.history.len(), "✅ Turn completed");
                    self.notify(VoiceNotice::HistoryAppended(added));
                }
                self.assembler.reset();
                self.notify(VoiceNotice::TranscriptUpdated(String::new()));
                self.rest();
                self.flush_deferred();
            }
            PlaybackEvent::Failed(error) => {
                warn!(handle = %handle, error = %error, "Playback failed, abandoning turn");
                self.fail_turn(&error, true);
            }
        }
    }

    /// Start the loaded handle (or resume it) and move to Speaking.
    fn start_playback(&mut self) {
        let fresh = self.synthesis.state() == Some(PlaybackState::Unloaded);
        match self.synthesis.play() {
            Ok(true) => {
                self.dispatcher.mark_speaking();
                if fresh {
                    if let Some(h) = self.synthesis.current() {
                        let (turn, handle) = (h.turn, h.id);
                        self.notify(VoiceNotice::PlaybackStarted { turn, handle });
                    }
                }
                self.set_state(CoordinatorState::Speaking);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "Playback could not start");
                self.fail_turn(&e.to_string(), true);
            }
        }
    }

    fn fail_turn(&mut self, error: &str, reset_buffer: bool) {
        if let Some(turn) = self.dispatcher.fail(error) {
            self.notify(VoiceNotice::TurnFailed {
                turn,
                error: error.to_string(),
            });
        }
        self.synthesis.discard();
        if reset_buffer {
            self.assembler.reset();
        }
        self.rest();
        self.flush_deferred();
    }

    fn discard_turn(&mut self) {
        if let Some(turn) = self.dispatcher.discard() {
            info!(turn = %turn, "Turn discarded");
            self.notify(VoiceNotice::TurnCancelled { turn });
        }
        self.synthesis.discard();
    }

    /// Listening while the microphone is open, otherwise Idle.
    fn rest(&mut self) {
        let to = if self.recording {
            CoordinatorState::Listening
        } else {
            CoordinatorState::Idle
        };
        self.set_state(to);
    }

    fn set_recording(&mut self, recording: bool) {
        if self.recording != recording {
            self.recording = recording;
            self.notify(VoiceNotice::RecordingChanged(recording));
        }
    }

    fn set_state(&mut self, to: CoordinatorState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        debug!(from = ?from, to = ?to, "State changed");
        self.notify(VoiceNotice::StateChanged { from, to });
    }

    fn notify(&self, notice: VoiceNotice) {
        // Nobody listening is fine: headless runs drop notices.
        let _ = self.notices.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::PlaybackNotifier;
    use crate::recognition::{ManualFeed, ManualRecognizer, RecognitionSettings};
    use crate::synthesis::TextOnlySynthesizer;
    use async_trait::async_trait;
    use std::cell::RefCell;
    use std::rc::Rc;
    use superia_core::{CoreResult, Generation};

    /// Generator whose replies never arrive on their own; tests inject completions.
    struct Silent;

    #[async_trait]
    impl TextGenerator for Silent {
        fn label(&self) -> String {
            "silent".to_string()
        }

        async fn generate(&self, _input: &str) -> CoreResult<Generation> {
            futures::future::pending::<CoreResult<Generation>>().await
        }
    }

    #[derive(Clone, Default)]
    struct Speaker(Rc<RefCell<Vec<String>>>);

    impl PlaybackSink for Speaker {
        fn start(&mut self, handle: HandleId, _a: &SynthesizedAudio, _n: PlaybackNotifier) -> VoiceResult<()> {
            self.0.borrow_mut().push(format!("start {}", handle));
            Ok(())
        }
        fn pause(&mut self) {
            self.0.borrow_mut().push("pause".to_string());
        }
        fn resume(&mut self) {
            self.0.borrow_mut().push("resume".to_string());
        }
        fn stop(&mut self) {
            self.0.borrow_mut().push("stop".to_string());
        }
    }

    /// Synthesizer that always fails.
    struct Hoarse;

    #[async_trait]
    impl SpeechSynthesizer for Hoarse {
        async fn synthesize(&self, _text: &str) -> VoiceResult<SynthesizedAudio> {
            Err(VoiceError::Synthesis("voice quota exhausted".to_string()))
        }
    }

    /// Recognizer without a microphone.
    struct Unplugged;

    #[async_trait(?Send)]
    impl RecognitionEngine for Unplugged {
        async fn start(
            &mut self,
            _session: SessionId,
            _settings: &RecognitionSettings,
            _sink: RecognitionSink,
        ) -> VoiceResult<()> {
            Err(VoiceError::RecognitionUnavailable("no input device".to_string()))
        }

        async fn stop(&mut self) {}
    }

    fn build(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        recognizer: Box<dyn RecognitionEngine>,
    ) -> (BargeInCoordinator, mpsc::UnboundedReceiver<VoiceNotice>) {
        BargeInCoordinator::new(
            VoiceSettings::default(),
            VoiceBackends {
                generator: Arc::new(Silent),
                synthesizer,
                recognizer,
                playback: Box::new(Speaker::default()),
            },
        )
    }

    fn coordinator(settings: VoiceSettings) -> (BargeInCoordinator, ManualFeed, Speaker) {
        let (recognizer, feed) = ManualRecognizer::new();
        let speaker = Speaker::default();
        let (c, _notices) = BargeInCoordinator::new(
            settings,
            VoiceBackends {
                generator: Arc::new(Silent),
                synthesizer: Arc::new(TextOnlySynthesizer),
                recognizer: Box::new(recognizer),
                playback: Box::new(speaker.clone()),
            },
        );
        (c, feed, speaker)
    }

    async fn final_from(c: &mut BargeInCoordinator, session: SessionId, text: &str) {
        c.handle(VoiceEvent::Recognition {
            session,
            event: RecognitionEvent::Result {
                fragment: text.to_string(),
                is_final: true,
            },
        })
        .await
        .unwrap();
    }

    async fn final_result(c: &mut BargeInCoordinator, text: &str) {
        let session = c.session();
        final_from(c, session, text).await;
    }

    async fn recognition(c: &mut BargeInCoordinator, event: RecognitionEvent) {
        let session = c.session();
        c.handle(VoiceEvent::Recognition { session, event }).await.unwrap();
    }

    /// Drive a turn to Speaking: generation reply injected, synthesis awaited.
    async fn speak(c: &mut BargeInCoordinator, reply: &str) -> TurnId {
        let turn = c.current_turn().map(|t| t.id).unwrap();
        c.handle(VoiceEvent::GenerationFinished {
            turn,
            result: Ok(reply.to_string()),
        })
        .await
        .unwrap();
        assert_eq!(c.state(), CoordinatorState::Synthesizing);
        c.step().await.unwrap();
        turn
    }

    #[tokio::test]
    async fn start_recording_listens() {
        let (mut c, feed, _) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        assert!(c.is_recording());
        assert_eq!(c.state(), CoordinatorState::Listening);
        assert!(feed.is_open());
    }

    #[tokio::test]
    async fn interim_is_displayed_but_not_dispatched() {
        let (mut c, _feed, _) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        recognition(
            &mut c,
            RecognitionEvent::Result {
                fragment: "tell me".to_string(),
                is_final: false,
            },
        )
        .await;
        assert_eq!(c.transcript(), "tell me");
        assert_eq!(c.pending_text(), "");
        assert!(c.current_turn().is_none());
        assert_eq!(c.state(), CoordinatorState::Listening);
    }

    #[tokio::test]
    async fn barge_in_while_generating_cancels_and_resubmits() {
        let (mut c, _feed, _) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        final_result(&mut c, "Tell me a story").await;
        let story = c.current_turn().unwrap().id;
        assert_eq!(c.state(), CoordinatorState::Generating);

        recognition(&mut c, RecognitionEvent::SpeechStarted).await;
        assert_eq!(c.state(), CoordinatorState::Listening);
        assert_eq!(c.current_turn().unwrap().status, TurnStatus::Cancelled);
        assert_eq!(c.pending_text(), "");

        final_result(&mut c, "Actually nevermind").await;
        let next = c.current_turn().unwrap();
        assert!(next.id > story);
        assert_eq!(next.input, "Actually nevermind");

        c.handle(VoiceEvent::GenerationFinished {
            turn: story,
            result: Ok("Once upon a time".to_string()),
        })
        .await
        .unwrap();
        assert_eq!(c.state(), CoordinatorState::Generating);
        assert!(c.current_handle().is_none());
    }

    #[tokio::test]
    async fn barge_in_while_speaking_pauses_then_resumes_same_handle() {
        let (mut c, _feed, speaker) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        final_result(&mut c, "Hello").await;
        speak(&mut c, "Hi there").await;
        assert_eq!(c.state(), CoordinatorState::Speaking);
        let handle = c.current_handle().unwrap();

        recognition(&mut c, RecognitionEvent::SpeechStarted).await;
        assert_eq!(c.state(), CoordinatorState::Paused);
        assert_eq!(c.playback_state(), Some(PlaybackState::Paused));

        recognition(&mut c, RecognitionEvent::SpeechEnded).await;
        assert_eq!(c.state(), CoordinatorState::Speaking);
        assert_eq!(c.current_handle(), Some(handle));
        assert_eq!(
            *speaker.0.borrow(),
            vec!["start handle-1", "pause", "resume"]
        );
    }

    #[tokio::test]
    async fn natural_end_appends_history_once() {
        let (mut c, _feed, _) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        final_result(&mut c, "Hello").await;
        speak(&mut c, "Hi there").await;
        let handle = c.current_handle().unwrap();

        c.handle(VoiceEvent::Playback {
            handle,
            event: PlaybackEvent::Ended,
        })
        .await
        .unwrap();
        c.handle(VoiceEvent::Playback {
            handle,
            event: PlaybackEvent::Ended,
        })
        .await
        .unwrap();

        let contents: Vec<_> = c.history().iter().map(|e| e.content().to_string()).collect();
        assert_eq!(contents, vec!["Hello", "Hi there"]);
        assert_eq!(c.state(), CoordinatorState::Listening);
        assert_eq!(c.pending_text(), "");
    }

    #[tokio::test]
    async fn final_during_speech_is_deferred_until_completion() {
        let (mut c, _feed, _) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        final_result(&mut c, "Hello").await;
        let first = speak(&mut c, "Hi there").await;

        final_result(&mut c, "Wait").await;
        assert_eq!(c.state(), CoordinatorState::Paused);
        assert_eq!(c.deferred(), ["Wait".to_string()]);

        let handle = c.current_handle().unwrap();
        recognition(&mut c, RecognitionEvent::SpeechEnded).await;
        c.handle(VoiceEvent::Playback {
            handle,
            event: PlaybackEvent::Ended,
        })
        .await
        .unwrap();

        let next = c.current_turn().unwrap();
        assert!(next.id > first);
        assert_eq!(next.input, "Wait");
        assert_eq!(c.state(), CoordinatorState::Generating);
        assert!(c.deferred().is_empty());
    }

    #[tokio::test]
    async fn muted_audio_is_held_until_unmute() {
        let settings = VoiceSettings {
            start_muted: true,
            ..VoiceSettings::default()
        };
        let (mut c, _feed, speaker) = coordinator(settings);
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        final_result(&mut c, "Hello").await;
        speak(&mut c, "Hi there").await;
        assert_eq!(c.state(), CoordinatorState::Paused);
        assert_eq!(c.playback_state(), Some(PlaybackState::Unloaded));

        recognition(&mut c, RecognitionEvent::SpeechEnded).await;
        assert_eq!(c.state(), CoordinatorState::Paused);

        c.handle(ControlCommand::ToggleMute.into()).await.unwrap();
        assert!(!c.is_muted());
        assert_eq!(c.state(), CoordinatorState::Speaking);
        assert_eq!(*speaker.0.borrow(), vec!["start handle-1"]);
    }

    #[tokio::test]
    async fn mute_while_speaking_pauses() {
        let (mut c, _feed, _) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        final_result(&mut c, "Hello").await;
        speak(&mut c, "Hi there").await;
        c.handle(ControlCommand::SetMuted(true).into()).await.unwrap();
        assert_eq!(c.state(), CoordinatorState::Paused);
        recognition(&mut c, RecognitionEvent::SpeechEnded).await;
        assert_eq!(c.state(), CoordinatorState::Paused);
        c.handle(ControlCommand::SetMuted(false).into()).await.unwrap();
        assert_eq!(c.state(), CoordinatorState::Speaking);
    }

    #[tokio::test]
    async fn cancel_discards_everything() {
        let (mut c, feed, speaker) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        final_result(&mut c, "Hello").await;
        speak(&mut c, "Hi there").await;
        final_result(&mut c, "and another thing").await;

        c.handle(ControlCommand::Cancel.into()).await.unwrap();
        assert_eq!(c.state(), CoordinatorState::Idle);
        assert!(!c.is_recording());
        assert!(!feed.is_open());
        assert!(c.current_handle().is_none());
        assert!(c.deferred().is_empty());
        assert_eq!(c.current_turn().unwrap().status, TurnStatus::Cancelled);
        assert!(c.history().is_empty());
        assert_eq!(speaker.0.borrow().last().map(String::as_str), Some("stop"));
    }

    #[tokio::test]
    async fn stop_submits_pending_text_after_failure() {
        let (mut c, _feed, _) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        final_result(&mut c, "Hello").await;
        let turn = c.current_turn().unwrap().id;
        c.handle(VoiceEvent::GenerationFinished {
            turn,
            result: Err("HTTP 500: upstream".to_string()),
        })
        .await
        .unwrap();
        assert_eq!(c.state(), CoordinatorState::Listening);
        assert_eq!(c.current_turn().unwrap().status, TurnStatus::Failed);

        c.handle(ControlCommand::StopRecording.into()).await.unwrap();
        let retry = c.current_turn().unwrap();
        assert!(retry.id > turn);
        assert_eq!(retry.input, "Hello");
        assert_eq!(c.state(), CoordinatorState::Generating);
    }

    #[tokio::test]
    async fn final_arriving_after_stop_is_submitted() {
        let (mut c, _feed, _) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        recognition(&mut c, RecognitionEvent::SpeechStarted).await;
        c.handle(ControlCommand::StopRecording.into()).await.unwrap();
        assert_eq!(c.state(), CoordinatorState::Idle);
        assert!(!c.is_recording());

        let closed = c.session();
        final_from(&mut c, closed, "book a table").await;
        assert_eq!(c.current_turn().unwrap().input, "book a table");
        assert_eq!(c.state(), CoordinatorState::Generating);
        assert!(!c.is_recording());

        final_from(&mut c, closed, "for two").await;
        assert_eq!(c.deferred(), ["for two".to_string()]);

        c.handle(VoiceEvent::Recognition {
            session: closed,
            event: RecognitionEvent::SessionEnded,
        })
        .await
        .unwrap();
        final_from(&mut c, closed, "too late").await;
        assert_eq!(c.deferred(), ["for two".to_string()]);
    }

    #[tokio::test]
    async fn new_recording_ignores_the_previous_session() {
        let (mut c, _feed, _) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        c.handle(ControlCommand::StopRecording.into()).await.unwrap();
        let old = c.session();
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();

        final_from(&mut c, old, "late").await;
        assert!(c.current_turn().is_none());
        assert_eq!(c.state(), CoordinatorState::Listening);
    }

    #[tokio::test]
    async fn final_from_ended_session_survives_restart() {
        let (mut c, _feed, _) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        let first = c.session();
        recognition(&mut c, RecognitionEvent::SessionEnded).await;
        assert!(c.session() > first);

        c.handle(VoiceEvent::Recognition {
            session: first,
            event: RecognitionEvent::Result {
                fragment: "tell me".to_string(),
                is_final: false,
            },
        })
        .await
        .unwrap();
        assert_eq!(c.transcript(), "");

        final_from(&mut c, first, "hello").await;
        assert_eq!(c.current_turn().unwrap().input, "hello");
        assert_eq!(c.state(), CoordinatorState::Generating);
        assert!(c.is_recording());
    }

    #[tokio::test]
    async fn restart_mid_utterance_keeps_reply_paused() {
        let (mut c, _feed, speaker) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        final_result(&mut c, "Hello").await;
        speak(&mut c, "Hi there").await;
        let handle = c.current_handle().unwrap();

        recognition(&mut c, RecognitionEvent::SpeechStarted).await;
        recognition(&mut c, RecognitionEvent::SessionEnded).await;
        assert!(c.is_recording());
        assert_eq!(c.state(), CoordinatorState::Paused);

        recognition(&mut c, RecognitionEvent::SpeechEnded).await;
        assert_eq!(c.state(), CoordinatorState::Speaking);
        assert_eq!(c.current_handle(), Some(handle));
        assert_eq!(
            *speaker.0.borrow(),
            vec!["start handle-1", "pause", "resume"]
        );
    }

    #[tokio::test]
    async fn restart_after_speech_ended_resumes_paused_reply() {
        let (mut c, _feed, _) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        final_result(&mut c, "Hello").await;
        speak(&mut c, "Hi there").await;
        let handle = c.current_handle().unwrap();

        final_result(&mut c, "Wait").await;
        assert_eq!(c.state(), CoordinatorState::Paused);

        recognition(&mut c, RecognitionEvent::SessionEnded).await;
        assert_eq!(c.state(), CoordinatorState::Speaking);
        assert_eq!(c.current_handle(), Some(handle));
        assert_eq!(c.deferred(), ["Wait".to_string()]);
    }

    #[tokio::test]
    async fn synthesis_failure_keeps_pending_text_and_flushes_deferred() {
        let (recognizer, _feed) = ManualRecognizer::new();
        let (mut c, mut notices) = build(Arc::new(Hoarse), Box::new(recognizer));
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        final_result(&mut c, "Hello").await;
        let turn = c.current_turn().unwrap().id;
        c.handle(VoiceEvent::GenerationFinished {
            turn,
            result: Ok("Hi there".to_string()),
        })
        .await
        .unwrap();
        assert_eq!(c.state(), CoordinatorState::Synthesizing);

        final_result(&mut c, "Wait").await;
        assert_eq!(c.state(), CoordinatorState::Synthesizing);
        assert_eq!(c.deferred(), ["Wait".to_string()]);

        c.step().await.unwrap();

        let mut failed = None;
        while let Ok(notice) = notices.try_recv() {
            if let VoiceNotice::TurnFailed { turn, error } = notice {
                failed = Some((turn, error));
            }
        }
        let (failed_turn, error) = failed.unwrap();
        assert_eq!(failed_turn, turn);
        assert!(error.contains("voice quota exhausted"));

        let next = c.current_turn().unwrap();
        assert!(next.id > turn);
        assert_eq!(next.input, "Hello Wait");
        assert_eq!(c.state(), CoordinatorState::Generating);
        assert!(c.deferred().is_empty());
        assert!(c.current_handle().is_none());
        assert!(c.history().is_empty());
    }

    #[tokio::test]
    async fn recognizer_start_failure_leaves_nothing_behind() {
        let (mut c, mut notices) = build(Arc::new(TextOnlySynthesizer), Box::new(Unplugged));
        let err = c
            .handle(ControlCommand::StartRecording.into())
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::RecognitionUnavailable(_)));
        assert_eq!(c.state(), CoordinatorState::Idle);
        assert!(!c.is_recording());

        let mut errors = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            assert!(!matches!(notice, VoiceNotice::RecordingChanged(true)));
            if let VoiceNotice::Error(message) = notice {
                errors.push(message);
            }
        }
        assert_eq!(errors, vec!["Speech recognition unavailable: no input device"]);

        final_result(&mut c, "hello").await;
        assert!(c.current_turn().is_none());
    }

    #[tokio::test]
    async fn session_end_restarts_with_same_settings() {
        let (mut c, feed, _) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        let first = c.session();
        recognition(&mut c, RecognitionEvent::SessionEnded).await;
        assert!(c.is_recording());
        assert!(c.session() > first);
        let starts = feed.starts();
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[0].1, starts[1].1);
    }

    #[tokio::test]
    async fn playback_failure_abandons_turn_without_history() {
        let (mut c, _feed, _) = coordinator(VoiceSettings::default());
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        final_result(&mut c, "Hello").await;
        speak(&mut c, "Hi there").await;
        let handle = c.current_handle().unwrap();
        c.handle(VoiceEvent::Playback {
            handle,
            event: PlaybackEvent::Failed("device unplugged".to_string()),
        })
        .await
        .unwrap();
        assert_eq!(c.current_turn().unwrap().status, TurnStatus::Failed);
        assert!(c.history().is_empty());
        assert_eq!(c.state(), CoordinatorState::Listening);
        assert_eq!(c.pending_text(), "");
    }

    #[tokio::test]
    async fn barge_in_disabled_defers_instead_of_cancelling() {
        let settings = VoiceSettings {
            barge_in: false,
            ..VoiceSettings::default()
        };
        let (mut c, _feed, _) = coordinator(settings);
        c.handle(ControlCommand::StartRecording.into()).await.unwrap();
        final_result(&mut c, "first").await;
        final_result(&mut c, "second").await;
        assert_eq!(c.state(), CoordinatorState::Generating);
        assert_eq!(c.current_turn().unwrap().input, "first");
        assert_eq!(c.deferred(), ["second".to_string()]);
    }
}
