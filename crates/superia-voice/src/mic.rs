//! Microphone recognizer: CPAL capture → WebRTC VAD → gap segmenter → STT.
//!
//! The VAD runs on a dedicated thread (the detector is not `Send`). Committed segments are
//! transcribed on the tokio runtime and reported as one final result each, followed by the
//! end-of-speech event so a paused reply resumes only after the text is in.

use crate::audio::{AudioCapture, AudioConfig, AudioFrame};
use crate::error::{VoiceError, VoiceResult};
use crate::event::SessionId;
use crate::recognition::{RecognitionEngine, RecognitionSettings, RecognitionSink};
use crate::segmenter::{SegmenterConfig, SegmenterEvent, SpeechSegmenter};
use crate::stt::SttBackend;
use crate::vad::{VadConfig, VadDetector};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct MicRecognizer {
    audio: AudioConfig,
    vad: VadConfig,
    segmenter: SegmenterConfig,
    stt: Arc<dyn SttBackend>,
    live: Option<LiveCapture>,
}

struct LiveCapture {
    session: SessionId,
    stream: cpal::Stream,
    stopping: Arc<AtomicBool>,
}

impl MicRecognizer {
    pub fn new(stt: Arc<dyn SttBackend>) -> Self {
        Self {
            audio: AudioConfig::default(),
            vad: VadConfig::default(),
            segmenter: SegmenterConfig::default(),
            stt,
            live: None,
        }
    }

    pub fn with_vad(mut self, vad: VadConfig) -> Self {
        self.vad = vad;
        self
    }

    pub fn with_segmenter(mut self, segmenter: SegmenterConfig) -> Self {
        self.segmenter = segmenter;
        self
    }
}

/// Blocking loop over captured frames. Returns when the capture stream is dropped.
fn run_pipeline(
    mut frames: mpsc::UnboundedReceiver<AudioFrame>,
    vad_config: VadConfig,
    segmenter_config: SegmenterConfig,
    stt: Arc<dyn SttBackend>,
    sink: RecognitionSink,
    runtime: Handle,
    stopping: Arc<AtomicBool>,
) {
    let mut vad = match VadDetector::new(&vad_config) {
        Ok(vad) => vad,
        Err(e) => {
            sink.error(e.to_string());
            return;
        }
    };
    let mut segmenter = SpeechSegmenter::new(segmenter_config);
    let window = vad.frame_size();

    while let Some(frame) = frames.blocking_recv() {
        for chunk in frame.samples.chunks_exact(window) {
            let speech = match vad.is_speech(chunk) {
                Ok(speech) => speech,
                Err(e) => {
                    debug!(error = %e, "VAD frame skipped");
                    continue;
                }
            };
            if let Some(event) = segmenter.push(speech, chunk, frame.captured_at) {
                dispatch(event, &stt, &sink, &runtime);
            }
        }
    }

    if let Some(event) = segmenter.flush(Instant::now()) {
        dispatch(event, &stt, &sink, &runtime);
    }
    if !stopping.load(Ordering::SeqCst) {
        warn!(session = %sink.session(), "Capture stream ended unexpectedly");
        sink.session_ended();
    }
}

fn dispatch(event: SegmenterEvent, stt: &Arc<dyn SttBackend>, sink: &RecognitionSink, runtime: &Handle) {
    match event {
        SegmenterEvent::SpeechStarted => {
            sink.speech_started();
        }
        SegmenterEvent::Discarded { .. } => {
            sink.speech_ended();
        }
        SegmenterEvent::Committed(segment) => {
            let stt = Arc::clone(stt);
            let sink = sink.clone();
            runtime.spawn(async move {
                match stt.transcribe(&segment).await {
                    Ok(text) if !text.is_empty() => {
                        sink.result(text, true);
                    }
                    Ok(_) => debug!("Segment transcribed to nothing"),
                    Err(e) => {
                        warn!(error = %e, "Transcription failed");
                        sink.error(e.to_string());
                    }
                }
                sink.speech_ended();
            });
        }
    }
}

#[async_trait(?Send)]
impl RecognitionEngine for MicRecognizer {
    async fn start(
        &mut self,
        session: SessionId,
        settings: &RecognitionSettings,
        sink: RecognitionSink,
    ) -> VoiceResult<()> {
        self.stop().await;

        let runtime = Handle::try_current()
            .map_err(|e| VoiceError::RecognitionUnavailable(e.to_string()))?;
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let stopping = Arc::new(AtomicBool::new(false));

        let error_sink = sink.clone();
        let stream = AudioCapture::new(self.audio.clone())?.start(frames_tx, move |message| {
            error_sink.error(message);
        })?;

        let vad = self.vad.clone();
        let segmenter = self.segmenter.clone();
        let stt = Arc::clone(&self.stt);
        let flag = Arc::clone(&stopping);
        std::thread::Builder::new()
            .name(format!("superia-vad-{}", session.0))
            .spawn(move || run_pipeline(frames_rx, vad, segmenter, stt, sink, runtime, flag))?;

        info!(session = %session, language = %settings.language, "🎤 Microphone session started");
        self.live = Some(LiveCapture {
            session,
            stream,
            stopping,
        });
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(live) = self.live.take() {
            live.stopping.store(true, Ordering::SeqCst);
            // Dropping the stream closes the frame channel and ends the VAD thread.
            drop(live.stream);
            info!(session = %live.session, "🎤 Microphone session stopped");
        }
    }
}
