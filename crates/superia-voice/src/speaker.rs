//! Speaker output using Rodio. One sink per handle; a monitor task reports the natural end.

use crate::error::{VoiceError, VoiceResult};
use crate::event::HandleId;
use crate::playback::{PlaybackNotifier, PlaybackSink};
use crate::synthesis::{AudioData, SynthesizedAudio};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct RodioPlayback {
    _stream: OutputStream,
    output: OutputStreamHandle,
    current: Option<(Arc<Sink>, JoinHandle<()>)>,
}

impl RodioPlayback {
    /// Open the default output device.
    pub fn new() -> VoiceResult<Self> {
        let (stream, output) =
            OutputStream::try_default().map_err(|e| VoiceError::Playback(e.to_string()))?;
        info!("🔊 Audio output ready");
        Ok(Self {
            _stream: stream,
            output,
            current: None,
        })
    }
}

impl PlaybackSink for RodioPlayback {
    fn start(
        &mut self,
        handle: HandleId,
        audio: &SynthesizedAudio,
        notifier: PlaybackNotifier,
    ) -> VoiceResult<()> {
        self.stop();
        let bytes = match &audio.data {
            AudioData::Encoded { bytes, .. } => bytes.clone(),
            AudioData::Text => {
                return Err(VoiceError::Playback(
                    "text-only unit cannot be played on a speaker".to_string(),
                ))
            }
        };
        let source =
            Decoder::new(Cursor::new(bytes)).map_err(|e| VoiceError::Playback(e.to_string()))?;
        let sink = Sink::try_new(&self.output).map_err(|e| VoiceError::Playback(e.to_string()))?;
        sink.append(source);
        let sink = Arc::new(sink);

        let watched = Arc::clone(&sink);
        let monitor = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(50));
            loop {
                tick.tick().await;
                // A paused sink still holds its source, so it never reads as empty.
                if watched.empty() {
                    notifier.ended();
                    break;
                }
            }
        });
        debug!(handle = %handle, "Speaker playing");
        self.current = Some((sink, monitor));
        Ok(())
    }

    fn pause(&mut self) {
        if let Some((sink, _)) = &self.current {
            sink.pause();
        }
    }

    fn resume(&mut self) {
        if let Some((sink, _)) = &self.current {
            sink.play();
        }
    }

    fn stop(&mut self) {
        if let Some((sink, monitor)) = self.current.take() {
            monitor.abort();
            sink.stop();
        }
    }
}
