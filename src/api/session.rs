//! Per-connection state of a voice WebSocket: the declared inbound audio
//! format and the utterance being collected.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::{Bytes, BytesMut};

use crate::metrics::{incr, SynthesisMetrics};
use crate::protocol::{
    AudioFrame, ClientMessage, FrameFormat, FrameValidationError, FrameValidator, ServerEvent,
    Utterance,
};
use crate::stt::Transcriber;

#[derive(Debug, Clone, PartialEq)]
pub struct SpeakJob {
    pub text: String,
    pub voice: String,
    pub binary: bool,
}

#[derive(Debug, PartialEq)]
pub enum SessionAction {
    Reply(ServerEvent),
    Speak(SpeakJob),
    Transcribe(Utterance),
    None,
}

pub struct VoiceSession {
    validator: FrameValidator,
    metrics: Arc<SynthesisMetrics>,
    declared: FrameFormat,
    buffer: BytesMut,
    buffer_format: Option<FrameFormat>,
}

impl VoiceSession {
    pub fn new(validator: FrameValidator, metrics: Arc<SynthesisMetrics>) -> Self {
        Self {
            validator,
            metrics,
            declared: FrameFormat::default(),
            buffer: BytesMut::new(),
            buffer_format: None,
        }
    }

    pub fn handle_text(&mut self, text: &str) -> SessionAction {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Unparseable client message: {}", e);
                return SessionAction::Reply(ServerEvent::error(format!("Invalid message: {}", e)));
            }
        };

        match message {
            ClientMessage::Speak {
                text,
                voice,
                binary,
            } => SessionAction::Speak(SpeakJob {
                text,
                voice,
                binary,
            }),
            ClientMessage::AudioStart { format } => {
                tracing::debug!(
                    sample_rate = format.sample_rate,
                    channels = format.channels,
                    "Utterance started"
                );
                self.declared = format;
                self.buffer.clear();
                self.buffer_format = None;
                SessionAction::None
            }
            ClientMessage::AudioFrame { format, data } => match BASE64.decode(data.as_bytes()) {
                Ok(payload) => self.accept(AudioFrame {
                    format,
                    payload: payload.into(),
                }),
                Err(e) => self.reject(FrameValidationError::Encoding(e.to_string())),
            },
            ClientMessage::AudioEnd => SessionAction::Transcribe(self.take_utterance()),
            ClientMessage::Ping => SessionAction::Reply(ServerEvent::Pong),
        }
    }

    /// Raw PCM in the declared format.
    pub fn handle_binary(&mut self, payload: Bytes) -> SessionAction {
        self.accept(AudioFrame {
            format: self.declared.clone(),
            payload,
        })
    }

    fn accept(&mut self, frame: AudioFrame) -> SessionAction {
        let stats = match self.validator.validate(&frame) {
            Ok(stats) => stats,
            Err(e) => return self.reject(e),
        };
        incr(&self.metrics.frames_accepted);

        if self.buffer_format.as_ref() != Some(&frame.format) {
            if !self.buffer.is_empty() {
                tracing::warn!(
                    "Audio format changed mid-utterance, discarding {} buffered bytes",
                    self.buffer.len()
                );
            }
            self.buffer.clear();
            self.buffer_format = Some(frame.format);
        }
        self.buffer.extend_from_slice(&frame.payload);

        tracing::trace!(samples = stats.samples, rms = stats.rms, "Frame accepted");
        SessionAction::None
    }

    fn reject(&mut self, err: FrameValidationError) -> SessionAction {
        incr(&self.metrics.frames_rejected);
        tracing::warn!(code = err.code(), "Dropped audio frame: {}", err);
        SessionAction::Reply(ServerEvent::frame_rejected(&err))
    }

    fn take_utterance(&mut self) -> Utterance {
        let format = self
            .buffer_format
            .take()
            .unwrap_or_else(|| self.declared.clone());
        Utterance {
            format,
            pcm: self.buffer.split().freeze(),
        }
    }
}

/// Report a finished utterance and, when there is audio and a transcriber,
/// its transcript.
pub async fn finish_utterance(
    transcriber: Option<&dyn Transcriber>,
    utterance: Utterance,
) -> Vec<ServerEvent> {
    let mut events = vec![ServerEvent::Utterance {
        samples: utterance.samples(),
        duration_ms: utterance.duration_ms(),
    }];

    if utterance.is_empty() {
        return events;
    }
    let Some(transcriber) = transcriber else {
        tracing::debug!("No transcriber configured, utterance dropped");
        return events;
    };

    match transcriber.transcribe(&utterance).await {
        Ok(text) => events.push(ServerEvent::Transcript { text }),
        Err(e) => {
            tracing::warn!("Transcription failed: {}", e);
            events.push(ServerEvent::error(format!("Transcription failed: {}", e)));
        }
    }
    events
}
