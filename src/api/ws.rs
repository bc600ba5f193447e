//! Voice WebSocket
//!
//! One reader loop per connection feeds [`VoiceSession`]; a writer task owns
//! the socket sink; a speaker task runs speak requests one after another so
//! their sequences never interleave.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::routes::AppState;
use super::session::{finish_utterance, SessionAction, SpeakJob, VoiceSession};
use crate::protocol::{ChunkSequence, Encoding, Outbound, SequenceStatus, ServerEvent};
use crate::staged::{Chunk, StagedSynthesizer};

const OUTBOUND_BUFFER: usize = 64;
const PENDING_SPEAK_JOBS: usize = 8;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let (speak_tx, speak_rx) = mpsc::channel::<SpeakJob>(PENDING_SPEAK_JOBS);
    let speaker = tokio::spawn(run_speaker(state.synth.clone(), speak_rx, out_tx.clone()));

    let mut session = VoiceSession::new(state.validator.clone(), Arc::clone(&state.metrics));
    tracing::info!("Voice session connected");

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("WebSocket receive error: {}", e);
                break;
            }
        };

        let action = match message {
            Message::Text(text) => session.handle_text(&text),
            Message::Binary(data) => session.handle_binary(data.into()),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match action {
            SessionAction::Reply(event) => {
                if send_event(&out_tx, &event).await.is_err() {
                    break;
                }
            }
            SessionAction::Speak(job) => {
                if speak_tx.try_send(job).is_err() {
                    let busy = ServerEvent::error("Too many pending speak requests");
                    if send_event(&out_tx, &busy).await.is_err() {
                        break;
                    }
                }
            }
            SessionAction::Transcribe(utterance) => {
                let transcriber = state.transcriber.clone();
                let out = out_tx.clone();
                tokio::spawn(async move {
                    for event in finish_utterance(transcriber.as_deref(), utterance).await {
                        if send_event(&out, &event).await.is_err() {
                            break;
                        }
                    }
                });
            }
            SessionAction::None => {}
        }
    }

    // In-flight synthesis is cancelled with the connection.
    speaker.abort();
    drop(out_tx);
    let _ = writer.await;
    tracing::info!("Voice session closed");
}

async fn run_speaker(
    synth: StagedSynthesizer,
    mut jobs: mpsc::Receiver<SpeakJob>,
    out: mpsc::Sender<Message>,
) {
    while let Some(job) = jobs.recv().await {
        if stream_sequence(&synth, job, &out).await.is_err() {
            break;
        }
    }
}

struct Disconnected;

/// Synthesize one request and stream its chunks, closing with the sequence
/// end marker whatever the outcome.
async fn stream_sequence(
    synth: &StagedSynthesizer,
    job: SpeakJob,
    out: &mpsc::Sender<Message>,
) -> Result<(), Disconnected> {
    let encoding = if job.binary {
        Encoding::Binary
    } else {
        Encoding::Json
    };
    let mut sequence = ChunkSequence::new(encoding);
    let (tx, mut rx) = mpsc::channel::<Chunk>(16);

    let forward = async {
        while let Some(chunk) = rx.recv().await {
            let message = match sequence.push(chunk) {
                Ok(Outbound::Text(text)) => Message::Text(text),
                Ok(Outbound::Binary(bytes)) => Message::Binary(bytes.to_vec()),
                Err(e) => {
                    tracing::warn!(voice = %job.voice, "Chunk not framed: {}", e);
                    continue;
                }
            };
            if out.send(message).await.is_err() {
                return false;
            }
        }
        true
    };

    let (outcome, connected) = tokio::join!(synth.synthesize(&job.text, &job.voice, tx), forward);
    if !connected {
        return Err(Disconnected);
    }

    let status = SequenceStatus::from_outcome(&outcome);
    let reason = match &outcome {
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(voice = %job.voice, "Speak request failed: {}", e);
            send_event(out, &ServerEvent::error(e.to_string())).await?;
            Some(e.to_string())
        }
    };

    match sequence.finish(status, reason) {
        Ok(end) => send_event(out, &end).await,
        Err(e) => {
            tracing::warn!("Sequence end not sent: {}", e);
            Ok(())
        }
    }
}

async fn send_event(out: &mpsc::Sender<Message>, event: &ServerEvent) -> Result<(), Disconnected> {
    let text = match event.to_json() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode event: {}", e);
            return Ok(());
        }
    };
    out.send(Message::Text(text)).await.map_err(|_| Disconnected)
}
