use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{EngineHealth, HealthResponse, SpeakRequest, SpeakResponse, StatsResponse, VoicesResponse};
use crate::api::routes::AppState;
use crate::error::{synthesis_status, AppError};
use crate::protocol::{ChunkSequence, Encoding, SequenceStatus};
use crate::staged::Chunk;

const MAX_TEXT_LEN: usize = 10_000;

/// Run a staged synthesis and return the whole framed sequence at once.
///
/// The sequence is returned even when synthesis fails, so the failed chunks
/// and their reasons reach the client together with `sequence_end`.
pub async fn speak(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SpeakRequest>,
) -> Result<(StatusCode, Json<SpeakResponse>), AppError> {
    if request.text.trim().is_empty() {
        return Err(AppError::BadRequest("Text cannot be empty".into()));
    }

    if request.text.chars().count() > MAX_TEXT_LEN {
        return Err(AppError::BadRequest(format!(
            "Text too long (max {} chars)",
            MAX_TEXT_LEN
        )));
    }

    if request.voice.is_empty() {
        return Err(AppError::BadRequest("Voice cannot be empty".into()));
    }

    let (tx, mut rx) = mpsc::channel::<Chunk>(16);
    let collect = async {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    };
    let (outcome, chunks) = tokio::join!(
        state.synth.synthesize(&request.text, &request.voice, tx),
        collect
    );

    let mut sequence = ChunkSequence::new(Encoding::Json);
    let chunks = chunks
        .into_iter()
        .map(|chunk| sequence.push_event(chunk))
        .collect::<Result<Vec<_>, _>>()?;

    let status = SequenceStatus::from_outcome(&outcome);
    let (http_status, plan, error, code) = match outcome {
        Ok(report) => (StatusCode::OK, report.plan, None, None),
        Err(e) => {
            let (http_status, code) = synthesis_status(&e);
            tracing::warn!(voice = %request.voice, "Speak request failed: {} - {}", code, e);
            (http_status, None, Some(e.to_string()), Some(code))
        }
    };
    let sequence_end = sequence.finish(status, error.clone())?;

    Ok((
        http_status,
        Json(SpeakResponse {
            status,
            plan,
            chunks,
            sequence_end,
            error,
            code,
        }),
    ))
}

pub async fn list_voices(State(state): State<Arc<AppState>>) -> Json<VoicesResponse> {
    let engines = state
        .registry
        .statuses()
        .into_iter()
        .filter(|status| status.available)
        .collect();

    Json(VoicesResponse {
        engines,
        aliases: state.registry.aliases().clone(),
    })
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let engines: Vec<EngineHealth> = state
        .registry
        .statuses()
        .into_iter()
        .map(|status| EngineHealth {
            id: status.id,
            available: status.available,
        })
        .collect();

    let status = if engines.iter().any(|e| e.available) {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        engines,
    })
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        synthesis: state.metrics.snapshot(),
        cache: state.cache.as_ref().map(|cache| cache.stats()),
    })
}
