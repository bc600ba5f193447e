use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::protocol::SequenceError;
use crate::staged::SynthesisError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Framing error: {0}")]
    Protocol(#[from] SequenceError),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Protocol(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PROTOCOL_ERROR"),
        };
        let message = match &self {
            AppError::BadRequest(msg) => msg.clone(),
            other => other.to_string(),
        };

        tracing::error!("Request failed: {} - {}", code, message);

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// HTTP status and error code for a failed synthesis.
pub fn synthesis_status(err: &SynthesisError) -> (StatusCode, &'static str) {
    match err {
        SynthesisError::Planning { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "NO_ENGINE"),
        _ => (StatusCode::BAD_GATEWAY, "SYNTHESIS_FAILED"),
    }
}
