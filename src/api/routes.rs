use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::{handlers, ws};
use crate::cache::SynthesisCache;
use crate::metrics::SynthesisMetrics;
use crate::protocol::FrameValidator;
use crate::staged::StagedSynthesizer;
use crate::stt::Transcriber;
use crate::tts::EngineRegistry;

pub struct AppState {
    pub synth: StagedSynthesizer,
    pub registry: Arc<EngineRegistry>,
    pub cache: Option<Arc<SynthesisCache>>,
    pub metrics: Arc<SynthesisMetrics>,
    pub validator: FrameValidator,
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let api_routes = Router::new()
        .route("/speak", post(handlers::speak))
        .route("/voices", get(handlers::list_voices))
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
