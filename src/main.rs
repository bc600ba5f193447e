use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

mod api;
mod cache;
mod config;
mod error;
mod metrics;
mod protocol;
mod staged;
mod stt;
mod text;
mod tts;

use api::routes::{create_router, AppState};
use cache::SynthesisCache;
use config::Config;
use metrics::SynthesisMetrics;
use protocol::FrameValidator;
use staged::StagedSynthesizer;
use stt::{HttpTranscriber, Transcriber};
use tts::{EngineId, EngineRegistry, HttpEngine, PiperEngine};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().expect("Invalid configuration");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .expect("Invalid address");

    tracing::info!("Staged TTS Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Starting server on http://{}", addr);

    let registry = Arc::new(EngineRegistry::new(config.aliases.clone()));
    register_engines(&registry, &config).await;

    let cache = if config.cache.enabled {
        let capacity = NonZeroUsize::new(config.cache.max_entries).expect("cache.max_entries > 0");
        let cache = Arc::new(SynthesisCache::new(capacity, config.cache.ttl()));
        spawn_cache_sweep(
            Arc::clone(&cache),
            Duration::from_secs(config.cache.sweep_interval_secs.max(1)),
        );
        Some(cache)
    } else {
        tracing::info!("Synthesis cache disabled");
        None
    };

    let transcriber = config.stt.as_ref().map(|stt| {
        tracing::info!("Transcription backend: {}", stt.url);
        Arc::new(HttpTranscriber::new(stt)) as Arc<dyn Transcriber>
    });

    let metrics = Arc::new(SynthesisMetrics::default());
    let synth = StagedSynthesizer::new(
        Arc::clone(&registry),
        cache.clone(),
        Arc::clone(&metrics),
        config.staged.clone(),
        config.text.clone(),
    );

    let state = Arc::new(AppState {
        synth,
        registry,
        cache,
        metrics,
        validator: FrameValidator::new(&config.audio),
        transcriber,
    });

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

async fn register_engines(registry: &EngineRegistry, config: &Config) {
    let piper = &config.engines.piper;
    if piper.enabled {
        tracing::info!("Voices directory: {}", piper.voices_dir.display());
        registry
            .register(EngineId::Piper, Arc::new(PiperEngine::new(piper.voices_dir.clone())))
            .await;
    }

    for (id, engine) in [
        (EngineId::Zonos, &config.engines.zonos),
        (EngineId::Kokoro, &config.engines.kokoro),
    ] {
        if let Some(engine) = engine {
            tracing::info!(engine = %id, "Backend at {}", engine.url);
            registry
                .register(id, Arc::new(HttpEngine::new(id, engine)))
                .await;
        }
    }

    for status in registry.statuses() {
        tracing::info!(
            engine = %status.id,
            available = status.available,
            "{} voice(s)",
            status.voices.len()
        );
    }
}

fn spawn_cache_sweep(cache: Arc<SynthesisCache>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                tracing::debug!("Cache sweep removed {} expired entries", purged);
            }
        }
    });
}
