//! Rendering a single synthesis unit.
//!
//! cache (primary, then fallback key) -> engine (timeout, retries) -> fallback
//! engine (one attempt) -> failed chunk.
//! Attempts for one unit are strictly sequential. Errors never escape: the
//! worst outcome is a `Chunk` with `error` set.

use std::sync::Arc;
use std::time::Duration;

use super::chunk::{Chunk, UnitInfo};
use crate::cache::{CacheKey, SynthesisCache};
use crate::metrics::{incr, SynthesisMetrics};
use crate::tts::{EngineError, EngineId, EngineRegistry, SynthesisResult};

#[derive(Clone)]
pub(crate) struct UnitRenderer {
    pub registry: Arc<EngineRegistry>,
    pub cache: Option<Arc<SynthesisCache>>,
    pub metrics: Arc<SynthesisMetrics>,
    pub fallback: Option<EngineId>,
    pub retry_count: u32,
    pub retry_delay: Duration,
}

struct Rendered {
    audio: SynthesisResult,
    engine: EngineId,
    from_cache: bool,
}

impl UnitRenderer {
    pub async fn render(&self, unit: &UnitInfo, voice: &str, timeout: Duration) -> Chunk {
        let primary = unit.engine;
        let attempts = self.retry_count + 1;
        let fallback = self
            .fallback
            .filter(|fb| *fb != primary && self.registry.supports_voice(*fb, voice));

        if let Some(rendered) = self.cached(unit, voice, primary, fallback) {
            return self.success(unit, rendered);
        }

        let primary_error = match self.render_on(unit, voice, primary, attempts, timeout).await {
            Ok(rendered) => return self.success(unit, rendered),
            Err(e) => e,
        };

        let Some(fallback) = fallback else {
            tracing::warn!(
                engine = %primary,
                voice,
                index = unit.index,
                "Chunk failed with no fallback available: {}",
                primary_error
            );
            incr(&self.metrics.chunks_failed);
            return Chunk::failed(unit, primary, format!("{}: {}", primary, primary_error));
        };

        tracing::warn!(
            engine = %primary,
            fallback = %fallback,
            voice,
            index = unit.index,
            "Falling back after {} attempt(s): {}",
            attempts,
            primary_error
        );
        incr(&self.metrics.fallbacks);

        match self.render_on(unit, voice, fallback, 1, timeout).await {
            Ok(rendered) => self.success(unit, rendered),
            Err(fallback_error) => {
                tracing::warn!(
                    engine = %fallback,
                    voice,
                    index = unit.index,
                    "Fallback failed: {}",
                    fallback_error
                );
                incr(&self.metrics.chunks_failed);
                Chunk::failed(
                    unit,
                    fallback,
                    format!(
                        "{}: {}; {}: {}",
                        primary, primary_error, fallback, fallback_error
                    ),
                )
            }
        }
    }

    fn success(&self, unit: &UnitInfo, rendered: Rendered) -> Chunk {
        incr(&self.metrics.chunks_ok);
        Chunk::succeeded(unit, rendered.engine, rendered.audio, rendered.from_cache)
    }

    /// Audio already rendered for this unit by the primary engine, or else by
    /// the fallback.
    fn cached(
        &self,
        unit: &UnitInfo,
        voice: &str,
        primary: EngineId,
        fallback: Option<EngineId>,
    ) -> Option<Rendered> {
        let cache = self.cache.as_ref()?;
        let hit = std::iter::once(primary)
            .chain(fallback)
            .find_map(|engine| cache.get(&CacheKey::new(&unit.text, voice, engine)));

        let Some(entry) = hit else {
            incr(&self.metrics.cache_misses);
            return None;
        };

        incr(&self.metrics.cache_hits);
        tracing::debug!(engine = %entry.engine, voice, index = unit.index, "Cache hit");
        Some(Rendered {
            audio: entry.audio,
            engine: entry.engine,
            from_cache: true,
        })
    }

    async fn render_on(
        &self,
        unit: &UnitInfo,
        voice: &str,
        engine_id: EngineId,
        attempts: u32,
        timeout: Duration,
    ) -> Result<Rendered, EngineError> {
        let local_voice = self
            .registry
            .resolve_voice(engine_id, voice)
            .ok_or_else(|| EngineError::VoiceNotSupported(voice.to_string()))?;

        let engine = self
            .registry
            .get(engine_id)
            .ok_or_else(|| EngineError::Unavailable(engine_id.to_string()))?;

        let mut last_error = EngineError::Unavailable(engine_id.to_string());
        for attempt in 1..=attempts {
            match tokio::time::timeout(timeout, engine.synthesize(&unit.text, &local_voice)).await {
                Ok(Ok(audio)) => {
                    if let Some(cache) = &self.cache {
                        let key = CacheKey::new(&unit.text, voice, engine_id);
                        cache.put(key, audio.clone(), engine_id, cache.default_ttl());
                    }
                    return Ok(Rendered {
                        audio,
                        engine: engine_id,
                        from_cache: false,
                    });
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        engine = %engine_id,
                        voice,
                        attempt,
                        index = unit.index,
                        "Synthesis attempt failed: {}",
                        e
                    );
                    last_error = e;
                }
                Err(_) => {
                    incr(&self.metrics.timeouts);
                    tracing::warn!(
                        engine = %engine_id,
                        voice,
                        attempt,
                        index = unit.index,
                        "Synthesis attempt timed out after {:?}",
                        timeout
                    );
                    last_error = EngineError::Timeout(timeout.as_millis() as u64);
                }
            }

            if attempt < attempts {
                incr(&self.metrics.retries);
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(last_error)
    }
}
