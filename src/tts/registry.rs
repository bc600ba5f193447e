//! Engine registry
//!
//! Authoritative record of which engines exist, whether they passed their
//! start-up health check, and which voices each one serves. An engine that
//! fails the check stays unavailable for the lifetime of the process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use super::{Engine, EngineId};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

struct RegisteredEngine {
    engine: Arc<dyn Engine>,
    available: bool,
    voices: HashSet<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub id: EngineId,
    pub available: bool,
    pub voices: Vec<String>,
}

pub struct EngineRegistry {
    engines: RwLock<HashMap<EngineId, RegisteredEngine>>,
    /// voice -> engine -> engine-local voice name
    aliases: HashMap<String, HashMap<EngineId, String>>,
}

impl EngineRegistry {
    pub fn new(aliases: HashMap<String, HashMap<EngineId, String>>) -> Self {
        Self {
            engines: RwLock::new(HashMap::new()),
            aliases,
        }
    }

    /// Health-check `engine` and record it under `id`. The last registration
    /// for an id wins. Returns whether the engine is available.
    pub async fn register(&self, id: EngineId, engine: Arc<dyn Engine>) -> bool {
        let available = match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, engine.health_check()).await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(engine = %id, "Engine failed health check, disabled: {}", e);
                false
            }
            Err(_) => {
                tracing::warn!(
                    engine = %id,
                    "Engine health check timed out after {:?}, disabled",
                    HEALTH_CHECK_TIMEOUT
                );
                false
            }
        };

        self.insert(id, engine, available);
        available
    }

    /// Record an engine with a known availability, skipping the health check.
    pub fn insert(&self, id: EngineId, engine: Arc<dyn Engine>, available: bool) {
        let voices: HashSet<String> = engine.voices().into_iter().collect();
        tracing::info!(
            engine = %id,
            available,
            "Registered engine with {} voice(s)",
            voices.len()
        );

        let mut engines = self.engines.write();
        engines.insert(
            id,
            RegisteredEngine {
                engine,
                available,
                voices,
            },
        );
    }

    pub fn is_available(&self, id: EngineId) -> bool {
        self.engines
            .read()
            .get(&id)
            .map(|e| e.available)
            .unwrap_or(false)
    }

    /// True when `id` is available and serves `voice`, directly or through an alias.
    pub fn supports_voice(&self, id: EngineId, voice: &str) -> bool {
        self.resolve_voice(id, voice).is_some()
    }

    /// The engine-local name for `voice`, if the engine is available and serves it.
    /// An alias declared for the engine takes precedence over the plain name.
    pub fn resolve_voice(&self, id: EngineId, voice: &str) -> Option<String> {
        let engines = self.engines.read();
        let entry = engines.get(&id).filter(|e| e.available)?;

        if let Some(alias) = self.aliases.get(voice).and_then(|m| m.get(&id)) {
            if entry.voices.contains(alias) {
                return Some(alias.clone());
            }
        }

        entry.voices.contains(voice).then(|| voice.to_string())
    }

    /// The engine handle, only when available. The lock is released before
    /// the caller touches the engine.
    pub fn get(&self, id: EngineId) -> Option<Arc<dyn Engine>> {
        let engines = self.engines.read();
        engines
            .get(&id)
            .filter(|e| e.available)
            .map(|e| Arc::clone(&e.engine))
    }

    pub fn statuses(&self) -> Vec<EngineStatus> {
        let engines = self.engines.read();
        let mut statuses: Vec<EngineStatus> = engines
            .iter()
            .map(|(id, entry)| {
                let mut voices: Vec<String> = entry.voices.iter().cloned().collect();
                voices.sort();
                EngineStatus {
                    id: *id,
                    available: entry.available,
                    voices,
                }
            })
            .collect();
        statuses.sort_by_key(|s| s.id);
        statuses
    }

    pub fn aliases(&self) -> &HashMap<String, HashMap<EngineId, String>> {
        &self.aliases
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::testing::ScriptedEngine;

    fn aliases() -> HashMap<String, HashMap<EngineId, String>> {
        let mut zonos = HashMap::new();
        zonos.insert(EngineId::Zonos, "thorsten".to_string());
        let mut map = HashMap::new();
        map.insert("de-thorsten-low".to_string(), zonos);
        map
    }

    #[tokio::test]
    async fn healthy_engine_is_available() {
        let registry = EngineRegistry::default();
        let engine = ScriptedEngine::new(EngineId::Piper, &["de-thorsten-low"]);

        assert!(registry.register(EngineId::Piper, engine).await);
        assert!(registry.is_available(EngineId::Piper));
        assert!(registry.supports_voice(EngineId::Piper, "de-thorsten-low"));
    }

    #[tokio::test]
    async fn unhealthy_engine_is_excluded() {
        let registry = EngineRegistry::default();
        let engine = ScriptedEngine::unhealthy(EngineId::Kokoro, &["af_bella"]);

        assert!(!registry.register(EngineId::Kokoro, engine).await);
        assert!(!registry.is_available(EngineId::Kokoro));
        assert!(!registry.supports_voice(EngineId::Kokoro, "af_bella"));
        assert!(registry.get(EngineId::Kokoro).is_none());
        assert_eq!(registry.statuses().len(), 1);
    }

    #[test]
    fn unknown_engine_or_voice_is_false() {
        let registry = EngineRegistry::default();
        assert!(!registry.is_available(EngineId::Zonos));
        assert!(!registry.supports_voice(EngineId::Zonos, "anything"));

        registry.insert(
            EngineId::Piper,
            ScriptedEngine::new(EngineId::Piper, &["en_GB-alba-medium"]),
            true,
        );
        assert!(!registry.supports_voice(EngineId::Piper, "de-thorsten-low"));
    }

    #[test]
    fn alias_resolves_to_engine_local_name() {
        let registry = EngineRegistry::new(aliases());
        registry.insert(
            EngineId::Zonos,
            ScriptedEngine::new(EngineId::Zonos, &["thorsten"]),
            true,
        );

        assert_eq!(
            registry.resolve_voice(EngineId::Zonos, "de-thorsten-low"),
            Some("thorsten".to_string())
        );
        assert_eq!(
            registry.resolve_voice(EngineId::Zonos, "thorsten"),
            Some("thorsten".to_string())
        );
    }

    #[test]
    fn alias_to_undeclared_voice_falls_back_to_plain_name() {
        let registry = EngineRegistry::new(aliases());
        registry.insert(
            EngineId::Zonos,
            ScriptedEngine::new(EngineId::Zonos, &["de-thorsten-low"]),
            true,
        );

        assert_eq!(
            registry.resolve_voice(EngineId::Zonos, "de-thorsten-low"),
            Some("de-thorsten-low".to_string())
        );
    }

    #[test]
    fn last_registration_wins() {
        let registry = EngineRegistry::default();
        registry.insert(EngineId::Piper, ScriptedEngine::new(EngineId::Piper, &["a"]), true);
        registry.insert(EngineId::Piper, ScriptedEngine::new(EngineId::Piper, &["b"]), false);

        assert!(!registry.is_available(EngineId::Piper));
        let statuses = registry.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].voices, vec!["b"]);
    }
}
