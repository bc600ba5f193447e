use serde::Serialize;

use super::SynthesisError;
use crate::config::StagedConfig;
use crate::tts::{EngineId, EngineRegistry};

/// Engines chosen for one request: configured preferences intersected with
/// what is available for the requested voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StagedPlan {
    pub intro_engine: Option<EngineId>,
    pub main_engine: Option<EngineId>,
}

impl StagedPlan {
    pub fn is_empty(&self) -> bool {
        self.intro_engine.is_none() && self.main_engine.is_none()
    }
}

pub fn resolve_plan(
    registry: &EngineRegistry,
    config: &StagedConfig,
    voice: &str,
) -> Result<StagedPlan, SynthesisError> {
    let pick = |preferred: Option<EngineId>, stage: &str| {
        let id = preferred?;
        if registry.supports_voice(id, voice) {
            return Some(id);
        }
        let reason = if registry.is_available(id) {
            "does not declare the voice"
        } else {
            "is unavailable"
        };
        tracing::warn!(engine = %id, voice, "{} engine {}", stage, reason);
        None
    };

    let plan = StagedPlan {
        intro_engine: pick(config.intro_engine, "Intro"),
        main_engine: pick(config.main_engine, "Main"),
    };

    if plan.is_empty() {
        return Err(SynthesisError::Planning {
            voice: voice.to_string(),
        });
    }
    Ok(plan)
}
