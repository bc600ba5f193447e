use serde::Serialize;

use crate::tts::{EngineId, SynthesisResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Intro,
    Main,
}

/// One synthesis unit's outcome, as delivered to the transport.
///
/// `index` is 0-based and `total` is fixed for the whole request, so a client
/// can order chunks that arrive out of sequence.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub total: usize,
    pub stage: Stage,
    /// Engine that produced the audio, or the last one tried on failure
    pub engine_used: EngineId,
    pub text: String,
    pub audio: Option<SynthesisResult>,
    pub error: Option<String>,
    pub from_cache: bool,
}

impl Chunk {
    pub fn succeeded(
        unit: &UnitInfo,
        engine_used: EngineId,
        audio: SynthesisResult,
        from_cache: bool,
    ) -> Self {
        Self {
            index: unit.index,
            total: unit.total,
            stage: unit.stage,
            engine_used,
            text: unit.text.clone(),
            audio: Some(audio),
            error: None,
            from_cache,
        }
    }

    pub fn failed(unit: &UnitInfo, engine_used: EngineId, error: impl Into<String>) -> Self {
        Self {
            index: unit.index,
            total: unit.total,
            stage: unit.stage,
            engine_used,
            text: unit.text.clone(),
            audio: None,
            error: Some(error.into()),
            from_cache: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.audio.is_some()
    }
}

/// What a synthesis unit is: its slot in the sequence, its text and the engine
/// planned for it.
#[derive(Debug, Clone)]
pub struct UnitInfo {
    pub index: usize,
    pub total: usize,
    pub stage: Stage,
    pub text: String,
    pub engine: EngineId,
}
