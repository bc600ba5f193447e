pub mod http;
pub mod piper;
pub mod registry;
#[cfg(test)]
pub mod testing;
pub mod voice;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use http::HttpEngine;
pub use piper::PiperEngine;
pub use registry::{EngineRegistry, EngineStatus};

/// The closed set of synthesis backends the server knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineId {
    Piper,
    Zonos,
    Kokoro,
}

impl EngineId {
    pub const ALL: [EngineId; 3] = [EngineId::Piper, EngineId::Zonos, EngineId::Kokoro];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineId::Piper => "piper",
            EngineId::Zonos => "zonos",
            EngineId::Kokoro => "kokoro",
        }
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "piper" => Ok(EngineId::Piper),
            "zonos" => Ok(EngineId::Zonos),
            "kokoro" => Ok(EngineId::Kokoro),
            other => Err(EngineError::UnknownEngine(other.to_string())),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Unknown engine: {0}")]
    UnknownEngine(String),

    #[error("Voice not supported: {0}")]
    VoiceNotSupported(String),

    #[error("Engine timed out after {0} ms")]
    Timeout(u64),

    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("Synthesis failed: {0}")]
    Backend(String),
}

/// Raw 16-bit little-endian PCM produced by one engine call.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    pub pcm: Bytes,
    pub sample_rate: u32,
    pub channels: u16,
}

impl SynthesisResult {
    pub fn from_samples(samples: &[i16], sample_rate: u32, channels: u16) -> Self {
        let mut pcm = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        Self {
            pcm: Bytes::from(pcm),
            sample_rate,
            channels,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        let frame_bytes = 2 * u64::from(self.channels.max(1));
        let frames = self.pcm.len() as u64 / frame_bytes;
        if self.sample_rate == 0 {
            return 0;
        }
        frames * 1000 / u64::from(self.sample_rate)
    }
}

/// A synthesis backend.
///
/// Implementations hold no per-call mutable state, so one instance can serve
/// concurrent requests. Callers wrap `synthesize` in their own timeout.
#[async_trait]
pub trait Engine: Send + Sync {
    fn id(&self) -> EngineId;

    /// Voice names this engine declares, in its own naming.
    fn voices(&self) -> Vec<String>;

    async fn health_check(&self) -> Result<(), EngineError>;

    async fn synthesize(&self, text: &str, voice: &str) -> Result<SynthesisResult, EngineError>;
}
