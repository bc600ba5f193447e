//! Wire protocol for the voice WebSocket and the HTTP speak endpoint.

pub mod frame;
pub mod sequence;

use serde::{Deserialize, Serialize};

use crate::staged::Stage;
use crate::tts::EngineId;

pub use frame::{AudioFrame, FrameFormat, FrameStats, FrameValidationError, FrameValidator, Utterance};
pub use sequence::{ChunkSequence, Encoding, Outbound, SequenceError, SequenceStatus};

/// Messages a client sends as text frames.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Speak {
        text: String,
        voice: String,
        /// Deliver chunks as binary frames instead of base64 JSON
        #[serde(default)]
        binary: bool,
    },
    AudioStart {
        #[serde(flatten)]
        format: FrameFormat,
    },
    AudioFrame {
        #[serde(flatten)]
        format: FrameFormat,
        /// base64 PCM
        data: String,
    },
    AudioEnd,
    Ping,
}

/// Metadata travelling with every outbound chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkHeader {
    pub index: usize,
    pub total: usize,
    pub stage: Stage,
    pub engine_used: EngineId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub text: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: &'static str,
    pub duration_ms: u64,
    pub from_cache: bool,
    /// base64 PCM, absent in binary frames where the PCM follows the header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    AudioChunk(ChunkHeader),
    SequenceEnd {
        total: usize,
        delivered: usize,
        succeeded: usize,
        status: SequenceStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    FrameRejected {
        code: String,
        message: String,
    },
    Utterance {
        samples: usize,
        duration_ms: u64,
    },
    Transcript {
        text: String,
    },
    Error {
        message: String,
    },
    Pong,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn frame_rejected(err: &FrameValidationError) -> Self {
        Self::FrameRejected {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
