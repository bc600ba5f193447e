pub mod handlers;
pub mod routes;
pub mod session;
pub mod ws;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cache::CacheStatsSnapshot;
use crate::metrics::MetricsSnapshot;
use crate::protocol::{SequenceStatus, ServerEvent};
use crate::staged::StagedPlan;
use crate::tts::{EngineId, EngineStatus};

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    pub text: String,
    pub voice: String,
}

#[derive(Debug, Serialize)]
pub struct SpeakResponse {
    pub status: SequenceStatus,
    pub plan: Option<StagedPlan>,
    pub chunks: Vec<ServerEvent>,
    pub sequence_end: ServerEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct VoicesResponse {
    pub engines: Vec<EngineStatus>,
    pub aliases: HashMap<String, HashMap<EngineId, String>>,
}

#[derive(Debug, Serialize)]
pub struct EngineHealth {
    pub id: EngineId,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub engines: Vec<EngineHealth>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub synthesis: MetricsSnapshot,
    pub cache: Option<CacheStatsSnapshot>,
}
