//! Staged synthesis orchestrator
//!
//! A cheap engine renders a short intro while a higher-quality engine renders
//! the rest, concurrently. Chunks are delivered as they finish, tagged with
//! their fixed `index`/`total`.
//!
//! States: `Planning -> {Idle, Running} -> Streaming -> Completed | Failed`.

pub mod chunk;
pub mod plan;
mod unit;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::cache::SynthesisCache;
use crate::config::{StagedConfig, TextConfig};
use crate::metrics::{incr, SynthesisMetrics};
use crate::text::TextPreparer;
use crate::tts::EngineRegistry;

pub use chunk::{Chunk, Stage, UnitInfo};
pub use plan::{resolve_plan, StagedPlan};
use unit::UnitRenderer;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    #[error("No engine available for voice '{voice}'")]
    Planning { voice: String },

    #[error("All {total} chunk(s) failed: {reason}")]
    AllChunksFailed { total: usize, reason: String },

    #[error("Partial output rejected: {succeeded} of {planned} unit(s) succeeded")]
    PartialNotAllowed { succeeded: usize, planned: usize },

    #[error("Total timeout of {timeout_ms} ms exceeded before any chunk succeeded")]
    TotalTimeout { timeout_ms: u64 },

    #[error("Receiver closed before synthesis finished")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisState {
    Planning,
    Idle,
    Running,
    Streaming,
    Completed,
    Failed,
}

/// How a request ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisReport {
    pub state: SynthesisState,
    pub plan: Option<StagedPlan>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Main-text units with no engine to render them
    pub skipped: usize,
    pub partial: bool,
    pub timed_out: bool,
}

impl SynthesisReport {
    fn idle() -> Self {
        Self {
            state: SynthesisState::Idle,
            plan: None,
            total: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            partial: false,
            timed_out: false,
        }
    }
}

#[derive(Clone)]
pub struct StagedSynthesizer {
    registry: Arc<EngineRegistry>,
    metrics: Arc<SynthesisMetrics>,
    preparer: TextPreparer,
    config: StagedConfig,
    renderer: UnitRenderer,
}

impl StagedSynthesizer {
    pub fn new(
        registry: Arc<EngineRegistry>,
        cache: Option<Arc<SynthesisCache>>,
        metrics: Arc<SynthesisMetrics>,
        config: StagedConfig,
        text: TextConfig,
    ) -> Self {
        let renderer = UnitRenderer {
            registry: Arc::clone(&registry),
            cache,
            metrics: Arc::clone(&metrics),
            fallback: config.fallback_engine,
            retry_count: config.retry_count,
            retry_delay: config.retry_delay(),
        };

        Self {
            registry,
            metrics,
            preparer: TextPreparer::new(text, &config),
            config,
            renderer,
        }
    }

    pub fn plan(&self, voice: &str) -> Result<StagedPlan, SynthesisError> {
        resolve_plan(&self.registry, &self.config, voice)
    }

    /// Synthesize `text` in `voice`, sending each chunk to `out` as soon as it
    /// is ready.
    ///
    /// Returns only after every unit has produced a chunk (successful, failed,
    /// or timed out), so the caller may close the sequence afterwards.
    pub async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        out: mpsc::Sender<Chunk>,
    ) -> Result<SynthesisReport, SynthesisError> {
        incr(&self.metrics.requests);
        let mut state = SynthesisState::Planning;

        let normalized = self.preparer.normalize(text);
        if normalized.is_empty() {
            transition(&mut state, SynthesisState::Idle, voice);
            incr(&self.metrics.idle);
            return Ok(SynthesisReport::idle());
        }

        let plan = match self.plan(voice) {
            Ok(plan) => plan,
            Err(e) => {
                transition(&mut state, SynthesisState::Failed, voice);
                tracing::warn!(voice, "Planning failed: {}", e);
                incr(&self.metrics.failed);
                return Err(e);
            }
        };

        let prepared = self.preparer.split(&normalized, plan.intro_engine.is_some());
        let (units, skipped) = self.units(&plan, prepared.intro, prepared.main);
        let total = units.len();
        if skipped > 0 {
            tracing::warn!(
                voice,
                "Main engine unavailable, {} main chunk(s) will not be rendered",
                skipped
            );
        }

        transition(&mut state, SynthesisState::Running, voice);
        let (tx, mut rx) = mpsc::unbounded_channel::<Chunk>();
        let mut tasks = JoinSet::new();

        let (intro_units, main_units): (Vec<_>, Vec<_>) =
            units.iter().cloned().partition(|u| u.stage == Stage::Intro);

        for intro in intro_units {
            let renderer = self.renderer.clone();
            let tx = tx.clone();
            let voice = voice.to_string();
            let timeout = self.config.intro_timeout();
            tasks.spawn(async move {
                let chunk = renderer.render(&intro, &voice, timeout).await;
                let _ = tx.send(chunk);
            });
        }

        if !main_units.is_empty() {
            let renderer = self.renderer.clone();
            let tx = tx.clone();
            let voice = voice.to_string();
            let timeout = self.config.chunk_timeout();
            tasks.spawn(async move {
                for unit in main_units {
                    let chunk = renderer.render(&unit, &voice, timeout).await;
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let deadline = Instant::now() + self.config.total_timeout();
        let mut delivered = vec![false; total];
        let mut succeeded = 0;
        let mut reasons: Vec<String> = Vec::new();
        let mut timed_out = false;

        loop {
            tokio::select! {
                biased;
                next = rx.recv() => {
                    let Some(chunk) = next else { break };
                    if state == SynthesisState::Running {
                        transition(&mut state, SynthesisState::Streaming, voice);
                    }
                    delivered[chunk.index] = true;
                    succeeded += usize::from(chunk.is_success());
                    note_failure(&mut reasons, &chunk);
                    if out.send(chunk).await.is_err() {
                        tasks.abort_all();
                        while tasks.join_next().await.is_some() {}
                        return Err(SynthesisError::Cancelled);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        // Every task is finished or cancelled before the sequence can close.
        while tasks.join_next().await.is_some() {}

        // Chunks that landed between the deadline and the abort still count.
        while let Ok(chunk) = rx.try_recv() {
            delivered[chunk.index] = true;
            succeeded += usize::from(chunk.is_success());
            note_failure(&mut reasons, &chunk);
            if out.send(chunk).await.is_err() {
                return Err(SynthesisError::Cancelled);
            }
        }

        if timed_out {
            incr(&self.metrics.total_timeouts);
            let reason = format!(
                "total timeout of {} ms exceeded",
                self.config.total_timeout_ms
            );
            for unit in units.iter().filter(|u| !delivered[u.index]) {
                tracing::warn!(
                    engine = %unit.engine,
                    voice,
                    index = unit.index,
                    "Chunk cancelled: {}",
                    reason
                );
                incr(&self.metrics.chunks_failed);
                if out.send(Chunk::failed(unit, unit.engine, reason.clone())).await.is_err() {
                    return Err(SynthesisError::Cancelled);
                }
            }
        }

        let failed = total - succeeded;
        let partial = failed > 0 || skipped > 0;

        if succeeded == 0 {
            transition(&mut state, SynthesisState::Failed, voice);
            incr(&self.metrics.failed);
            if timed_out {
                return Err(SynthesisError::TotalTimeout {
                    timeout_ms: self.config.total_timeout_ms,
                });
            }
            return Err(SynthesisError::AllChunksFailed {
                total,
                reason: reasons.join(" | "),
            });
        }

        if partial && !self.config.allow_partial {
            transition(&mut state, SynthesisState::Failed, voice);
            incr(&self.metrics.failed);
            return Err(SynthesisError::PartialNotAllowed {
                succeeded,
                planned: total + skipped,
            });
        }

        transition(&mut state, SynthesisState::Completed, voice);
        incr(&self.metrics.completed);
        if partial {
            incr(&self.metrics.partial);
        }

        Ok(SynthesisReport {
            state,
            plan: Some(plan),
            total,
            succeeded,
            failed,
            skipped,
            partial,
            timed_out,
        })
    }

    /// Assign engines and indices. Returns the units and how many main chunks
    /// had no engine.
    fn units(
        &self,
        plan: &StagedPlan,
        intro: Option<String>,
        main: Vec<String>,
    ) -> (Vec<UnitInfo>, usize) {
        let mut planned = Vec::new();

        if let (Some(text), Some(engine)) = (intro, plan.intro_engine) {
            planned.push((Stage::Intro, text, engine));
        }

        let skipped = match plan.main_engine {
            Some(engine) => {
                planned.extend(main.into_iter().map(|text| (Stage::Main, text, engine)));
                0
            }
            None => main.len(),
        };

        let total = planned.len();
        let units = planned
            .into_iter()
            .enumerate()
            .map(|(index, (stage, text, engine))| UnitInfo {
                index,
                total,
                stage,
                text,
                engine,
            })
            .collect();

        (units, skipped)
    }
}

/// Remember a failed chunk's error, once per distinct message.
fn note_failure(reasons: &mut Vec<String>, chunk: &Chunk) {
    if let Some(error) = &chunk.error {
        if !reasons.contains(error) {
            reasons.push(error.clone());
        }
    }
}

fn transition(state: &mut SynthesisState, next: SynthesisState, voice: &str) {
    tracing::debug!(voice, "Synthesis {:?} -> {:?}", state, next);
    *state = next;
}
