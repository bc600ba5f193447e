//! Scripted engine for exercising the registry and the staged orchestrator.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Engine, EngineError, EngineId, SynthesisResult};

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Return audio after the delay
    Succeed(Duration),
    /// Return an engine error after the delay
    Fail(Duration),
    /// Never return
    Hang,
}

pub struct ScriptedEngine {
    id: EngineId,
    voices: Vec<String>,
    healthy: bool,
    sample_rate: u32,
    script: Mutex<VecDeque<Behavior>>,
    default: Behavior,
    calls: AtomicUsize,
    texts: Mutex<Vec<(String, String)>>,
}

impl ScriptedEngine {
    pub fn new(id: EngineId, voices: &[&str]) -> Arc<Self> {
        Self::build(id, voices, true, Behavior::Succeed(Duration::from_millis(10)))
    }

    pub fn unhealthy(id: EngineId, voices: &[&str]) -> Arc<Self> {
        Self::build(id, voices, false, Behavior::Succeed(Duration::ZERO))
    }

    pub fn with_default(id: EngineId, voices: &[&str], default: Behavior) -> Arc<Self> {
        Self::build(id, voices, true, default)
    }

    fn build(id: EngineId, voices: &[&str], healthy: bool, default: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id,
            voices: voices.iter().map(|v| v.to_string()).collect(),
            healthy,
            sample_rate: 22050,
            script: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
        })
    }

    /// Queue behaviours for the next calls; the default applies afterwards.
    pub fn push(&self, behavior: Behavior) {
        self.script.lock().push_back(behavior);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// (text, voice) pairs in call order
    pub fn requests(&self) -> Vec<(String, String)> {
        self.texts.lock().clone()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    fn id(&self) -> EngineId {
        self.id
    }

    fn voices(&self) -> Vec<String> {
        self.voices.clone()
    }

    async fn health_check(&self) -> Result<(), EngineError> {
        if self.healthy {
            Ok(())
        } else {
            Err(EngineError::Unavailable(format!("{} is down", self.id)))
        }
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<SynthesisResult, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().push((text.to_string(), voice.to_string()));

        let behavior = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        match behavior {
            Behavior::Succeed(delay) => {
                tokio::time::sleep(delay).await;
                // One sample per character keeps audio length traceable to text.
                let samples: Vec<i16> = text.chars().map(|c| c as i16).collect();
                Ok(SynthesisResult::from_samples(&samples, self.sample_rate, 1))
            }
            Behavior::Fail(delay) => {
                tokio::time::sleep(delay).await;
                Err(EngineError::Backend(format!("{} refused", self.id)))
            }
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}
