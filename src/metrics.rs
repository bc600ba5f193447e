use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters emitted by the staged orchestrator and the frame validator.
#[derive(Debug, Default)]
pub struct SynthesisMetrics {
    pub requests: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub idle: AtomicU64,
    pub partial: AtomicU64,
    pub chunks_ok: AtomicU64,
    pub chunks_failed: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub retries: AtomicU64,
    pub fallbacks: AtomicU64,
    pub timeouts: AtomicU64,
    pub total_timeouts: AtomicU64,
    pub frames_accepted: AtomicU64,
    pub frames_rejected: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub completed: u64,
    pub failed: u64,
    pub idle: u64,
    pub partial: u64,
    pub chunks_ok: u64,
    pub chunks_failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub retries: u64,
    pub fallbacks: u64,
    pub timeouts: u64,
    pub total_timeouts: u64,
    pub frames_accepted: u64,
    pub frames_rejected: u64,
}

pub fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl SynthesisMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests: load(&self.requests),
            completed: load(&self.completed),
            failed: load(&self.failed),
            idle: load(&self.idle),
            partial: load(&self.partial),
            chunks_ok: load(&self.chunks_ok),
            chunks_failed: load(&self.chunks_failed),
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            retries: load(&self.retries),
            fallbacks: load(&self.fallbacks),
            timeouts: load(&self.timeouts),
            total_timeouts: load(&self.total_timeouts),
            frames_accepted: load(&self.frames_accepted),
            frames_rejected: load(&self.frames_rejected),
        }
    }
}
