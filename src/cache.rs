//! Synthesis cache
//!
//! Content-addressed store of rendered chunks, keyed by a SHA-256 over
//! (normalized text, voice, engine). Expired entries are dropped lazily on
//! lookup and by a periodic sweep; beyond capacity the least recently used
//! entry goes first, whatever its age. Best effort: a miss only costs a
//! synthesis call.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::tts::{EngineId, SynthesisResult};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn new(normalized_text: &str, voice: &str, engine: EngineId) -> Self {
        let mut hasher = Sha256::new();
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        for part in [normalized_text, voice, engine.as_str()] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(hasher.finalize().into())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey(")?;
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub audio: SynthesisResult,
    /// Engine that originally rendered the audio
    pub engine: EngineId,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub inserts: AtomicU64,
    pub evictions: AtomicU64,
    pub expirations: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
}

pub struct SynthesisCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    default_ttl: Duration,
    stats: CacheStats,
}

impl SynthesisCache {
    pub fn new(capacity: NonZeroUsize, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
            stats: CacheStats::default(),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: CacheKey, audio: SynthesisResult, engine: EngineId, ttl: Duration) {
        let entry = CacheEntry {
            audio,
            engine,
            created_at: Instant::now(),
            ttl,
        };

        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(key, entry) {
            // push returns the replaced entry too; only a different key is an eviction
            if evicted != key {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Synthesis cache full, evicted {:?}", evicted);
            }
        }
        self.stats.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            entries.pop(key);
        }
        self.stats
            .expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let (entries, capacity) = {
            let guard = self.entries.lock();
            (guard.len(), guard.cap().get())
        };
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStatsSnapshot {
            entries,
            capacity,
            hits,
            misses,
            inserts: self.stats.inserts.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn audio(tag: i16) -> SynthesisResult {
        SynthesisResult::from_samples(&[tag, tag], 22050, 1)
    }

    fn cache(capacity: usize) -> SynthesisCache {
        SynthesisCache::new(NonZeroUsize::new(capacity).unwrap(), Duration::from_secs(60))
    }

    #[test]
    fn key_depends_on_every_component() {
        let base = CacheKey::new("Hallo", "de-thorsten-low", EngineId::Piper);
        assert_eq!(base, CacheKey::new("Hallo", "de-thorsten-low", EngineId::Piper));
        assert_ne!(base, CacheKey::new("Hallo!", "de-thorsten-low", EngineId::Piper));
        assert_ne!(base, CacheKey::new("Hallo", "de-kerstin-low", EngineId::Piper));
        assert_ne!(base, CacheKey::new("Hallo", "de-thorsten-low", EngineId::Zonos));
        assert_ne!(
            CacheKey::new("ab", "c", EngineId::Piper),
            CacheKey::new("a", "bc", EngineId::Piper)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn returns_audio_until_ttl_elapses() {
        let cache = cache(4);
        let key = CacheKey::new("Hallo", "v", EngineId::Piper);
        cache.put(key, audio(7), EngineId::Piper, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(9)).await;
        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.audio, audio(7));
        assert_eq!(entry.engine, EngineId::Piper);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().entries, 0);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn evicts_least_recently_used_over_capacity() {
        let cache = cache(2);
        let a = CacheKey::new("a", "v", EngineId::Piper);
        let b = CacheKey::new("b", "v", EngineId::Piper);
        let c = CacheKey::new("c", "v", EngineId::Piper);

        cache.put(a, audio(1), EngineId::Piper, Duration::from_secs(60));
        cache.put(b, audio(2), EngineId::Piper, Duration::from_secs(60));
        // Touch `a` so `b` becomes the least recently used.
        assert!(cache.get(&a).is_some());
        cache.put(c, audio(3), EngineId::Piper, Duration::from_secs(60));

        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn overwriting_a_key_is_not_an_eviction() {
        let cache = cache(2);
        let a = CacheKey::new("a", "v", EngineId::Piper);
        cache.put(a, audio(1), EngineId::Piper, Duration::from_secs(60));
        cache.put(a, audio(2), EngineId::Zonos, Duration::from_secs(60));

        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.get(&a).unwrap().engine, EngineId::Zonos);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired() {
        let cache = cache(8);
        let short = CacheKey::new("short", "v", EngineId::Piper);
        let long = CacheKey::new("long", "v", EngineId::Piper);
        cache.put(short, audio(1), EngineId::Piper, Duration::from_secs(1));
        cache.put(long, audio(2), EngineId::Piper, Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stats().entries, 1);
        assert!(cache.get(&long).is_some());
    }

    #[tokio::test]
    async fn concurrent_access_is_safe() {
        let cache = Arc::new(cache(64));
        let mut handles = Vec::new();
        for worker in 0..8i16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for i in 0..50i16 {
                    let key = CacheKey::new(&format!("{}-{}", worker, i % 10), "v", EngineId::Piper);
                    if cache.get(&key).is_none() {
                        cache.put(key, audio(i), EngineId::Piper, Duration::from_secs(60));
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // 80 distinct keys through a 64-entry cache
        assert_eq!(cache.stats().entries, 64);
    }
}
