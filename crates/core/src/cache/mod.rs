//! Two-tier request cache for listing API responses.
//!
//! The memory tier is a bounded map with strict LRU eviction; the second tier
//! is any [`CachePersister`] (a directory of JSON files in production). Both
//! tiers share one TTL measured from the entry's creation time, and entries
//! are addressed by [`compute_cache_key`] rather than the raw parameters.
//!
//! Backing-store failures are logged and swallowed: the cache degrades to
//! memory-only or miss behaviour and never fails a caller.

pub mod hash;
pub mod persist;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::CacheConfig;

pub use hash::compute_cache_key;
pub use persist::{CacheIoError, CachePersister, DiskPersister, NullPersister, StoredEntry};

/// Wall-clock source in unix milliseconds.
pub trait Clock: Send + Sync + Debug {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    created_at: i64,
    hit_count: u64,
    last_access: i64,
    /// Monotonic access order; breaks `last_access` ties.
    access_seq: u64,
}

#[derive(Debug, Default)]
struct MemoryTier {
    entries: HashMap<String, CacheEntry>,
    next_seq: u64,
}

impl MemoryTier {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Remove the least recently used entry.
    fn evict_one(&mut self) -> Option<String> {
        let key = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.last_access, e.access_seq))
            .map(|(k, _)| k.clone())?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Read-only snapshot of cache counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub ttl_secs: u64,
}

/// Process-wide response cache shared by every fetch task.
#[derive(Debug)]
pub struct RequestCache {
    memory: Mutex<MemoryTier>,
    persister: Arc<dyn CachePersister>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl RequestCache {
    /// Create a memory-only cache. `max_entries` is clamped to at least 1.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            memory: Mutex::new(MemoryTier::default()),
            persister: Arc::new(NullPersister),
            clock: Arc::new(SystemClock),
            max_entries: max_entries.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Build the cache described by configuration, backed by disk when a directory is set.
    pub fn from_config(config: &CacheConfig) -> Self {
        let cache = Self::new(config.max_entries, config.ttl());
        match &config.dir {
            Some(dir) => cache.with_persister(Arc::new(DiskPersister::new(dir))),
            None => cache,
        }
    }

    pub fn with_persister(mut self, persister: Arc<dyn CachePersister>) -> Self {
        self.persister = persister;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn memory(&self) -> MutexGuard<'_, MemoryTier> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, created_at: i64, now: i64) -> bool {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        now.saturating_sub(created_at) >= ttl_ms
    }

    /// Look up the response cached for `params`.
    ///
    /// Memory is checked first; an expired memory entry is dropped and the
    /// disk tier consulted. A fresh disk entry is promoted into memory with
    /// its original creation time. Each call counts exactly one hit or miss.
    pub async fn get(&self, params: &Map<String, Value>) -> Option<Value> {
        let key = compute_cache_key(params);
        let now = self.clock.now_millis();

        {
            let mut memory = self.memory();
            let seq = memory.next_seq();
            match memory.entries.get_mut(&key) {
                Some(entry) if !self.is_expired(entry.created_at, now) => {
                    entry.hit_count += 1;
                    entry.last_access = now;
                    entry.access_seq = seq;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, hits = entry.hit_count, "memory cache hit");
                    return Some(entry.data.clone());
                }
                Some(_) => {
                    memory.entries.remove(&key);
                    tracing::debug!(key = %key, "memory cache entry expired");
                }
                None => {}
            }
        }

        match self.persister.load(&key).await {
            Ok(Some(stored)) if !self.is_expired(stored.created_at, now) => {
                self.insert(&key, stored.data.clone(), stored.created_at, now);
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "disk cache hit");
                Some(stored.data)
            }
            Ok(Some(_)) => {
                if let Err(e) = self.persister.remove(&key).await {
                    tracing::warn!(key = %key, error = %e, "failed to delete expired cache entry");
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(CacheIoError::Decode(e)) => {
                tracing::warn!(key = %key, error = %e, "discarding corrupt cache entry");
                if let Err(e) = self.persister.remove(&key).await {
                    tracing::warn!(key = %key, error = %e, "failed to delete corrupt cache entry");
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to read cache entry");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache `data` for `params` in memory and, best effort, on disk.
    pub async fn put(&self, params: &Map<String, Value>, data: Value) {
        let key = compute_cache_key(params);
        let now = self.clock.now_millis();
        self.insert(&key, data.clone(), now, now);

        let stored = StoredEntry { data, created_at: now };
        if let Err(e) = self.persister.store(&key, &stored).await {
            tracing::warn!(key = %key, error = %e, "failed to write cache entry");
        }
        tracing::debug!(key = %key, "cached response");
    }

    fn insert(&self, key: &str, data: Value, created_at: i64, now: i64) {
        let mut memory = self.memory();
        if !memory.entries.contains_key(key) {
            while memory.entries.len() >= self.max_entries {
                let Some(evicted) = memory.evict_one() else { break };
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %evicted, "evicted cache entry");
            }
        }
        let access_seq = memory.next_seq();
        memory
            .entries
            .insert(key.to_string(), CacheEntry { data, created_at, hit_count: 0, last_access: now, access_seq });
    }

    /// Drop the entry for `params` from both tiers.
    pub async fn invalidate(&self, params: &Map<String, Value>) {
        let key = compute_cache_key(params);
        self.memory().entries.remove(&key);
        if let Err(e) = self.persister.remove(&key).await {
            tracing::warn!(key = %key, error = %e, "failed to delete cache entry");
        }
    }

    /// Drop every entry from both tiers.
    pub async fn invalidate_all(&self) {
        self.memory().entries.clear();
        if let Err(e) = self.persister.clear().await {
            tracing::warn!(error = %e, "failed to clear cache directory");
        }
    }

    /// Remove expired memory entries; returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut memory = self.memory();
        let before = memory.entries.len();
        memory.entries.retain(|_, e| !self.is_expired(e.created_at, now));
        before - memory.entries.len()
    }

    pub fn len(&self) -> usize {
        self.memory().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            size: self.len(),
            max_size: self.max_entries,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            ttl_secs: self.ttl.as_secs(),
        }
    }
}
