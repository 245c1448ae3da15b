//! Tiered response cache
//!
//! The in-process tier keeps an access-ordered index (`BTreeMap<seq, key>`) so
//! the least recently used entry is always the first index item. Every read
//! or write bumps the entry to a fresh sequence number.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::CacheConfig;
use crate::storage::KeyValueStore;

/// A cached payload with access metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Value,
    pub created_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
    pub last_accessed_at: Instant,
    seq: u64,
}

impl CacheEntry {
    /// Readable while `now - created_at <= ttl`
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    pub fn remaining_ttl(&self, now: Instant) -> Duration {
        self.ttl
            .saturating_sub(now.saturating_duration_since(self.created_at))
    }
}

/// Serialized form written to durable tiers
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DurableRecord {
    payload: Value,
    created_at_ms: i64,
    ttl_ms: u64,
}

impl DurableRecord {
    fn remaining(&self, now_ms: i64) -> Option<Duration> {
        let age = now_ms.saturating_sub(self.created_at_ms).max(0) as u64;
        if age > self.ttl_ms {
            None
        } else {
            Some(Duration::from_millis(self.ttl_ms - age))
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Default)]
struct MemoryTier {
    entries: HashMap<String, CacheEntry>,
    lru: BTreeMap<u64, String>,
    next_seq: u64,
}

impl MemoryTier {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(&entry.seq);
        Some(entry)
    }

    /// Insert and return how many entries were evicted to stay within `max`
    fn insert(&mut self, key: String, mut entry: CacheEntry, max: usize) -> usize {
        self.remove(&key);
        entry.seq = self.bump();
        self.lru.insert(entry.seq, key.clone());
        self.entries.insert(key, entry);

        let mut evicted = 0;
        while self.entries.len() > max {
            match self.lru.pop_first() {
                Some((_, oldest)) => {
                    self.entries.remove(&oldest);
                    debug!(key = %oldest, "Cache evict (LRU)");
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }

    fn touch(&mut self, key: &str, now: Instant) -> Option<CacheEntry> {
        let seq = self.bump();
        let entry = self.entries.get_mut(key)?;
        self.lru.remove(&entry.seq);
        entry.seq = seq;
        entry.access_count += 1;
        entry.last_accessed_at = now;
        self.lru.insert(seq, key.to_string());
        Some(entry.clone())
    }
}

/// Two-level cache: bounded in-process LRU plus optional durable tiers
pub struct TieredCache {
    config: CacheConfig,
    memory: Mutex<MemoryTier>,
    durable: Vec<Arc<dyn KeyValueStore>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl TieredCache {
    /// Create a cache with only the in-process tier
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            memory: Mutex::new(MemoryTier::default()),
            durable: Vec::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Add a durable tier; tiers are consulted in the order they are added
    pub fn with_durable_tier(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.durable.push(store);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    fn durable_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Read a payload if a live entry exists in any tier
    pub async fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        {
            let mut memory = self.memory.lock().await;
            let expired = match memory.entries.get(key) {
                Some(entry) => entry.is_expired_at(now),
                None => false,
            };
            if expired {
                memory.remove(key);
                drop(memory);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "Cache miss (expired)");
                self.delete_durable(key).await;
                return None;
            }
            if let Some(entry) = memory.touch(key, now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, access_count = entry.access_count, "Cache hit");
                return Some(entry.payload);
            }
        }

        if let Some((payload, remaining)) = self.read_durable(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = key, remaining_ms = remaining.as_millis() as u64, "Cache hit (durable, promoted)");
            self.insert_memory(key, payload.clone(), remaining).await;
            return Some(payload);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = key, "Cache miss");
        None
    }

    /// Store a payload with an explicit TTL in every tier
    pub async fn set(&self, key: &str, payload: Value, ttl: Duration) {
        debug!(key = key, ttl_ms = ttl.as_millis() as u64, "Cache set");

        if !self.durable.is_empty() {
            let record = DurableRecord {
                payload: payload.clone(),
                created_at_ms: chrono::Utc::now().timestamp_millis(),
                ttl_ms: ttl.as_millis() as u64,
            };
            match serde_json::to_string(&record) {
                Ok(raw) => {
                    let durable_key = self.durable_key(key);
                    for store in &self.durable {
                        if let Err(e) = store.set(&durable_key, raw.clone(), Some(ttl)).await {
                            warn!(tier = %store.tier(), key = key, error = %e, "Durable cache write failed, continuing without tier");
                        }
                    }
                }
                Err(e) => warn!(key = key, error = %e, "Cache payload not serializable for durable tiers"),
            }
        }

        self.insert_memory(key, payload, ttl).await;
    }

    async fn insert_memory(&self, key: &str, payload: Value, ttl: Duration) {
        let now = Instant::now();
        let entry = CacheEntry {
            payload,
            created_at: now,
            ttl,
            access_count: 0,
            last_accessed_at: now,
            seq: 0,
        };
        let evicted = self
            .memory
            .lock()
            .await
            .insert(key.to_string(), entry, self.config.max_entries);
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    async fn read_durable(&self, key: &str) -> Option<(Value, Duration)> {
        let durable_key = self.durable_key(key);
        let now_ms = chrono::Utc::now().timestamp_millis();
        for store in &self.durable {
            let raw = match store.get(&durable_key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(tier = %store.tier(), key = key, error = %e, "Durable cache read failed");
                    continue;
                }
            };
            match serde_json::from_str::<DurableRecord>(&raw) {
                Ok(record) => match record.remaining(now_ms) {
                    Some(remaining) => return Some((record.payload, remaining)),
                    None => {
                        self.expirations.fetch_add(1, Ordering::Relaxed);
                        delete_logged(store, &durable_key).await;
                    }
                },
                Err(e) => {
                    warn!(tier = %store.tier(), key = key, error = %e, "Dropping undecodable durable cache record");
                    delete_logged(store, &durable_key).await;
                }
            }
        }
        None
    }

    async fn delete_durable(&self, key: &str) {
        let durable_key = self.durable_key(key);
        for store in &self.durable {
            delete_logged(store, &durable_key).await;
        }
    }

    /// Remove a single entry from every tier
    pub async fn invalidate(&self, key: &str) -> bool {
        let removed = self.memory.lock().await.remove(key).is_some();
        self.delete_durable(key).await;
        if removed {
            debug!(key = key, "Cache invalidate");
        }
        removed
    }

    /// Invalidate entries whose key contains `pattern`
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let count = {
            let mut memory = self.memory.lock().await;
            let keys: Vec<String> = memory
                .entries
                .keys()
                .filter(|key| key.contains(pattern))
                .cloned()
                .collect();
            for key in &keys {
                memory.remove(key);
            }
            keys.len()
        };

        for store in &self.durable {
            match store.keys().await {
                Ok(keys) => {
                    for key in keys.iter().filter(|k| {
                        k.strip_prefix(&self.config.key_prefix)
                            .is_some_and(|rest| rest.contains(pattern))
                    }) {
                        delete_logged(store, key).await;
                    }
                }
                Err(e) => warn!(tier = %store.tier(), error = %e, "Durable cache key listing failed"),
            }
        }

        if count > 0 {
            debug!(pattern = pattern, count = count, "Invalidated cache entries");
        }
        count
    }

    /// Clear all entries in every tier
    pub async fn clear(&self) {
        {
            let mut memory = self.memory.lock().await;
            memory.entries.clear();
            memory.lru.clear();
        }
        for store in &self.durable {
            match store.keys().await {
                Ok(keys) => {
                    for key in keys.iter().filter(|k| k.starts_with(&self.config.key_prefix)) {
                        delete_logged(store, key).await;
                    }
                }
                Err(e) => warn!(tier = %store.tier(), error = %e, "Durable cache key listing failed"),
            }
        }
        info!("Cache cleared");
    }

    /// Remove expired in-process entries
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut memory = self.memory.lock().await;
        let expired: Vec<String> = memory
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            memory.remove(key);
        }

        let count = expired.len();
        if count > 0 {
            self.expirations.fetch_add(count as u64, Ordering::Relaxed);
            debug!(count = count, "Swept expired cache entries");
        }
        count
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.memory.lock().await.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    /// Spawn the periodic expiry sweep.
    ///
    /// The task holds only a weak reference and stops when the cache is
    /// dropped; dropping the handle stops it immediately.
    pub fn spawn_sweep_task(self: &Arc<Self>) -> SweepHandle {
        let interval = self.config.sweep_interval;
        let cache = Arc::downgrade(self);
        let handle = tokio::spawn(sweep_loop(cache, interval));
        info!(interval_secs = interval.as_secs(), "Cache sweep task started");
        SweepHandle { handle }
    }
}

async fn delete_logged(store: &Arc<dyn KeyValueStore>, key: &str) {
    if let Err(e) = store.delete(key).await {
        warn!(tier = %store.tier(), key = key, error = %e, "Durable cache delete failed");
    }
}

async fn sweep_loop(cache: Weak<TieredCache>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        let Some(cache) = cache.upgrade() else {
            break;
        };
        let removed = cache.sweep_expired().await;
        let stats = cache.stats().await;
        debug!(
            removed = removed,
            entries = stats.entries,
            hit_rate = stats.hit_rate(),
            "Cache sweep completed"
        );
    }
}

/// Owns the sweep task; aborts it on drop
pub struct SweepHandle {
    handle: JoinHandle<()>,
}

impl SweepHandle {
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
