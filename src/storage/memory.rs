//! In-memory key/value backend
//!
//! Backs the volatile and session tiers. An optional byte quota makes writes
//! fail the way a full browser storage area does.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::{KeyValueStore, StorageTier};
use crate::types::{Result, TransportError};

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// DashMap-backed store with lazy TTL expiry
pub struct MemoryStore {
    tier: StorageTier,
    values: DashMap<String, StoredValue>,
    quota_bytes: Option<usize>,
    used_bytes: AtomicUsize,
}

impl MemoryStore {
    /// Create an unbounded store for the given tier
    pub fn new(tier: StorageTier) -> Self {
        Self {
            tier,
            values: DashMap::new(),
            quota_bytes: None,
            used_bytes: AtomicUsize::new(0),
        }
    }

    /// Create a store that rejects writes beyond `quota_bytes` of keys + values
    pub fn with_quota(tier: StorageTier, quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::new(tier)
        }
    }

    /// Number of stored values, including expired ones not yet read
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn remove_entry(&self, key: &str) {
        if let Some((k, old)) = self.values.remove(key) {
            self.used_bytes
                .fetch_sub(k.len() + old.value.len(), Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn tier(&self) -> StorageTier {
        self.tier
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let expired = match self.values.get(key) {
            Some(stored) if !stored.is_expired() => return Ok(Some(stored.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.remove_entry(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let incoming = key.len() + value.len();
        if let Some(quota) = self.quota_bytes {
            let existing = self
                .values
                .get(key)
                .map(|v| key.len() + v.value.len())
                .unwrap_or(0);
            let projected = self.used_bytes.load(Ordering::Relaxed) - existing + incoming;
            if projected > quota {
                return Err(TransportError::Storage(format!(
                    "{} tier quota exceeded ({} > {} bytes)",
                    self.tier, projected, quota
                )));
            }
        }

        self.remove_entry(key);
        self.values.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        self.used_bytes.fetch_add(incoming, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.remove_entry(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .values
            .iter()
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.key().clone())
            .collect())
    }
}
