//! File-backed persistent key/value backend
//!
//! Keeps the whole map in memory and rewrites a single JSON document on every
//! mutation (write to a sibling temp file, then rename). Suitable for the small
//! amount of state the SDK persists: credentials and a bounded cache.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{KeyValueStore, StorageTier};
use crate::types::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileRecord {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at_ms: Option<i64>,
}

impl FileRecord {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }
}

/// Persistent store backed by one JSON file
pub struct FileStore {
    path: PathBuf,
    records: Mutex<HashMap<String, FileRecord>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file starts empty. A corrupt file is logged and replaced on
    /// the next write rather than failing the caller.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, FileRecord>>(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Discarding unreadable store file");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), entries = records.len(), "Opened file store");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &HashMap<String, FileRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec(records)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn tier(&self) -> StorageTier {
        StorageTier::Persistent
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let records = self.records.lock().await;
        let now_ms = Utc::now().timestamp_millis();
        Ok(records
            .get(key)
            .filter(|record| !record.is_expired(now_ms))
            .map(|record| record.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let mut records = self.records.lock().await;
        let expires_at_ms =
            ttl.map(|ttl| Utc::now().timestamp_millis() + ttl.as_millis() as i64);
        records.insert(key.to_string(), FileRecord { value, expires_at_ms });
        self.persist(&records).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        if records.remove(key).is_some() {
            self.persist(&records).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let records = self.records.lock().await;
        let now_ms = Utc::now().timestamp_millis();
        Ok(records
            .iter()
            .filter(|(_, record)| !record.is_expired(now_ms))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
