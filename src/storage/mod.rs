//! Key/value storage boundary
//!
//! The transport core persists credentials and cache entries through an
//! abstract get/set/delete capability. Backends are grouped by durability:
//!
//! - **Volatile**: gone when the process exits
//! - **Session**: survives a reload of the client but not a fresh install
//! - **Persistent**: survives restarts
//!
//! A backend may fail to persist (quota, disk full). Callers in this crate log
//! the failure and keep operating without that tier.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::types::Result;

/// Durability class of a storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageTier {
    Volatile,
    Session,
    Persistent,
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Volatile => "volatile",
            Self::Session => "session",
            Self::Persistent => "persistent",
        };
        f.write_str(name)
    }
}

/// Abstract key/value capability
///
/// Writes must be visible to subsequent reads in the same process.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Durability of this backend
    fn tier(&self) -> StorageTier;

    /// Read a value; expired values read as `None`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value with an optional time-to-live
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Remove a value; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// All live keys, used for pattern invalidation
    async fn keys(&self) -> Result<Vec<String>>;
}
