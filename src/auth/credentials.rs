//! Credential store
//!
//! Single source of truth for the active access/refresh pair. The pair lives in
//! memory and is mirrored to a durable key/value tier so it survives reloads.
//! Durable write failures are logged; the in-memory pair stays authoritative.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::storage::KeyValueStore;

/// Storage key for the persisted pair
pub const CREDENTIALS_KEY: &str = "auth:credentials";

/// Access token plus optional refresh token
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

// Tokens never reach logs
impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// Holds at most one live credential pair
pub struct CredentialStore {
    current: RwLock<Option<CredentialPair>>,
    backend: Option<Arc<dyn KeyValueStore>>,
}

impl CredentialStore {
    /// Create an empty store with no durable mirror
    pub fn in_memory() -> Self {
        Self {
            current: RwLock::new(None),
            backend: None,
        }
    }

    /// Create a store seeded with a pair, without a durable mirror
    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            current: RwLock::new(Some(pair)),
            backend: None,
        }
    }

    /// Restore the persisted pair from `backend`, if any.
    ///
    /// An unreadable or undecodable value is treated as signed out.
    pub async fn load(backend: Arc<dyn KeyValueStore>) -> Self {
        let restored = match backend.get(CREDENTIALS_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<CredentialPair>(&raw) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    warn!(error = %e, "Ignoring undecodable persisted credentials");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(tier = %backend.tier(), error = %e, "Credential tier unreadable");
                None
            }
        };

        debug!(restored = restored.is_some(), "Credential store loaded");
        Self {
            current: RwLock::new(restored),
            backend: Some(backend),
        }
    }

    /// Current pair, if signed in
    pub async fn get(&self) -> Option<CredentialPair> {
        self.current.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|pair| pair.access_token.clone())
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .and_then(|pair| pair.refresh_token.clone())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Atomically replace the pair
    pub async fn set(&self, pair: CredentialPair) {
        let mut current = self.current.write().await;
        if let Some(backend) = &self.backend {
            match serde_json::to_string(&pair) {
                Ok(raw) => {
                    if let Err(e) = backend.set(CREDENTIALS_KEY, raw, None).await {
                        warn!(tier = %backend.tier(), error = %e, "Failed to persist credentials");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to encode credentials"),
            }
        }
        *current = Some(pair);
        debug!("Credentials updated");
    }

    /// Drop both tokens
    pub async fn clear(&self) {
        let mut current = self.current.write().await;
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.delete(CREDENTIALS_KEY).await {
                warn!(tier = %backend.tier(), error = %e, "Failed to remove persisted credentials");
            }
        }
        if current.take().is_some() {
            info!("Credentials cleared");
        }
    }
}
