//! Cache key definitions
//!
//! A key is the normalized endpoint (identifier-like path segments replaced by
//! placeholders) plus a short hash of the request parameters. The normalized
//! endpoint groups parameterized resources for invalidation; the hash keeps
//! distinct resources apart.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Cache key for a GET request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Path with identifier segments replaced by placeholders
    pub endpoint: String,
    /// Hash of path parameters and query parameters
    pub params_hash: String,
}

impl CacheKey {
    /// Build a key from a resolved path and the parameters that produced it
    pub fn new(path: &str, path_params: &[(String, String)], query: &[(String, Value)]) -> Self {
        let endpoint = normalize_endpoint(path);
        // Literal ids in the path must still separate resources
        let resolved = (endpoint != path).then_some(path);
        Self {
            params_hash: hash_params(resolved, path_params, query),
            endpoint,
        }
    }

    /// Convert to storage key string
    /// Format: normalized_endpoint:params_hash
    pub fn to_storage_key(&self) -> String {
        format!("{}:{}", self.endpoint, self.params_hash)
    }

    /// Pattern matching every cached variant of an endpoint
    pub fn invalidation_pattern(path: &str) -> String {
        format!("{}:", normalize_endpoint(path))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.endpoint, self.params_hash)
    }
}

/// Replace path segments that look like numbers, UUIDs, hashes, or opaque ids
pub fn normalize_endpoint(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let normalized: Vec<&str> = path
        .split('/')
        .map(|segment| placeholder_for(segment).unwrap_or(segment))
        .collect();
    let joined = normalized.join("/");
    if joined.len() > 1 {
        joined.trim_end_matches('/').to_string()
    } else {
        joined
    }
}

fn placeholder_for(segment: &str) -> Option<&'static str> {
    if segment.is_empty() || segment.starts_with(':') {
        return None;
    }
    if segment.bytes().all(|b| b.is_ascii_digit()) {
        return Some(":num");
    }
    if is_uuid(segment) {
        return Some(":uuid");
    }
    if segment.len() >= 16 && segment.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Some(":hash");
    }
    let has_digit = segment.bytes().any(|b| b.is_ascii_digit());
    let has_alpha = segment.bytes().any(|b| b.is_ascii_alphabetic());
    let id_charset = segment
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if segment.len() >= 20 && has_digit && has_alpha && id_charset {
        return Some(":id");
    }
    None
}

fn is_uuid(segment: &str) -> bool {
    let groups: Vec<&str> = segment.split('-').collect();
    let lengths = [8, 4, 4, 4, 12];
    groups.len() == lengths.len()
        && groups
            .iter()
            .zip(lengths)
            .all(|(group, len)| group.len() == len && group.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Hash parameters in a canonical (sorted) order; null query values are ignored
fn hash_params(
    resolved: Option<&str>,
    path_params: &[(String, String)],
    query: &[(String, Value)],
) -> String {
    let mut parts: Vec<String> = path_params
        .iter()
        .map(|(k, v)| format!("p:{}={}", k, v))
        .collect();
    parts.extend(resolved.map(|path| format!("r:{}", path)));
    parts.extend(
        query
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| format!("q:{}={}", k, v)),
    );
    if parts.is_empty() {
        return "empty".to_string();
    }
    parts.sort();

    let mut hasher = Sha256::new();
    hasher.update(parts.join("&").as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..8]) // First 8 bytes = 16 hex chars
}
