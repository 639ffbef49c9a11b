//! Cached adapter responses with integrity validation.
//!
//! Breach and registrar sources are rate-limited, so their raw responses are
//! cached for a while. Each entry carries a SHA-256 checksum of its body and
//! is discarded on mismatch, which sends the caller back to the source.

use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Wrapper for cached data with integrity validation
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidatedCacheEntry {
    /// The cached response body
    pub data: String,
    /// SHA-256 checksum of the data (hex encoded)
    pub checksum: String,
}

impl ValidatedCacheEntry {
    pub fn new(data: String) -> Self {
        let checksum = Self::compute_checksum(&data);
        Self { data, checksum }
    }

    fn compute_checksum(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns true if the checksum matches the data
    pub fn is_valid(&self) -> bool {
        Self::compute_checksum(&self.data) == self.checksum
    }

    pub fn serialize(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Deserializes and validates a cache entry
    ///
    /// Returns Some(data) if valid, None if corrupted or invalid JSON
    pub fn deserialize_and_validate(serialized: &str) -> Option<String> {
        let entry: ValidatedCacheEntry = serde_json::from_str(serialized).ok()?;

        if entry.is_valid() {
            Some(entry.data)
        } else {
            tracing::warn!(
                "Cache validation failed: checksum mismatch. Expected: {}, Data length: {}",
                entry.checksum,
                entry.data.len()
            );
            None
        }
    }
}

/// TTL cache of raw response bodies keyed by `"{adapter}:{query}"`.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Cache<String, String>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let serialized = self.inner.get(key).await?;
        match ValidatedCacheEntry::deserialize_and_validate(&serialized) {
            Some(data) => {
                tracing::debug!("Response cache hit: {}", key);
                Some(data)
            }
            None => {
                self.inner.invalidate(key).await;
                None
            }
        }
    }

    pub async fn insert(&self, key: String, body: String) {
        let entry = ValidatedCacheEntry::new(body);
        self.inner.insert(key, entry.serialize()).await;
    }

    #[cfg(test)]
    async fn insert_raw(&self, key: String, serialized: String) {
        self.inner.insert(key, serialized).await;
    }
}

impl Default for ResponseCache {
    /// One hour, 100k entries.
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), 100_000)
    }
}
