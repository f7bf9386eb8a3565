//! Cache facade.
//!
//! Two layers sit in front of every upstream: a persistent byte store
//! (behind the [`ByteStore`] trait, so deployments bring their own KV) for
//! normalized profiles, and an in-process edge cache holding whole HTTP
//! responses keyed by URL. Both are advisory: a read that fails or times
//! out is a miss, entries may vanish at any time, and a stale entry within
//! its TTL is fresh by definition. Writes are handed to detached tasks so
//! they survive the response.

use crate::ident::Platform;
use crate::profile::PlayerProfile;
use async_trait::async_trait;
use moka::Expiry;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const EDGE_TTL: Duration = Duration::from_secs(5 * 24 * 60 * 60);
pub const ERROR_EDGE_TTL: Duration = Duration::from_secs(5 * 60);
pub const NEGATIVE_TTL: Duration = Duration::from_secs(60 * 60);

/// How long a read may block the request path.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Persistent-store TTL per platform.
pub const fn store_ttl(platform: Platform) -> Duration {
    match platform {
        Platform::Minecraft | Platform::Steam | Platform::Xbox => {
            Duration::from_secs(7 * 24 * 60 * 60)
        }
        Platform::Hytale => Duration::from_secs(10 * 24 * 60 * 60),
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ByteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
}

#[derive(Clone)]
struct Blob {
    data: String,
    ttl: Duration,
}

struct BlobExpiry;

impl Expiry<String, Blob> for BlobExpiry {
    fn expire_after_create(&self, _key: &String, value: &Blob, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process `ByteStore`; stands in for the external KV in tests and
/// single-node deployments.
pub struct MemoryStore {
    cache: moka::future::Cache<String, Blob>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            cache: moka::future::Cache::builder()
                .max_capacity(100_000)
                .expire_after(BlobExpiry)
                .build(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ByteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.cache.get(key).await.map(|blob| blob.data))
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.cache
            .insert(key.to_string(), Blob { data: value, ttl })
            .await;
        Ok(())
    }
}

/// Outcome of a profile-cache read.
#[derive(Debug)]
pub enum CacheLookup {
    Hit(PlayerProfile),
    /// The Xbox negative sentinel: a definitive recent "not found".
    NegativeHit,
    Miss,
}

#[derive(Clone)]
pub struct PlayerCache {
    store: Arc<dyn ByteStore>,
    bypass_reads: bool,
}

impl PlayerCache {
    pub fn new(store: Arc<dyn ByteStore>, bypass_reads: bool) -> Self {
        Self {
            store,
            bypass_reads,
        }
    }

    /// Reads a profile. Timeouts, backend errors, and undecodable entries
    /// all come back as a miss; the pipeline then goes upstream.
    pub async fn get(&self, key: &str) -> CacheLookup {
        if self.bypass_reads {
            return CacheLookup::Miss;
        }

        let read = tokio::time::timeout(READ_TIMEOUT, self.store.get(key)).await;
        let raw = match read {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => return CacheLookup::Miss,
            Ok(Err(e)) => {
                tracing::warn!(key = key, "cache read failed, treating as miss: {e}");
                return CacheLookup::Miss;
            }
            Err(_) => {
                tracing::warn!(key = key, "cache read timed out, treating as miss");
                return CacheLookup::Miss;
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(value) if value.get("not_found").and_then(Value::as_bool) == Some(true) => {
                CacheLookup::NegativeHit
            }
            Ok(value) => match serde_json::from_value::<PlayerProfile>(value) {
                Ok(profile) => CacheLookup::Hit(profile),
                Err(e) => {
                    tracing::warn!(key = key, "undecodable cache entry: {e}");
                    CacheLookup::Miss
                }
            },
            Err(e) => {
                tracing::warn!(key = key, "corrupt cache entry: {e}");
                CacheLookup::Miss
            }
        }
    }

    /// Fire-and-forget profile write; must outlive the response.
    pub fn put(&self, key: &str, profile: &PlayerProfile, ttl: Duration) {
        let serialized = match serde_json::to_string(profile) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(key = key, "profile serialization failed: {e}");
                return;
            }
        };
        self.put_raw(key, serialized, ttl);
    }

    /// Fire-and-forget negative sentinel write.
    pub fn put_negative(&self, key: &str) {
        self.put_raw(key, r#"{"not_found":true}"#.to_string(), NEGATIVE_TTL);
    }

    fn put_raw(&self, key: &str, value: String, ttl: Duration) {
        let store = self.store.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.put(&key, value, ttl).await {
                tracing::warn!(key = key, "cache write failed: {e}");
            }
        });
    }

    /// Waits for in-flight detached writes in tests.
    #[cfg(test)]
    pub async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A cached HTTP response, replayed verbatim with `X-Worker-Cache: true`.
#[derive(Clone, Debug)]
pub struct CachedResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Clone)]
struct EdgeEntry {
    response: CachedResponse,
    ttl: Duration,
}

struct EdgeExpiry;

impl Expiry<String, EdgeEntry> for EdgeExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &EdgeEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Whole-response cache keyed by the normalized request URL.
#[derive(Clone)]
pub struct EdgeCache {
    cache: moka::sync::Cache<String, EdgeEntry>,
}

impl EdgeCache {
    pub fn new() -> Self {
        Self {
            cache: moka::sync::Cache::builder()
                .max_capacity(50_000)
                .expire_after(EdgeExpiry)
                .build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        self.cache.get(key).map(|entry| entry.response)
    }

    /// Successful responses keep the long edge TTL; errors are kept just
    /// long enough to stop a retry stampede.
    pub fn put(&self, key: &str, status: u16, body: String) {
        let ttl = if status == 200 { EDGE_TTL } else { ERROR_EDGE_TTL };
        self.cache.insert(
            key.to_string(),
            EdgeEntry {
                response: CachedResponse { status, body },
                ttl,
            },
        );
    }
}

impl Default for EdgeCache {
    fn default() -> Self {
        Self::new()
    }
}
