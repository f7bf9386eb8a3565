//! Persistent token state and its storage providers.
//!
//! The manager keeps all of its credentials in one `StoredTokens` blob
//! persisted under the stable name `tokens`. Storage is pluggable behind
//! the `TokenStore` trait so deployments can back it with whatever durable
//! KV they run on; the filesystem provider here is the default, and the
//! in-memory provider backs tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sessions closer than this to expiry are treated as already expired.
pub const SESSION_VALIDITY_MARGIN_MS: u64 = 5 * 60 * 1000;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("token blob serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One pooled game session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub session_token: String,
    pub identity_token: String,
    /// Epoch milliseconds.
    pub expires_at: u64,
    /// Epoch milliseconds; absent means the session is not cooling down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limited_until: Option<u64>,
}

impl SessionInfo {
    pub fn is_valid(&self, now_ms: u64) -> bool {
        self.expires_at > now_ms + SESSION_VALIDITY_MARGIN_MS
    }

    pub fn is_available(&self, now_ms: u64) -> bool {
        self.is_valid(now_ms) && self.rate_limited_until.is_none_or(|until| until <= now_ms)
    }
}

/// The single persisted credential record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Epoch ms of the last observed refresh-token rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_rotated_at: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at: Option<u64>,

    /// The caller's own profile, under which sessions are minted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_uuid: Option<String>,

    #[serde(default)]
    pub sessions: Vec<SessionInfo>,
    /// Round-robin cursor into `sessions`.
    #[serde(default)]
    pub next_session_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rate_limit_seen: Option<u64>,

    // Pre-pool records kept a single session in these flat fields. They are
    // lifted into `sessions` on first load and cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_token_expires_at: Option<u64>,
}

impl StoredTokens {
    /// Lifts a legacy single-session record into the pool. Returns true if
    /// a migration happened.
    pub fn migrate_legacy_session(&mut self, now_ms: u64) -> bool {
        if !self.sessions.is_empty() {
            return false;
        }
        let (session_token, identity_token) = match (self.session_token.take(), self.identity_token.take()) {
            (Some(s), Some(i)) => (s, i),
            (s, i) => {
                // Partial legacy records are dropped rather than pooled.
                self.session_token = s;
                self.identity_token = i;
                return false;
            }
        };

        let expires_at = self
            .identity_token_expires_at
            .take()
            .unwrap_or(now_ms + 60 * 60 * 1000);
        self.sessions.push(SessionInfo {
            session_token,
            identity_token,
            expires_at,
            rate_limited_until: None,
        });
        self.next_session_index = 0;
        true
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<StoredTokens>, StoreError>;
    async fn save(&self, tokens: &StoredTokens) -> Result<(), StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;
}

/// Filesystem-backed store; the blob lives at `<dir>/tokens.json`.
pub struct FsTokenStore {
    path: PathBuf,
}

impl FsTokenStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join("tokens.json"),
        }
    }
}

#[async_trait]
impl TokenStore for FsTokenStore {
    async fn load(&self) -> Result<Option<StoredTokens>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, tokens: &StoredTokens) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_string(tokens)?;
        tokio::fs::write(&self.path, data).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryTokenStore {
    blob: parking_lot::Mutex<Option<StoredTokens>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<StoredTokens>, StoreError> {
        Ok(self.blob.lock().clone())
    }

    async fn save(&self, tokens: &StoredTokens) -> Result<(), StoreError> {
        *self.blob.lock() = Some(tokens.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.blob.lock() = None;
        Ok(())
    }
}
