//! OAuth token and game-session pool manager for the Hytale upstream.
//!
//! The profile service rate limits aggressively per session, so the
//! gateway keeps a small pool of game sessions and spreads lookups across
//! them. This crate owns every credential involved: the long-lived refresh
//! token (rotated opportunistically when the provider hands back a new
//! one), the short-lived OAuth access token, and the pooled sessions with
//! their round-robin cursor and rate-limit cool-downs.
//!
//! One manager exists per process. All mutation is serialized through a
//! single critical section; still-fresh access tokens are readable through
//! a lock-free snapshot that is re-checked once inside the section. State
//! is persisted through the pluggable [`TokenStore`] before the section is
//! released, so a crash never loses an observed rotation.

pub mod auth_client;
pub mod errors;
pub mod store;

pub use auth_client::AuthClient;
pub use errors::TokenPoolError;
pub use store::{FsTokenStore, MemoryTokenStore, SessionInfo, StoredTokens, TokenStore};

use auth_client::MintedSession;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

/// Access tokens closer than this to expiry are refreshed.
const ACCESS_VALIDITY_MARGIN_MS: u64 = 5 * 60 * 1000;
/// How long a 429-tagged session sits out.
const RATE_LIMIT_COOLDOWN_MS: u64 = 60 * 1000;
/// Quiet period with no 429 before the pool shrinks back to min.
const SHRINK_QUIET_PERIOD_MS: u64 = 10 * 60 * 1000;
/// Refresh tokens older than this are rotated by the scheduled tick.
const REFRESH_ROTATION_AGE_MS: u64 = 23 * 24 * 60 * 60 * 1000;
/// Assumed session lifetime when the provider omits an expiry.
const DEFAULT_SESSION_TTL_MS: u64 = 60 * 60 * 1000;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Error, Debug)]
pub enum PoolConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidBound { var: &'static str, value: String },

    #[error("session pool min ({min}) exceeds max ({max})")]
    MinExceedsMax { min: usize, max: usize },
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_pool: usize,
    pub max_pool: usize,
    /// Env-configured fallback used when no refresh token is stored.
    pub refresh_token: Option<String>,
    /// Env-configured profile; skips the get-profiles call entirely.
    pub profile_uuid: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool: 1,
            max_pool: 10,
            refresh_token: None,
            profile_uuid: None,
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Result<Self, PoolConfigError> {
        let min_pool = read_bound("HYTALE_SESSION_POOL_MIN", 1)?;
        let max_pool = read_bound("HYTALE_SESSION_POOL_MAX", 10)?;
        if min_pool > max_pool {
            return Err(PoolConfigError::MinExceedsMax {
                min: min_pool,
                max: max_pool,
            });
        }
        Ok(Self {
            min_pool,
            max_pool,
            refresh_token: env_non_empty("HYTALE_REFRESH_TOKEN"),
            profile_uuid: env_non_empty("HYTALE_PROFILE_UUID"),
        })
    }
}

fn read_bound(var: &'static str, default: usize) -> Result<usize, PoolConfigError> {
    match std::env::var(var) {
        Ok(value) => match value.trim().parse::<usize>() {
            Ok(n) if n >= 1 => Ok(n),
            _ => Err(PoolConfigError::InvalidBound { var, value }),
        },
        Err(_) => Ok(default),
    }
}

fn env_non_empty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

struct PoolState {
    loaded: bool,
    tokens: StoredTokens,
}

struct Inner {
    store: Arc<dyn TokenStore>,
    auth: AuthClient,
    config: PoolConfig,
    /// The critical section. Exactly one refresh, mint, expansion, or
    /// shrink is in flight at a time.
    state: Mutex<PoolState>,
    /// Lock-free fast path for still-fresh access tokens: (token, expiry).
    access_snapshot: RwLock<Option<(String, u64)>>,
}

/// Cloneable handle to the process-wide manager.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

static GLOBAL_MANAGER: OnceCell<TokenManager> = OnceCell::new();

impl TokenManager {
    pub fn new(store: Arc<dyn TokenStore>, auth: AuthClient, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                auth,
                config,
                state: Mutex::new(PoolState {
                    loaded: false,
                    tokens: StoredTokens::default(),
                }),
                access_snapshot: RwLock::new(None),
            }),
        }
    }

    /// Registers `manager` as the process singleton. Returns false if one
    /// is already installed.
    pub fn install(manager: TokenManager) -> bool {
        GLOBAL_MANAGER.set(manager).is_ok()
    }

    pub fn global() -> Option<TokenManager> {
        GLOBAL_MANAGER.get().cloned()
    }

    /// Returns the next session token by round-robin, growing the pool to
    /// its minimum first. `force` skips reuse and mints a brand-new
    /// session, replacing the cursor slot when the pool is already full.
    pub async fn get_session_token(&self, force: bool) -> Result<String, TokenPoolError> {
        let mut guard = self.lock_state().await?;
        self.ensure_min_pool(&mut guard.tokens).await?;

        if force {
            let token = self.mint_forced(&mut guard.tokens).await?;
            self.persist(&guard.tokens).await?;
            return Ok(token);
        }

        let now = now_ms();
        if let Some(token) = select_available(&mut guard.tokens, now) {
            self.persist(&guard.tokens).await?;
            return Ok(token);
        }

        // Everything is cooling down; grow if we still can.
        match self.expand(&mut guard.tokens).await {
            Ok(Some(session)) => {
                // The fresh session went in at the tail; wrap the cursor
                // past it.
                guard.tokens.next_session_index = 0;
                self.persist(&guard.tokens).await?;
                Ok(session.session_token)
            }
            Ok(None) => Err(TokenPoolError::AllSessionsRateLimited),
            Err(e) if e.is_auth_error() => Err(e),
            Err(e) => {
                tracing::warn!("pool expansion failed while rate limited: {e}");
                Err(TokenPoolError::AllSessionsRateLimited)
            }
        }
    }

    /// Picks a session for the container proxy: any valid session that is
    /// not cooling down, else the one whose cool-down stamp is oldest.
    pub async fn get_session_token_for_container(&self) -> Result<String, TokenPoolError> {
        let mut guard = self.lock_state().await?;
        self.ensure_min_pool(&mut guard.tokens).await?;
        self.persist(&guard.tokens).await?;

        let now = now_ms();
        let tokens = &guard.tokens;
        if let Some(s) = tokens.sessions.iter().find(|s| s.is_available(now)) {
            return Ok(s.session_token.clone());
        }
        tokens
            .sessions
            .iter()
            .filter(|s| s.is_valid(now))
            .min_by_key(|s| s.rate_limited_until.unwrap_or(0))
            .map(|s| s.session_token.clone())
            .ok_or(TokenPoolError::AllSessionsRateLimited)
    }

    /// Stamps the matching session with a cool-down and opportunistically
    /// grows the pool so the next caller has somewhere to go.
    pub async fn report_rate_limit(&self, session_token: &str) -> Result<(), TokenPoolError> {
        let mut guard = self.lock_state().await?;
        let now = now_ms();

        if let Some(s) = guard
            .tokens
            .sessions
            .iter_mut()
            .find(|s| s.session_token == session_token)
        {
            s.rate_limited_until = Some(now + RATE_LIMIT_COOLDOWN_MS);
        }
        guard.tokens.last_rate_limit_seen = Some(now);

        if let Err(e) = self.expand(&mut guard.tokens).await {
            tracing::debug!("opportunistic expansion after 429 failed: {e}");
        }

        self.persist(&guard.tokens).await
    }

    /// Clears the access token and the whole session pool, keeping the
    /// refresh token so the next request can recover.
    pub async fn invalidate_tokens(&self) -> Result<(), TokenPoolError> {
        let mut guard = self.lock_state().await?;
        guard.tokens.access_token = None;
        guard.tokens.access_token_expires_at = None;
        guard.tokens.sessions.clear();
        guard.tokens.next_session_index = 0;
        *self.inner.access_snapshot.write() = None;
        self.persist(&guard.tokens).await
    }

    /// Wipes persisted state entirely.
    pub async fn reset_all_tokens(&self) -> Result<(), TokenPoolError> {
        let mut guard = self.inner.state.lock().await;
        guard.tokens = StoredTokens::default();
        guard.loaded = true;
        *self.inner.access_snapshot.write() = None;
        self.inner.store.clear().await?;
        Ok(())
    }

    /// Scheduled maintenance: rotates a near-end-of-life refresh token and
    /// shrinks an idle pool back to its minimum.
    pub async fn proactive_refresh(&self) -> Result<(), TokenPoolError> {
        let mut guard = self.lock_state().await?;
        let now = now_ms();

        let rotation_due = match (
            guard.tokens.refresh_token.as_ref(),
            guard.tokens.refresh_token_rotated_at,
        ) {
            (None, _) => false,
            (Some(_), Some(at)) => now.saturating_sub(at) >= REFRESH_ROTATION_AGE_MS,
            // Age unknown; rotate now so the next tick has a stamp.
            (Some(_), None) => true,
        };

        let mut rotation_result = Ok(());
        if rotation_due {
            rotation_result = self
                .refresh_access_locked(&mut guard.tokens)
                .await
                .map(|_| ());
        }

        let quiet = guard
            .tokens
            .last_rate_limit_seen
            .is_none_or(|at| now.saturating_sub(at) >= SHRINK_QUIET_PERIOD_MS);
        let min = self.inner.config.min_pool;
        if quiet && guard.tokens.sessions.len() > min {
            guard.tokens.sessions.retain(|s| s.is_valid(now));
            guard.tokens.sessions.truncate(min);
            guard.tokens.next_session_index = 0;
        }

        self.persist(&guard.tokens).await?;
        rotation_result
    }

    /// Returns a still-fresh access token without entering the critical
    /// section when possible.
    pub async fn access_token(&self) -> Result<String, TokenPoolError> {
        if let Some((token, expires_at)) = self.inner.access_snapshot.read().clone() {
            if now_ms() + ACCESS_VALIDITY_MARGIN_MS < expires_at {
                return Ok(token);
            }
        }

        let mut guard = self.lock_state().await?;
        self.ensure_access_token(&mut guard.tokens).await
    }

    /// Read-only copy of the persisted state, for operational inspection.
    pub async fn snapshot(&self) -> Result<StoredTokens, TokenPoolError> {
        let guard = self.lock_state().await?;
        Ok(guard.tokens.clone())
    }

    async fn lock_state(&self) -> Result<MutexGuard<'_, PoolState>, TokenPoolError> {
        let mut guard = self.inner.state.lock().await;
        if !guard.loaded {
            let mut tokens = self.inner.store.load().await?.unwrap_or_default();
            if tokens.migrate_legacy_session(now_ms()) {
                tracing::info!("migrated legacy single-session record into the pool");
                self.inner.store.save(&tokens).await?;
            }
            guard.tokens = tokens;
            guard.loaded = true;
        }
        Ok(guard)
    }

    async fn persist(&self, tokens: &StoredTokens) -> Result<(), TokenPoolError> {
        self.inner.store.save(tokens).await?;
        Ok(())
    }

    /// Returns a usable access token, refreshing inside the critical
    /// section if the cached one is stale. Callers hold the state lock.
    async fn ensure_access_token(
        &self,
        tokens: &mut StoredTokens,
    ) -> Result<String, TokenPoolError> {
        let now = now_ms();
        if let (Some(token), Some(expires_at)) =
            (tokens.access_token.as_ref(), tokens.access_token_expires_at)
        {
            if now + ACCESS_VALIDITY_MARGIN_MS < expires_at {
                return Ok(token.clone());
            }
        }
        self.refresh_access_locked(tokens).await
    }

    async fn refresh_access_locked(
        &self,
        tokens: &mut StoredTokens,
    ) -> Result<String, TokenPoolError> {
        let using_stored = tokens.refresh_token.is_some();
        let refresh_token = tokens
            .refresh_token
            .clone()
            .or_else(|| self.inner.config.refresh_token.clone())
            .ok_or(TokenPoolError::NoRefreshToken)?;

        match self.inner.auth.refresh_access_token(&refresh_token).await {
            Ok(refreshed) => {
                let now = now_ms();
                let expires_at = now + refreshed.expires_in.saturating_mul(1000);
                tokens.access_token = Some(refreshed.access_token.clone());
                tokens.access_token_expires_at = Some(expires_at);

                if let Some(rotated) = refreshed.refresh_token {
                    if rotated != refresh_token {
                        tracing::info!("refresh token rotated by provider");
                        tokens.refresh_token = Some(rotated);
                        tokens.refresh_token_rotated_at = Some(now);
                    }
                }

                *self.inner.access_snapshot.write() =
                    Some((refreshed.access_token.clone(), expires_at));
                self.persist(tokens).await?;
                Ok(refreshed.access_token)
            }
            Err(e) => {
                if using_stored {
                    // The stored token is bad; fall back to the configured
                    // one on the next attempt.
                    tokens.refresh_token = None;
                    if let Err(save_err) = self.persist(tokens).await {
                        tracing::warn!("failed to persist cleared refresh token: {save_err}");
                    }
                }
                Err(e)
            }
        }
    }

    async fn ensure_profile_uuid(
        &self,
        tokens: &mut StoredTokens,
        access_token: &str,
    ) -> Result<String, TokenPoolError> {
        if let Some(uuid) = &self.inner.config.profile_uuid {
            return Ok(uuid.clone());
        }
        if let Some(uuid) = &tokens.profile_uuid {
            return Ok(uuid.clone());
        }

        let profiles = self.inner.auth.fetch_profiles(access_token).await?;
        let first = profiles
            .into_iter()
            .next()
            .ok_or(TokenPoolError::NoProfiles)?;
        tokens.profile_uuid = Some(first.uuid.clone());
        self.persist(tokens).await?;
        Ok(first.uuid)
    }

    async fn mint_session(
        &self,
        tokens: &mut StoredTokens,
    ) -> Result<SessionInfo, TokenPoolError> {
        let access_token = self.ensure_access_token(tokens).await?;
        let profile_uuid = self.ensure_profile_uuid(tokens, &access_token).await?;
        let minted = self
            .inner
            .auth
            .create_session(&access_token, &profile_uuid)
            .await?;
        session_from_minted(minted).ok_or(TokenPoolError::SessionCreationFailed)
    }

    /// Refreshes what it can, mints what it must, and leaves the pool at
    /// or above its minimum. Fails only when the pool would end up empty.
    async fn ensure_min_pool(&self, tokens: &mut StoredTokens) -> Result<(), TokenPoolError> {
        let now = now_ms();
        let min = self.inner.config.min_pool;

        let drained: Vec<SessionInfo> = tokens.sessions.drain(..).collect();
        let (mut valid, expired): (Vec<_>, Vec<_>) =
            drained.into_iter().partition(|s| s.is_valid(now));

        for stale in expired {
            if valid.len() >= min {
                break;
            }
            match self.inner.auth.refresh_session(&stale.session_token).await {
                Ok(minted) => {
                    if let Some(session) = session_from_minted(minted) {
                        valid.push(session);
                    }
                }
                Err(e) => {
                    tracing::debug!("dropping unrefreshable session: {e}");
                }
            }
        }

        let mut creation_error = None;
        while valid.len() < min {
            match self.mint_session(tokens).await {
                Ok(session) => valid.push(session),
                Err(e) => {
                    creation_error = Some(e);
                    break;
                }
            }
        }

        tokens.sessions = valid;
        if tokens.next_session_index >= tokens.sessions.len() {
            tokens.next_session_index = 0;
        }

        if tokens.sessions.is_empty() {
            let err = creation_error.unwrap_or(TokenPoolError::SessionCreationFailed);
            self.persist(tokens).await?;
            return Err(err);
        }
        self.persist(tokens).await?;
        Ok(())
    }

    /// Appends one freshly minted session if the pool has room.
    async fn expand(
        &self,
        tokens: &mut StoredTokens,
    ) -> Result<Option<SessionInfo>, TokenPoolError> {
        if tokens.sessions.len() >= self.inner.config.max_pool {
            return Ok(None);
        }
        let session = self.mint_session(tokens).await?;
        tokens.sessions.push(session.clone());
        Ok(Some(session))
    }

    async fn mint_forced(&self, tokens: &mut StoredTokens) -> Result<String, TokenPoolError> {
        if let Some(session) = self.expand(tokens).await? {
            tokens.next_session_index = 0;
            return Ok(session.session_token);
        }

        // At capacity: replace the cursor slot.
        let session = self.mint_session(tokens).await?;
        let len = tokens.sessions.len();
        if len == 0 {
            tokens.sessions.push(session.clone());
            tokens.next_session_index = 0;
        } else {
            let idx = tokens.next_session_index % len;
            tokens.sessions[idx] = session.clone();
            tokens.next_session_index = (idx + 1) % len;
        }
        Ok(session.session_token)
    }
}

fn session_from_minted(minted: MintedSession) -> Option<SessionInfo> {
    let session_token = minted.session_token?;
    let identity_token = minted.identity_token?;
    Some(SessionInfo {
        session_token,
        identity_token,
        expires_at: minted
            .expires_at
            .unwrap_or_else(|| now_ms() + DEFAULT_SESSION_TTL_MS),
        rate_limited_until: None,
    })
}

/// Scans from the cursor for the first available session and advances the
/// cursor past it.
fn select_available(tokens: &mut StoredTokens, now: u64) -> Option<String> {
    let len = tokens.sessions.len();
    if len == 0 {
        return None;
    }
    for offset in 0..len {
        let idx = (tokens.next_session_index + offset) % len;
        if tokens.sessions[idx].is_available(now) {
            tokens.next_session_index = (idx + 1) % len;
            return Some(tokens.sessions[idx].session_token.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn auth_for(server: &MockServer) -> AuthClient {
        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        AuthClient::new(base.clone(), base)
    }

    fn offline_auth() -> AuthClient {
        // Points at a closed port; tests that never touch HTTP use this.
        let base = Url::parse("http://127.0.0.1:9/").unwrap();
        AuthClient::new(base.clone(), base)
    }

    fn session(token: &str, expires_at: u64) -> SessionInfo {
        SessionInfo {
            session_token: token.to_string(),
            identity_token: format!("id-{token}"),
            expires_at,
            rate_limited_until: None,
        }
    }

    async fn seeded_manager(
        auth: AuthClient,
        config: PoolConfig,
        tokens: StoredTokens,
    ) -> TokenManager {
        let store = Arc::new(MemoryTokenStore::new());
        store.save(&tokens).await.unwrap();
        TokenManager::new(store, auth, config)
    }

    fn far_future() -> u64 {
        now_ms() + 24 * 60 * 60 * 1000
    }

    #[tokio::test]
    async fn test_round_robin_in_cursor_order() {
        let tokens = StoredTokens {
            sessions: vec![
                session("s1", far_future()),
                session("s2", far_future()),
                session("s3", far_future()),
            ],
            ..Default::default()
        };
        let manager = seeded_manager(offline_auth(), PoolConfig::default(), tokens).await;

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(manager.get_session_token(false).await.unwrap());
        }
        assert_eq!(seen, vec!["s1", "s2", "s3", "s1"]);
    }

    #[tokio::test]
    async fn test_rate_limited_session_is_skipped() {
        let tokens = StoredTokens {
            sessions: vec![session("s1", far_future()), session("s2", far_future())],
            ..Default::default()
        };
        let config = PoolConfig {
            max_pool: 2,
            ..Default::default()
        };
        let manager = seeded_manager(offline_auth(), config, tokens).await;

        manager.report_rate_limit("s1").await.unwrap();

        let snapshot = manager.snapshot().await.unwrap();
        let s1 = &snapshot.sessions[0];
        assert!(s1.rate_limited_until.unwrap() > now_ms());
        assert!(snapshot.last_rate_limit_seen.is_some());

        // Both selections land on the healthy session.
        assert_eq!(manager.get_session_token(false).await.unwrap(), "s2");
        assert_eq!(manager.get_session_token(false).await.unwrap(), "s2");
    }

    #[tokio::test]
    async fn test_ensure_min_pool_mints_to_minimum() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/game-session/new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sessionToken": "st-a",
                "identityToken": "it-a"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/game-session/new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sessionToken": "st-b",
                "identityToken": "it-b"
            })))
            .mount(&server)
            .await;

        let config = PoolConfig {
            min_pool: 2,
            refresh_token: Some("rt-env".into()),
            profile_uuid: Some("profile-1".into()),
            ..Default::default()
        };
        let manager = seeded_manager(auth_for(&server), config, StoredTokens::default()).await;

        let first = manager.get_session_token(false).await.unwrap();
        assert_eq!(first, "st-a");

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.sessions.len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_preserves_refresh_token() {
        let tokens = StoredTokens {
            refresh_token: Some("rt-1".into()),
            access_token: Some("at-1".into()),
            access_token_expires_at: Some(far_future()),
            sessions: vec![session("s1", far_future())],
            ..Default::default()
        };
        let manager = seeded_manager(offline_auth(), PoolConfig::default(), tokens).await;

        manager.invalidate_tokens().await.unwrap();

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.refresh_token.as_deref(), Some("rt-1"));
        assert!(snapshot.access_token.is_none());
        assert!(snapshot.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_stored_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let tokens = StoredTokens {
            refresh_token: Some("rt-stale".into()),
            ..Default::default()
        };
        let manager = seeded_manager(auth_for(&server), PoolConfig::default(), tokens).await;

        let err = manager.access_token().await.unwrap_err();
        assert!(err.is_auth_error());

        // The stored token was dropped so the next attempt can fall back
        // to the env-configured one.
        let snapshot = manager.snapshot().await.unwrap();
        assert!(snapshot.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_refresh_token_rotation_observed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "expires_in": 3600,
                "refresh_token": "rt-rotated"
            })))
            .mount(&server)
            .await;

        let tokens = StoredTokens {
            refresh_token: Some("rt-old".into()),
            ..Default::default()
        };
        let manager = seeded_manager(auth_for(&server), PoolConfig::default(), tokens).await;

        manager.access_token().await.unwrap();

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.refresh_token.as_deref(), Some("rt-rotated"));
        assert!(snapshot.refresh_token_rotated_at.is_some());
    }

    #[tokio::test]
    async fn test_access_refresh_is_single_flight() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(std::time::Duration::from_millis(100))
                    .set_body_json(serde_json::json!({
                        "access_token": "at-1",
                        "expires_in": 3600
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tokens = StoredTokens {
            refresh_token: Some("rt-1".into()),
            ..Default::default()
        };
        let manager = seeded_manager(auth_for(&server), PoolConfig::default(), tokens).await;

        let (a, b) = tokio::join!(manager.access_token(), manager.access_token());
        assert_eq!(a.unwrap(), "at-1");
        assert_eq!(b.unwrap(), "at-1");
        // MockServer verifies expect(1) on drop: one upstream POST total.
    }

    #[tokio::test]
    async fn test_proactive_refresh_shrinks_idle_pool() {
        let tokens = StoredTokens {
            sessions: vec![
                session("s1", far_future()),
                session("s2", far_future()),
                session("s3", far_future()),
                session("s4", far_future()),
            ],
            next_session_index: 3,
            last_rate_limit_seen: Some(now_ms() - SHRINK_QUIET_PERIOD_MS - 1),
            ..Default::default()
        };
        let config = PoolConfig {
            min_pool: 2,
            ..Default::default()
        };
        let manager = seeded_manager(offline_auth(), config, tokens).await;

        manager.proactive_refresh().await.unwrap();

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.sessions.len(), 2);
        assert_eq!(snapshot.next_session_index, 0);
    }

    #[tokio::test]
    async fn test_recent_rate_limit_blocks_shrink() {
        let tokens = StoredTokens {
            sessions: vec![
                session("s1", far_future()),
                session("s2", far_future()),
                session("s3", far_future()),
            ],
            last_rate_limit_seen: Some(now_ms()),
            ..Default::default()
        };
        let manager = seeded_manager(offline_auth(), PoolConfig::default(), tokens).await;

        manager.proactive_refresh().await.unwrap();
        assert_eq!(manager.snapshot().await.unwrap().sessions.len(), 3);
    }

    #[tokio::test]
    async fn test_container_token_prefers_available_else_oldest_cooldown() {
        let now = now_ms();
        let mut s1 = session("s1", far_future());
        let mut s2 = session("s2", far_future());
        s1.rate_limited_until = Some(now + 50_000);
        s2.rate_limited_until = Some(now + 10_000);

        let tokens = StoredTokens {
            sessions: vec![s1, s2],
            ..Default::default()
        };
        let manager = seeded_manager(offline_auth(), PoolConfig::default(), tokens).await;

        // All cooling down: the one whose stamp is oldest wins.
        assert_eq!(
            manager.get_session_token_for_container().await.unwrap(),
            "s2"
        );
    }

    #[tokio::test]
    async fn test_pool_config_bounds() {
        let config = PoolConfig::default();
        assert_eq!(config.min_pool, 1);
        assert_eq!(config.max_pool, 10);
    }
}
