use crate::cache::{MemoryStore, PlayerCache};
use crate::config::{Config, Listener, Upstreams};
use crate::platforms::PipelineContext;
use crate::transport::FetchClient;
use shared::metrics::Metrics;
use std::sync::Arc;
use tokenpool::{AuthClient, MemoryTokenStore, PoolConfig, SessionInfo, StoredTokens, TokenManager, TokenStore};
use url::Url;
use wiremock::MockServer;

/// A pipeline context with every upstream pointed at `server`. Mock URLs
/// are plain http, so the raw-socket rung of each transport ladder is
/// skipped and tests drive the fetch paths.
pub(crate) async fn test_context(server: &MockServer) -> PipelineContext {
    test_context_with_sessions(server, &[]).await
}

/// Same, with pre-minted Hytale sessions already in the pool.
pub(crate) async fn test_context_with_sessions(
    server: &MockServer,
    sessions: &[&str],
) -> PipelineContext {
    let base = Url::parse(&format!("{}/", server.uri())).expect("mock server uri");

    let upstreams = Upstreams {
        mojang_api: base.clone(),
        mojang_session: base.clone(),
        mojang_proxy: None,
        steam_api: base.clone(),
        xbox_api: base.clone(),
        hytale_data: base.clone(),
        hytale_oauth: base.clone(),
        hytale_services: base.clone(),
        vendor_api: base.clone(),
    };

    let pool = PoolConfig {
        min_pool: 1,
        max_pool: 10,
        refresh_token: Some("rt-test".into()),
        profile_uuid: Some("profile-test".into()),
    };

    let config = Config {
        listener: Listener {
            host: "127.0.0.1".into(),
            port: 0,
        },
        xbox_api_key: Some("xbox-key".into()),
        steam_api_keys: vec!["steam-key".into()],
        nodecraft_api_key: Some("vendor-key".into()),
        bypass_cache: false,
        use_raw_sockets: true,
        container_proxy_urls: Vec::new(),
        statsd: None,
        upstreams,
        pool: pool.clone(),
        token_store_dir: std::env::temp_dir(),
    };

    let token_store = Arc::new(MemoryTokenStore::new());
    if !sessions.is_empty() {
        let far_future = tokenpool::now_ms() + 24 * 60 * 60 * 1000;
        let seeded = StoredTokens {
            sessions: sessions
                .iter()
                .map(|token| SessionInfo {
                    session_token: token.to_string(),
                    identity_token: format!("id-{token}"),
                    expires_at: far_future,
                    rate_limited_until: None,
                })
                .collect(),
            ..Default::default()
        };
        token_store.save(&seeded).await.expect("seed token store");
    }

    let auth = AuthClient::new(base.clone(), base);
    let tokens = TokenManager::new(token_store, auth, pool);

    PipelineContext {
        config: Arc::new(config),
        cache: PlayerCache::new(Arc::new(MemoryStore::new()), false),
        fetch: FetchClient::new(),
        http: reqwest::Client::new(),
        metrics: Metrics::new_noop(),
        tokens,
    }
}
