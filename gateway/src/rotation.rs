//! Scheduled token maintenance.
//!
//! A periodic tick asks the pool manager to rotate a near-end-of-life
//! refresh token and shrink an idle pool. No per-request work happens
//! here; requests never wait on this task.

use shared::metrics::Metrics;
use std::time::Duration;
use tokenpool::TokenManager;

const TICK_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub fn spawn(tokens: TokenManager, metrics: Metrics) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            tick(&tokens, &metrics).await;
        }
    })
}

async fn tick(tokens: &TokenManager, metrics: &Metrics) {
    if let Err(e) = tokens.proactive_refresh().await {
        tracing::warn!("proactive token refresh failed: {e}");
    }
    match tokens.snapshot().await {
        Ok(snapshot) => {
            metrics.gauge(
                crate::metrics_defs::SESSION_POOL_SIZE.name,
                snapshot.sessions.len() as u64,
            );
        }
        Err(e) => tracing::debug!("pool snapshot failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokenpool::{
        AuthClient, MemoryTokenStore, PoolConfig, SessionInfo, StoredTokens, TokenStore, now_ms,
    };
    use url::Url;

    #[tokio::test]
    async fn test_tick_shrinks_idle_pool_and_survives_errors() {
        let far_future = now_ms() + 24 * 60 * 60 * 1000;
        let session = |token: &str| SessionInfo {
            session_token: token.into(),
            identity_token: format!("id-{token}"),
            expires_at: far_future,
            rate_limited_until: None,
        };

        let store = Arc::new(MemoryTokenStore::new());
        store
            .save(&StoredTokens {
                sessions: vec![session("s1"), session("s2"), session("s3")],
                last_rate_limit_seen: Some(now_ms() - 11 * 60 * 1000),
                ..Default::default()
            })
            .await
            .unwrap();

        let base = Url::parse("http://127.0.0.1:9/").unwrap();
        let tokens = TokenManager::new(
            store,
            AuthClient::new(base.clone(), base),
            PoolConfig::default(),
        );

        tick(&tokens, &Metrics::new_noop()).await;
        assert_eq!(tokens.snapshot().await.unwrap().sessions.len(), 1);

        // A second tick with nothing to do is a no-op, not an error.
        tick(&tokens, &Metrics::new_noop()).await;
    }
}
