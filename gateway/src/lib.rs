//! Player-identity lookup gateway.
//!
//! One HTTP surface, four upstream identity services. The router
//! canonicalizes the identifier, consults the caches, and fans out to the
//! per-platform pipeline on a miss; the transports absorb upstream rate
//! limiting; the token pool keeps the Hytale credentials alive.

pub mod analytics;
pub mod cache;
pub mod config;
pub mod errors;
pub mod ident;
pub mod metrics_defs;
pub mod platforms;
pub mod profile;
pub mod rotation;
pub mod router;
pub mod steam_id;
pub mod transport;

#[cfg(test)]
mod testutils;

use crate::analytics::NoopSink;
use crate::cache::{EdgeCache, MemoryStore, PlayerCache};
use crate::config::Config;
use crate::platforms::PipelineContext;
use crate::router::{NoStaticSite, Router};
use crate::transport::FetchClient;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::Service;
use hyper::{Request, Response};
use shared::http::{Deadline, run_http_service};
use shared::metrics::Metrics;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokenpool::{AuthClient, FsTokenStore, TokenManager};

/// Everything for one request, fallback chains included, must fit under
/// this deadline.
const REQUEST_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("metrics setup error: {0}")]
    Metrics(String),
}

pub async fn run(config: Config) -> Result<(), GatewayError> {
    let metrics = match &config.statsd {
        Some((host, port)) => Metrics::new(host, *port, "playergateway")
            .map_err(|e| GatewayError::Metrics(e.to_string()))?,
        None => Metrics::new_noop(),
    };

    let auth = AuthClient::new(
        config.upstreams.hytale_oauth.clone(),
        config.upstreams.hytale_services.clone(),
    );
    let token_store = Arc::new(FsTokenStore::new(&config.token_store_dir));
    let tokens = TokenManager::new(token_store, auth, config.pool.clone());
    if !TokenManager::install(tokens.clone()) {
        tracing::debug!("token manager singleton was already installed");
    }
    rotation::spawn(tokens.clone(), metrics.clone());

    let listener = config.listener.clone();
    let ctx = PipelineContext {
        cache: PlayerCache::new(Arc::new(MemoryStore::new()), config.bypass_cache),
        config: Arc::new(config),
        fetch: FetchClient::new(),
        http: reqwest::Client::new(),
        metrics,
        tokens,
    };
    let service = GatewayService::new(Router::new(
        ctx,
        EdgeCache::new(),
        Arc::new(NoopSink),
        Arc::new(NoStaticSite),
    ));
    let service = Deadline::new(service, REQUEST_DEADLINE, router::deadline_response);

    tracing::info!(host = %listener.host, port = listener.port, "gateway listening");
    run_http_service(&listener.host, listener.port, service).await
}

pub struct GatewayService {
    router: Router,
}

impl GatewayService {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

impl<B> Service<Request<B>> for GatewayService
where
    B: Send + 'static,
{
    type Response = Response<Full<Bytes>>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let router = self.router.clone();
        // Lookups are all GETs; request bodies are dropped unread.
        let (parts, _body) = req.into_parts();
        Box::pin(async move {
            Ok(router
                .handle(&parts.method, &parts.uri, &parts.headers)
                .await)
        })
    }
}
