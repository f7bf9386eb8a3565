//! Per-platform lookup pipelines.
//!
//! Every pipeline follows the same spine: canonicalize the identifier,
//! consult the persistent cache, run the platform's upstream sequence on a
//! miss, normalize into a [`PlayerProfile`], and write the result back
//! under every key a future lookup might arrive by.

pub mod hytale;
pub mod minecraft;
pub mod steam;
pub mod xbox;

use crate::cache::PlayerCache;
use crate::config::Config;
use crate::errors::ApiError;
use crate::ident::Platform;
use crate::profile::PlayerProfile;
use crate::transport::{FetchClient, RequestType, UpstreamResponse};
use serde_json::json;
use shared::metrics::Metrics;
use std::sync::Arc;
use url::Url;

/// Everything a pipeline needs, wired once at startup.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub cache: PlayerCache,
    pub fetch: FetchClient,
    pub http: reqwest::Client,
    pub metrics: Metrics,
    pub tokens: tokenpool::TokenManager,
}

/// A finished lookup plus how it was satisfied, for analytics.
#[derive(Debug)]
pub struct LookupOutcome {
    pub profile: PlayerProfile,
    pub cached: bool,
    pub request_type: Option<RequestType>,
}

impl LookupOutcome {
    pub fn cached(profile: PlayerProfile) -> Self {
        Self {
            profile,
            cached: true,
            request_type: None,
        }
    }

    pub fn fresh(profile: PlayerProfile, request_type: RequestType) -> Self {
        Self {
            profile,
            cached: false,
            request_type: Some(request_type),
        }
    }
}

pub async fn lookup(
    ctx: &PipelineContext,
    platform: Platform,
    query: &str,
) -> Result<LookupOutcome, ApiError> {
    match platform {
        Platform::Minecraft => minecraft::lookup(ctx, query).await,
        Platform::Steam => steam::lookup(ctx, query).await,
        Platform::Xbox => xbox::lookup(ctx, query).await,
        Platform::Hytale => hytale::lookup(ctx, query).await,
    }
}

/// Last-resort relay through the vendor API: the vendor fetches `target`
/// on our behalf, authenticated by `NODECRAFT_API_KEY`. Extra query pairs
/// ride along (the Hytale path smuggles its session token this way).
pub(crate) async fn vendor_relay(
    ctx: &PipelineContext,
    platform: Platform,
    target: &Url,
    extra_query: &[(&str, &str)],
) -> Result<UpstreamResponse, ApiError> {
    let api_key = ctx.config.nodecraft_api_key.as_ref().ok_or_else(|| {
        ApiError::internal(&platform.code("api_failure"))
            .with_data(json!({ "detail": "vendor API key not configured" }))
    })?;

    let mut url = ctx
        .config
        .upstreams
        .vendor_api
        .join("proxy")
        .map_err(|e| {
            ApiError::internal(&platform.code("api_failure"))
                .with_data(json!({ "detail": e.to_string() }))
        })?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("url", target.as_str());
        for (name, value) in extra_query {
            pairs.append_pair(name, value);
        }
    }

    ctx.fetch
        .get_json(platform, url, &[("x-api-key", api_key.clone())])
        .await
}

pub(crate) fn record_upstream(ctx: &PipelineContext, platform: Platform, transport: RequestType) {
    ctx.metrics.incr(
        crate::metrics_defs::UPSTREAM_REQUESTS.name,
        Some(&[
            ("platform", platform.as_str()),
            ("transport", transport.as_str()),
        ]),
    );
}

pub(crate) fn record_cache(ctx: &PipelineContext, platform: Platform, hit: bool) {
    let def = if hit {
        crate::metrics_defs::CACHE_HIT
    } else {
        crate::metrics_defs::CACHE_MISS
    };
    ctx.metrics.incr(
        def.name,
        Some(&[("platform", platform.as_str()), ("layer", "kv")]),
    );
}
