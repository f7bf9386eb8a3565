//! Hytale lookups against the account-data service.
//!
//! Every call needs a game-session bearer from the pool manager. The
//! transport ladder is raw TLS, fetch, the container proxy (on a
//! different session where one is available), and finally the vendor API
//! with the session token riding in the query. A 401/403 anywhere
//! invalidates access and sessions, mints a fresh session, and retries
//! exactly once; every 429 is reported back to the manager so the
//! offending session cools down.

use super::{LookupOutcome, PipelineContext, record_cache, record_upstream, vendor_relay};
use crate::cache::{CacheLookup, store_ttl};
use crate::errors::ApiError;
use crate::ident::{HytaleQuery, Platform, cache_key, canonicalize_hytale, format_uuid};
use crate::profile::PlayerProfile;
use crate::transport::{RequestType, UpstreamResponse, proxy_get, raw_tls_get, triage};
use serde_json::{Value, json};
use url::Url;

const AVATAR_BASE: &str = "https://crafthead.net/hytale/avatar/";

pub async fn lookup(ctx: &PipelineContext, query: &str) -> Result<LookupOutcome, ApiError> {
    let canonical = canonicalize_hytale(query)?;
    let primary_key = cache_key(Platform::Hytale, "profile", query);

    if let CacheLookup::Hit(profile) = ctx.cache.get(&primary_key).await {
        record_cache(ctx, Platform::Hytale, true);
        return Ok(LookupOutcome::cached(profile));
    }
    record_cache(ctx, Platform::Hytale, false);

    let path = match &canonical {
        HytaleQuery::Username(name) => format!("profile/username/{name}"),
        HytaleQuery::Uuid(raw) => format!("profile/uuid/{raw}"),
    };
    let url = ctx.config.upstreams.hytale_data.join(&path).map_err(|e| {
        ApiError::internal("hytale.api_failure").with_data(json!({ "detail": e.to_string() }))
    })?;

    let session = ctx.tokens.get_session_token(false).await.map_err(ApiError::from)?;
    let mut response = attempt_chain(ctx, &url, &session).await;

    // One retry on credential rejection, with everything re-minted.
    if let Err(e) = &response {
        if e.is_auth_error() {
            tracing::warn!("hytale credentials rejected, re-minting and retrying once");
            if let Err(invalidate_err) = ctx.tokens.invalidate_tokens().await {
                tracing::warn!("token invalidation failed: {invalidate_err}");
            }
            let fresh = ctx.tokens.get_session_token(true).await.map_err(ApiError::from)?;
            response = attempt_chain(ctx, &url, &fresh).await;
        }
    }
    let response = response?;

    let profile = normalize(&response.json, &canonical)?;

    // Up to three keys: the original query, the UUID, the username.
    let ttl = store_ttl(Platform::Hytale);
    let mut keys = std::collections::BTreeSet::new();
    keys.insert(primary_key);
    if let Some(raw) = &profile.raw_id {
        keys.insert(cache_key(Platform::Hytale, "profile", raw));
    }
    if !profile.username.is_empty() {
        keys.insert(cache_key(Platform::Hytale, "profile", &profile.username));
    }
    for key in &keys {
        ctx.cache.put(key, &profile, ttl);
    }

    Ok(LookupOutcome::fresh(profile, response.request_type))
}

/// Raw TLS, then fetch, then the container proxy, then the vendor hatch.
/// Returns a triaged response; auth failures surface for the retry path.
async fn attempt_chain(
    ctx: &PipelineContext,
    url: &Url,
    session: &str,
) -> Result<UpstreamResponse, ApiError> {
    let bearer = [("Authorization", format!("Bearer {session}"))];

    if ctx.config.use_raw_sockets && url.scheme() == "https" {
        record_upstream(ctx, Platform::Hytale, RequestType::Tcp);
        match raw_tls_get(Platform::Hytale, url, &bearer).await {
            Ok(response) if response.status == 429 => {
                report_rate_limit(ctx, session).await;
            }
            Ok(response) if response.status >= 500 => {
                tracing::debug!(status = response.status, "raw socket got server error, trying fetch");
            }
            Ok(response) => return finish(ctx, response, session).await,
            Err(e) => tracing::debug!("raw socket failed, trying fetch: {e}"),
        }
    }

    record_upstream(ctx, Platform::Hytale, RequestType::Fetch);
    match ctx.fetch.get_json(Platform::Hytale, url.clone(), &bearer).await {
        Ok(response) if response.status == 429 => {
            report_rate_limit(ctx, session).await;
        }
        Ok(response) if response.status >= 500 => {
            tracing::debug!(status = response.status, "fetch got server error, trying container");
        }
        Ok(response) => return finish(ctx, response, session).await,
        Err(e) => tracing::debug!("fetch failed, trying container: {e}"),
    }

    // A different session where possible; the proxy's IP is clean but the
    // session may not be.
    let container_session = match ctx.tokens.get_session_token_for_container().await {
        Ok(token) => token,
        Err(e) => {
            tracing::debug!("no container session available, reusing current: {e}");
            session.to_string()
        }
    };
    let container_bearer = [(
        "Authorization",
        format!("Bearer {container_session}"),
    )];

    record_upstream(ctx, Platform::Hytale, RequestType::Container);
    match proxy_get(
        &ctx.http,
        &ctx.config.container_proxy_urls,
        url,
        &container_bearer,
        Platform::Hytale,
    )
    .await
    {
        Ok(response) if response.status == 429 => {
            report_rate_limit(ctx, &container_session).await;
        }
        Ok(response) if response.status >= 500 => {
            tracing::debug!(status = response.status, "container got server error, trying vendor");
        }
        Ok(response) => return finish(ctx, response, &container_session).await,
        Err(e) => tracing::debug!("container proxy failed, trying vendor: {e}"),
    }

    // Implementation hatch: the vendor issues the GET with the session
    // token handed over in the query.
    record_upstream(ctx, Platform::Hytale, RequestType::Fetch);
    let response = vendor_relay(
        ctx,
        Platform::Hytale,
        url,
        &[("sessionToken", container_session.as_str())],
    )
    .await?;
    finish(ctx, response, &container_session).await
}

async fn finish(
    ctx: &PipelineContext,
    response: UpstreamResponse,
    session: &str,
) -> Result<UpstreamResponse, ApiError> {
    if response.status == 429 {
        report_rate_limit(ctx, session).await;
    }
    triage(Platform::Hytale, &response)?;
    Ok(response)
}

async fn report_rate_limit(ctx: &PipelineContext, session: &str) {
    ctx.metrics.incr(
        crate::metrics_defs::UPSTREAM_RATE_LIMITED.name,
        Some(&[("platform", "hytale")]),
    );
    if let Err(e) = ctx.tokens.report_rate_limit(session).await {
        tracing::warn!("failed to report rate limit to pool: {e}");
    }
}

fn normalize(body: &Value, canonical: &HytaleQuery) -> Result<PlayerProfile, ApiError> {
    let raw_uuid = body
        .get("uuid")
        .and_then(Value::as_str)
        .map(|u| u.replace('-', "").to_ascii_lowercase())
        .or_else(|| match canonical {
            HytaleQuery::Uuid(raw) => Some(raw.clone()),
            HytaleQuery::Username(_) => None,
        })
        .ok_or_else(|| {
            ApiError::internal("hytale.api_failure")
                .with_data(json!({ "detail": "profile response had no uuid" }))
        })?;

    let username = body
        .get("username")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut profile = PlayerProfile::new(
        &format_uuid(&raw_uuid),
        username,
        &format!("{AVATAR_BASE}{raw_uuid}"),
    );
    profile.raw_id = Some(raw_uuid);

    // The skin arrives either inline or as a JSON string; both normalize
    // to a parsed document, anything else to null.
    profile.skin = Some(match body.get("skin") {
        Some(Value::String(encoded)) => {
            serde_json::from_str(encoded).unwrap_or(Value::Null)
        }
        Some(value) if value.is_object() || value.is_array() => value.clone(),
        _ => Value::Null,
    });

    if let Some(object) = body.as_object() {
        for (key, value) in object {
            if !matches!(key.as_str(), "uuid" | "username" | "skin") {
                profile.meta.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(profile)
}
