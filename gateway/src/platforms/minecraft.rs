//! Minecraft lookups against Mojang.
//!
//! Mojang rate limits per IP aggressively, so the chain here goes raw-TLS
//! socket first, then the regular fetch stack, then an off-box proxy host,
//! and finally the vendor API. Name lookups resolve to a UUID first; the
//! session server then returns the full profile with its signed textures.

use super::{LookupOutcome, PipelineContext, record_cache, record_upstream, vendor_relay};
use crate::cache::{CacheLookup, store_ttl};
use crate::errors::ApiError;
use crate::ident::{MinecraftQuery, Platform, cache_key, canonicalize_minecraft, format_uuid};
use crate::profile::{PlayerProfile, epoch_millis};
use crate::transport::{UpstreamResponse, raw_tls_get, triage};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use url::Url;

const AVATAR_BASE: &str = "https://crafthead.net/avatar/";
const NOT_FOUND_MARKER: &str = "Couldn't find any profile with name";

pub async fn lookup(ctx: &PipelineContext, query: &str) -> Result<LookupOutcome, ApiError> {
    let canonical = canonicalize_minecraft(query)?;
    let primary_key = match &canonical {
        MinecraftQuery::Uuid(raw) => cache_key(Platform::Minecraft, "profile", raw),
        MinecraftQuery::Name(name) => cache_key(Platform::Minecraft, "username", name),
    };

    if let CacheLookup::Hit(profile) = ctx.cache.get(&primary_key).await {
        record_cache(ctx, Platform::Minecraft, true);
        return Ok(LookupOutcome::cached(profile));
    }
    record_cache(ctx, Platform::Minecraft, false);

    let raw_uuid = match &canonical {
        MinecraftQuery::Uuid(raw) => raw.clone(),
        MinecraftQuery::Name(name) => resolve_name(ctx, name).await?,
    };

    let profile_url = ctx
        .config
        .upstreams
        .mojang_session
        .join(&format!("session/minecraft/profile/{raw_uuid}?unsigned=false"))
        .map_err(internal_url_error)?;
    let response = mojang_chain(ctx, &profile_url).await?;
    check_profile_missing(&response)?;
    triage(Platform::Minecraft, &response)?;

    let profile = normalize(&response.json, &raw_uuid);

    let ttl = store_ttl(Platform::Minecraft);
    ctx.cache.put(
        &cache_key(Platform::Minecraft, "username", &profile.username),
        &profile,
        ttl,
    );
    ctx.cache
        .put(&cache_key(Platform::Minecraft, "profile", &raw_uuid), &profile, ttl);

    Ok(LookupOutcome::fresh(profile, response.request_type))
}

/// Name to UUID via the profile-lookup endpoint. The `date` query defeats
/// stale intermediary caches for recently renamed accounts.
async fn resolve_name(ctx: &PipelineContext, name: &str) -> Result<String, ApiError> {
    let url = ctx
        .config
        .upstreams
        .mojang_api
        .join(&format!(
            "minecraft/profile/lookup/name/{name}?date={}",
            epoch_millis()
        ))
        .map_err(internal_url_error)?;

    let response = mojang_chain(ctx, &url).await?;
    check_profile_missing(&response)?;
    triage(Platform::Minecraft, &response)?;

    response
        .json
        .get("id")
        .and_then(Value::as_str)
        .map(|id| id.replace('-', "").to_ascii_lowercase())
        .ok_or_else(|| {
            ApiError::internal("minecraft.api_failure")
                .with_data(json!({ "detail": "lookup response had no id" }))
        })
}

/// A 204, or a 404 carrying Mojang's "no such profile" message, is a
/// definitive unknown name rather than an upstream failure.
fn check_profile_missing(response: &UpstreamResponse) -> Result<(), ApiError> {
    if response.status == 204 {
        return Err(ApiError::fail("minecraft.invalid_username"));
    }
    if response.status == 404 {
        let message = response
            .json
            .get("errorMessage")
            .or_else(|| response.json.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if message.contains(NOT_FOUND_MARKER) {
            return Err(ApiError::fail("minecraft.invalid_username"));
        }
    }
    Ok(())
}

/// The transport ladder: raw TLS, fetch, proxy-host rewrite on 429/403,
/// vendor API on a 429 from the proxy too.
async fn mojang_chain(ctx: &PipelineContext, url: &Url) -> Result<UpstreamResponse, ApiError> {
    if ctx.config.use_raw_sockets && url.scheme() == "https" {
        record_upstream(ctx, Platform::Minecraft, crate::transport::RequestType::Tcp);
        match raw_tls_get(Platform::Minecraft, url, &[]).await {
            // 204s and marker 404s are domain results; rate limiting and
            // server errors retry through the rest of the ladder.
            Ok(response)
                if response.status != 429
                    && response.status != 403
                    && response.status < 500 =>
            {
                return Ok(response);
            }
            Ok(response) => {
                tracing::debug!(status = response.status, "raw socket unusable, trying fetch");
            }
            Err(e) => {
                tracing::debug!("raw socket failed, trying fetch: {e}");
            }
        }
    }

    record_upstream(ctx, Platform::Minecraft, crate::transport::RequestType::Fetch);
    let response = ctx
        .fetch
        .get_json(Platform::Minecraft, url.clone(), &[])
        .await?;
    if response.status != 429 && response.status != 403 {
        return Ok(response);
    }
    ctx.metrics.incr(
        crate::metrics_defs::UPSTREAM_RATE_LIMITED.name,
        Some(&[("platform", "minecraft")]),
    );

    if let Some(proxy_base) = &ctx.config.upstreams.mojang_proxy {
        let rewritten = rewrite_host(url, proxy_base).map_err(internal_url_error)?;
        record_upstream(ctx, Platform::Minecraft, crate::transport::RequestType::Fetch);
        let proxied = ctx
            .fetch
            .get_json(Platform::Minecraft, rewritten, &[])
            .await?;
        if proxied.status != 429 {
            return Ok(proxied);
        }
    }

    vendor_relay(ctx, Platform::Minecraft, url, &[]).await
}

/// Same path and query, different origin.
fn rewrite_host(url: &Url, base: &Url) -> Result<Url, url::ParseError> {
    let mut rewritten = base.join(url.path())?;
    rewritten.set_query(url.query());
    Ok(rewritten)
}

fn internal_url_error(e: url::ParseError) -> ApiError {
    ApiError::internal("minecraft.api_failure").with_data(json!({ "detail": e.to_string() }))
}

fn normalize(profile_json: &Value, raw_uuid: &str) -> PlayerProfile {
    let username = profile_json
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut profile = PlayerProfile::new(
        &format_uuid(raw_uuid),
        username,
        &format!("{AVATAR_BASE}{raw_uuid}"),
    );
    profile.raw_id = Some(raw_uuid.to_string());
    profile.name_history = Some(Vec::new());

    let properties = profile_json
        .get("properties")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if let Some((skin, cape)) = extract_textures(&properties) {
        profile.skin_texture = skin;
        profile.cape_texture = cape;
    }
    profile.properties = Some(properties);
    profile
}

/// Decodes the base64 `textures` property and pulls out the skin and cape
/// URLs. The first `textures` entry wins.
fn extract_textures(properties: &[Value]) -> Option<(Option<String>, Option<String>)> {
    let encoded = properties.iter().find_map(|p| {
        if p.get("name").and_then(Value::as_str) == Some("textures") {
            p.get("value").and_then(Value::as_str)
        } else {
            None
        }
    })?;

    let decoded = BASE64.decode(encoded).ok()?;
    let document: Value = serde_json::from_slice(&decoded).ok()?;
    let textures = document.get("textures")?;

    let skin = textures
        .get("SKIN")
        .and_then(|t| t.get("url"))
        .and_then(Value::as_str)
        .map(String::from);
    let cape = textures
        .get("CAPE")
        .and_then(|t| t.get("url"))
        .and_then(Value::as_str)
        .map(String::from);
    Some((skin, cape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PlayerCache;
    use crate::testutils::test_context;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RAW: &str = "ef6134805b6244e4a4467fbe85d65513";
    const DASHED: &str = "ef613480-5b62-44e4-a446-7fbe85d65513";

    fn textures_value() -> String {
        let document = serde_json::json!({
            "timestamp": 1700000000000u64,
            "profileId": RAW,
            "profileName": "CherryJimbo",
            "textures": {
                "SKIN": { "url": "http://textures.minecraft.net/texture/abc123" },
                "CAPE": { "url": "http://textures.minecraft.net/texture/cape456" }
            }
        });
        BASE64.encode(serde_json::to_vec(&document).unwrap())
    }

    async fn mount_profile(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path(format!("/session/minecraft/profile/{RAW}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": RAW,
                "name": "CherryJimbo",
                "properties": [
                    { "name": "textures", "value": textures_value(), "signature": "sig" }
                ]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_lookup_by_name_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/minecraft/profile/lookup/name/CherryJimbo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": RAW,
                "name": "CherryJimbo"
            })))
            .mount(&server)
            .await;
        mount_profile(&server).await;

        let ctx = test_context(&server).await;
        let outcome = lookup(&ctx, "CherryJimbo").await.unwrap();

        let player = &outcome.profile;
        assert_eq!(player.id, DASHED);
        assert_eq!(player.raw_id.as_deref(), Some(RAW));
        assert_eq!(player.username, "CherryJimbo");
        assert_eq!(player.avatar, format!("https://crafthead.net/avatar/{RAW}"));
        assert_eq!(
            player.skin_texture.as_deref(),
            Some("http://textures.minecraft.net/texture/abc123")
        );
        assert_eq!(
            player.cape_texture.as_deref(),
            Some("http://textures.minecraft.net/texture/cape456")
        );
        assert_eq!(player.name_history.as_deref(), Some(&[][..]));
        let properties = player.properties.as_ref().unwrap();
        assert_eq!(properties[0]["name"], "textures");
        assert!(!outcome.cached);

        // The write fans out to both keys; a lookup by UUID now hits.
        PlayerCache::settle().await;
        let outcome = lookup(&ctx, DASHED).await.unwrap();
        assert!(outcome.cached);
        let outcome = lookup(&ctx, "cherryjimbo").await.unwrap();
        assert!(outcome.cached);
    }

    #[tokio::test]
    async fn test_invalid_username_rejected_before_upstream() {
        let server = MockServer::start().await;
        let ctx = test_context(&server).await;

        let err = lookup(&ctx, "cherryjimbo@example.com").await.unwrap_err();
        assert_eq!(err.code, "minecraft.invalid_username");
    }

    #[tokio::test]
    async fn test_unknown_name_404_with_marker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/minecraft/profile/lookup/name/.*$"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "path": "/minecraft/profile/lookup/name/ghost",
                "errorMessage": "Couldn't find any profile with name ghost"
            })))
            .mount(&server)
            .await;

        let ctx = test_context(&server).await;
        let err = lookup(&ctx, "ghost").await.unwrap_err();
        assert_eq!(err.code, "minecraft.invalid_username");
    }

    #[tokio::test]
    async fn test_unknown_name_204() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/minecraft/profile/lookup/name/.*$"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let ctx = test_context(&server).await;
        let err = lookup(&ctx, "ghost").await.unwrap_err();
        assert_eq!(err.code, "minecraft.invalid_username");
    }

    #[tokio::test]
    async fn test_proxy_host_fallback_on_rate_limit() {
        let server = MockServer::start().await;
        // Direct host always 429s the lookup...
        Mock::given(method("GET"))
            .and(path("/minecraft/profile/lookup/name/CherryJimbo"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        // ...the proxy host carries the same path and succeeds.
        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/minecraft/profile/lookup/name/CherryJimbo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": RAW,
                "name": "CherryJimbo"
            })))
            .mount(&proxy)
            .await;
        mount_profile(&server).await;

        let mut ctx = test_context(&server).await;
        let mut config = (*ctx.config).clone();
        config.upstreams.mojang_proxy = Some(Url::parse(&proxy.uri()).unwrap());
        ctx.config = std::sync::Arc::new(config);

        let outcome = lookup(&ctx, "CherryJimbo").await.unwrap();
        assert_eq!(outcome.profile.id, DASHED);
    }

    #[test]
    fn test_rewrite_host_keeps_path_and_query() {
        let url = Url::parse("https://api.minecraftservices.com/minecraft/profile/lookup/name/x?date=1").unwrap();
        let base = Url::parse("https://relay.example.com/").unwrap();
        let rewritten = rewrite_host(&url, &base).unwrap();
        assert_eq!(
            rewritten.as_str(),
            "https://relay.example.com/minecraft/profile/lookup/name/x?date=1"
        );
    }
}
