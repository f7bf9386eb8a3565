//! Steam lookups via the Web API.
//!
//! Identifiers arrive in any of the SteamID spellings or as a vanity
//! name; vanity names get one resolution attempt whose failure is
//! swallowed (the SteamID constructor is the real gate). Up to four API
//! keys are configured and one is drawn at random per call, which spreads
//! load across per-key quotas.

use super::{LookupOutcome, PipelineContext, record_cache, record_upstream};
use crate::cache::{CacheLookup, store_ttl};
use crate::errors::ApiError;
use crate::ident::{Platform, cache_key};
use crate::profile::PlayerProfile;
use crate::steam_id::{SteamId, looks_like_steam_id};
use crate::transport::{RequestType, triage};
use rand::Rng;
use serde_json::{Value, json};

pub async fn lookup(ctx: &PipelineContext, query: &str) -> Result<LookupOutcome, ApiError> {
    let primary_key = cache_key(Platform::Steam, "profile", query);
    if let CacheLookup::Hit(profile) = ctx.cache.get(&primary_key).await {
        record_cache(ctx, Platform::Steam, true);
        return Ok(LookupOutcome::cached(profile));
    }
    record_cache(ctx, Platform::Steam, false);

    let candidate = if looks_like_steam_id(query) {
        query.to_string()
    } else {
        resolve_vanity(ctx, query).await.unwrap_or_else(|| query.to_string())
    };

    let steam_id = SteamId::parse(&candidate).map_err(|_| ApiError::fail("steam.invalid_id"))?;
    let steam64 = steam_id.steam64().to_string();

    let summary = fetch_summary(ctx, &steam64).await?;
    let profile = normalize(&steam_id, &summary);

    let ttl = store_ttl(Platform::Steam);
    ctx.cache.put(&primary_key, &profile, ttl);
    let id_key = cache_key(Platform::Steam, "profile", &steam64);
    if id_key != primary_key {
        ctx.cache.put(&id_key, &profile, ttl);
    }

    Ok(LookupOutcome::fresh(profile, RequestType::Fetch))
}

/// One vanity-resolution attempt; any failure falls back to treating the
/// query as an ID form.
async fn resolve_vanity(ctx: &PipelineContext, vanity: &str) -> Option<String> {
    let mut url = ctx
        .config
        .upstreams
        .steam_api
        .join("ISteamUser/ResolveVanityURL/v1/")
        .ok()?;
    url.query_pairs_mut()
        .append_pair("key", &pick_key(ctx)?)
        .append_pair("vanityurl", vanity);

    record_upstream(ctx, Platform::Steam, RequestType::Fetch);
    let response = match ctx.fetch.get_json(Platform::Steam, url, &[]).await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(vanity = vanity, "vanity resolution failed: {e}");
            return None;
        }
    };

    let body = response.json.get("response")?;
    if body.get("success").and_then(Value::as_i64) != Some(1) {
        return None;
    }
    body.get("steamid").and_then(Value::as_str).map(String::from)
}

async fn fetch_summary(ctx: &PipelineContext, steam64: &str) -> Result<Value, ApiError> {
    let key = pick_key(ctx).ok_or_else(|| {
        ApiError::internal("steam.api_failure")
            .with_data(json!({ "detail": "no Steam API key configured" }))
    })?;

    let mut url = ctx
        .config
        .upstreams
        .steam_api
        .join("ISteamUser/GetPlayerSummaries/v2/")
        .map_err(|e| {
            ApiError::internal("steam.api_failure").with_data(json!({ "detail": e.to_string() }))
        })?;
    url.query_pairs_mut()
        .append_pair("key", &key)
        .append_pair("steamids", steam64);

    record_upstream(ctx, Platform::Steam, RequestType::Fetch);
    let response = ctx.fetch.get_json(Platform::Steam, url, &[]).await?;
    triage(Platform::Steam, &response)?;

    let players = response
        .json
        .get("response")
        .and_then(|r| r.get("players"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    // An unknown 64-bit id comes back as an empty list, not a 404.
    players
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::fail("steam.invalid_id"))
}

/// Uniformly random key per call.
fn pick_key(ctx: &PipelineContext) -> Option<String> {
    let keys = &ctx.config.steam_api_keys;
    if keys.is_empty() {
        return None;
    }
    Some(keys[rand::thread_rng().gen_range(0..keys.len())].clone())
}

fn normalize(steam_id: &SteamId, summary: &Value) -> PlayerProfile {
    let steam64 = steam_id.steam64().to_string();
    let username = summary
        .get("personaname")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let avatar = summary
        .get("avatarfull")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut profile = PlayerProfile::new(&steam64, username, avatar);
    profile.raw_id = Some(steam64.clone());

    // Full summary first, canonical id renderings after, so the canonical
    // spellings win when upstream reuses a name.
    if let Some(object) = summary.as_object() {
        profile.meta = object.clone();
    }
    profile
        .meta
        .insert("steam2id".into(), Value::String(steam_id.steam2()));
    profile
        .meta
        .insert("steam2id_new".into(), Value::String(steam_id.steam2_new()));
    profile
        .meta
        .insert("steam3id".into(), Value::String(steam_id.steam3()));
    profile
        .meta
        .insert("steam64id".into(), Value::String(steam64));
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::test_context;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const JAMES64: &str = "76561198047699606";

    async fn mount_summary(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/ISteamUser/GetPlayerSummaries/v2/"))
            .and(query_param("steamids", JAMES64))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": {
                    "players": [{
                        "steamid": JAMES64,
                        "personaname": "James",
                        "avatarfull": "https://avatars.steamstatic.com/james_full.jpg",
                        "profileurl": "https://steamcommunity.com/id/james_ross/"
                    }]
                }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_steam2_form_lookup() {
        let server = MockServer::start().await;
        mount_summary(&server).await;

        let ctx = test_context(&server).await;
        let outcome = lookup(&ctx, "STEAM_0:0:43716939").await.unwrap();

        let player = &outcome.profile;
        assert_eq!(player.id, JAMES64);
        assert_eq!(player.username, "James");
        assert_eq!(player.meta["steam2id"], "STEAM_0:0:43716939");
        assert_eq!(player.meta["steam2id_new"], "STEAM_1:0:43716939");
        assert_eq!(player.meta["steam3id"], "[U:1:87433878]");
        assert_eq!(player.meta["steam64id"], JAMES64);
        // The summary itself is merged into meta.
        assert_eq!(player.meta["profileurl"], "https://steamcommunity.com/id/james_ross/");
    }

    #[tokio::test]
    async fn test_vanity_resolution_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ISteamUser/ResolveVanityURL/v1/"))
            .and(query_param("vanityurl", "james_ross"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": { "success": 1, "steamid": JAMES64 }
            })))
            .mount(&server)
            .await;
        mount_summary(&server).await;

        let ctx = test_context(&server).await;
        let outcome = lookup(&ctx, "james_ross").await.unwrap();
        assert_eq!(outcome.profile.id, JAMES64);
    }

    #[tokio::test]
    async fn test_failed_vanity_means_invalid_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ISteamUser/ResolveVanityURL/v1/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": { "success": 42, "message": "No match" }
            })))
            .mount(&server)
            .await;

        let ctx = test_context(&server).await;
        let err = lookup(&ctx, "nobody_here").await.unwrap_err();
        assert_eq!(err.code, "steam.invalid_id");
    }

    #[tokio::test]
    async fn test_empty_players_is_invalid_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ISteamUser/GetPlayerSummaries/v2/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": { "players": [] }
            })))
            .mount(&server)
            .await;

        let ctx = test_context(&server).await;
        let err = lookup(&ctx, JAMES64).await.unwrap_err();
        assert_eq!(err.code, "steam.invalid_id");
    }

    #[tokio::test]
    async fn test_steam64_lookup_caches_under_both_spellings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ISteamUser/ResolveVanityURL/v1/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": { "success": 1, "steamid": JAMES64 }
            })))
            .mount(&server)
            .await;
        mount_summary(&server).await;

        let ctx = test_context(&server).await;
        lookup(&ctx, "james_ross").await.unwrap();
        crate::cache::PlayerCache::settle().await;

        // Repeat by vanity and by the returned id: both cached.
        assert!(lookup(&ctx, "james_ross").await.unwrap().cached);
        assert!(lookup(&ctx, JAMES64).await.unwrap().cached);
    }
}
