//! Xbox Live lookups through the third-party profile provider.
//!
//! The provider answers 200 even for business errors, with `code` and
//! `description` fields in the body; codes 2 and 28 mean "no such
//! player". Definitive not-founds are negative-cached for an hour so
//! repeat misses stop burning quota.

use super::{LookupOutcome, PipelineContext, record_cache, record_upstream};
use crate::cache::{CacheLookup, store_ttl};
use crate::errors::ApiError;
use crate::ident::{Platform, XboxQuery, cache_key, canonicalize_xbox};
use crate::profile::PlayerProfile;
use crate::transport::{RequestType, triage};
use serde_json::{Map, Value, json};
use url::Url;

const FALLBACK_AVATAR_BASE: &str = "https://avatar-ssl.xboxlive.com/avatar/";

pub async fn lookup(ctx: &PipelineContext, query: &str) -> Result<LookupOutcome, ApiError> {
    let primary_key = cache_key(Platform::Xbox, "profile", query);
    match ctx.cache.get(&primary_key).await {
        CacheLookup::Hit(profile) => {
            record_cache(ctx, Platform::Xbox, true);
            return Ok(LookupOutcome::cached(profile));
        }
        CacheLookup::NegativeHit => {
            record_cache(ctx, Platform::Xbox, true);
            return Err(ApiError::fail("xbox.not_found"));
        }
        CacheLookup::Miss => record_cache(ctx, Platform::Xbox, false),
    }

    let api_key = ctx.config.xbox_api_key.clone().ok_or_else(|| {
        ApiError::internal("xbox.api_failure")
            .with_data(json!({ "detail": "no Xbox API key configured" }))
    })?;

    let url_error = |e: url::ParseError| {
        ApiError::internal("xbox.api_failure").with_data(json!({ "detail": e.to_string() }))
    };
    let url = match canonicalize_xbox(query) {
        XboxQuery::Xuid(xuid) => ctx
            .config
            .upstreams
            .xbox_api
            .join(&format!("account/{xuid}"))
            .map_err(url_error)?,
        XboxQuery::Gamertag(tag) => {
            let mut url = ctx
                .config
                .upstreams
                .xbox_api
                .join("friends/search")
                .map_err(url_error)?;
            url.query_pairs_mut().append_pair("gt", &tag);
            url
        }
    };

    record_upstream(ctx, Platform::Xbox, RequestType::Fetch);
    let response = ctx
        .fetch
        .get_json(Platform::Xbox, url, &[("x-authorization", api_key)])
        .await?;
    triage(Platform::Xbox, &response)?;

    if let Err(e) = check_business_error(&response.json) {
        if e.code == "xbox.not_found" {
            ctx.cache.put_negative(&primary_key);
        }
        return Err(e);
    }

    let profile = normalize(&response.json)?;

    let ttl = store_ttl(Platform::Xbox);
    ctx.cache.put(&primary_key, &profile, ttl);
    let id_key = cache_key(Platform::Xbox, "profile", &profile.id);
    if id_key != primary_key {
        ctx.cache.put(&id_key, &profile, ttl);
    }

    Ok(LookupOutcome::fresh(profile, response.request_type))
}

/// 200-with-error-body translation: codes 2 and 28 are "not found",
/// anything else with a code/description pair is a bad response.
fn check_business_error(body: &Value) -> Result<(), ApiError> {
    let code = match body.get("code").and_then(Value::as_i64) {
        Some(code) => code,
        None => return Ok(()),
    };
    let description = body
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default();

    if code == 2 || code == 28 {
        return Err(ApiError::fail("xbox.not_found"));
    }
    Err(ApiError::internal("xbox.bad_response").with_data(json!({
        "error_code": code,
        "message": description,
    })))
}

fn normalize(body: &Value) -> Result<PlayerProfile, ApiError> {
    let user = body
        .get("profileUsers")
        .and_then(Value::as_array)
        .and_then(|users| users.first())
        .ok_or_else(|| {
            ApiError::internal("xbox.api_failure")
                .with_data(json!({ "detail": "response had no profileUsers" }))
        })?;

    let xuid = user.get("id").and_then(Value::as_str).unwrap_or_default();
    let settings = user
        .get("settings")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut gamertag = None;
    let mut avatar = None;
    let mut extra = Map::new();
    let mut meta = Map::new();

    for setting in &settings {
        let id = setting.get("id").and_then(Value::as_str).unwrap_or_default();
        let value = setting.get("value").cloned().unwrap_or(Value::Null);
        match id {
            "Gamertag" => gamertag = value.as_str().map(String::from),
            "GameDisplayPicRaw" => {
                avatar = value.as_str().map(normalize_avatar_url);
            }
            "UniqueModernGamertag" | "ModernGamertag" | "ModernGamertagSuffix" => {
                extra.insert(to_camel_case(id), value);
            }
            other => {
                meta.insert(to_camel_case(other), value);
            }
        }
    }

    let username = gamertag
        .or_else(|| string_from(&extra, "uniqueModernGamertag"))
        .or_else(|| string_from(&extra, "modernGamertag"))
        .or_else(|| string_from(&meta, "realName"))
        .unwrap_or_default();

    let avatar = avatar
        .unwrap_or_else(|| format!("{FALLBACK_AVATAR_BASE}{username}/avatarpic-l.png"));

    let mut profile = PlayerProfile::new(xuid, &username, &avatar);
    profile.raw_id = Some(xuid.to_string());
    profile.extra = extra;
    profile.meta = meta;
    Ok(profile)
}

/// Drops the `mode=Padding` parameter and pins the dimensions to 180.
fn normalize_avatar_url(raw: &str) -> String {
    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => return raw.to_string(),
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, value)| !(name == "mode" && value == "Padding"))
        .filter(|(name, _)| name != "h" && name != "w")
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (name, value) in &kept {
            pairs.append_pair(name, value);
        }
        pairs.append_pair("h", "180");
        pairs.append_pair("w", "180");
    }
    url.to_string()
}

/// `RealName` -> `realName`; already-lowercase keys pass through.
fn to_camel_case(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn string_from(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PlayerCache;
    use crate::testutils::test_context;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const XUID: &str = "2533274818672320";

    fn profile_body() -> Value {
        serde_json::json!({
            "profileUsers": [{
                "id": XUID,
                "settings": [
                    { "id": "Gamertag", "value": "Jimboodude" },
                    { "id": "GameDisplayPicRaw",
                      "value": "https://images-eds.xboxlive.com/image?url=abc&mode=Padding&h=64&w=64" },
                    { "id": "ModernGamertag", "value": "Jimboodude" },
                    { "id": "ModernGamertagSuffix", "value": "1234" },
                    { "id": "UniqueModernGamertag", "value": "Jimboodude#1234" },
                    { "id": "RealName", "value": "Jim" },
                    { "id": "GameDisplayName", "value": "Jimboodude" }
                ]
            }]
        })
    }

    #[tokio::test]
    async fn test_gamertag_lookup_normalization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/friends/search"))
            .and(query_param("gt", "Jimboodude"))
            .and(header("x-authorization", "xbox-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile_body()))
            .mount(&server)
            .await;

        let ctx = test_context(&server).await;
        let outcome = lookup(&ctx, "Jimboodude").await.unwrap();

        let player = &outcome.profile;
        assert_eq!(player.id, XUID);
        assert_eq!(player.username, "Jimboodude");
        assert!(!player.avatar.contains("mode=Padding"));
        assert!(player.avatar.contains("h=180"));
        assert!(player.avatar.contains("w=180"));
        assert_eq!(player.extra["uniqueModernGamertag"], "Jimboodude#1234");
        assert_eq!(player.meta["realName"], "Jim");
        assert_eq!(player.meta["gameDisplayName"], "Jimboodude");
        // Promoted settings stay out of meta.
        assert!(!player.meta.contains_key("modernGamertag"));
    }

    #[tokio::test]
    async fn test_xuid_lookup_uses_account_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/account/{XUID}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile_body()))
            .mount(&server)
            .await;

        let ctx = test_context(&server).await;
        let outcome = lookup(&ctx, XUID).await.unwrap();
        assert_eq!(outcome.profile.id, XUID);
    }

    #[tokio::test]
    async fn test_not_found_writes_negative_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/friends/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 28,
                "description": "Player not found"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = test_context(&server).await;
        let err = lookup(&ctx, "GhostPlayer").await.unwrap_err();
        assert_eq!(err.code, "xbox.not_found");

        // Second lookup is served by the negative cache, not the upstream
        // (the mock's expect(1) verifies no second call).
        PlayerCache::settle().await;
        let err = lookup(&ctx, "GhostPlayer").await.unwrap_err();
        assert_eq!(err.code, "xbox.not_found");
    }

    #[tokio::test]
    async fn test_unknown_business_code_is_bad_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/friends/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 7,
                "description": "Something odd"
            })))
            .mount(&server)
            .await;

        let ctx = test_context(&server).await;
        let err = lookup(&ctx, "Whoever").await.unwrap_err();
        assert_eq!(err.code, "xbox.bad_response");
        assert_eq!(err.data["error_code"], 7);
        assert_eq!(err.message, "Something odd");
    }

    #[tokio::test]
    async fn test_non_200_is_bad_response_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/friends/search"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let ctx = test_context(&server).await;
        let err = lookup(&ctx, "2533274818672320z").await.unwrap_err();
        assert_eq!(err.code, "xbox.bad_response_code");
        assert_eq!(err.http_status().as_u16(), 500);
    }

    #[test]
    fn test_avatar_url_normalization() {
        let raw = "https://images-eds.xboxlive.com/image?url=abc&mode=Padding&h=64&w=64&format=png";
        let normalized = normalize_avatar_url(raw);
        assert!(!normalized.contains("mode=Padding"));
        assert!(normalized.contains("url=abc"));
        assert!(normalized.contains("format=png"));
        assert!(normalized.contains("h=180"));
        assert!(normalized.contains("w=180"));
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(to_camel_case("RealName"), "realName");
        assert_eq!(to_camel_case("Bio"), "bio");
        assert_eq!(to_camel_case("location"), "location");
    }
}
