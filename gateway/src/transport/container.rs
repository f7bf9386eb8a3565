//! The off-box container proxy transport.
//!
//! When both the direct paths are rate limited, the request is relayed
//! through one of up to three proxy containers picked uniformly at
//! random. The proxy issues the GET from its own IP and pipes the
//! upstream response back verbatim.

use super::{RequestType, UpstreamResponse, decode_json_body};
use crate::errors::ApiError;
use crate::ident::Platform;
use rand::Rng;
use serde_json::{Map, Value, json};
use std::time::Duration;
use url::Url;

const PROXY_TIMEOUT: Duration = Duration::from_secs(10);

/// Relays a GET through a random proxy instance.
pub async fn proxy_get(
    client: &reqwest::Client,
    proxies: &[Url],
    target: &Url,
    headers: &[(&str, String)],
    platform: Platform,
) -> Result<UpstreamResponse, ApiError> {
    let api_failure = |detail: String| {
        ApiError::internal(&platform.code("api_failure")).with_data(json!({ "detail": detail }))
    };

    if proxies.is_empty() {
        return Err(api_failure("no container proxies configured".to_string()));
    }
    let proxy = &proxies[rand::thread_rng().gen_range(0..proxies.len())];

    let mut header_map = Map::new();
    for (name, value) in headers {
        header_map.insert(name.to_string(), Value::String(value.clone()));
    }

    let response = client
        .post(proxy.clone())
        .timeout(PROXY_TIMEOUT)
        .json(&json!({ "url": target.as_str(), "headers": header_map }))
        .send()
        .await
        .map_err(|e| api_failure(format!("proxy relay: {e}")))?;

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let body = response
        .text()
        .await
        .map_err(|e| api_failure(format!("proxy body: {e}")))?;

    let json = decode_json_body(platform, content_type.as_deref(), &body)?;
    Ok(UpstreamResponse {
        status,
        json,
        request_type: RequestType::Container,
    })
}
