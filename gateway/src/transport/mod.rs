//! Upstream transports.
//!
//! Three ways to issue the same logical GET: a regular HTTPS fetch, a raw
//! TLS socket speaking minimal HTTP/1.1 (rate limiters that key on client
//! fingerprints treat it differently than the fetch stack), and an off-box
//! container proxy that issues the request from its own IP. Pipelines pick
//! the order; the shared rules here cover timeouts, the JSON content-type
//! requirement, and status-code triage.

pub mod container;
pub mod fetch;
pub mod raw;

use crate::errors::ApiError;
use crate::ident::Platform;
use serde_json::{Value, json};
use std::time::Duration;

pub use container::proxy_get;
pub use fetch::FetchClient;
pub use raw::raw_tls_get;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Fetch,
    Tcp,
    Container,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Fetch => "fetch",
            RequestType::Tcp => "tcp",
            RequestType::Container => "container",
        }
    }
}

/// A decoded upstream response. `json` is `Null` when the body was empty
/// or unparsable; the status always reflects what the upstream said.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub json: Value,
    pub request_type: RequestType,
}

impl UpstreamResponse {
    pub fn ok(&self) -> bool {
        self.status == 200
    }
}

pub(crate) fn timeout_for(platform: Platform) -> Duration {
    match platform {
        Platform::Hytale => Duration::from_secs(10),
        _ => Duration::from_secs(5),
    }
}

/// Applies the shared status mapping. Pipelines with special handling
/// (Mojang 204s, Xbox in-band errors) intercept before calling this.
pub fn triage(platform: Platform, response: &UpstreamResponse) -> Result<(), ApiError> {
    match response.status {
        200 => Ok(()),
        429 => Err(ApiError::internal(&platform.code("rate_limited"))),
        401 | 403 if platform == Platform::Hytale => {
            Err(ApiError::internal("hytale.auth_failure")
                .with_data(json!({ "status": response.status, "isAuthError": true })))
        }
        404 => Err(match platform {
            Platform::Minecraft => ApiError::fail("minecraft.invalid_username"),
            Platform::Steam => ApiError::fail("steam.invalid_id"),
            Platform::Xbox => ApiError::fail("xbox.not_found"),
            Platform::Hytale => ApiError::fail("hytale.not_found"),
        }),
        other if platform == Platform::Xbox => {
            Err(ApiError::internal("xbox.bad_response_code")
                .with_data(json!({ "status": other })))
        }
        other => Err(ApiError::internal(&platform.code("api_failure"))
            .with_data(json!({ "status": other }))),
    }
}

/// Empty bodies decode to `Null`. Non-empty bodies must carry a JSON
/// content type; parse failures are treated as an empty body.
pub(crate) fn decode_json_body(
    platform: Platform,
    content_type: Option<&str>,
    body: &str,
) -> Result<Value, ApiError> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    let content_type = content_type.unwrap_or("");
    if !content_type.contains("json") {
        return Err(ApiError::internal(&platform.code("non_json"))
            .with_data(json!({ "contentType": content_type })));
    }
    Ok(serde_json::from_str(body).unwrap_or(Value::Null))
}
