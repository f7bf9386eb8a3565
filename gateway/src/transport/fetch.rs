//! The plain HTTPS transport.

use super::{RequestType, UpstreamResponse, decode_json_body, timeout_for};
use crate::errors::ApiError;
use crate::ident::Platform;
use serde_json::json;
use url::Url;

#[derive(Clone)]
pub struct FetchClient {
    client: reqwest::Client,
}

impl FetchClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Issues a GET and decodes the response. Network failures and
    /// timeouts map to the platform's `api_failure`; status triage is left
    /// to the caller so fallback chains can inspect the code.
    pub async fn get_json(
        &self,
        platform: Platform,
        url: Url,
        headers: &[(&str, String)],
    ) -> Result<UpstreamResponse, ApiError> {
        let mut request = self.client.get(url).timeout(timeout_for(platform));
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            ApiError::internal(&platform.code("api_failure"))
                .with_data(json!({ "detail": e.to_string(), "timeout": e.is_timeout() }))
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let body = response.text().await.map_err(|e| {
            ApiError::internal(&platform.code("api_failure"))
                .with_data(json!({ "detail": e.to_string() }))
        })?;

        let json = decode_json_body(platform, content_type.as_deref(), &body)?;
        Ok(UpstreamResponse {
            status,
            json,
            request_type: RequestType::Fetch,
        })
    }
}

impl Default for FetchClient {
    fn default() -> Self {
        Self::new()
    }
}
