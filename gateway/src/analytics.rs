//! Analytics data points.
//!
//! Each request emits one ordered record to the external telemetry
//! dataset: string columns first, numeric columns after. The column order
//! is part of the dataset's contract with downstream dashboards; append
//! only, never reorder.

use async_trait::async_trait;
use serde_json::{Value, json};
use url::Url;

/// Facts about the inbound request, pulled from edge headers.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub url: String,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub protocol: Option<String>,
    pub city: Option<String>,
    pub colo: Option<String>,
    pub country: Option<String>,
    pub tls_version: Option<String>,
    pub asn: Option<f64>,
}

/// Facts about how the lookup went.
#[derive(Debug, Clone)]
pub struct DataPoint {
    /// Record type, e.g. the platform name or `request`.
    pub kind: String,
    /// Error code when the lookup failed with a real error; user-visible
    /// fails are not errors.
    pub error: Option<String>,
    /// Which transport satisfied the lookup, absent on cache hits.
    pub request_type: Option<String>,
    pub cached: bool,
    pub status: u16,
    pub response_time_ms: u64,
}

/// Game server pings embed the player name in their user agent; cut the
/// record off at the marker so names never reach the dataset.
pub fn anonymize_user_agent(user_agent: &str) -> String {
    const MARKER: &str = "played by ";
    if user_agent.starts_with("Tiers ") {
        if let Some(idx) = user_agent.find(MARKER) {
            return user_agent[..idx + MARKER.len()].to_string();
        }
    }
    user_agent.to_string()
}

/// The ordered row. Blobs: type, error, request_type, url, user_agent,
/// referer, protocol, city, colo, country, tls_version. Doubles: asn,
/// cached, response_time_ms, status.
pub fn to_row(info: &RequestInfo, point: &DataPoint) -> Value {
    let blob = |value: &Option<String>| {
        value.clone().map(Value::String).unwrap_or(Value::Null)
    };
    json!({
        "blobs": [
            point.kind,
            blob(&point.error),
            blob(&point.request_type),
            info.url,
            blob(&info.user_agent.as_deref().map(anonymize_user_agent)),
            blob(&info.referer),
            blob(&info.protocol),
            blob(&info.city),
            blob(&info.colo),
            blob(&info.country),
            blob(&info.tls_version),
        ],
        "doubles": [
            info.asn.unwrap_or(0.0),
            if point.cached { 1 } else { 0 },
            point.response_time_ms,
            point.status,
        ],
    })
}

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn write_point(&self, info: &RequestInfo, point: &DataPoint);
}

/// POSTs rows to the telemetry collector; failures are logged and dropped.
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpSink {
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl AnalyticsSink for HttpSink {
    async fn write_point(&self, info: &RequestInfo, point: &DataPoint) {
        let row = to_row(info, point);
        if let Err(e) = self
            .client
            .post(self.endpoint.clone())
            .timeout(std::time::Duration::from_secs(5))
            .json(&row)
            .send()
            .await
        {
            tracing::debug!("analytics write failed: {e}");
        }
    }
}

pub struct NoopSink;

#[async_trait]
impl AnalyticsSink for NoopSink {
    async fn write_point(&self, _info: &RequestInfo, _point: &DataPoint) {}
}

#[cfg(test)]
pub(crate) struct CollectingSink {
    pub rows: parking_lot::Mutex<Vec<Value>>,
}

#[cfg(test)]
impl CollectingSink {
    pub fn new() -> Self {
        Self {
            rows: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl AnalyticsSink for CollectingSink {
    async fn write_point(&self, info: &RequestInfo, point: &DataPoint) {
        self.rows.lock().push(to_row(info, point));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> RequestInfo {
        RequestInfo {
            url: "https://example.com/api/player/steam/x".into(),
            user_agent: Some("curl/8.0".into()),
            referer: None,
            protocol: Some("HTTP/2".into()),
            city: Some("Portland".into()),
            colo: Some("PDX".into()),
            country: Some("US".into()),
            tls_version: Some("TLSv1.3".into()),
            asn: Some(13335.0),
        }
    }

    #[test]
    fn test_column_order_is_stable() {
        let point = DataPoint {
            kind: "steam".into(),
            error: None,
            request_type: Some("fetch".into()),
            cached: false,
            status: 200,
            response_time_ms: 42,
        };
        let row = to_row(&info(), &point);

        let blobs = row["blobs"].as_array().unwrap();
        assert_eq!(blobs.len(), 11);
        assert_eq!(blobs[0], "steam");
        assert_eq!(blobs[1], Value::Null);
        assert_eq!(blobs[2], "fetch");
        assert_eq!(blobs[3], "https://example.com/api/player/steam/x");
        assert_eq!(blobs[4], "curl/8.0");
        assert_eq!(blobs[10], "TLSv1.3");

        let doubles = row["doubles"].as_array().unwrap();
        assert_eq!(doubles.len(), 4);
        assert_eq!(doubles[0], 13335.0);
        assert_eq!(doubles[1], 0);
        assert_eq!(doubles[2], 42);
        assert_eq!(doubles[3], 200);
    }

    #[test]
    fn test_user_agent_anonymization() {
        assert_eq!(
            anonymize_user_agent("Tiers 2.1.0 played by Notch"),
            "Tiers 2.1.0 played by "
        );
        // Only the game-server agents are touched.
        assert_eq!(
            anonymize_user_agent("Mozilla/5.0 played by nobody"),
            "Mozilla/5.0 played by nobody"
        );
        assert_eq!(anonymize_user_agent("Tiers 2.1.0"), "Tiers 2.1.0");
        assert_eq!(anonymize_user_agent("curl/8.0"), "curl/8.0");
    }
}
