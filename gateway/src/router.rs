//! Route dispatch and request middleware.
//!
//! `GET /api/player/{platform}/{query}` goes to the matching pipeline.
//! Everything outside `/api` is handed to the static-site collaborator.
//! API responses pass through the edge cache on the way in (hits are
//! replayed with `X-Worker-Cache: true`) and on the way out; successful
//! lookups also queue a second edge entry under the canonical player id
//! so lookups by either spelling land on the same entry.

use crate::analytics::{AnalyticsSink, DataPoint, RequestInfo};
use crate::cache::EdgeCache;
use crate::errors::ApiError;
use crate::ident::Platform;
use crate::platforms::{self, LookupOutcome, PipelineContext};
use async_trait::async_trait;
use http::header::{HeaderMap, HeaderValue};
use http::{Method, StatusCode, Uri};
use http_body_util::Full;
use hyper::Response;
use hyper::body::Bytes;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

const SUCCESS_CACHE_CONTROL: &str = "public, max-age=432000";
const ERROR_CACHE_CONTROL: &str = "public, max-age=300";

/// The public static site is an external collaborator; the router only
/// needs "give me a response for this path, or say you can't".
#[async_trait]
pub trait StaticSite: Send + Sync {
    async fn serve(&self, path: &str) -> Option<StaticResponse>;
}

pub struct StaticResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Default collaborator when no site is wired in: every path misses.
pub struct NoStaticSite;

#[async_trait]
impl StaticSite for NoStaticSite {
    async fn serve(&self, _path: &str) -> Option<StaticResponse> {
        None
    }
}

#[derive(Clone)]
pub struct Router {
    ctx: PipelineContext,
    edge: EdgeCache,
    analytics: Arc<dyn AnalyticsSink>,
    static_site: Arc<dyn StaticSite>,
}

impl Router {
    pub fn new(
        ctx: PipelineContext,
        edge: EdgeCache,
        analytics: Arc<dyn AnalyticsSink>,
        static_site: Arc<dyn StaticSite>,
    ) -> Self {
        Self {
            ctx,
            edge,
            analytics,
            static_site,
        }
    }

    pub async fn handle(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> Response<Full<Bytes>> {
        let started = Instant::now();

        if method == Method::OPTIONS {
            return cors_preflight();
        }

        let path = uri.path();
        if !path.starts_with("/api") {
            return self.serve_static(path).await;
        }

        let edge_key = normalize_edge_key(uri);
        let info = request_info(uri, headers);

        if let Some(cached) = self.edge.get(&edge_key) {
            self.ctx.metrics.incr(
                crate::metrics_defs::CACHE_HIT.name,
                Some(&[("layer", "edge")]),
            );
            self.emit_point(
                &info,
                DataPoint {
                    kind: platform_of(path)
                        .map(|p| p.as_str().to_string())
                        .unwrap_or_else(|| "request".to_string()),
                    error: None,
                    request_type: None,
                    cached: true,
                    status: cached.status,
                    response_time_ms: started.elapsed().as_millis() as u64,
                },
            );
            return json_response(cached.status, cached.body, true);
        }

        if path == "/api/health" {
            return json_response(200, json!({ "ok": true }).to_string(), false);
        }

        let (platform, query) = match parse_player_route(method, path) {
            Ok(route) => route,
            Err(e) => {
                return self.finish_error(&info, &edge_key, None, e, started);
            }
        };

        match platforms::lookup(&self.ctx, platform, query).await {
            Ok(outcome) => self.finish_success(&info, &edge_key, platform, outcome, started),
            Err(e) => self.finish_error(&info, &edge_key, Some(platform), e, started),
        }
    }

    async fn serve_static(&self, path: &str) -> Response<Full<Bytes>> {
        let (status, content_type, body) = match self.static_site.serve(path).await {
            Some(response) => (
                StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK),
                response.content_type,
                response.body,
            ),
            None => (
                StatusCode::NOT_FOUND,
                "text/html; charset=utf-8".to_string(),
                b"<!doctype html><title>404</title><h1>404 Not Found</h1>".to_vec(),
            ),
        };

        let mut response = Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, content_type)
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
        shared::http::add_security_headers(response.headers_mut());
        response
    }

    fn finish_success(
        &self,
        info: &RequestInfo,
        edge_key: &str,
        platform: Platform,
        outcome: LookupOutcome,
        started: Instant,
    ) -> Response<Full<Bytes>> {
        let body = outcome.profile.to_envelope().to_string();
        self.edge.put(edge_key, 200, body.clone());

        // Second entry under the canonical id, so a follow-up lookup by
        // the returned id replays this response.
        if let Some(id_key) = replace_query_segment(edge_key, &outcome.profile.id) {
            if id_key != edge_key {
                let edge = self.edge.clone();
                let body = body.clone();
                tokio::spawn(async move {
                    edge.put(&id_key, 200, body);
                });
            }
        }

        let elapsed = started.elapsed().as_millis() as u64;
        self.ctx.metrics.timing(
            crate::metrics_defs::REQUEST_DURATION.name,
            elapsed,
            Some(&[("platform", platform.as_str()), ("status", "200")]),
        );
        self.emit_point(
            info,
            DataPoint {
                kind: platform.as_str().to_string(),
                error: None,
                request_type: outcome.request_type.map(|t| t.as_str().to_string()),
                cached: outcome.cached,
                status: 200,
                response_time_ms: elapsed,
            },
        );

        json_response(200, body, false)
    }

    fn finish_error(
        &self,
        info: &RequestInfo,
        edge_key: &str,
        platform: Option<Platform>,
        error: ApiError,
        started: Instant,
    ) -> Response<Full<Bytes>> {
        let status = error.http_status();
        let body = error.to_envelope().to_string();

        // Cached briefly so the edge stops retrying an upstream it
        // already knows is broken.
        self.edge.put(edge_key, status.as_u16(), body.clone());

        let elapsed = started.elapsed().as_millis() as u64;
        let kind = platform
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "request".to_string());
        self.emit_point(
            info,
            DataPoint {
                kind,
                error: error.counts_as_error().then(|| error.code.clone()),
                request_type: None,
                cached: false,
                status: status.as_u16(),
                response_time_ms: elapsed,
            },
        );

        json_response(status.as_u16(), body, false)
    }

    /// Detached analytics write; the response never waits on it.
    fn emit_point(&self, info: &RequestInfo, point: DataPoint) {
        let sink = self.analytics.clone();
        let info = info.clone();
        tokio::spawn(async move {
            sink.write_point(&info, &point).await;
        });
    }
}

/// Response for a request that ran out its overall deadline.
pub fn deadline_response() -> Response<Full<Bytes>> {
    let error = ApiError::internal("api.unknown_error");
    json_response(
        error.http_status().as_u16(),
        error.to_envelope().to_string(),
        false,
    )
}

fn cors_preflight() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("access-control-allow-origin", "*")
        .header("access-control-allow-methods", "GET, OPTIONS")
        .header("access-control-allow-headers", "*")
        .header("access-control-max-age", "86400")
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn json_response(status: u16, body: String, from_edge_cache: bool) -> Response<Full<Bytes>> {
    let cache_control = if status == 200 {
        SUCCESS_CACHE_CONTROL
    } else {
        ERROR_CACHE_CONTROL
    };

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header(
            http::header::CONTENT_TYPE,
            "application/json; charset=utf-8",
        )
        .header("access-control-allow-origin", "*")
        .header(http::header::CACHE_CONTROL, cache_control);
    if from_edge_cache {
        builder = builder.header("x-worker-cache", "true");
    }
    builder
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// `GET /api/player/{platform}/{query}`; anything else under `/api` is a
/// 404 in the error taxonomy.
fn parse_player_route<'a>(
    method: &Method,
    path: &'a str,
) -> Result<(Platform, &'a str), ApiError> {
    if method != Method::GET {
        return Err(ApiError::fail("api.404"));
    }
    let mut segments = path.trim_start_matches('/').splitn(4, '/');
    let (api, player, platform, query) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    );
    if api != Some("api") || player != Some("player") {
        return Err(ApiError::fail("api.404"));
    }
    let platform = platform
        .and_then(Platform::from_path_segment)
        .ok_or_else(|| ApiError::fail("api.404"))?;
    match query {
        Some(query) if !query.is_empty() && !query.contains('/') => Ok((platform, query)),
        _ => Err(ApiError::fail("api.404")),
    }
}

fn platform_of(path: &str) -> Option<Platform> {
    parse_player_route(&Method::GET, path).ok().map(|(p, _)| p)
}

/// Edge keys are the request URL with the pathname lowercased; the query
/// string is preserved as sent.
fn normalize_edge_key(uri: &Uri) -> String {
    match uri.query() {
        Some(query) => format!("{}?{query}", uri.path().to_ascii_lowercase()),
        None => uri.path().to_ascii_lowercase(),
    }
}

/// Swaps the query segment of a player-route edge key for the canonical
/// id, lowercased.
fn replace_query_segment(edge_key: &str, id: &str) -> Option<String> {
    let (path, query) = match edge_key.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (edge_key, None),
    };
    let mut segments: Vec<&str> = path.split('/').collect();
    // ["", "api", "player", platform, query]
    if segments.len() != 5 {
        return None;
    }
    let id = id.to_ascii_lowercase();
    segments[4] = &id;
    let rebuilt = segments.join("/");
    Some(match query {
        Some(query) => format!("{rebuilt}?{query}"),
        None => rebuilt,
    })
}

/// Pulls what the edge tells us about the client out of the headers.
fn request_info(uri: &Uri, headers: &HeaderMap) -> RequestInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v: &HeaderValue| v.to_str().ok())
            .map(String::from)
    };

    // The colo code is the tail of the ray id.
    let colo = header("cf-ray")
        .and_then(|ray| ray.rsplit('-').next().map(String::from));

    RequestInfo {
        url: uri.to_string(),
        user_agent: header("user-agent"),
        referer: header("referer"),
        protocol: header("x-forwarded-proto"),
        city: header("cf-ipcity"),
        colo,
        country: header("cf-ipcountry"),
        tls_version: header("cf-tls-version"),
        asn: header("cf-asn").and_then(|v| v.parse().ok()),
    }
}
