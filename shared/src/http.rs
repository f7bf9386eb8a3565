use http::header::{HeaderMap, HeaderValue};
use hyper::body::Body;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Binds the listener and hands each accepted connection to hyper, with
/// h1/h2 negotiated per socket. Serve errors are connection-local: they
/// are logged and the accept loop keeps going.
pub async fn run_http_service<S, B, E>(host: &str, port: u16, service: S) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<B>, Error = E> + Send + Sync + 'static,
    S::Future: Send + 'static,
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
{
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    let service_arc = Arc::new(service);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        let io = TokioIo::new(stream);
        let svc = service_arc.clone();

        tokio::spawn(async move {
            if let Err(e) = Builder::new(TokioExecutor::new())
                .serve_connection(io, svc)
                .await
            {
                tracing::debug!(peer = %peer_addr, "connection ended with error: {e}");
            }
        });
    }
}

/// Caps every request the inner service handles at `limit`. When the
/// deadline passes, the in-flight future is dropped (cancelling its
/// outbound work at the next suspension point) and the response from
/// `on_timeout` is sent instead, so slow upstream chains can never hang
/// a client past the cap.
pub struct Deadline<S, F> {
    inner: S,
    limit: Duration,
    on_timeout: F,
}

impl<S, F> Deadline<S, F> {
    pub fn new(inner: S, limit: Duration, on_timeout: F) -> Self {
        Self {
            inner,
            limit,
            on_timeout,
        }
    }
}

impl<S, ReqB, B, F> Service<Request<ReqB>> for Deadline<S, F>
where
    S: Service<Request<ReqB>, Response = Response<B>>,
    S::Future: Send + 'static,
    B: Send + 'static,
    S::Error: Send + 'static,
    F: Fn() -> Response<B> + Clone + Send + 'static,
{
    type Response = Response<B>;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<ReqB>) -> Self::Future {
        let uri = req.uri().clone();
        let limit = self.limit;
        let fallback = self.on_timeout.clone();
        let inner = self.inner.call(req);

        Box::pin(async move {
            match tokio::time::timeout(limit, inner).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(uri = %uri, "request deadline exceeded");
                    Ok(fallback())
                }
            }
        })
    }
}

/// Security headers applied to HTML responses served next to the API.
/// Non-HTML responses (JSON, images) are left alone.
pub fn add_security_headers(headers: &mut HeaderMap) {
    let is_html = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html"))
        .unwrap_or(false);
    if !is_html {
        return;
    }

    headers.insert("x-frame-options", HeaderValue::from_static("SAMEORIGIN"));
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
}
