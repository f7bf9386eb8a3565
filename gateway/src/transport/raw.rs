//! The raw-TLS transport.
//!
//! Opens its own TLS socket on 443 and speaks just enough HTTP/1.1 to get
//! a complete response, which the wire codec then parses. Every byte is
//! read off the socket and concatenated before UTF-8 decoding, so
//! multi-byte characters split across TCP frames reassemble losslessly.
//! The whole exchange races a five-second timer; losing the race drops
//! the socket, which closes it.

use super::{RequestType, UpstreamResponse, decode_json_body};
use crate::errors::ApiError;
use crate::ident::Platform;
use once_cell::sync::Lazy;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use url::Url;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

static TLS_CONNECTOR: Lazy<TlsConnector> = Lazy::new(|| {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
});

/// Issues a GET over a raw TLS socket. Only https URLs qualify; callers
/// route everything else through the fetch transport.
pub async fn raw_tls_get(
    platform: Platform,
    url: &Url,
    extra_headers: &[(&str, String)],
) -> Result<UpstreamResponse, ApiError> {
    let api_failure = |detail: String| {
        ApiError::internal(&platform.code("api_failure")).with_data(json!({ "detail": detail }))
    };

    if url.scheme() != "https" {
        return Err(api_failure(format!("raw socket requires https, got {}", url.scheme())));
    }
    let host = url
        .host_str()
        .ok_or_else(|| api_failure("url has no host".to_string()))?
        .to_string();
    let port = url.port().unwrap_or(443);

    let path_and_query = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    };
    let request_head = build_request_head(&host, &path_and_query, extra_headers);

    let exchange = async {
        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| api_failure(format!("connect: {e}")))?;
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| api_failure(format!("server name: {e}")))?;
        let mut stream = TLS_CONNECTOR
            .connect(server_name, tcp)
            .await
            .map_err(|e| api_failure(format!("tls handshake: {e}")))?;

        stream
            .write_all(request_head.as_bytes())
            .await
            .map_err(|e| api_failure(format!("write: {e}")))?;

        // Connection: close means EOF marks the end of the response. All
        // frames land in one buffer before any text decoding happens.
        let mut raw = Vec::new();
        stream
            .read_to_end(&mut raw)
            .await
            .map_err(|e| api_failure(format!("read: {e}")))?;
        Ok::<Vec<u8>, ApiError>(raw)
    };

    // Timing out drops the in-flight future, which closes the socket.
    let raw = tokio::time::timeout(SOCKET_TIMEOUT, exchange)
        .await
        .map_err(|_| api_failure("socket timeout".to_string()))??;

    let text = String::from_utf8_lossy(&raw);
    let parsed = shared::wire::parse_response(&text)
        .map_err(|e| api_failure(format!("wire parse: {e}")))?;

    let json = decode_json_body(platform, parsed.header("content-type"), &parsed.body)?;
    Ok(UpstreamResponse {
        status: parsed.status,
        json,
        request_type: RequestType::Tcp,
    })
}

fn build_request_head(host: &str, path_and_query: &str, extra_headers: &[(&str, String)]) -> String {
    let mut head = format!(
        "GET {path_and_query} HTTP/1.1\r\nHost: {host}\r\nAccept: application/json\r\n"
    );
    for (name, value) in extra_headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("Connection: close\r\n\r\n");
    head
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_head_shape() {
        let head = build_request_head(
            "sessionserver.mojang.com",
            "/session/minecraft/profile/abc?unsigned=false",
            &[("Authorization", "Bearer token".to_string())],
        );
        assert!(head.starts_with(
            "GET /session/minecraft/profile/abc?unsigned=false HTTP/1.1\r\nHost: sessionserver.mojang.com\r\n"
        ));
        assert!(head.contains("Accept: application/json\r\n"));
        assert!(head.contains("Authorization: Bearer token\r\n"));
        assert!(head.ends_with("Connection: close\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_rejects_plain_http() {
        let url = Url::parse("http://example.com/x").unwrap();
        let err = raw_tls_get(Platform::Minecraft, &url, &[]).await.unwrap_err();
        assert_eq!(err.code, "minecraft.api_failure");
    }
}
