//! HTTP/1.1 Response Wire Codec
//!
//! Parses a complete HTTP/1.1 response out of a single string buffer, as
//! read off a raw socket. The raw-socket transport reads every byte of the
//! response (the request is sent with `Connection: close`) and concatenates
//! them before decoding, so this parser never sees a partial message: either
//! the buffer contains a full response or parsing fails.
//!
//! Body framing supports `Content-Length` and `Transfer-Encoding: chunked`.
//! A response with neither is rejected rather than guessed at.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum WireError {
    #[error("no header terminator in response buffer")]
    NoHeaderTerminator,

    #[error("invalid status line: {0}")]
    InvalidStatusLine(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("unable to determine body length")]
    MissingBodyLength,

    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("content-length mismatch: header says {expected}, body is {actual} bytes")]
    ContentLengthMismatch { expected: usize, actual: usize },

    #[error("invalid chunk size line: {0}")]
    InvalidChunkSize(String),

    #[error("chunk size line missing CRLF")]
    ChunkSizeUnterminated,

    #[error("chunk claims {claimed} bytes but only {remaining} remain")]
    TruncatedChunk { claimed: usize, remaining: usize },

    #[error("chunk data missing trailing CRLF")]
    ChunkDataUnterminated,

    #[error("missing final zero-size chunk")]
    MissingFinalChunk,
}

/// A fully parsed HTTP/1.x response.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub status: u16,
    pub message: String,
    /// Header names lowercased; last occurrence wins on duplicates.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ParsedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }
}

/// Parses a complete HTTP/1.0 or HTTP/1.1 response from `buf`.
///
/// The head is split from the body at the first `\r\n\r\n`. The status line
/// must be `HTTP/1.0` or `HTTP/1.1` followed by a three-digit code and a
/// reason phrase. Header values may carry one optional leading space which
/// is trimmed. Body length is resolved via `Transfer-Encoding: chunked` or
/// `Content-Length`; the latter is validated against the byte length of the
/// raw body, not its character count.
pub fn parse_response(buf: &str) -> Result<ParsedResponse, WireError> {
    let (head, raw_body) = buf
        .split_once("\r\n\r\n")
        .ok_or(WireError::NoHeaderTerminator)?;

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or("");
    let (status, message) = parse_status_line(status_line)?;

    let mut headers = HashMap::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| WireError::MalformedHeader(line.to_string()))?;
        let value = value.strip_prefix(' ').unwrap_or(value);
        headers.insert(name.to_ascii_lowercase(), value.to_string());
    }

    let body = resolve_body(&headers, raw_body)?;

    Ok(ParsedResponse {
        status,
        message,
        headers,
        body,
    })
}

fn parse_status_line(line: &str) -> Result<(u16, String), WireError> {
    let invalid = || WireError::InvalidStatusLine(line.to_string());

    let rest = line
        .strip_prefix("HTTP/1.1 ")
        .or_else(|| line.strip_prefix("HTTP/1.0 "))
        .ok_or_else(invalid)?;

    let (code, message) = rest.split_once(' ').ok_or_else(invalid)?;
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    // Three ascii digits always fit a u16.
    let status: u16 = code.parse().map_err(|_| invalid())?;
    Ok((status, message.to_string()))
}

fn resolve_body(headers: &HashMap<String, String>, raw_body: &str) -> Result<String, WireError> {
    if let Some(te) = headers.get("transfer-encoding") {
        if te.trim().eq_ignore_ascii_case("chunked") {
            return decode_chunked(raw_body);
        }
    }

    if let Some(len) = headers.get("content-length") {
        let expected: usize = len
            .trim()
            .parse()
            .map_err(|_| WireError::InvalidContentLength(len.clone()))?;
        let actual = raw_body.len();
        if expected != actual {
            return Err(WireError::ContentLengthMismatch { expected, actual });
        }
        return Ok(raw_body.to_string());
    }

    Err(WireError::MissingBodyLength)
}

/// Decodes a `Transfer-Encoding: chunked` body.
///
/// Each chunk is a hex size line (chunk extensions after `;` are ignored)
/// terminated by CRLF, followed by exactly that many bytes of data and a
/// CRLF. The zero-size terminator chunk is required. Chunk bodies are
/// concatenated as bytes before any text decoding so a multi-byte character
/// split across chunk boundaries reassembles losslessly.
pub fn decode_chunked(buf: &str) -> Result<String, WireError> {
    let bytes = buf.as_bytes();
    let mut pos = 0usize;
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());

    loop {
        let line_end = match find_crlf(bytes, pos) {
            Some(i) => i,
            None => return Err(WireError::MissingFinalChunk),
        };

        let size_line = std::str::from_utf8(&bytes[pos..line_end])
            .map_err(|_| WireError::ChunkSizeUnterminated)?;
        let size_field = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| WireError::InvalidChunkSize(size_line.to_string()))?;
        pos = line_end + 2;

        if size == 0 {
            // Trailers and the final CRLF are ignored; the message is done.
            return Ok(String::from_utf8_lossy(&out).into_owned());
        }

        let remaining = bytes.len().saturating_sub(pos);
        if size > remaining {
            return Err(WireError::TruncatedChunk {
                claimed: size,
                remaining,
            });
        }

        out.extend_from_slice(&bytes[pos..pos + size]);
        pos += size;

        if bytes.len() < pos + 2 || &bytes[pos..pos + 2] != b"\r\n" {
            return Err(WireError::ChunkDataUnterminated);
        }
        pos += 2;
    }
}

fn find_crlf(bytes: &[u8], from: usize) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}
