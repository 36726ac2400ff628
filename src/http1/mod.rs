//! HTTP/1.1 Message Codec
//!
//! Incremental parsing and serialization of HTTP/1.1 requests and responses.
//! Parsing is push-based: callers feed bytes as they arrive off the transport
//! and get a complete message back once framing allows it. Serialization is
//! the exact inverse, preserving header order and casing, so a relayed
//! message is byte-identical to what was received.

mod parser;

pub use parser::{Parsed, RequestParser, ResponseParser};

use crate::exchange::{HeaderList, HttpVersion, Request, Response};
use thiserror::Error;

/// Default cap on the start-line plus header block.
pub const DEFAULT_MAX_HEAD_BYTES: usize = 64 * 1024;
/// Default cap on a single header line.
pub const DEFAULT_MAX_HEADER_LINE: usize = 8 * 1024;

/// HTTP/1.1 framing violations.
///
/// Any of these reject the message outright. Framing conflicts in particular
/// are never repaired: a message carrying both Content-Length and chunked
/// transfer coding is a smuggling vector and must not produce a parse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Http1Error {
    #[error("malformed start line: {0}")]
    MalformedStartLine(String),
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    #[error("header line exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },
    #[error("header block exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },
    #[error("conflicting Content-Length and Transfer-Encoding")]
    ConflictingFraming,
    #[error("multiple Content-Length values disagree")]
    ContentLengthMismatch,
    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),
    #[error("invalid chunk size line: {0}")]
    InvalidChunkSize(String),
    #[error("unsupported HTTP version: {0}")]
    UnsupportedVersion(String),
    #[error("unexpected end of stream inside message body")]
    UnexpectedEof,
}

/// Non-fatal observations made while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseWarning {
    /// Several Content-Length headers present, all with the same value.
    RepeatedContentLength,
    /// Chunk extensions were present and discarded.
    ChunkExtensionsIgnored,
    /// Response status line had no reason phrase.
    MissingReasonPhrase,
}

/// What the connection can be used for after a complete message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPolicy {
    /// Another message may follow on the same connection.
    KeepAlive,
    /// The connection must be closed after this message.
    Close,
}

/// Progress of an incremental parse.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseStatus<T> {
    /// More bytes are required.
    NeedMore,
    /// A full message was parsed.
    Complete(T),
}

/// Tunable parser limits.
#[derive(Debug, Clone, Copy)]
pub struct Http1Limits {
    pub max_head_bytes: usize,
    pub max_header_line: usize,
}

impl Default for Http1Limits {
    fn default() -> Self {
        Self {
            max_head_bytes: DEFAULT_MAX_HEAD_BYTES,
            max_header_line: DEFAULT_MAX_HEADER_LINE,
        }
    }
}

/// Keep-alive decision for a parsed message.
///
/// HTTP/1.1 defaults to keep-alive, HTTP/1.0 to close; a `Connection`
/// header overrides either way. Close-delimited response bodies force
/// `Close` regardless.
pub fn connection_policy(version: HttpVersion, headers: &HeaderList) -> ConnectionPolicy {
    let connection = headers.get("connection").map(|v| v.to_ascii_lowercase());
    match version {
        HttpVersion::Http10 => {
            if connection.as_deref() == Some("keep-alive") {
                ConnectionPolicy::KeepAlive
            } else {
                ConnectionPolicy::Close
            }
        }
        _ => {
            if connection
                .as_deref()
                .map(|v| v.split(',').any(|t| t.trim() == "close"))
                .unwrap_or(false)
            {
                ConnectionPolicy::Close
            } else {
                ConnectionPolicy::KeepAlive
            }
        }
    }
}

fn is_chunked(headers: &HeaderList) -> bool {
    headers
        .get_all("transfer-encoding")
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case("chunked"))
}

fn write_headers(out: &mut Vec<u8>, headers: &HeaderList) {
    for header in headers.iter() {
        out.extend_from_slice(header.name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(header.value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

fn write_body(out: &mut Vec<u8>, headers: &HeaderList, body: &[u8], trailers: &HeaderList) {
    if is_chunked(headers) {
        if !body.is_empty() {
            out.extend_from_slice(format!("{:x}\r\n", body.len()).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"0\r\n");
        write_headers(out, trailers);
        out.extend_from_slice(b"\r\n");
    } else {
        out.extend_from_slice(body);
    }
}

/// Serialize a request onto the wire.
///
/// Headers go out in the order and casing they carry; chunked bodies are
/// re-framed as a single chunk followed by trailers.
pub fn serialize_request(request: &Request) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + request.body.len());
    out.extend_from_slice(request.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(request.target.as_bytes());
    out.push(b' ');
    out.extend_from_slice(request.version.as_str().as_bytes());
    out.extend_from_slice(b"\r\n");
    write_headers(&mut out, &request.headers);
    out.extend_from_slice(b"\r\n");
    write_body(&mut out, &request.headers, &request.body, &request.trailers);
    out
}

/// Serialize a response onto the wire.
pub fn serialize_response(response: &Response) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + response.body.len());
    out.extend_from_slice(response.version.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(response.status.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(response.reason.as_bytes());
    out.extend_from_slice(b"\r\n");
    write_headers(&mut out, &response.headers);
    out.extend_from_slice(b"\r\n");
    write_body(&mut out, &response.headers, &response.body, &response.trailers);
    out
}
