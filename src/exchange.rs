//! Exchange Data Model
//!
//! Core request/response types shared by the codecs, the capture pipeline
//! and the sink. Headers preserve raw wire casing and ordering so that a
//! serialized message is byte-identical to what was parsed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single header field as it appeared on the wire.
///
/// `name` keeps the original casing; lookups compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Ordered header list with case-insensitive lookup helpers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderList(pub Vec<Header>);

impl HeaderList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Header::new(name, value));
    }

    /// First value for `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|h| h.is(name)).map(|h| h.value.as_str())
    }

    /// All values for `name`, case-insensitive, in wire order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.0.iter().filter(move |h| h.is(name)).map(|h| h.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|h| h.is(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Application-level protocol the exchange was carried over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpVersion {
    Http10,
    Http11,
    H2,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
            HttpVersion::H2 => "HTTP/2",
        }
    }
}

/// A parsed request message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    /// Request target exactly as received (origin-form, absolute-form or
    /// authority-form for CONNECT).
    pub target: String,
    pub version: HttpVersion,
    pub headers: HeaderList,
    pub body: Vec<u8>,
    /// Trailer fields received after a chunked body, if any.
    pub trailers: HeaderList,
}

impl Request {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            version: HttpVersion::Http11,
            headers: HeaderList::new(),
            body: Vec::new(),
            trailers: HeaderList::new(),
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.headers.get("host")
    }
}

/// A parsed response message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub version: HttpVersion,
    pub status: u16,
    /// Reason phrase exactly as received; empty for HTTP/2.
    pub reason: String,
    pub headers: HeaderList,
    pub body: Vec<u8>,
    pub trailers: HeaderList,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            version: HttpVersion::Http11,
            status,
            reason: String::new(),
            headers: HeaderList::new(),
            body: Vec::new(),
            trailers: HeaderList::new(),
        }
    }
}

/// Tool that originated an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolTag {
    Proxy,
    Replay,
    Fuzzer,
}

/// How an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeOutcome {
    /// Response fully relayed to the client.
    Completed,
    /// Connection dropped before the response completed.
    Aborted,
    /// Upstream could not be reached; a synthesized error was returned.
    UpstreamFailed,
}

/// A completed request/response pair ready for the capture pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub id: Uuid,
    /// Hostname the request was sent to, without port.
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    pub tool: ToolTag,
    pub request: Request,
    pub response: Option<Response>,
    pub outcome: ExchangeOutcome,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// True when one or both bodies were cut at the configured limit.
    pub truncated: bool,
}

impl Exchange {
    pub fn new(host: impl Into<String>, port: u16, scheme: Scheme, request: Request) -> Self {
        Self {
            id: Uuid::new_v4(),
            host: host.into(),
            port,
            scheme,
            tool: ToolTag::Proxy,
            request,
            response: None,
            outcome: ExchangeOutcome::Aborted,
            started_at: Utc::now(),
            completed_at: None,
            truncated: false,
        }
    }

    pub fn complete(&mut self, response: Response) {
        self.response = Some(response);
        self.outcome = ExchangeOutcome::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail_upstream(&mut self, response: Response) {
        self.response = Some(response);
        self.outcome = ExchangeOutcome::UpstreamFailed;
        self.completed_at = Some(Utc::now());
    }

    /// Path portion of the request target, used by path-targeted scope rules.
    pub fn path(&self) -> &str {
        let target = self.request.target.as_str();
        if target.starts_with('/') {
            return target;
        }
        // Absolute-form: strip scheme and authority.
        if let Some(rest) = target.splitn(2, "://").nth(1) {
            if let Some(idx) = rest.find('/') {
                return &rest[idx..];
            }
        }
        "/"
    }
}

/// URL scheme of the intercepted traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}
