//! Incremental HTTP/1.1 parser.
//!
//! Push-based: feed bytes with `push`, signal stream end with `push_eof`.
//! The parser buffers unconsumed bytes internally, so pipelined messages
//! on a keep-alive connection carry over to the next parse automatically.

use super::{
    connection_policy, is_chunked, ConnectionPolicy, Http1Error, Http1Limits, ParseStatus,
    ParseWarning,
};
use crate::exchange::{HeaderList, HttpVersion, Request, Response};

/// A complete message plus what the parser learned about the connection.
#[derive(Debug, PartialEq, Eq)]
pub struct Parsed<T> {
    pub message: T,
    pub policy: ConnectionPolicy,
    pub warnings: Vec<ParseWarning>,
}

#[derive(Debug)]
enum Head {
    Request {
        method: String,
        target: String,
        version: HttpVersion,
    },
    Response {
        version: HttpVersion,
        status: u16,
        reason: String,
    },
}

#[derive(Debug)]
enum State {
    Head,
    FixedBody { remaining: usize },
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkDataEnd,
    Trailers,
    CloseDelimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Request,
    Response,
}

struct Inner {
    kind: Kind,
    limits: Http1Limits,
    buf: Vec<u8>,
    state: State,
    head: Option<Head>,
    headers: HeaderList,
    body: Vec<u8>,
    trailers: HeaderList,
    warnings: Vec<ParseWarning>,
    /// Set when the response belongs to a HEAD request and carries no body.
    head_request: bool,
}

enum Message {
    Request(Request),
    Response(Response),
}

impl Inner {
    fn new(kind: Kind, limits: Http1Limits) -> Self {
        Self {
            kind,
            limits,
            buf: Vec::new(),
            state: State::Head,
            head: None,
            headers: HeaderList::new(),
            body: Vec::new(),
            trailers: HeaderList::new(),
            warnings: Vec::new(),
            head_request: false,
        }
    }

    fn push(&mut self, data: &[u8]) -> Result<ParseStatus<Parsed<Message>>, Http1Error> {
        self.buf.extend_from_slice(data);
        self.drive()
    }

    fn push_eof(&mut self) -> Result<ParseStatus<Parsed<Message>>, Http1Error> {
        match self.state {
            State::CloseDelimited => {
                self.body.append(&mut self.buf);
                Ok(ParseStatus::Complete(self.finish(ConnectionPolicy::Close)))
            }
            State::Head if self.buf.is_empty() && self.head.is_none() => {
                // Clean close between messages.
                Ok(ParseStatus::NeedMore)
            }
            _ => Err(Http1Error::UnexpectedEof),
        }
    }

    fn drive(&mut self) -> Result<ParseStatus<Parsed<Message>>, Http1Error> {
        loop {
            match self.state {
                State::Head => {
                    let Some(head_end) = find_head_end(&self.buf) else {
                        self.check_head_limits()?;
                        return Ok(ParseStatus::NeedMore);
                    };
                    if head_end > self.limits.max_head_bytes {
                        return Err(Http1Error::HeadTooLarge {
                            limit: self.limits.max_head_bytes,
                        });
                    }
                    let head_bytes: Vec<u8> = self.buf.drain(..head_end).collect();
                    self.parse_head(&head_bytes)?;
                    if let Some(status) = self.enter_body_state()? {
                        return Ok(ParseStatus::Complete(status));
                    }
                }
                State::FixedBody { remaining } => {
                    let take = remaining.min(self.buf.len());
                    self.body.extend(self.buf.drain(..take));
                    let remaining = remaining - take;
                    if remaining > 0 {
                        self.state = State::FixedBody { remaining };
                        return Ok(ParseStatus::NeedMore);
                    }
                    let policy = self.message_policy();
                    return Ok(ParseStatus::Complete(self.finish(policy)));
                }
                State::ChunkSize => {
                    let Some(line_end) = find_crlf(&self.buf) else {
                        return Ok(ParseStatus::NeedMore);
                    };
                    let line: Vec<u8> = self.buf.drain(..line_end + 2).collect();
                    let line = &line[..line_end];
                    let size = self.parse_chunk_size(line)?;
                    if size == 0 {
                        self.state = State::Trailers;
                    } else {
                        self.state = State::ChunkData { remaining: size };
                    }
                }
                State::ChunkData { remaining } => {
                    let take = remaining.min(self.buf.len());
                    self.body.extend(self.buf.drain(..take));
                    let remaining = remaining - take;
                    if remaining > 0 {
                        self.state = State::ChunkData { remaining };
                        return Ok(ParseStatus::NeedMore);
                    }
                    self.state = State::ChunkDataEnd;
                }
                State::ChunkDataEnd => {
                    if self.buf.len() < 2 {
                        return Ok(ParseStatus::NeedMore);
                    }
                    if &self.buf[..2] != b"\r\n" {
                        return Err(Http1Error::InvalidChunkSize(
                            "missing CRLF after chunk data".to_string(),
                        ));
                    }
                    self.buf.drain(..2);
                    self.state = State::ChunkSize;
                }
                State::Trailers => {
                    let Some(line_end) = find_crlf(&self.buf) else {
                        return Ok(ParseStatus::NeedMore);
                    };
                    let line: Vec<u8> = self.buf.drain(..line_end + 2).collect();
                    let line = &line[..line_end];
                    if line.is_empty() {
                        let policy = self.message_policy();
                        return Ok(ParseStatus::Complete(self.finish(policy)));
                    }
                    let (name, value) = parse_header_line(line)?;
                    self.trailers.push(name, value);
                }
                State::CloseDelimited => {
                    self.body.append(&mut self.buf);
                    return Ok(ParseStatus::NeedMore);
                }
            }
        }
    }

    /// Reject oversized heads before the terminating blank line arrives.
    fn check_head_limits(&self) -> Result<(), Http1Error> {
        if self.buf.len() > self.limits.max_head_bytes {
            return Err(Http1Error::HeadTooLarge {
                limit: self.limits.max_head_bytes,
            });
        }
        let tail = match self.buf.iter().rposition(|&b| b == b'\n') {
            Some(idx) => self.buf.len() - idx - 1,
            None => self.buf.len(),
        };
        if tail > self.limits.max_header_line {
            return Err(Http1Error::HeaderTooLarge {
                limit: self.limits.max_header_line,
            });
        }
        Ok(())
    }

    fn parse_head(&mut self, head: &[u8]) -> Result<(), Http1Error> {
        let mut lines = head.split(|&b| b == b'\n').map(|line| {
            line.strip_suffix(b"\r").unwrap_or(line)
        });
        let start = lines.next().unwrap_or(b"");
        let start = std::str::from_utf8(start)
            .map_err(|_| Http1Error::MalformedStartLine("not valid UTF-8".to_string()))?;
        self.head = Some(match self.kind {
            Kind::Request => self.parse_request_line(start)?,
            Kind::Response => self.parse_status_line(start)?,
        });

        for line in lines {
            if line.is_empty() {
                continue;
            }
            if line.len() > self.limits.max_header_line {
                return Err(Http1Error::HeaderTooLarge {
                    limit: self.limits.max_header_line,
                });
            }
            let (name, value) = parse_header_line(line)?;
            self.headers.push(name, value);
        }
        Ok(())
    }

    fn parse_request_line(&self, line: &str) -> Result<Head, Http1Error> {
        let mut parts = line.split(' ');
        let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v), None) if !m.is_empty() && !t.is_empty() => (m, t, v),
            _ => return Err(Http1Error::MalformedStartLine(line.to_string())),
        };
        Ok(Head::Request {
            method: method.to_string(),
            target: target.to_string(),
            version: parse_version(version)?,
        })
    }

    fn parse_status_line(&mut self, line: &str) -> Result<Head, Http1Error> {
        let mut parts = line.splitn(3, ' ');
        let version = parts
            .next()
            .ok_or_else(|| Http1Error::MalformedStartLine(line.to_string()))?;
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .filter(|s| (100..=999).contains(s))
            .ok_or_else(|| Http1Error::MalformedStartLine(line.to_string()))?;
        let reason = parts.next().unwrap_or("").to_string();
        if reason.is_empty() {
            self.warnings.push(ParseWarning::MissingReasonPhrase);
        }
        Ok(Head::Response {
            version: parse_version(version)?,
            status,
            reason,
        })
    }

    /// Decide body framing from the parsed head. Returns a completed parse
    /// for bodyless messages.
    fn enter_body_state(&mut self) -> Result<Option<Parsed<Message>>, Http1Error> {
        let content_length = self.content_length()?;
        let chunked = is_chunked(&self.headers);
        if self.headers.contains("transfer-encoding") && content_length.is_some() {
            return Err(Http1Error::ConflictingFraming);
        }

        let bodyless_response = match self.head {
            Some(Head::Response { status, .. }) => {
                self.head_request || status / 100 == 1 || status == 204 || status == 304
            }
            _ => false,
        };

        if chunked && !bodyless_response {
            self.state = State::ChunkSize;
            return Ok(None);
        }
        if let Some(length) = content_length {
            if length > 0 && !bodyless_response {
                self.state = State::FixedBody { remaining: length };
                return Ok(None);
            }
        }
        if self.kind == Kind::Response && content_length.is_none() && !bodyless_response {
            self.state = State::CloseDelimited;
            return Ok(None);
        }
        let policy = self.message_policy();
        Ok(Some(self.finish(policy)))
    }

    /// All Content-Length values, across repeated headers and comma lists,
    /// must agree on one number.
    fn content_length(&mut self) -> Result<Option<usize>, Http1Error> {
        let mut seen: Option<usize> = None;
        let mut count = 0usize;
        for value in self.headers.get_all("content-length") {
            for part in value.split(',') {
                let part = part.trim();
                let parsed: usize = part
                    .parse()
                    .map_err(|_| Http1Error::InvalidContentLength(part.to_string()))?;
                count += 1;
                match seen {
                    Some(existing) if existing != parsed => {
                        return Err(Http1Error::ContentLengthMismatch)
                    }
                    _ => seen = Some(parsed),
                }
            }
        }
        if count > 1 {
            self.warnings.push(ParseWarning::RepeatedContentLength);
        }
        Ok(seen)
    }

    fn parse_chunk_size(&mut self, line: &[u8]) -> Result<usize, Http1Error> {
        let line = std::str::from_utf8(line)
            .map_err(|_| Http1Error::InvalidChunkSize("not valid UTF-8".to_string()))?;
        let size_part = match line.split_once(';') {
            Some((size, _ext)) => {
                self.warnings.push(ParseWarning::ChunkExtensionsIgnored);
                size
            }
            None => line,
        };
        usize::from_str_radix(size_part.trim(), 16)
            .map_err(|_| Http1Error::InvalidChunkSize(line.to_string()))
    }

    fn message_policy(&self) -> ConnectionPolicy {
        if matches!(self.state, State::CloseDelimited) {
            return ConnectionPolicy::Close;
        }
        let version = match self.head {
            Some(Head::Request { version, .. }) | Some(Head::Response { version, .. }) => version,
            None => HttpVersion::Http11,
        };
        connection_policy(version, &self.headers)
    }

    fn finish(&mut self, policy: ConnectionPolicy) -> Parsed<Message> {
        let head = self.head.take().expect("finish called without a head");
        let headers = std::mem::take(&mut self.headers);
        let body = std::mem::take(&mut self.body);
        let trailers = std::mem::take(&mut self.trailers);
        let warnings = std::mem::take(&mut self.warnings);
        self.state = State::Head;
        self.head_request = false;

        let message = match head {
            Head::Request {
                method,
                target,
                version,
            } => Message::Request(Request {
                method,
                target,
                version,
                headers,
                body,
                trailers,
            }),
            Head::Response {
                version,
                status,
                reason,
            } => Message::Response(Response {
                version,
                status,
                reason,
                headers,
                body,
                trailers,
            }),
        };
        Parsed {
            message,
            policy,
            warnings,
        }
    }
}

fn parse_version(version: &str) -> Result<HttpVersion, Http1Error> {
    match version {
        "HTTP/1.1" => Ok(HttpVersion::Http11),
        "HTTP/1.0" => Ok(HttpVersion::Http10),
        other => Err(Http1Error::UnsupportedVersion(other.to_string())),
    }
}

fn parse_header_line(line: &[u8]) -> Result<(String, String), Http1Error> {
    let line = std::str::from_utf8(line)
        .map_err(|_| Http1Error::MalformedHeader("not valid UTF-8".to_string()))?;
    if line.starts_with(' ') || line.starts_with('\t') {
        // Obsolete line folding is a smuggling vector.
        return Err(Http1Error::MalformedHeader(line.to_string()));
    }
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| Http1Error::MalformedHeader(line.to_string()))?;
    if name.is_empty() || name.contains(' ') || name.contains('\t') {
        return Err(Http1Error::MalformedHeader(line.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Byte offset just past the head's terminating blank line, if present.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Incremental request parser for one connection.
pub struct RequestParser {
    inner: Inner,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::with_limits(Http1Limits::default())
    }

    pub fn with_limits(limits: Http1Limits) -> Self {
        Self {
            inner: Inner::new(Kind::Request, limits),
        }
    }

    pub fn push(&mut self, data: &[u8]) -> Result<ParseStatus<Parsed<Request>>, Http1Error> {
        map_request(self.inner.push(data))
    }

    pub fn push_eof(&mut self) -> Result<ParseStatus<Parsed<Request>>, Http1Error> {
        map_request(self.inner.push_eof())
    }

    /// Bytes buffered but not yet part of a completed message.
    pub fn buffered(&self) -> usize {
        self.inner.buf.len()
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental response parser for one connection.
pub struct ResponseParser {
    inner: Inner,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::with_limits(Http1Limits::default())
    }

    pub fn with_limits(limits: Http1Limits) -> Self {
        Self {
            inner: Inner::new(Kind::Response, limits),
        }
    }

    /// Mark the next response as belonging to a HEAD request, which never
    /// carries a body regardless of framing headers.
    pub fn expect_head_response(&mut self) {
        self.inner.head_request = true;
    }

    pub fn push(&mut self, data: &[u8]) -> Result<ParseStatus<Parsed<Response>>, Http1Error> {
        map_response(self.inner.push(data))
    }

    pub fn push_eof(&mut self) -> Result<ParseStatus<Parsed<Response>>, Http1Error> {
        map_response(self.inner.push_eof())
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

fn map_request(
    result: Result<ParseStatus<Parsed<Message>>, Http1Error>,
) -> Result<ParseStatus<Parsed<Request>>, Http1Error> {
    Ok(match result? {
        ParseStatus::NeedMore => ParseStatus::NeedMore,
        ParseStatus::Complete(parsed) => match parsed.message {
            Message::Request(request) => ParseStatus::Complete(Parsed {
                message: request,
                policy: parsed.policy,
                warnings: parsed.warnings,
            }),
            Message::Response(_) => unreachable!("request parser produced a response"),
        },
    })
}

fn map_response(
    result: Result<ParseStatus<Parsed<Message>>, Http1Error>,
) -> Result<ParseStatus<Parsed<Response>>, Http1Error> {
    Ok(match result? {
        ParseStatus::NeedMore => ParseStatus::NeedMore,
        ParseStatus::Complete(parsed) => match parsed.message {
            Message::Response(response) => ParseStatus::Complete(Parsed {
                message: response,
                policy: parsed.policy,
                warnings: parsed.warnings,
            }),
            Message::Request(_) => unreachable!("response parser produced a request"),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http1::{serialize_request, serialize_response};

    fn complete_request(wire: &[u8]) -> Parsed<Request> {
        let mut parser = RequestParser::new();
        match parser.push(wire).unwrap() {
            ParseStatus::Complete(parsed) => parsed,
            ParseStatus::NeedMore => panic!("expected complete message"),
        }
    }

    fn complete_response(wire: &[u8]) -> Parsed<Response> {
        let mut parser = ResponseParser::new();
        match parser.push(wire).unwrap() {
            ParseStatus::Complete(parsed) => parsed,
            ParseStatus::NeedMore => panic!("expected complete message"),
        }
    }

    #[test]
    fn test_parse_simple_get() {
        let parsed = complete_request(b"GET /foo HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert_eq!(parsed.message.method, "GET");
        assert_eq!(parsed.message.target, "/foo");
        assert_eq!(parsed.message.headers.get("host"), Some("example.com"));
        assert!(parsed.message.body.is_empty());
        assert_eq!(parsed.policy, ConnectionPolicy::KeepAlive);
    }

    #[test]
    fn test_parse_request_content_length_body() {
        let parsed =
            complete_request(b"POST /submit HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhello");
        assert_eq!(parsed.message.body, b"hello");
    }

    #[test]
    fn test_incremental_delivery_byte_at_a_time() {
        let wire = b"POST /x HTTP/1.1\r\nHost: a\r\nContent-Length: 3\r\n\r\nabc";
        let mut parser = RequestParser::new();
        for &byte in &wire[..wire.len() - 1] {
            assert_eq!(parser.push(&[byte]).unwrap(), ParseStatus::NeedMore);
        }
        match parser.push(&[wire[wire.len() - 1]]).unwrap() {
            ParseStatus::Complete(parsed) => assert_eq!(parsed.message.body, b"abc"),
            ParseStatus::NeedMore => panic!("expected complete message"),
        }
    }

    #[test]
    fn test_chunked_body_with_trailers() {
        let parsed = complete_response(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nwiki\r\n5\r\npedia\r\n0\r\nX-Sum: ok\r\n\r\n",
        );
        assert_eq!(parsed.message.body, b"wikipedia");
        assert_eq!(parsed.message.trailers.get("x-sum"), Some("ok"));
    }

    #[test]
    fn test_chunk_extensions_warn_and_parse() {
        let parsed = complete_response(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2;ext=1\r\nhi\r\n0\r\n\r\n",
        );
        assert_eq!(parsed.message.body, b"hi");
        assert!(parsed
            .warnings
            .contains(&ParseWarning::ChunkExtensionsIgnored));
    }

    #[test]
    fn test_conflicting_framing_rejected() {
        let mut parser = RequestParser::new();
        let result = parser.push(
            b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n",
        );
        assert_eq!(result, Err(Http1Error::ConflictingFraming));
    }

    #[test]
    fn test_disagreeing_content_lengths_rejected() {
        let mut parser = RequestParser::new();
        let result =
            parser.push(b"POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 6\r\n\r\n");
        assert_eq!(result, Err(Http1Error::ContentLengthMismatch));
    }

    #[test]
    fn test_repeated_equal_content_lengths_warn() {
        let parsed =
            complete_request(b"POST / HTTP/1.1\r\nContent-Length: 2\r\nContent-Length: 2\r\n\r\nhi");
        assert_eq!(parsed.message.body, b"hi");
        assert!(parsed
            .warnings
            .contains(&ParseWarning::RepeatedContentLength));
    }

    #[test]
    fn test_obsolete_line_folding_rejected() {
        let mut parser = RequestParser::new();
        let result = parser.push(b"GET / HTTP/1.1\r\nX-A: 1\r\n continued\r\n\r\n");
        assert!(matches!(result, Err(Http1Error::MalformedHeader(_))));
    }

    #[test]
    fn test_header_line_limit_enforced() {
        let mut parser = RequestParser::with_limits(Http1Limits {
            max_head_bytes: 1024,
            max_header_line: 64,
        });
        let mut wire = b"GET / HTTP/1.1\r\nX-Long: ".to_vec();
        wire.extend(std::iter::repeat(b'a').take(100));
        let result = parser.push(&wire);
        assert_eq!(result, Err(Http1Error::HeaderTooLarge { limit: 64 }));
    }

    #[test]
    fn test_close_delimited_response() {
        let mut parser = ResponseParser::new();
        assert_eq!(
            parser.push(b"HTTP/1.1 200 OK\r\n\r\npartial").unwrap(),
            ParseStatus::NeedMore
        );
        assert_eq!(parser.push(b" body").unwrap(), ParseStatus::NeedMore);
        match parser.push_eof().unwrap() {
            ParseStatus::Complete(parsed) => {
                assert_eq!(parsed.message.body, b"partial body");
                assert_eq!(parsed.policy, ConnectionPolicy::Close);
            }
            ParseStatus::NeedMore => panic!("expected complete message"),
        }
    }

    #[test]
    fn test_eof_mid_body_is_error() {
        let mut parser = ResponseParser::new();
        parser
            .push(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc")
            .unwrap();
        assert_eq!(parser.push_eof(), Err(Http1Error::UnexpectedEof));
    }

    #[test]
    fn test_head_response_has_no_body() {
        let mut parser = ResponseParser::new();
        parser.expect_head_response();
        match parser
            .push(b"HTTP/1.1 200 OK\r\nContent-Length: 123\r\n\r\n")
            .unwrap()
        {
            ParseStatus::Complete(parsed) => assert!(parsed.message.body.is_empty()),
            ParseStatus::NeedMore => panic!("expected complete message"),
        }
    }

    #[test]
    fn test_204_response_has_no_body() {
        let parsed = complete_response(b"HTTP/1.1 204 No Content\r\n\r\n");
        assert_eq!(parsed.message.status, 204);
        assert!(parsed.message.body.is_empty());
    }

    #[test]
    fn test_pipelined_requests_carry_over() {
        let mut parser = RequestParser::new();
        let wire = b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n";
        let first = match parser.push(wire).unwrap() {
            ParseStatus::Complete(parsed) => parsed.message,
            ParseStatus::NeedMore => panic!("expected first message"),
        };
        assert_eq!(first.target, "/a");
        let second = match parser.push(&[]).unwrap() {
            ParseStatus::Complete(parsed) => parsed.message,
            ParseStatus::NeedMore => panic!("expected second message"),
        };
        assert_eq!(second.target, "/b");
    }

    #[test]
    fn test_request_round_trip() {
        let mut request = Request::new("POST", "/api/v1/items?sort=asc");
        request.headers.push("Host", "api.example.com");
        request.headers.push("Content-Length", "4");
        request.headers.push("X-Mixed-CASE", "kept");
        request.body = b"data".to_vec();

        let reparsed = complete_request(&serialize_request(&request)).message;
        assert_eq!(reparsed, request);
    }

    #[test]
    fn test_response_round_trip_chunked() {
        let mut response = Response::new(200);
        response.reason = "OK".to_string();
        response.headers.push("Transfer-Encoding", "chunked");
        response.body = b"payload".to_vec();
        response.trailers.push("X-Trailer", "v");

        let reparsed = complete_response(&serialize_response(&response)).message;
        assert_eq!(reparsed, response);
    }

    #[test]
    fn test_connect_request_parses() {
        let parsed = complete_request(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n");
        assert_eq!(parsed.message.method, "CONNECT");
        assert_eq!(parsed.message.target, "example.com:443");
    }

    #[test]
    fn test_malformed_start_line_rejected() {
        let mut parser = RequestParser::new();
        assert!(matches!(
            parser.push(b"GET/foo\r\n\r\n"),
            Err(Http1Error::MalformedStartLine(_))
        ));
    }
}
