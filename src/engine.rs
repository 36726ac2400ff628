//! Proxy Engine
//!
//! Accepts client connections and drives them through the interception
//! path: CONNECT handling, TLS termination toward the client with a forged
//! leaf, an independent TLS session toward the real upstream, protocol
//! selection from ALPN, and the bidirectional relay loops for HTTP/1.1 and
//! HTTP/2. Scope and capture filters gate persistence only; bytes are
//! relayed regardless.

use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::ProxyConfig;
use crate::exchange::{Exchange, HttpVersion, Request, Response, Scheme};
use crate::filter::FilterHandle;
use crate::http1::{
    serialize_request, serialize_response, ConnectionPolicy, Http1Error, Parsed, ParseStatus,
    RequestParser, ResponseParser,
};
use crate::http2::frame::{encode_goaway, encode_rst_stream, GoAwayFrame};
use crate::http2::{ConnectionState, Direction, FrameDecoder, Http2Error, StreamEvent};
use crate::scope::ScopeHandle;
use crate::sink::{ExchangeRecord, SinkHandle};
use crate::socks::{socks_connect, SocksError};
use crate::tls::authority::{Authority, AuthorityError};
use crate::tls::{leaf_server_config, upstream_client_config};
use crate::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Authority(#[from] AuthorityError),
    #[error(transparent)]
    Socks(#[from] SocksError),
    #[error("HTTP/1.1 protocol violation: {0}")]
    Http1(#[from] Http1Error),
    #[error("HTTP/2 protocol violation: {0}")]
    Http2(#[from] Http2Error),
    #[error("malformed CONNECT target: {0}")]
    BadConnectTarget(String),
    #[error("client closed connection")]
    ClientClosed,
}

type SharedWrite = Arc<Mutex<WriteHalf<Transport>>>;

/// The orchestrator. Construct once, share behind `Arc`, call `run`.
pub struct ProxyEngine {
    config: ProxyConfig,
    authority: Arc<Authority>,
    scope: Arc<ScopeHandle>,
    filters: Arc<FilterHandle>,
    sink: SinkHandle,
    upstream_tls: Arc<rustls::ClientConfig>,
}

impl ProxyEngine {
    pub fn new(
        config: ProxyConfig,
        authority: Arc<Authority>,
        scope: Arc<ScopeHandle>,
        filters: Arc<FilterHandle>,
        sink: SinkHandle,
    ) -> Self {
        let upstream_tls = upstream_client_config(vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
        Self {
            config,
            authority,
            scope,
            filters,
            sink,
            upstream_tls,
        }
    }

    /// Bind the configured listening endpoint.
    pub async fn bind(&self) -> Result<(TcpListener, std::net::SocketAddr), EngineError> {
        let listener =
            TcpListener::bind((self.config.listen_host.as_str(), self.config.listen_port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "proxy listening");
        Ok((listener, addr))
    }

    /// Accept loop; one task per client connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let engine = self.clone();
                    tokio::spawn(async move {
                        debug!(%peer, "client connected");
                        if let Err(e) = engine.handle_connection(stream).await {
                            match e {
                                EngineError::ClientClosed => {}
                                other => debug!(%peer, error = %other, "connection ended"),
                            }
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<(), EngineError> {
        let (listener, _) = self.bind().await?;
        self.serve(listener).await;
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> Result<(), EngineError> {
        stream.set_nodelay(true).ok();
        let mut client = Transport::Plain(stream);

        // First message decides between CONNECT tunneling and plain
        // forward-proxy traffic.
        let mut parser = RequestParser::with_limits(self.config.http1_limits);
        let parsed = match self.read_request(&mut client, &mut parser).await {
            Ok(parsed) => parsed,
            Err(EngineError::Http1(e)) => {
                let response = synthesize_error(400, "Bad Request", &e.to_string());
                client.write_all(&serialize_response(&response)).await.ok();
                return Err(EngineError::Http1(e));
            }
            Err(other) => return Err(other),
        };

        if parsed.message.method.eq_ignore_ascii_case("CONNECT") {
            self.handle_connect(client, parsed.message).await
        } else {
            self.handle_plain(client, parser, parsed).await
        }
    }

    async fn read_request(
        &self,
        client: &mut Transport,
        parser: &mut RequestParser,
    ) -> Result<Parsed<Request>, EngineError> {
        let mut buf = [0u8; 8192];
        loop {
            if let ParseStatus::Complete(parsed) = parser.push(&[])? {
                return Ok(parsed);
            }
            let n = timeout(self.config.timeouts.idle_read(), client.read(&mut buf))
                .await
                .map_err(|_| {
                    EngineError::Transport(TransportError::Timeout(
                        self.config.timeouts.idle_read(),
                    ))
                })??;
            if n == 0 {
                return Err(EngineError::ClientClosed);
            }
            if let ParseStatus::Complete(parsed) = parser.push(&buf[..n])? {
                return Ok(parsed);
            }
        }
    }

    /// CONNECT: establish the tunnel, then either intercept or relay
    /// opaquely.
    async fn handle_connect(
        self: Arc<Self>,
        mut client: Transport,
        request: Request,
    ) -> Result<(), EngineError> {
        let (host, port) = parse_authority(&request.target, 443)
            .ok_or_else(|| EngineError::BadConnectTarget(request.target.clone()))?;

        // An explicit scope exclusion opts the host out of interception
        // entirely, pinned clients included. Unlisted hosts are still
        // intercepted; only their capture is scope-gated.
        let intercept = self.config.intercept_tls && !self.scope.snapshot().excludes(&host, "/");
        info!(host, port, intercept, "CONNECT");

        // Upstream leg first; failure becomes a 502 before any TLS work.
        let upstream = match self.dial_upstream(&host, port).await {
            Ok(upstream) => upstream,
            Err(e) => {
                let response =
                    synthesize_error(502, "Bad Gateway", &format!("upstream unreachable: {e}"));
                client.write_all(&serialize_response(&response)).await.ok();
                return Err(e);
            }
        };

        client
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await?;

        if !intercept {
            return self.relay_opaque(client, upstream).await;
        }

        // Upstream handshake settles the protocol; the client leg then
        // offers exactly that, so both legs always agree.
        let upstream = upstream
            .into_tls_client(
                self.upstream_tls.clone(),
                &host,
                self.config.timeouts.tls_handshake(),
            )
            .await?;
        let use_h2 = upstream.alpn_protocol() == Some(b"h2".as_slice());
        let client_alpn = if use_h2 {
            vec![b"h2".to_vec()]
        } else {
            vec![b"http/1.1".to_vec()]
        };

        let leaf = self.authority.issue(&host).await?;
        let server_config = leaf_server_config(&self.authority, &leaf, client_alpn)?;
        let client = client
            .into_tls_server(server_config, self.config.timeouts.tls_handshake())
            .await?;

        debug!(host, h2 = use_h2, "both TLS legs established");
        if use_h2 {
            self.relay_h2(client, upstream, host, port).await
        } else {
            self.relay_h1(client, upstream, host, port, Scheme::Https, None)
                .await
        }
    }

    /// Plain forward-proxy traffic: absolute-form requests over cleartext.
    async fn handle_plain(
        self: Arc<Self>,
        client: Transport,
        parser: RequestParser,
        parsed: Parsed<Request>,
    ) -> Result<(), EngineError> {
        let (host, port) = request_host_port(&parsed.message, 80).ok_or_else(|| {
            EngineError::BadConnectTarget(parsed.message.target.clone())
        })?;
        let upstream = match self.dial_upstream(&host, port).await {
            Ok(upstream) => upstream,
            Err(e) => {
                let mut client = client;
                let response =
                    synthesize_error(502, "Bad Gateway", &format!("upstream unreachable: {e}"));
                client.write_all(&serialize_response(&response)).await.ok();
                self.emit_upstream_failure(&host, port, Scheme::Http, parsed.message, response)
                    .await;
                return Err(e);
            }
        };
        self.relay_h1_with_parser(client, upstream, host, port, Scheme::Http, parser, Some(parsed))
            .await
    }

    async fn dial_upstream(&self, host: &str, port: u16) -> Result<Transport, EngineError> {
        match &self.config.socks {
            Some(socks) => {
                let mut transport = Transport::connect(
                    &socks.host,
                    socks.port,
                    self.config.timeouts.connect(),
                )
                .await?;
                socks_connect(&mut transport, socks.version, &socks.auth, host, port).await?;
                Ok(transport)
            }
            None => {
                Ok(Transport::connect(host, port, self.config.timeouts.connect()).await?)
            }
        }
    }

    /// Message-by-message HTTP/1.1 relay with keep-alive.
    async fn relay_h1(
        self: Arc<Self>,
        client: Transport,
        upstream: Transport,
        host: String,
        port: u16,
        scheme: Scheme,
        initial: Option<Parsed<Request>>,
    ) -> Result<(), EngineError> {
        let parser = RequestParser::with_limits(self.config.http1_limits);
        self.relay_h1_with_parser(client, upstream, host, port, scheme, parser, initial)
            .await
    }

    /// The parser carries over so bytes from pipelined requests already read
    /// off the socket are not lost.
    #[allow(clippy::too_many_arguments)]
    async fn relay_h1_with_parser(
        self: Arc<Self>,
        mut client: Transport,
        mut upstream: Transport,
        host: String,
        port: u16,
        scheme: Scheme,
        mut request_parser: RequestParser,
        mut initial: Option<Parsed<Request>>,
    ) -> Result<(), EngineError> {
        loop {
            let parsed = match initial.take() {
                Some(parsed) => parsed,
                None => match self.read_request(&mut client, &mut request_parser).await {
                    Ok(parsed) => parsed,
                    Err(EngineError::ClientClosed) => return Ok(()),
                    Err(e) => return Err(e),
                },
            };
            let request_policy = parsed.policy;
            let mut request = parsed.message;
            let is_head = request.method.eq_ignore_ascii_case("HEAD");

            // Forward origin-form regardless of how the client addressed us.
            if !request.target.starts_with('/') && !request.method.eq_ignore_ascii_case("OPTIONS")
            {
                request.target = origin_form(&request.target);
            }

            let mut exchange = Exchange::new(host.clone(), port, scheme, request.clone());
            upstream.write_all(&serialize_request(&request)).await?;

            let response = match self.read_response(&mut upstream, is_head).await {
                Ok(parsed) => parsed,
                Err(e) => {
                    let response =
                        synthesize_error(502, "Bad Gateway", &format!("upstream failed: {e}"));
                    client.write_all(&serialize_response(&response)).await.ok();
                    exchange.fail_upstream(response);
                    self.emit(exchange).await;
                    return Err(e);
                }
            };
            let response_policy = response.policy;
            client
                .write_all(&serialize_response(&response.message))
                .await?;
            exchange.complete(response.message);
            self.emit(exchange).await;

            if request_policy == ConnectionPolicy::Close
                || response_policy == ConnectionPolicy::Close
            {
                return Ok(());
            }
        }
    }

    async fn read_response(
        &self,
        upstream: &mut Transport,
        head_request: bool,
    ) -> Result<Parsed<Response>, EngineError> {
        let mut parser = ResponseParser::with_limits(self.config.http1_limits);
        if head_request {
            parser.expect_head_response();
        }
        let mut buf = [0u8; 8192];
        loop {
            let n = timeout(self.config.timeouts.idle_read(), upstream.read(&mut buf))
                .await
                .map_err(|_| {
                    EngineError::Transport(TransportError::Timeout(
                        self.config.timeouts.idle_read(),
                    ))
                })??;
            if n == 0 {
                if let ParseStatus::Complete(parsed) = parser.push_eof()? {
                    return Ok(parsed);
                }
                return Err(EngineError::Http1(Http1Error::UnexpectedEof));
            }
            if let ParseStatus::Complete(parsed) = parser.push(&buf[..n])? {
                return Ok(parsed);
            }
        }
    }

    /// Frame-level HTTP/2 relay. Raw bytes pass through unchanged in both
    /// directions (preserving HPACK state end to end) while a shared
    /// `ConnectionState` observes every frame for protocol violations and
    /// exchange assembly. Each direction runs as its own task so a slow
    /// writer on one side never stalls the other.
    async fn relay_h2(
        self: Arc<Self>,
        client: Transport,
        upstream: Transport,
        host: String,
        port: u16,
    ) -> Result<(), EngineError> {
        let (client_read, client_write) = tokio::io::split(client);
        let (upstream_read, upstream_write) = tokio::io::split(upstream);
        let client_write = Arc::new(Mutex::new(client_write));
        let upstream_write = Arc::new(Mutex::new(upstream_write));
        let conn = Arc::new(Mutex::new(ConnectionState::new()));

        let mut client_decoder = FrameDecoder::new();
        let mut upstream_decoder = FrameDecoder::without_preface();
        // Generous decode caps; the endpoints enforce their own.
        client_decoder.set_max_frame_size(16_777_215);
        upstream_decoder.set_max_frame_size(16_777_215);

        let mut from_client = tokio::spawn(self.clone().pump_h2(
            Direction::ClientToServer,
            client_read,
            upstream_write.clone(),
            client_write.clone(),
            conn.clone(),
            client_decoder,
            host.clone(),
            port,
        ));
        let mut from_upstream = tokio::spawn(self.clone().pump_h2(
            Direction::ServerToClient,
            upstream_read,
            client_write,
            upstream_write,
            conn,
            upstream_decoder,
            host,
            port,
        ));

        // Whichever direction finishes first decides the outcome; the other
        // half is torn down with it.
        let result = tokio::select! {
            r = &mut from_client => {
                from_upstream.abort();
                r
            }
            r = &mut from_upstream => {
                from_client.abort();
                r
            }
        };
        result.unwrap_or(Ok(()))
    }

    /// One relay direction. Peer bytes are forwarded only on whole-frame
    /// (and preface) boundaries, so frames this end injects never land
    /// inside a partially transmitted peer frame.
    #[allow(clippy::too_many_arguments)]
    async fn pump_h2(
        self: Arc<Self>,
        direction: Direction,
        mut source: ReadHalf<Transport>,
        forward: SharedWrite,
        back: SharedWrite,
        conn: Arc<Mutex<ConnectionState>>,
        mut decoder: FrameDecoder,
        host: String,
        port: u16,
    ) -> Result<(), EngineError> {
        let mut buf = vec![0u8; 16 * 1024];
        let mut staged = BytesMut::new();

        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                debug!(host, ?direction, "h2 peer closed");
                return Ok(());
            }
            decoder.push(&buf[..n]);
            staged.extend_from_slice(&buf[..n]);

            loop {
                let frame = match decoder.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        // Consumed preface bytes still go out; a trailing
                        // partial frame stays staged for the next read.
                        self.forward_consumed(&mut staged, &decoder, &forward).await?;
                        break;
                    }
                    Err(e) => {
                        error!(host, error = %e, "h2 framing error, closing with GOAWAY");
                        let goaway = encode_goaway(&GoAwayFrame {
                            last_stream_id: 0,
                            error_code: error_code_of(&e),
                            debug_data: Vec::new(),
                        });
                        forward.lock().await.write_all(&goaway).await.ok();
                        back.lock().await.write_all(&goaway).await.ok();
                        return Err(EngineError::Http2(e));
                    }
                };
                self.forward_consumed(&mut staged, &decoder, &forward).await?;

                let applied = conn.lock().await.apply(direction, &frame);
                match applied {
                    Ok(events) => {
                        for event in events {
                            self.handle_h2_event(event, &host, port).await;
                        }
                    }
                    Err(Http2Error::Stream {
                        stream_id, code, ..
                    }) => {
                        // Stream-level violation dooms only that stream.
                        warn!(host, stream_id, code = ?code, "h2 stream error");
                        let rst = encode_rst_stream(stream_id, code.as_u32());
                        forward.lock().await.write_all(&rst).await.ok();
                        back.lock().await.write_all(&rst).await.ok();
                    }
                    Err(e) => {
                        error!(host, error = %e, "h2 connection error, closing with GOAWAY");
                        let goaway = encode_goaway(&GoAwayFrame {
                            last_stream_id: 0,
                            error_code: error_code_of(&e),
                            debug_data: Vec::new(),
                        });
                        forward.lock().await.write_all(&goaway).await.ok();
                        back.lock().await.write_all(&goaway).await.ok();
                        return Err(EngineError::Http2(e));
                    }
                }
            }
        }
    }

    /// Flush the staged bytes the decoder has fully consumed. Consumption
    /// always stops on a frame or preface boundary, so the write never
    /// splits a frame.
    async fn forward_consumed(
        &self,
        staged: &mut BytesMut,
        decoder: &FrameDecoder,
        forward: &SharedWrite,
    ) -> Result<(), EngineError> {
        let consumed = staged.len() - decoder.buffered();
        if consumed > 0 {
            let chunk = staged.split_to(consumed);
            forward.lock().await.write_all(&chunk).await?;
        }
        Ok(())
    }

    async fn handle_h2_event(&self, event: StreamEvent, host: &str, port: u16) {
        match event {
            StreamEvent::ExchangeComplete {
                stream_id,
                request,
                response,
            } => {
                debug!(host, stream_id, status = response.status, "h2 exchange complete");
                let mut exchange = Exchange::new(host.to_string(), port, Scheme::Https, request);
                exchange.complete(response);
                self.emit(exchange).await;
            }
            StreamEvent::StreamReset {
                stream_id,
                error_code,
                request,
            } => {
                debug!(host, stream_id, code = ?error_code, "h2 stream reset");
                if let Some(request) = request {
                    // Aborted in flight; record what we have.
                    let exchange = Exchange::new(host.to_string(), port, Scheme::Https, request);
                    self.emit(exchange).await;
                }
            }
            StreamEvent::GoAway {
                last_stream_id,
                error_code,
            } => {
                debug!(host, last_stream_id, code = ?error_code, "h2 GOAWAY observed");
            }
        }
    }

    /// Opaque CONNECT tunnel, no interception or capture.
    async fn relay_opaque(
        &self,
        mut client: Transport,
        mut upstream: Transport,
    ) -> Result<(), EngineError> {
        let (from_client, from_upstream) =
            tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
        debug!(from_client, from_upstream, "opaque tunnel closed");
        Ok(())
    }

    /// Scope gates consideration; filters gate persistence; neither gates
    /// the relay that already happened.
    async fn emit(&self, exchange: Exchange) {
        let in_scope = self
            .scope
            .snapshot()
            .matches(&exchange.host, exchange.path());
        if !in_scope {
            debug!(host = %exchange.host, "exchange out of scope, not persisted");
            return;
        }
        if !self.filters.snapshot().admits(&exchange) {
            debug!(host = %exchange.host, "exchange dropped by capture filters");
            return;
        }
        let record = ExchangeRecord::from_exchange(&exchange, in_scope, self.config.max_body_bytes);
        self.sink.emit(record).await;
    }

    async fn emit_upstream_failure(
        &self,
        host: &str,
        port: u16,
        scheme: Scheme,
        request: Request,
        response: Response,
    ) {
        let mut exchange = Exchange::new(host.to_string(), port, scheme, request);
        exchange.fail_upstream(response);
        self.emit(exchange).await;
    }
}

/// Split `host:port`, tolerating a bracketed IPv6 literal.
pub fn parse_authority(target: &str, default_port: u16) -> Option<(String, u16)> {
    if target.is_empty() {
        return None;
    }
    if let Some(rest) = target.strip_prefix('[') {
        let (host, rest) = rest.split_once(']')?;
        let port = match rest.strip_prefix(':') {
            Some(port) => port.parse().ok()?,
            None => default_port,
        };
        return Some((host.to_string(), port));
    }
    let mut parts = target.rsplitn(2, ':');
    let first = parts.next()?;
    match parts.next() {
        Some(host) => {
            let port: u16 = first.parse().ok()?;
            Some((host.to_string(), port))
        }
        None => Some((first.to_string(), default_port)),
    }
}

/// Destination for a non-CONNECT request: absolute-form target, else the
/// Host header.
fn request_host_port(request: &Request, default_port: u16) -> Option<(String, u16)> {
    if let Some(rest) = request
        .target
        .strip_prefix("http://")
        .or_else(|| request.target.strip_prefix("https://"))
    {
        let authority = rest.split('/').next().unwrap_or(rest);
        return parse_authority(authority, default_port);
    }
    parse_authority(request.host()?, default_port)
}

/// Strip scheme and authority from an absolute-form target.
fn origin_form(target: &str) -> String {
    if let Some(rest) = target.splitn(2, "://").nth(1) {
        match rest.find('/') {
            Some(idx) => rest[idx..].to_string(),
            None => "/".to_string(),
        }
    } else {
        target.to_string()
    }
}

fn synthesize_error(status: u16, reason: &str, detail: &str) -> Response {
    let body = format!("periscope: {detail}\n");
    let mut response = Response::new(status);
    response.version = HttpVersion::Http11;
    response.reason = reason.to_string();
    response
        .headers
        .push("Content-Type", "text/plain; charset=utf-8");
    response
        .headers
        .push("Content-Length", body.len().to_string());
    response.headers.push("Connection", "close");
    response.body = body.into_bytes();
    response
}

fn error_code_of(error: &Http2Error) -> u32 {
    match error {
        Http2Error::Connection { code, .. } | Http2Error::Stream { code, .. } => code.as_u32(),
        Http2Error::HpackDecode => crate::http2::StreamErrorCode::CompressionError.as_u32(),
        Http2Error::FrameTooLarge { .. } => {
            crate::http2::StreamErrorCode::FrameSizeError.as_u32()
        }
        _ => crate::http2::StreamErrorCode::ProtocolError.as_u32(),
    }
}
