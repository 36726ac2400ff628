//! End-to-end proxy tests over real sockets.
//!
//! Each test binds the engine on an ephemeral port, runs a stub upstream,
//! and drives a raw TCP client through it, then inspects what reached the
//! in-memory sink.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use periscope::config::ProxyConfig;
use periscope::engine::ProxyEngine;
use periscope::exchange::ExchangeOutcome;
use periscope::filter::{CaptureRule, CapturePipeline, FilterField, FilterHandle, FilterOp};
use periscope::scope::{
    PatternKind, RuleAction, ScopeConfig, ScopeHandle, ScopeRule, ScopeSet, TargetField,
};
use periscope::sink::{spawn_sink, MemorySink};
use periscope::tls::{Authority, AuthorityConfig};

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    proxy_addr: std::net::SocketAddr,
    sink: Arc<MemorySink>,
}

/// RUST_LOG-driven tracing for test debugging.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Scope admitting every host.
fn scope_all() -> ScopeConfig {
    ScopeConfig {
        rules: vec![ScopeRule {
            kind: PatternKind::Wildcard,
            target: TargetField::Host,
            pattern: "*".to_string(),
            action: RuleAction::Include,
            enabled: true,
        }],
        default_in_scope: false,
    }
}

async fn start_proxy(
    scope_config: ScopeConfig,
    capture_rules: Vec<CaptureRule>,
    intercept_tls: bool,
) -> Harness {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let authority_config = AuthorityConfig {
        cert_path: dir.path().join("root-cert.pem"),
        key_path: dir.path().join("root-key.pem"),
        ..AuthorityConfig::default()
    };
    let authority = Arc::new(
        Authority::load_or_generate(authority_config)
            .await
            .expect("authority"),
    );
    // Keep the tempdir alive for the test process.
    std::mem::forget(dir);

    let config = ProxyConfig {
        listen_port: 0,
        intercept_tls,
        ..ProxyConfig::default()
    };
    let scope = Arc::new(ScopeHandle::new(
        ScopeSet::compile(&scope_config).expect("scope"),
    ));
    let filters = Arc::new(FilterHandle::new(
        CapturePipeline::compile(&capture_rules).expect("filters"),
    ));
    let sink = Arc::new(MemorySink::new());
    let sink_handle = spawn_sink(sink.clone(), 64);

    let engine = Arc::new(ProxyEngine::new(config, authority, scope, filters, sink_handle));
    let (listener, proxy_addr) = engine.bind().await.expect("bind");
    tokio::spawn(engine.serve(listener));

    Harness { proxy_addr, sink }
}

/// Stub origin answering every request with a fixed 200 and closing policy
/// left to the client.
async fn start_upstream(response: &'static [u8]) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("upstream bind");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                loop {
                    // One request per read is enough for these tests.
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {
                            if stream.write_all(response).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

async fn read_until_body_end(stream: &mut TcpStream, content_length: usize) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        if let Some(head_end) = find_head_end(&collected) {
            if collected.len() >= head_end + content_length {
                return collected;
            }
        }
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("read timed out")
            .expect("read");
        if n == 0 {
            return collected;
        }
        collected.extend_from_slice(&buf[..n]);
    }
}

fn find_head_end(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

async fn wait_for_records(sink: &MemorySink, count: usize) {
    for _ in 0..100 {
        if sink.len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("sink never reached {count} records, has {}", sink.len());
}

// ============================================================================
// Plain HTTP forwarding
// ============================================================================

const UPSTREAM_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello";

#[tokio::test]
async fn test_plain_http_request_is_relayed_and_recorded() {
    let upstream = start_upstream(UPSTREAM_RESPONSE).await;
    let harness = start_proxy(scope_all(), Vec::new(), true).await;

    let mut client = TcpStream::connect(harness.proxy_addr).await.expect("connect");
    let request = format!(
        "GET http://{upstream}/foo HTTP/1.1\r\nHost: {upstream}\r\nConnection: close\r\n\r\n"
    );
    client.write_all(request.as_bytes()).await.expect("write");

    let raw = read_until_body_end(&mut client, 5).await;
    let text = String::from_utf8_lossy(&raw);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "got: {text}");
    assert!(text.ends_with("hello"), "got: {text}");
    // Header bytes pass through untouched.
    assert!(text.contains("Content-Type: text/plain\r\n"));

    wait_for_records(&harness.sink, 1).await;
    let records = harness.sink.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.method, "GET");
    assert_eq!(record.path, "/foo");
    assert_eq!(record.status, Some(200));
    assert_eq!(record.host, "127.0.0.1");
    assert_eq!(record.port, upstream.port());
    assert!(record.in_scope);
    assert_eq!(record.outcome, ExchangeOutcome::Completed);
    assert_eq!(record.response_body, b"hello");
}

#[tokio::test]
async fn test_keep_alive_carries_multiple_exchanges() {
    let upstream = start_upstream(UPSTREAM_RESPONSE).await;
    let harness = start_proxy(scope_all(), Vec::new(), true).await;

    let mut client = TcpStream::connect(harness.proxy_addr).await.expect("connect");
    for path in ["/first", "/second"] {
        let request = format!(
            "GET http://{upstream}{path} HTTP/1.1\r\nHost: {upstream}\r\n\r\n"
        );
        client.write_all(request.as_bytes()).await.expect("write");
        let raw = read_until_body_end(&mut client, 5).await;
        assert!(raw.starts_with(b"HTTP/1.1 200 OK\r\n"));
    }

    wait_for_records(&harness.sink, 2).await;
    let records = harness.sink.records();
    let paths: Vec<_> = records.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["/first", "/second"]);
}

#[tokio::test]
async fn test_unreachable_upstream_yields_502_and_failure_record() {
    let harness = start_proxy(scope_all(), Vec::new(), true).await;

    // Nothing listens here; connect is refused immediately.
    let dead = {
        let reserved = TcpListener::bind("127.0.0.1:0").await.expect("reserve port");
        reserved.local_addr().expect("addr")
    };

    let mut client = TcpStream::connect(harness.proxy_addr).await.expect("connect");
    let request = format!("GET http://{dead}/x HTTP/1.1\r\nHost: {dead}\r\n\r\n");
    client.write_all(request.as_bytes()).await.expect("write");

    let mut raw = Vec::new();
    client.read_to_end(&mut raw).await.expect("read");
    let text = String::from_utf8_lossy(&raw);
    assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "got: {text}");

    wait_for_records(&harness.sink, 1).await;
    let records = harness.sink.records();
    assert_eq!(records[0].outcome, ExchangeOutcome::UpstreamFailed);
    assert_eq!(records[0].status, Some(502));
}

// ============================================================================
// Scope and filter gating
// ============================================================================

#[tokio::test]
async fn test_out_of_scope_exchange_is_relayed_but_not_recorded() {
    let upstream = start_upstream(UPSTREAM_RESPONSE).await;
    // Empty rule list and default out-of-scope: nothing is persisted.
    let harness = start_proxy(ScopeConfig::default(), Vec::new(), true).await;

    let mut client = TcpStream::connect(harness.proxy_addr).await.expect("connect");
    let request = format!(
        "GET http://{upstream}/foo HTTP/1.1\r\nHost: {upstream}\r\nConnection: close\r\n\r\n"
    );
    client.write_all(request.as_bytes()).await.expect("write");

    // Relay still happens in full.
    let raw = read_until_body_end(&mut client, 5).await;
    assert!(raw.starts_with(b"HTTP/1.1 200 OK\r\n"));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(harness.sink.is_empty());
}

#[tokio::test]
async fn test_capture_filter_drops_without_touching_relay() {
    let upstream = start_upstream(UPSTREAM_RESPONSE).await;
    // Only non-200 responses are kept.
    let rules = vec![CaptureRule {
        field: FilterField::Status,
        op: FilterOp::NotEquals,
        value: "200".to_string(),
    }];
    let harness = start_proxy(scope_all(), rules, true).await;

    let mut client = TcpStream::connect(harness.proxy_addr).await.expect("connect");
    let request = format!(
        "GET http://{upstream}/foo HTTP/1.1\r\nHost: {upstream}\r\nConnection: close\r\n\r\n"
    );
    client.write_all(request.as_bytes()).await.expect("write");

    let raw = read_until_body_end(&mut client, 5).await;
    assert!(raw.starts_with(b"HTTP/1.1 200 OK\r\n"));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(harness.sink.is_empty());
}

// ============================================================================
// CONNECT without interception
// ============================================================================

#[tokio::test]
async fn test_connect_without_interception_relays_opaquely() {
    // Echo upstream: whatever arrives comes straight back.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let upstream = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 1024];
        while let Ok(n) = stream.read(&mut buf).await {
            if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                return;
            }
        }
    });

    let harness = start_proxy(scope_all(), Vec::new(), false).await;
    let mut client = TcpStream::connect(harness.proxy_addr).await.expect("connect");
    let request = format!("CONNECT {upstream} HTTP/1.1\r\nHost: {upstream}\r\n\r\n");
    client.write_all(request.as_bytes()).await.expect("write");

    let mut buf = [0u8; 1024];
    let n = client.read(&mut buf).await.expect("read established");
    let established = String::from_utf8_lossy(&buf[..n]);
    assert!(
        established.starts_with("HTTP/1.1 200 Connection Established\r\n"),
        "got: {established}"
    );

    // Not HTTP at all; the tunnel must not care.
    client.write_all(b"opaque payload").await.expect("write payload");
    let n = client.read(&mut buf).await.expect("read echo");
    assert_eq!(&buf[..n], b"opaque payload");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.sink.is_empty());
}

#[tokio::test]
async fn test_connect_to_excluded_host_is_tunneled_opaquely() {
    // Echo upstream again; an intercepting proxy would answer the first
    // bytes with a TLS alert instead of echoing them.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let upstream = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 1024];
        while let Ok(n) = stream.read(&mut buf).await {
            if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                return;
            }
        }
    });

    // Interception on, but the target host carries an explicit exclusion.
    let scope = ScopeConfig {
        rules: vec![
            ScopeRule {
                kind: PatternKind::Wildcard,
                target: TargetField::Host,
                pattern: "127.0.0.1".to_string(),
                action: RuleAction::Exclude,
                enabled: true,
            },
            ScopeRule {
                kind: PatternKind::Wildcard,
                target: TargetField::Host,
                pattern: "*".to_string(),
                action: RuleAction::Include,
                enabled: true,
            },
        ],
        default_in_scope: false,
    };
    let harness = start_proxy(scope, Vec::new(), true).await;

    let mut client = TcpStream::connect(harness.proxy_addr).await.expect("connect");
    let request = format!("CONNECT {upstream} HTTP/1.1\r\nHost: {upstream}\r\n\r\n");
    client.write_all(request.as_bytes()).await.expect("write");

    let mut buf = [0u8; 1024];
    let n = client.read(&mut buf).await.expect("read established");
    assert!(buf[..n].starts_with(b"HTTP/1.1 200 Connection Established\r\n"));

    client.write_all(b"excluded traffic").await.expect("write payload");
    let n = client.read(&mut buf).await.expect("read echo");
    assert_eq!(&buf[..n], b"excluded traffic");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.sink.is_empty());
}

// ============================================================================
// Malformed input
// ============================================================================

#[tokio::test]
async fn test_malformed_request_gets_400() {
    let harness = start_proxy(scope_all(), Vec::new(), true).await;
    let mut client = TcpStream::connect(harness.proxy_addr).await.expect("connect");
    client
        .write_all(b"NOT A REQUEST\r\n\r\n")
        .await
        .expect("write");

    let mut raw = Vec::new();
    client.read_to_end(&mut raw).await.expect("read");
    assert!(raw.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
}

#[tokio::test]
async fn test_smuggling_shaped_request_is_rejected() {
    let upstream = start_upstream(UPSTREAM_RESPONSE).await;
    let harness = start_proxy(scope_all(), Vec::new(), true).await;

    let mut client = TcpStream::connect(harness.proxy_addr).await.expect("connect");
    let request = format!(
        "POST http://{upstream}/submit HTTP/1.1\r\nHost: {upstream}\r\nContent-Length: 4\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n"
    );
    client.write_all(request.as_bytes()).await.expect("write");

    let mut raw = Vec::new();
    client.read_to_end(&mut raw).await.expect("read");
    assert!(raw.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.sink.is_empty());
}
