//! Periscope - Intercepting Proxy Network Core
//!
//! Periscope is the network engine of an intercepting proxy: it terminates
//! TLS toward clients with certificates forged on the fly, opens independent
//! sessions toward real upstreams, speaks HTTP/1.1 and HTTP/2 natively, and
//! hands every completed exchange to a capture pipeline.
//!
//! ## Features
//!
//! - **HTTP/1.1 & HTTP/2**: Own codecs for both protocols, selected by ALPN
//! - **TLS Interception**: Per-host leaf certificates minted from a local CA
//! - **SOCKS Upstreams**: Optional SOCKS4/4a/5 upstream routing
//! - **Scope & Filters**: First-match-wins scoping and capture filters that
//!   gate persistence without ever touching the relay
//! - **Sink Boundary**: Exchanges leave the core as flat records over a
//!   bounded channel
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use periscope::config::ProxyConfig;
//! use periscope::engine::ProxyEngine;
//! use periscope::filter::{CapturePipeline, FilterHandle};
//! use periscope::scope::{ScopeConfig, ScopeHandle, ScopeSet};
//! use periscope::sink::{spawn_sink, MemorySink};
//! use periscope::tls::{Authority, AuthorityConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProxyConfig::from_env()?;
//!     let authority = Arc::new(Authority::load_or_generate(AuthorityConfig::default()).await?);
//!     let scope = Arc::new(ScopeHandle::new(ScopeSet::compile(&ScopeConfig::default())?));
//!     let filters = Arc::new(FilterHandle::new(CapturePipeline::compile(&[])?));
//!     let sink_impl = Arc::new(MemorySink::new());
//!     let sink = spawn_sink(sink_impl, config.sink_capacity);
//!
//!     let engine = Arc::new(ProxyEngine::new(config, authority, scope, filters, sink));
//!     engine.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - `engine` - Accept loop, CONNECT handling, relay loops
//! - `http1` / `http2` - Protocol codecs and HTTP/2 stream state
//! - `tls` - Interception authority and rustls config assembly
//! - `transport` - Plain and TLS connection wrapper
//! - `socks` - SOCKS client handshakes
//! - `scope` / `filter` - Persistence gating
//! - `sink` - Exchange records leaving the core

pub mod config;
pub mod engine;
pub mod exchange;
pub mod filter;
pub mod http1;
pub mod http2;
pub mod scope;
pub mod sink;
pub mod socks;
pub mod tls;
pub mod transport;

pub use config::ProxyConfig;
pub use engine::{EngineError, ProxyEngine};
pub use exchange::{Exchange, ExchangeOutcome, Request, Response, Scheme, ToolTag};
pub use sink::{ExchangeRecord, ExchangeSink, JsonLinesSink, MemorySink, SinkHandle};
pub use tls::{Authority, AuthorityConfig};
