//! Transport Abstraction
//!
//! One duplex byte-stream type over plain TCP or either TLS role, so the
//! codecs and relay loops never care whether a connection is encrypted.
//! A plaintext transport upgrades in place with `into_tls_server` /
//! `into_tls_client`.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("DNS resolution failed for {host}: {reason}")]
    Dns { host: String, reason: String },
    #[error("connection refused by {addr}")]
    Refused { addr: String },
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),
    #[error("transport not in plaintext state")]
    AlreadyTls,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A client or upstream connection, plaintext or TLS.
pub enum Transport {
    Plain(TcpStream),
    /// TLS accepted from a peer (we are the server).
    TlsServer(tokio_rustls::server::TlsStream<TcpStream>),
    /// TLS dialed toward a peer (we are the client).
    TlsClient(tokio_rustls::client::TlsStream<TcpStream>),
}

impl Transport {
    /// Dial `host:port` with DNS, refusal and timeout classified separately.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self, TransportError> {
        let mut addrs = lookup_host((host, port)).await.map_err(|e| TransportError::Dns {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
        let addr = addrs.next().ok_or_else(|| TransportError::Dns {
            host: host.to_string(),
            reason: "no addresses resolved".to_string(),
        })?;

        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout(connect_timeout))?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    TransportError::Refused {
                        addr: addr.to_string(),
                    }
                } else {
                    TransportError::Io(e)
                }
            })?;
        stream.set_nodelay(true).ok();
        debug!(host, port, %addr, "connected upstream");
        Ok(Transport::Plain(stream))
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            Transport::Plain(stream) => stream.peer_addr(),
            Transport::TlsServer(stream) => stream.get_ref().0.peer_addr(),
            Transport::TlsClient(stream) => stream.get_ref().0.peer_addr(),
        }
    }

    /// Accept a TLS handshake from the peer, consuming the plaintext
    /// transport. The socket is untouched on failure paths other than the
    /// bytes the handshake already consumed.
    pub async fn into_tls_server(
        self,
        config: Arc<ServerConfig>,
        handshake_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let Transport::Plain(stream) = self else {
            return Err(TransportError::AlreadyTls);
        };
        let acceptor = TlsAcceptor::from(config);
        let tls = timeout(handshake_timeout, acceptor.accept(stream))
            .await
            .map_err(|_| TransportError::Timeout(handshake_timeout))?
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        Ok(Transport::TlsServer(tls))
    }

    /// Start a TLS handshake toward the peer.
    pub async fn into_tls_client(
        self,
        config: Arc<ClientConfig>,
        server_name: &str,
        handshake_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let Transport::Plain(stream) = self else {
            return Err(TransportError::AlreadyTls);
        };
        let name = ServerName::try_from(server_name.to_owned())
            .map_err(|_| TransportError::InvalidServerName(server_name.to_string()))?;
        let connector = TlsConnector::from(config);
        let tls = timeout(handshake_timeout, connector.connect(name, stream))
            .await
            .map_err(|_| TransportError::Timeout(handshake_timeout))?
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        Ok(Transport::TlsClient(tls))
    }

    /// Negotiated ALPN protocol, if TLS is established and one was agreed.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        match self {
            Transport::Plain(_) => None,
            Transport::TlsServer(stream) => stream.get_ref().1.alpn_protocol(),
            Transport::TlsClient(stream) => stream.get_ref().1.alpn_protocol(),
        }
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, Transport::Plain(_))
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::TlsServer(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::TlsClient(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::TlsServer(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::TlsClient(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Transport::TlsServer(stream) => Pin::new(stream).poll_flush(cx),
            Transport::TlsClient(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::TlsServer(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::TlsClient(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
